//! One emulator connection and its queue of pending commands.
//!
//! Replies carry no id, so the queue is the only correlation: the n-th reply
//! belongs to the n-th command still pending. A [`Connection`] does no I/O
//! itself. Outgoing frames go to a channel drained by the writer task and
//! incoming bytes are pushed in through [`Connection::feed`] by the reader
//! task (see [`crate::transport`]).
//!
//! Reply handlers run with no internal lock held, so they may send further
//! commands on the same connection or close it.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use openmsx_proto::{
    Message, OutputParser,
    constants::{CONTROL_CLOSE, CONTROL_OPEN},
    framing::encode_command,
};
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::{debug, error, trace, warn};

use crate::command::Command;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Receives the notifications of one connection.
pub type EventSink = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called.
    Requested,
    /// The emulator closed the socket.
    PeerClosed,
    /// Read or write failure.
    Transport(String),
    /// Malformed output or a reply nobody asked for.
    Protocol(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("closed by client"),
            Self::PeerClosed => f.write_str("emulator closed the connection"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

/// Notifications not tied to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Log {
        level: String,
        message: String,
    },
    Update {
        kind: String,
        name: String,
        message: String,
    },
    /// Emitted once, after every pending command was cancelled.
    Closed { reason: CloseReason },
}

/// Frames for the writer task.
#[derive(Debug)]
pub enum Outgoing {
    Frame(Bytes),
    /// Shut the write half down.
    Close,
}

struct Inner {
    state: ConnectionState,
    queue: VecDeque<Command>,
    parser: OutputParser,
}

pub struct Connection {
    id: u64,
    inner: Mutex<Inner>,
    writer: mpsc::UnboundedSender<Outgoing>,
    sink: Mutex<Option<EventSink>>,
    reader: Mutex<Option<AbortHandle>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pending", &self.pending_commands())
            .finish()
    }
}

impl Connection {
    /// Start the control document on `writer`.
    pub fn new(writer: mpsc::UnboundedSender<Outgoing>) -> Arc<Self> {
        let conn = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(Inner {
                state: ConnectionState::Connecting,
                queue: VecDeque::new(),
                parser: OutputParser::new(),
            }),
            writer,
            sink: Mutex::new(None),
            reader: Mutex::new(None),
        });

        let opened = conn
            .writer
            .send(Outgoing::Frame(Bytes::from_static(CONTROL_OPEN.as_bytes())))
            .is_ok();
        conn.inner.lock().state = if opened {
            ConnectionState::Connected
        } else {
            warn!(id = conn.id, "writer closed before the control document was opened");
            ConnectionState::Closed
        };
        debug!(id = conn.id, "connection opened");
        conn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Commands sent but not yet answered.
    pub fn pending_commands(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Route log, update and close notifications to `sink`.
    pub fn set_event_sink(&self, sink: Option<EventSink>) {
        *self.sink.lock() = sink;
    }

    pub(crate) fn set_reader(&self, handle: AbortHandle) {
        if self.is_closed() {
            handle.abort();
        } else {
            *self.reader.lock() = Some(handle);
        }
    }

    /// Queue `cmd` and write its request. On a connection that is not
    /// connected the command is cancelled right away.
    pub fn send_command(&self, cmd: impl Into<Command>) {
        let cmd = cmd.into();
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            drop(inner);
            trace!(id = self.id, "not connected, cancelling {cmd:?}");
            cmd.cancel();
            return;
        }

        let frame = Bytes::from(encode_command(&cmd.request()));
        trace!(id = self.id, "sending {cmd:?}");
        inner.queue.push_back(cmd);
        // Sent under the lock so the write order matches the queue order.
        let sent = self.writer.send(Outgoing::Frame(frame)).is_ok();
        drop(inner);

        if !sent {
            self.transport_closed(CloseReason::Transport("writer task stopped".into()));
        }
    }

    /// Process a chunk read from the emulator.
    pub fn feed(&self, bytes: &[u8]) {
        let mut messages = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Connected {
                trace!(id = self.id, "ignoring {} bytes after close", bytes.len());
                return;
            }
            inner.parser.feed(bytes, &mut messages)
        };

        for message in messages {
            if self.state() != ConnectionState::Connected {
                return;
            }
            match message {
                Message::Reply { status, body } => {
                    let next = {
                        let mut inner = self.inner.lock();
                        // A concurrent close already took and cancelled the queue.
                        if inner.state != ConnectionState::Connected {
                            return;
                        }
                        inner.queue.pop_front()
                    };
                    let Some(cmd) = next else {
                        error!(id = self.id, "reply without a pending command: {body}");
                        self.shutdown(CloseReason::Protocol(
                            "reply without a pending command".into(),
                        ));
                        return;
                    };
                    if status.is_ok() {
                        cmd.reply_ok(body);
                    } else {
                        cmd.reply_nok(body);
                    }
                }
                Message::Log { level, text } => self.emit(ConnectionEvent::Log {
                    level,
                    message: text,
                }),
                Message::Update { kind, name, body } => self.emit(ConnectionEvent::Update {
                    kind,
                    name,
                    message: body,
                }),
            }
        }

        if let Err(e) = result {
            warn!(id = self.id, "{e}");
            self.shutdown(CloseReason::Protocol(e.to_string()));
        }
    }

    /// Orderly close from the client side.
    pub fn close(&self) {
        self.shutdown(CloseReason::Requested);
    }

    /// The transport reached EOF or failed.
    pub fn transport_closed(&self, reason: CloseReason) {
        self.shutdown(reason);
    }

    fn shutdown(&self, reason: CloseReason) {
        let queue = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Disconnecting | ConnectionState::Closed => return,
                ConnectionState::Connecting | ConnectionState::Connected => {}
            }
            inner.state = ConnectionState::Disconnecting;
            std::mem::take(&mut inner.queue)
        };
        debug!(id = self.id, pending = queue.len(), "closing connection: {reason}");

        // Fails quietly once the writer task is gone.
        let _ = self
            .writer
            .send(Outgoing::Frame(Bytes::from_static(CONTROL_CLOSE.as_bytes())));
        let _ = self.writer.send(Outgoing::Close);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }

        for cmd in queue {
            cmd.cancel();
        }

        self.inner.lock().state = ConnectionState::Closed;
        self.emit(ConnectionEvent::Closed { reason });
    }

    fn emit(&self, event: ConnectionEvent) {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink(event),
            None => trace!(id = self.id, "no event sink for {event:?}"),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown(CloseReason::Requested);
    }
}
