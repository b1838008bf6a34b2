//! Commands and their reply handling.
//!
//! A command is consumed by exactly one of [`Command::reply_ok`],
//! [`Command::reply_nok`] or [`Command::cancel`]. Handlers are plain
//! closures; they may submit follow-up commands from inside the callback.

use std::{fmt, sync::Arc};

use openmsx_proto::{
    block::{read_block_command, write_block_command, write_range_command},
    hexcode::decode_block,
};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::ClientError;

/// Byte buffer shared between a block command and its owner.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Zero-filled [`SharedBuffer`] of `len` bytes.
pub fn shared_buffer(len: usize) -> SharedBuffer {
    Arc::new(Mutex::new(vec![0; len]))
}

type ReplyFn = Box<dyn FnOnce(Result<String, String>) + Send>;
type BodyFn = Box<dyn FnOnce(String) + Send>;
type DoneFn = Box<dyn FnOnce(BlockOutcome) + Send>;

/// Stateful command handler, for multi-step exchanges that resubmit
/// themselves from their own reply.
pub trait CommandHandler: Send {
    fn request(&self) -> String;
    fn reply_ok(self: Box<Self>, body: String);
    fn reply_nok(self: Box<Self>, body: String);
    fn cancel(self: Box<Self>);
}

/// A queued request to the emulator.
pub enum Command {
    Text(TextCommand),
    BlockRead(BlockReadCommand),
    BlockWrite(BlockWriteCommand),
    Callback(CallbackCommand),
    Custom(Box<dyn CommandHandler>),
}

impl Command {
    /// Wrap a [`CommandHandler`].
    pub fn custom(handler: impl CommandHandler + 'static) -> Self {
        Self::Custom(Box::new(handler))
    }

    /// Tcl text sent inside the `<command>` element.
    pub fn request(&self) -> String {
        match self {
            Self::Text(c) => c.text.clone(),
            Self::BlockRead(c) => c.request.clone(),
            Self::BlockWrite(c) => c.request.clone(),
            Self::Callback(c) => c.text.clone(),
            Self::Custom(h) => h.request(),
        }
    }

    pub fn reply_ok(self, body: String) {
        match self {
            Self::Text(c) => c.finish(Ok(body)),
            Self::BlockRead(c) => c.reply_ok(body),
            Self::BlockWrite(c) => c.finish(BlockOutcome::Done),
            Self::Callback(c) => (c.on_ok)(body),
            Self::Custom(h) => h.reply_ok(body),
        }
    }

    pub fn reply_nok(self, body: String) {
        match self {
            Self::Text(c) => c.finish(Err(body)),
            Self::BlockRead(c) => c.finish(BlockOutcome::Failed(body)),
            Self::BlockWrite(c) => c.finish(BlockOutcome::Failed(body)),
            Self::Callback(c) => {
                if let Some(on_nok) = c.on_nok {
                    on_nok(body);
                }
            }
            Self::Custom(h) => h.reply_nok(body),
        }
    }

    /// The command will never get a reply.
    pub fn cancel(self) {
        match self {
            Self::Text(c) => debug!("cancelled: {}", c.text),
            Self::BlockRead(c) => c.finish(BlockOutcome::Cancelled),
            Self::BlockWrite(c) => c.finish(BlockOutcome::Cancelled),
            Self::Callback(c) => debug!("cancelled: {}", c.text),
            Self::Custom(h) => h.cancel(),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Text(_) => "Text",
            Self::BlockRead(_) => "BlockRead",
            Self::BlockWrite(_) => "BlockWrite",
            Self::Callback(_) => "Callback",
            Self::Custom(_) => "Custom",
        };
        f.debug_tuple(kind).field(&self.request()).finish()
    }
}

impl From<TextCommand> for Command {
    fn from(c: TextCommand) -> Self {
        Self::Text(c)
    }
}

impl From<BlockReadCommand> for Command {
    fn from(c: BlockReadCommand) -> Self {
        Self::BlockRead(c)
    }
}

impl From<BlockWriteCommand> for Command {
    fn from(c: BlockWriteCommand) -> Self {
        Self::BlockWrite(c)
    }
}

impl From<CallbackCommand> for Command {
    fn from(c: CallbackCommand) -> Self {
        Self::Callback(c)
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::Text(TextCommand::new(text))
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Self::Text(TextCommand::new(text))
    }
}

/// Plain text command. Without a handler the reply is discarded.
pub struct TextCommand {
    text: String,
    on_reply: Option<ReplyFn>,
}

impl TextCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            on_reply: None,
        }
    }

    /// `Ok(body)` on success, `Err(body)` on failure. Not called on cancel.
    pub fn with_reply(mut self, f: impl FnOnce(Result<String, String>) + Send + 'static) -> Self {
        self.on_reply = Some(Box::new(f));
        self
    }

    fn finish(self, result: Result<String, String>) {
        match self.on_reply {
            Some(f) => f(result),
            None => {
                if let Err(body) = result {
                    debug!("'{}' failed: {body}", self.text);
                }
            }
        }
    }
}

/// Command with a success closure and an optional failure closure.
pub struct CallbackCommand {
    text: String,
    on_ok: BodyFn,
    on_nok: Option<BodyFn>,
}

impl CallbackCommand {
    pub fn new(text: impl Into<String>, on_ok: impl FnOnce(String) + Send + 'static) -> Self {
        Self {
            text: text.into(),
            on_ok: Box::new(on_ok),
            on_nok: None,
        }
    }

    pub fn on_nok(mut self, f: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_nok = Some(Box::new(f));
        self
    }
}

/// How a block transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Done,
    Failed(String),
    Cancelled,
}

/// Reads `size` bytes of hex into `target[start..start + size]`.
pub struct BlockReadCommand {
    request: String,
    size: usize,
    target: SharedBuffer,
    start: usize,
    on_done: Option<DoneFn>,
}

impl BlockReadCommand {
    /// Read `size` bytes of `debuggable` starting at `offset`.
    pub fn new(debuggable: &str, offset: usize, size: usize, target: SharedBuffer) -> Self {
        Self::custom(read_block_command(debuggable, offset, size), size, target)
    }

    /// Any command whose reply is `size` bytes of hex.
    pub fn custom(request: impl Into<String>, size: usize, target: SharedBuffer) -> Self {
        Self {
            request: request.into(),
            size,
            target,
            start: 0,
            on_done: None,
        }
    }

    /// Store the block at `start` in the target buffer instead of at 0.
    pub fn at(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn on_done(mut self, f: impl FnOnce(BlockOutcome) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    fn reply_ok(self, body: String) {
        let result = {
            let mut target = self.target.lock();
            let available = target.len();
            match self
                .start
                .checked_add(self.size)
                .and_then(|end| target.get_mut(self.start..end))
            {
                Some(dst) => decode_block(&body, dst).map_err(|e| e.to_string()),
                None => Err(format!(
                    "block of {} bytes at {} does not fit a {available} byte buffer",
                    self.size, self.start
                )),
            }
        };
        match result {
            Ok(()) => self.finish(BlockOutcome::Done),
            Err(reason) => {
                error!("'{}': {reason}", self.request);
                self.finish(BlockOutcome::Failed(reason));
            }
        }
    }

    fn finish(self, outcome: BlockOutcome) {
        if let Some(f) = self.on_done {
            f(outcome);
        }
    }
}

/// Writes a range of a local buffer back to a debuggable.
pub struct BlockWriteCommand {
    request: String,
    on_done: Option<DoneFn>,
}

impl BlockWriteCommand {
    /// Write `source[offset..offset + count]` to `debuggable` at `offset`.
    pub fn new(
        debuggable: &str,
        offset: usize,
        count: usize,
        source: &[u8],
    ) -> Result<Self, ClientError> {
        Ok(Self {
            request: write_range_command(debuggable, offset, count, source)?,
            on_done: None,
        })
    }

    /// Write all of `data` to `debuggable` at `offset`.
    pub fn from_bytes(debuggable: &str, offset: usize, data: &[u8]) -> Self {
        Self {
            request: write_block_command(debuggable, offset, data),
            on_done: None,
        }
    }

    pub fn on_done(mut self, f: impl FnOnce(BlockOutcome) + Send + 'static) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    fn finish(self, outcome: BlockOutcome) {
        if let Some(f) = self.on_done {
            f(outcome);
        } else if let BlockOutcome::Failed(reason) = outcome {
            error!("'{}' failed: {reason}", self.request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Clone + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |v| sink.lock().push(v))
    }

    #[test]
    fn text_command_reports_ok_and_nok() {
        let (log, rec) = recorder();
        let r = rec.clone();
        Command::from(TextCommand::new("set pause").with_reply(move |res| r(res)))
            .reply_ok("true".into());
        let r = rec.clone();
        Command::from(TextCommand::new("bogus").with_reply(move |res| r(res)))
            .reply_nok("invalid command name".into());
        Command::from(TextCommand::new("never").with_reply(move |res| rec(res))).cancel();
        assert_eq!(
            *log.lock(),
            vec![Ok("true".to_string()), Err("invalid command name".to_string())]
        );
    }

    #[test]
    fn callback_command_without_nok_ignores_failure() {
        let (log, rec) = recorder();
        let r = rec.clone();
        Command::from(CallbackCommand::new("a", move |b| r(format!("ok {b}"))))
            .reply_nok("x".into());
        let r = rec.clone();
        Command::from(
            CallbackCommand::new("b", move |b| r(format!("ok {b}")))
                .on_nok(move |b| rec(format!("nok {b}"))),
        )
        .reply_nok("y".into());
        assert_eq!(*log.lock(), vec!["nok y".to_string()]);
    }

    #[test]
    fn request_text() {
        assert_eq!(Command::from("debug list").request(), "debug list");
        let read = BlockReadCommand::new("memory", 0xc000, 16, shared_buffer(16));
        assert_eq!(
            Command::from(read).request(),
            "debug_bin2hex [ debug read_block {memory} 49152 16 ]"
        );
        let write = BlockWriteCommand::new("memory", 1, 2, &[9, 0xab, 0xcd, 7]).unwrap();
        assert_eq!(
            Command::from(write).request(),
            "debug write_block {memory} 1 [ debug_hex2bin \"ABCD\" ]"
        );
        let write = BlockWriteCommand::from_bytes("VDP regs", 7, &[0xf1]);
        assert_eq!(
            Command::from(write).request(),
            "debug write_block {VDP regs} 7 [ debug_hex2bin \"F1\" ]"
        );
    }

    #[test]
    fn block_read_decodes_into_target() {
        let target = shared_buffer(6);
        let (log, rec) = recorder();
        Command::from(
            BlockReadCommand::new("memory", 0, 3, target.clone())
                .at(2)
                .on_done(rec),
        )
        .reply_ok("0aFf10".into());
        assert_eq!(*target.lock(), vec![0, 0, 0x0a, 0xff, 0x10, 0]);
        assert_eq!(*log.lock(), vec![BlockOutcome::Done]);
    }

    #[test]
    fn block_read_length_mismatch_fails_without_writing() {
        let target = Arc::new(Mutex::new(vec![0x55; 2]));
        let (log, rec) = recorder();
        Command::from(BlockReadCommand::new("memory", 0, 2, target.clone()).on_done(rec))
            .reply_ok("414".into());
        assert_eq!(*target.lock(), vec![0x55, 0x55]);
        assert!(matches!(log.lock()[..], [BlockOutcome::Failed(_)]));
    }

    #[test]
    fn block_read_outside_target_fails() {
        let target = shared_buffer(2);
        let (log, rec) = recorder();
        Command::from(
            BlockReadCommand::new("memory", 0, 2, target.clone())
                .at(1)
                .on_done(rec),
        )
        .reply_ok("4142".into());
        assert_eq!(*target.lock(), vec![0, 0]);
        assert!(matches!(log.lock()[..], [BlockOutcome::Failed(_)]));
    }

    #[test]
    fn block_read_nok_and_cancel_leave_target_alone() {
        let target = Arc::new(Mutex::new(vec![1, 2]));
        let (log, rec) = recorder();
        Command::from(BlockReadCommand::new("memory", 0, 2, target.clone()).on_done(rec.clone()))
            .reply_nok("no such debuggable".into());
        Command::from(BlockReadCommand::new("memory", 0, 2, target.clone()).on_done(rec)).cancel();
        assert_eq!(*target.lock(), vec![1, 2]);
        assert_eq!(
            *log.lock(),
            vec![
                BlockOutcome::Failed("no such debuggable".into()),
                BlockOutcome::Cancelled
            ]
        );
    }

    #[test]
    fn block_write_rejects_out_of_range_source() {
        assert!(matches!(
            BlockWriteCommand::new("memory", 3, 4, &[0; 4]),
            Err(ClientError::Protocol(_))
        ));
    }

    struct Counting(Arc<Mutex<Vec<&'static str>>>);

    impl CommandHandler for Counting {
        fn request(&self) -> String {
            "custom".into()
        }
        fn reply_ok(self: Box<Self>, _body: String) {
            self.0.lock().push("ok");
        }
        fn reply_nok(self: Box<Self>, _body: String) {
            self.0.lock().push("nok");
        }
        fn cancel(self: Box<Self>) {
            self.0.lock().push("cancel");
        }
    }

    #[test]
    fn custom_handler_receives_outcome() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cmd = Command::custom(Counting(log.clone()));
        assert_eq!(format!("{cmd:?}"), "Custom(\"custom\")");
        cmd.cancel();
        Command::custom(Counting(log.clone())).reply_ok(String::new());
        assert_eq!(*log.lock(), vec!["cancel", "ok"]);
    }
}
