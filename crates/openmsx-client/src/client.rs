//! The client hub: at most one active emulator connection plus the set of
//! components listening to it.
//!
//! Every consumer sends through the hub and never holds the connection
//! itself, so replacing or losing the connection is invisible to them apart
//! from the `connection_ready` / `connection_terminated` notifications.

use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    command::Command,
    connection::{Connection, ConnectionEvent},
};

/// Receiver of hub notifications. Every method defaults to a no-op.
pub trait ClientListener: Send + Sync {
    fn connection_ready(&self) {}
    fn connection_terminated(&self) {}
    fn log(&self, _level: &str, _message: &str) {}
    fn update(&self, _kind: &str, _name: &str, _message: &str) {}
}

/// Anything commands can be submitted to.
pub trait CommandSink: Send + Sync {
    fn submit(&self, cmd: Command);
}

impl CommandSink for Connection {
    fn submit(&self, cmd: Command) {
        self.send_command(cmd);
    }
}

impl CommandSink for Client {
    fn submit(&self, cmd: Command) {
        self.send_command(cmd);
    }
}

impl<T: CommandSink + ?Sized> CommandSink for Arc<T> {
    fn submit(&self, cmd: Command) {
        (**self).submit(cmd);
    }
}

/// Handle returned by [`Client::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

static INSTANCE: Lazy<Client> = Lazy::new(Client::new);

#[derive(Default)]
struct ClientInner {
    connection: Mutex<Option<Arc<Connection>>>,
    listeners: Mutex<Vec<(Subscription, Arc<dyn ClientListener>)>>,
    next_subscription: Mutex<u64>,
}

#[derive(Clone, Default)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide hub.
    pub fn instance() -> &'static Client {
        &INSTANCE
    }

    /// Adopt `connection` as the active one, replacing any previous one.
    pub fn connect_to_emulator(&self, connection: Arc<Connection>) {
        self.close_connection();

        let id = connection.id();
        let hub = Arc::downgrade(&self.inner);
        connection.set_event_sink(Some(Arc::new(move |event| {
            if let Some(inner) = hub.upgrade() {
                Client::handle_event(&inner, id, event);
            }
        })));
        *self.inner.connection.lock() = Some(connection.clone());
        info!(id, "emulator connection ready");
        self.broadcast(|l| l.connection_ready());

        // Closed before the sink was installed: the event was lost.
        if connection.is_closed() {
            Self::detach(&self.inner, id);
        }
    }

    /// Close the active connection, if any. Pending commands are cancelled.
    pub fn close_connection(&self) {
        let connection = self.inner.connection.lock().take();
        if let Some(connection) = connection {
            connection.set_event_sink(None);
            connection.close();
            info!(id = connection.id(), "emulator connection closed");
            self.broadcast(|l| l.connection_terminated());
        }
    }

    /// Send on the active connection, or cancel if there is none.
    pub fn send_command(&self, cmd: impl Into<Command>) {
        let cmd = cmd.into();
        let connection = self.inner.connection.lock().clone();
        match connection {
            Some(connection) => connection.send_command(cmd),
            None => {
                debug!("no connection, cancelling {cmd:?}");
                cmd.cancel();
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .connection
            .lock()
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// The active connection, if any.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.connection.lock().clone()
    }

    pub fn subscribe(&self, listener: Arc<dyn ClientListener>) -> Subscription {
        let subscription = {
            let mut next = self.inner.next_subscription.lock();
            *next += 1;
            Subscription(*next)
        };
        self.inner.listeners.lock().push((subscription, listener));
        subscription
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner
            .listeners
            .lock()
            .retain(|(s, _)| *s != subscription);
    }

    pub fn downgrade(&self) -> WeakClient {
        WeakClient(Arc::downgrade(&self.inner))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    fn broadcast(&self, f: impl Fn(&dyn ClientListener)) {
        Self::broadcast_to(&self.inner, f);
    }

    fn broadcast_to(inner: &ClientInner, f: impl Fn(&dyn ClientListener)) {
        // Snapshot so listeners may (un)subscribe from inside a callback.
        let listeners: Vec<_> = inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    fn handle_event(inner: &Arc<ClientInner>, id: u64, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Log { level, message } => {
                Self::broadcast_to(inner, |l| l.log(&level, &message));
            }
            ConnectionEvent::Update {
                kind,
                name,
                message,
            } => {
                Self::broadcast_to(inner, |l| l.update(&kind, &name, &message));
            }
            ConnectionEvent::Closed { reason } => {
                info!(id, "emulator connection lost: {reason}");
                Self::detach(inner, id);
            }
        }
    }

    /// Forget connection `id` if it is still the active one.
    fn detach(inner: &ClientInner, id: u64) {
        let detached = {
            let mut slot = inner.connection.lock();
            if slot.as_ref().is_some_and(|c| c.id() == id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(connection) = detached {
            connection.set_event_sink(None);
            Self::broadcast_to(inner, |l| l.connection_terminated());
        }
    }
}

/// Weak handle to a hub, for handlers that must not keep it alive.
#[derive(Clone)]
pub struct WeakClient(Weak<ClientInner>);

impl WeakClient {
    pub fn upgrade(&self) -> Option<Client> {
        self.0.upgrade().map(|inner| Client { inner })
    }
}
