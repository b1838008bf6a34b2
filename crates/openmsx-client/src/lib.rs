//! openMSX debug-protocol client.
//!
//! Commands are queued on a [`Connection`] in send order and answered in the
//! same order; every command gets exactly one outcome (reply, failure or
//! cancellation). The process-wide [`Client`] hub owns at most one
//! connection and fans connection lifecycle, log and update notifications
//! out to its listeners.
//!
//! # Architecture
//!
//! - [`command`]: command variants and their reply handling
//! - [`connection`]: FIFO correlation of commands and replies
//! - [`transport`]: tokio reader/writer tasks driving a connection
//! - [`client`]: single-connection hub and listener registry
//! - [`discovery`]: finding running emulators through their socket files
//! - [`probe`]: small multi-command queries (title, debuggable names)
//! - [`session`]: post-connect bootstrap sequence
//! - [`error`]: Error types

pub mod client;
pub mod command;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod probe;
pub mod session;
pub mod transport;

pub use client::{Client, ClientListener, CommandSink, Subscription, WeakClient};
pub use command::{
    BlockOutcome, BlockReadCommand, BlockWriteCommand, CallbackCommand, Command, CommandHandler,
    SharedBuffer, TextCommand,
};
pub use connection::{CloseReason, Connection, ConnectionEvent, ConnectionState};
pub use error::ClientError;
pub use openmsx_proto::{Message, ReplyStatus};
