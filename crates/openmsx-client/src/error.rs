//! Client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("no emulator connection")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("insecure socket location {path}: {reason}")]
    Insecure { path: String, reason: String },

    #[error("no running emulator found")]
    NoEmulator,

    #[error("{0} running emulators found, pick one explicitly")]
    Ambiguous(usize),

    #[error("protocol error: {0}")]
    Protocol(#[from] openmsx_proto::ProtoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel send error")]
    ChannelSend,
}
