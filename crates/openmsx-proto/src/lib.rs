//! Wire codec for the openMSX control protocol.
//!
//! The client opens a `<openmsx-control>` document and writes one
//! `<command>` element per request. The emulator answers with an
//! `<openmsx-output>` document made of `<reply>`, `<log>` and `<update>`
//! elements. Replies carry no id: the n-th reply answers the n-th command.
//!
//! - [`framing`]: outgoing element wrapping and XML escaping helpers
//! - [`parser`]: incremental parser for the incoming stream
//! - [`hexcode`]: hex transport of binary blocks
//! - [`block`]: `debug read_block` / `debug write_block` command text

pub mod block;
pub mod constants;
pub mod error;
pub mod framing;
pub mod hexcode;
pub mod message;
pub mod parser;

pub use error::ProtoError;
pub use message::{Message, ReplyStatus};
pub use parser::OutputParser;
