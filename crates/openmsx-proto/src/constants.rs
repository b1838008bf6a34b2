/// Root element opened by the client right after the transport connects.
pub const CONTROL_OPEN: &str = "<openmsx-control>\n";

/// Matching close tag, written once on orderly shutdown.
pub const CONTROL_CLOSE: &str = "</openmsx-control>\n";

/// Root element of the emulator's output document. Carries no data.
pub const OUTPUT_ELEMENT: &str = "openmsx-output";

/// Answer to exactly one previously sent command.
pub const REPLY_ELEMENT: &str = "reply";

/// Log line emitted by the emulator, unrelated to the command queue.
pub const LOG_ELEMENT: &str = "log";

/// Unsolicited state change notification.
pub const UPDATE_ELEMENT: &str = "update";

/// `result` attribute value of a successful reply. Anything else is a failure.
pub const RESULT_OK: &str = "ok";

/// Prefix of the socket entries an emulator publishes in its socket directory.
pub const SOCKET_PREFIX: &str = "socket.";

/// Prefix of the per-user socket directory below the temp dir.
pub const SOCKET_DIR_PREFIX: &str = "openmsx-";
