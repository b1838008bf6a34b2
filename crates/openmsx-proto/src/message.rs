use crate::constants::RESULT_OK;

/// Outcome flag of a `<reply>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Nok,
}

impl ReplyStatus {
    /// `"ok"` is success; any other value, or a missing attribute, is not.
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            Some(RESULT_OK) => Self::Ok,
            _ => Self::Nok,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// A complete top-level element of the emulator's output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Answer to the oldest pending command.
    Reply { status: ReplyStatus, body: String },
    /// Log line, not tied to any command.
    Log { level: String, text: String },
    /// State change notification, not tied to any command.
    Update {
        kind: String,
        name: String,
        body: String,
    },
}
