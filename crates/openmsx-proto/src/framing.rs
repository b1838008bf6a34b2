//! Outgoing framing.
//!
//! Command text is wrapped verbatim. Callers that embed raw user strings
//! (breakpoint conditions, file names) escape them first with
//! [`escape_xml`].

use quick_xml::escape::partial_escape;

/// Wrap a command as a `<command>` element.
pub fn encode_command(command: &str) -> String {
    let mut out = String::with_capacity(command.len() + 19);
    out.push_str("<command>");
    out.push_str(command);
    out.push_str("</command>");
    out
}

/// Escape `&`, `<` and `>`.
pub fn escape_xml(raw: &str) -> String {
    partial_escape(raw).into_owned()
}

/// Reverse of [`escape_xml`]. Other entities are left untouched.
pub fn unescape_xml(escaped: &str) -> String {
    // `&amp;` last so "&amp;lt;" decodes to "&lt;" and not "<".
    escaped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
