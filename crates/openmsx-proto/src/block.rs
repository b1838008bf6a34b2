//! Command text for moving blocks between a debuggable and a local buffer.
//!
//! Both commands rely on the `debug_bin2hex` / `debug_hex2bin` helper procs
//! the client defines on the emulator side right after connecting.

use crate::{error::ProtoError, hexcode::encode_block};

/// Brace-quote a debuggable name for Tcl unless it already is.
///
/// Debuggable names contain spaces (`physical VRAM`, `CPU regs`), so they
/// must be passed as a single Tcl word.
pub fn quote_name(name: &str) -> String {
    if name.starts_with('{') && name.ends_with('}') && name.len() >= 2 {
        name.to_string()
    } else {
        format!("{{{name}}}")
    }
}

/// `debug_bin2hex [ debug read_block {NAME} OFFSET SIZE ]`
pub fn read_block_command(debuggable: &str, offset: usize, size: usize) -> String {
    format!(
        "debug_bin2hex [ debug read_block {} {offset} {size} ]",
        quote_name(debuggable)
    )
}

/// `debug write_block {NAME} OFFSET [ debug_hex2bin "HEX" ]`
pub fn write_block_command(debuggable: &str, offset: usize, data: &[u8]) -> String {
    format!(
        "debug write_block {} {offset} [ debug_hex2bin \"{}\" ]",
        quote_name(debuggable),
        encode_block(data)
    )
}

/// Write command for `count` bytes of `source`, starting at `offset`.
///
/// The same offset addresses both the source buffer and the debuggable, so a
/// local mirror of a debuggable can push back a modified range.
pub fn write_range_command(
    debuggable: &str,
    offset: usize,
    count: usize,
    source: &[u8],
) -> Result<String, ProtoError> {
    let range = offset
        .checked_add(count)
        .and_then(|end| source.get(offset..end))
        .ok_or(ProtoError::BlockRange {
            offset,
            len: count,
            available: source.len(),
        })?;
    Ok(write_block_command(debuggable, offset, range))
}
