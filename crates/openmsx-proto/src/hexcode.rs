//! Hex transport of binary blocks.
//!
//! Binary data never travels raw: the emulator side converts blocks with
//! `debug_bin2hex` / `debug_hex2bin`, two characters per byte, most
//! significant nibble first.

use crate::error::ProtoError;

/// Encode a block as uppercase hex.
pub fn encode_block(data: &[u8]) -> String {
    ::hex::encode_upper(data)
}

/// Decode exactly `2 * dst.len()` hex characters into `dst`.
///
/// Upper- and lowercase digits are accepted. On error `dst` is left
/// untouched.
pub fn decode_block(text: &str, dst: &mut [u8]) -> Result<(), ProtoError> {
    let expected = dst.len() * 2;
    if text.len() != expected {
        return Err(ProtoError::HexLength {
            expected,
            actual: text.len(),
        });
    }
    if let Some((index, character)) = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_hexdigit())
    {
        return Err(ProtoError::InvalidHex { character, index });
    }
    ::hex::decode_to_slice(text, dst).map_err(|e| match e {
        ::hex::FromHexError::InvalidHexCharacter { c, index } => ProtoError::InvalidHex {
            character: c,
            index,
        },
        _ => ProtoError::HexLength {
            expected,
            actual: text.len(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_uppercase_high_nibble_first() {
        assert_eq!(encode_block(&[0x00, 0x0f, 0xa5, 0xff]), "000FA5FF");
        assert_eq!(encode_block(&[]), "");
    }

    #[test]
    fn decodes_mixed_case() {
        let mut out = [0u8; 3];
        decode_block("aBcD0f", &mut out).unwrap();
        assert_eq!(out, [0xab, 0xcd, 0x0f]);
    }

    #[test]
    fn length_mismatch_leaves_buffer_untouched() {
        let mut out = [0x55u8; 2];
        let err = decode_block("414", &mut out).unwrap_err();
        assert_eq!(
            err,
            ProtoError::HexLength {
                expected: 4,
                actual: 3
            }
        );
        assert_eq!(out, [0x55, 0x55]);
    }

    #[test]
    fn invalid_character_leaves_buffer_untouched() {
        let mut out = [0x55u8; 2];
        let err = decode_block("41zz", &mut out).unwrap_err();
        assert_eq!(
            err,
            ProtoError::InvalidHex {
                character: 'z',
                index: 2
            }
        );
        assert_eq!(out, [0x55, 0x55]);
    }
}
