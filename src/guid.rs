//! GUID parsing, formatting, and generation.
//!
//! COM identifies interfaces and classes by 128-bit GUIDs. This module
//! converts between the textual `{8-4-4-4-12}` form, the `windows` crate's
//! [`GUID`] struct, and the canonical big-endian 16-byte layout used on the
//! wire.

use crate::error::{Error, Result};
use windows::core::GUID;
use windows::Win32::System::Com::CoCreateGuid;

/// Parses a GUID from text.
///
/// Accepts the braced registry form `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`,
/// a bracket-delimited variant `[...]`, and the bare form without delimiters.
/// Hex digits may be upper- or lowercase.
///
/// # Example
///
/// ```
/// use ergonomic_com::guid::parse_guid;
///
/// let a = parse_guid("{00020400-0000-0000-C000-000000000046}").unwrap();
/// let b = parse_guid("00020400-0000-0000-c000-000000000046").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn parse_guid(text: &str) -> Result<GUID> {
    let inner = strip_delimiters(text.trim())?;

    let mut parts = inner.split('-');
    let data1 = next_group(&mut parts, 8, text)?;
    let data2 = next_group(&mut parts, 4, text)?;
    let data3 = next_group(&mut parts, 4, text)?;
    let clock = next_group(&mut parts, 4, text)?;
    let node = next_group(&mut parts, 12, text)?;
    if parts.next().is_some() {
        return Err(Error::string_conversion(format!("Malformed GUID: {text}")));
    }

    let data1 = u32::from_str_radix(data1, 16)
        .map_err(|_| Error::string_conversion(format!("Malformed GUID: {text}")))?;
    let data2 = u16::from_str_radix(data2, 16)
        .map_err(|_| Error::string_conversion(format!("Malformed GUID: {text}")))?;
    let data3 = u16::from_str_radix(data3, 16)
        .map_err(|_| Error::string_conversion(format!("Malformed GUID: {text}")))?;

    let mut data4 = [0u8; 8];
    for (i, byte) in data4.iter_mut().take(2).enumerate() {
        *byte = parse_byte(clock, i, text)?;
    }
    for (i, byte) in data4.iter_mut().skip(2).enumerate() {
        *byte = parse_byte(node, i, text)?;
    }

    Ok(GUID::from_values(data1, data2, data3, data4))
}

/// Formats a GUID in the braced uppercase registry form.
///
/// # Example
///
/// ```
/// use ergonomic_com::guid::{format_guid, parse_guid};
///
/// let g = parse_guid("00020400-0000-0000-c000-000000000046").unwrap();
/// assert_eq!(format_guid(&g), "{00020400-0000-0000-C000-000000000046}");
/// ```
pub fn format_guid(guid: &GUID) -> String {
    format!(
        "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
        guid.data1,
        guid.data2,
        guid.data3,
        guid.data4[0],
        guid.data4[1],
        guid.data4[2],
        guid.data4[3],
        guid.data4[4],
        guid.data4[5],
        guid.data4[6],
        guid.data4[7],
    )
}

/// Converts a GUID to its canonical big-endian 16-byte representation.
///
/// The first three fields are stored native-endian in [`GUID`] and
/// byte-swapped here; the trailing eight bytes pass through unchanged. That
/// asymmetry is part of the platform contract and is preserved exactly by
/// [`guid_from_bytes`].
pub fn guid_to_bytes(guid: &GUID) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&guid.data1.to_be_bytes());
    bytes[4..6].copy_from_slice(&guid.data2.to_be_bytes());
    bytes[6..8].copy_from_slice(&guid.data3.to_be_bytes());
    bytes[8..16].copy_from_slice(&guid.data4);
    bytes
}

/// Builds a GUID from its canonical big-endian 16-byte representation.
pub fn guid_from_bytes(bytes: [u8; 16]) -> GUID {
    GUID::from_values(
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        u16::from_be_bytes([bytes[4], bytes[5]]),
        u16::from_be_bytes([bytes[6], bytes[7]]),
        [
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ],
    )
}

/// Generates a new unique GUID.
pub fn new_guid() -> Result<GUID> {
    // SAFETY: CoCreateGuid has no preconditions and fills the out value on
    // success; the windows wrapper surfaces failure as Err.
    unsafe { CoCreateGuid() }.map_err(Error::from)
}

/// Extension trait for working with GUIDs.
pub trait GuidExt {
    /// Formats the GUID in the braced uppercase registry form.
    fn to_braced(&self) -> String;

    /// Converts to the canonical big-endian 16-byte representation.
    fn to_canonical_bytes(&self) -> [u8; 16];
}

impl GuidExt for GUID {
    #[inline]
    fn to_braced(&self) -> String {
        format_guid(self)
    }

    #[inline]
    fn to_canonical_bytes(&self) -> [u8; 16] {
        guid_to_bytes(self)
    }
}

fn strip_delimiters(text: &str) -> Result<&str> {
    if let Some(stripped) = text.strip_prefix('{') {
        stripped
            .strip_suffix('}')
            .ok_or_else(|| Error::string_conversion(format!("Unterminated GUID: {text}")))
    } else if let Some(stripped) = text.strip_prefix('[') {
        stripped
            .strip_suffix(']')
            .ok_or_else(|| Error::string_conversion(format!("Unterminated GUID: {text}")))
    } else {
        Ok(text)
    }
}

fn next_group<'a>(
    parts: &mut std::str::Split<'a, char>,
    len: usize,
    original: &str,
) -> Result<&'a str> {
    match parts.next() {
        Some(group) if group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()) => {
            Ok(group)
        }
        _ => Err(Error::string_conversion(format!(
            "Malformed GUID: {original}"
        ))),
    }
}

fn parse_byte(group: &str, index: usize, original: &str) -> Result<u8> {
    u8::from_str_radix(&group[index * 2..index * 2 + 2], 16)
        .map_err(|_| Error::string_conversion(format!("Malformed GUID: {original}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IID_IDISPATCH_TEXT: &str = "{00020400-0000-0000-C000-000000000046}";

    #[test]
    fn test_parse_braced() {
        let g = parse_guid(IID_IDISPATCH_TEXT).unwrap();
        assert_eq!(g, GUID::from_u128(0x00020400_0000_0000_c000_000000000046));
    }

    #[test]
    fn test_parse_bare_and_bracketed() {
        let braced = parse_guid(IID_IDISPATCH_TEXT).unwrap();
        let bare = parse_guid("00020400-0000-0000-c000-000000000046").unwrap();
        let bracketed = parse_guid("[00020400-0000-0000-C000-000000000046]").unwrap();
        assert_eq!(braced, bare);
        assert_eq!(braced, bracketed);
    }

    #[test]
    fn test_format_roundtrip() {
        let g = GUID::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
        let formatted = format_guid(&g);
        let reparsed = parse_guid(&formatted).unwrap();
        assert_eq!(format_guid(&reparsed), formatted);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_guid("").is_err());
        assert!(parse_guid("{00020400-0000-0000-C000-000000000046").is_err());
        assert!(parse_guid("00020400-0000-0000-C000").is_err());
        assert!(parse_guid("0002040G-0000-0000-C000-000000000046").is_err());
        assert!(parse_guid("00020400-0000-0000-C000-000000000046-ff").is_err());
    }

    #[test]
    fn test_canonical_byte_layout() {
        let g = GUID::from_values(
            0x0011_2233,
            0x4455,
            0x6677,
            [0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
        );
        let bytes = guid_to_bytes(&g);
        // First three groups big-endian, last eight bytes verbatim.
        assert_eq!(
            bytes,
            [
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff
            ]
        );
        assert_eq!(guid_from_bytes(bytes), g);
    }

    #[test]
    fn test_generate_is_unique() {
        let a = new_guid().unwrap();
        let b = new_guid().unwrap();
        assert_ne!(a, b);
    }
}
