//! String conversion utilities for COM APIs.
//!
//! COM and OLE Automation traffic in two string shapes: null-terminated
//! UTF-16 buffers (`PCWSTR` arguments such as member names) and BSTRs -
//! length-prefixed wide strings allocated by the system allocator. This
//! module provides ergonomic conversions for both.
//!
//! The owned BSTR type is [`windows::core::BSTR`]: it allocates with
//! `SysAllocStringLen`, frees with `SysFreeString` on drop, duplicates the
//! buffer on clone, and supports `from_raw`/`into_raw` for attach/detach
//! ownership transfers across API boundaries. [`BstrExt`] adds the checked
//! conversions this crate needs on top of it.

use crate::error::{Error, Result};
use windows::core::BSTR;

/// Converts a Rust string to a null-terminated UTF-16 vector.
///
/// # Example
///
/// ```
/// use ergonomic_com::string::to_wide;
///
/// let wide = to_wide("Hello");
/// assert_eq!(wide, vec![72, 101, 108, 108, 111, 0]);
/// ```
#[inline]
pub fn to_wide(s: &str) -> Vec<u16> {
    // Pre-allocate exact capacity to avoid reallocations.
    // UTF-16 length is at most equal to UTF-8 length. +1 for null terminator.
    let mut result = Vec::with_capacity(s.len() + 1);
    result.extend(s.encode_utf16());
    result.push(0);
    result
}

/// Converts a null-terminated UTF-16 slice to a Rust `String`.
///
/// The slice may or may not include the null terminator.
///
/// # Example
///
/// ```
/// use ergonomic_com::string::{to_wide, from_wide};
///
/// let wide = to_wide("Hello");
/// let s = from_wide(&wide).unwrap();
/// assert_eq!(s, "Hello");
/// ```
#[inline]
pub fn from_wide(wide: &[u16]) -> Result<String> {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16(&wide[..len])
        .map_err(|_| Error::string_conversion("Invalid UTF-16 sequence"))
}

/// Converts a UTF-16 slice with a known length to a Rust `String`.
///
/// Unlike `from_wide`, this does not look for a null terminator.
#[inline]
pub fn from_wide_with_len(wide: &[u16], len: usize) -> Result<String> {
    let actual_len = len.min(wide.len());
    String::from_utf16(&wide[..actual_len])
        .map_err(|_| Error::string_conversion("Invalid UTF-16 sequence"))
}

/// A wrapper for passing wide strings to COM APIs.
///
/// This type holds ownership of a null-terminated UTF-16 buffer and provides
/// a pointer that can be passed to APIs expecting `PCWSTR`, such as
/// `GetIDsOfNames` or `LoadTypeLibEx`.
#[derive(Clone)]
pub struct WideString {
    buffer: Vec<u16>,
}

impl WideString {
    /// Creates a new `WideString` from a Rust string.
    #[inline]
    pub fn new(s: &str) -> Self {
        Self { buffer: to_wide(s) }
    }

    /// Returns a pointer to the null-terminated wide string.
    #[inline]
    pub fn as_ptr(&self) -> *const u16 {
        self.buffer.as_ptr()
    }

    /// Returns the string as a PCWSTR for use with COM APIs.
    #[inline]
    pub fn as_pcwstr(&self) -> windows::core::PCWSTR {
        windows::core::PCWSTR::from_raw(self.buffer.as_ptr())
    }

    /// Returns the length in UTF-16 code units, not including the null
    /// terminator.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len().saturating_sub(1)
    }

    /// Returns true if the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the underlying buffer as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[u16] {
        &self.buffer
    }
}

impl From<&str> for WideString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WideString {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// Allocates a new BSTR holding a copy of the given Rust string.
#[inline]
pub fn bstr_from_str(s: &str) -> BSTR {
    BSTR::from(s)
}

/// Extension trait for working with BSTRs.
pub trait BstrExt {
    /// Converts the BSTR to a Rust `String`, failing on invalid UTF-16.
    ///
    /// A null BSTR converts to the empty string, matching the platform
    /// convention that null and `L""` are interchangeable.
    fn to_string_checked(&self) -> Result<String>;

    /// Returns true if the BSTR is null or zero-length.
    fn is_null_or_empty(&self) -> bool;
}

impl BstrExt for BSTR {
    fn to_string_checked(&self) -> Result<String> {
        if self.is_empty() {
            return Ok(String::new());
        }
        String::from_utf16(self.as_wide())
            .map_err(|_| Error::string_conversion("BSTR contains invalid UTF-16"))
    }

    #[inline]
    fn is_null_or_empty(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let original = "Hello, World! 🌍";
        let wide = to_wide(original);
        let back = from_wide(&wide).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn test_empty_string() {
        let wide = to_wide("");
        assert_eq!(wide, vec![0]);
        let back = from_wide(&wide).unwrap();
        assert_eq!(back, "");
    }

    #[test]
    fn test_wide_string_len() {
        let ws = WideString::new("COM");
        assert_eq!(ws.len(), 3);
        assert!(!ws.is_empty());
        assert_eq!(ws.as_slice().last(), Some(&0));
    }

    #[test]
    fn test_bstr_roundtrip() {
        let b = bstr_from_str("Automation");
        assert_eq!(b.to_string_checked().unwrap(), "Automation");
        assert_eq!(b.len(), "Automation".len());
    }

    #[test]
    fn test_null_bstr_is_empty_string() {
        let b = BSTR::new();
        assert!(b.is_null_or_empty());
        assert_eq!(b.to_string_checked().unwrap(), "");
    }

    #[test]
    fn test_bstr_clone_is_independent() {
        let a = bstr_from_str("original");
        let b = a.clone();
        // Distinct allocations: dropping one must not affect the other.
        drop(a);
        assert_eq!(b.to_string_checked().unwrap(), "original");
    }
}
