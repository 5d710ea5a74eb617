//! Error handling utilities for COM and OLE Automation calls.
//!
//! Provides ergonomic error types that translate HRESULTs into idiomatic Rust
//! `Result` types. Raw status codes are converted at the boundary where they
//! are first observed; well-known failure codes map to dedicated variants and
//! everything else is carried as a generic Windows error with its decoded
//! message.

use thiserror::Error;
use windows::core::Error as WinError;
use windows::core::HRESULT;
use windows::Win32::Foundation::{
    E_ACCESSDENIED, E_INVALIDARG, E_NOINTERFACE, E_NOTIMPL, E_OUTOFMEMORY, E_POINTER,
};

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested operation is not implemented by the callee (`E_NOTIMPL`).
    #[error("Not implemented: {context}")]
    NotImplemented {
        /// Description of the operation that was not implemented.
        context: &'static str,
    },

    /// The object does not support the requested interface (`E_NOINTERFACE`).
    #[error("No such interface: {context}")]
    NoInterface {
        /// Description of the interface that was requested.
        context: &'static str,
    },

    /// A null pointer was encountered where a valid pointer was expected.
    #[error("Null pointer error: {context}")]
    NullPointer {
        /// Description of where the null pointer was encountered.
        context: &'static str,
    },

    /// Access was denied to the requested resource (`E_ACCESSDENIED`).
    #[error("Access denied: {context}")]
    AccessDenied {
        /// Description of the denied operation.
        context: &'static str,
    },

    /// The system could not allocate the required memory (`E_OUTOFMEMORY`).
    #[error("Out of memory: {context}")]
    OutOfMemory {
        /// Description of the failed allocation.
        context: &'static str,
    },

    /// An argument was rejected by the callee (`E_INVALIDARG`).
    #[error("Invalid argument: {context}")]
    InvalidArgument {
        /// Description of the rejected argument.
        context: &'static str,
    },

    /// Any other Windows API error, carrying the raw code and decoded message.
    #[error("Windows API error: {0}")]
    Windows(#[from] WinError),

    /// A member name could not be resolved on the target object.
    #[error("Member not found on {interface}: {member}")]
    MemberNotFound {
        /// The interface or object the lookup ran against.
        interface: String,
        /// The member name that failed to resolve.
        member: String,
    },

    /// A late-bound invocation failed.
    ///
    /// The message is taken from the callee's exception info when it supplied
    /// one, otherwise from the system message table for the code.
    #[error("Dispatch error invoking {member}: {message} (0x{code:08X})")]
    Dispatch {
        /// The member that was being invoked.
        member: String,
        /// The raw HRESULT, as an unsigned value for display.
        code: u32,
        /// Human-readable failure description.
        message: String,
    },

    /// A variant held a different tag than the access required.
    #[error("Variant type mismatch: expected VT {expected}, found VT {actual}")]
    TypeMismatch {
        /// The tag the accessor required.
        expected: u16,
        /// The tag actually present.
        actual: u16,
    },

    /// Two variants could not be ordered against each other.
    #[error("Variants are not comparable: VT {left} vs VT {right}")]
    Incomparable {
        /// Tag of the left operand.
        left: u16,
        /// Tag of the right operand.
        right: u16,
    },

    /// The event source does not expose the requested event interface.
    #[error("Unsupported event interface: {context}")]
    ConnectionUnsupported {
        /// Description of the interface or connection point that was missing.
        context: String,
    },

    /// The event source refused to register the sink.
    #[error("Could not register event sink: {0}")]
    ConnectionFailed(#[source] WinError),

    /// An event member name could not be resolved against the type library.
    #[error("Unknown event member: {0}")]
    UnknownEventMember(String),

    /// A string conversion error occurred.
    #[error("String conversion error: {0}")]
    StringConversion(String),

    /// A custom error with a message.
    #[error("{0}")]
    Custom(String),
}

/// A specialized `Result` type for COM operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new null pointer error with the given context.
    pub fn null_pointer(context: &'static str) -> Self {
        Error::NullPointer { context }
    }

    /// Creates a new string conversion error.
    pub fn string_conversion(msg: impl Into<String>) -> Self {
        Error::StringConversion(msg.into())
    }

    /// Creates a member-not-found error for the given target and name.
    pub fn member_not_found(interface: impl Into<String>, member: impl Into<String>) -> Self {
        Error::MemberNotFound {
            interface: interface.into(),
            member: member.into(),
        }
    }

    /// Creates a custom error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Error::Custom(msg.into())
    }

    /// Translates a failure HRESULT into the matching typed error.
    ///
    /// Well-known codes map to dedicated variants; anything else becomes a
    /// [`Error::Windows`] carrying the exact code and its decoded message.
    /// `context` names the operation for the fixed-table variants.
    pub fn from_hresult(hr: HRESULT, context: &'static str) -> Self {
        match hr {
            h if h == E_NOTIMPL => Error::NotImplemented { context },
            h if h == E_NOINTERFACE => Error::NoInterface { context },
            h if h == E_POINTER => Error::NullPointer { context },
            h if h == E_ACCESSDENIED => Error::AccessDenied { context },
            h if h == E_OUTOFMEMORY => Error::OutOfMemory { context },
            h if h == E_INVALIDARG => Error::InvalidArgument { context },
            h => Error::Windows(WinError::from_hresult(h)),
        }
    }

    /// Translates a `windows` crate error, keeping the fixed-table mapping.
    pub fn from_windows(err: WinError, context: &'static str) -> Self {
        let code = err.code();
        if code == E_NOTIMPL
            || code == E_NOINTERFACE
            || code == E_POINTER
            || code == E_ACCESSDENIED
            || code == E_OUTOFMEMORY
            || code == E_INVALIDARG
        {
            Self::from_hresult(code, context)
        } else {
            Error::Windows(err)
        }
    }

    /// Returns the raw HRESULT if this error carries one.
    pub fn hresult(&self) -> Option<HRESULT> {
        match self {
            Error::NotImplemented { .. } => Some(E_NOTIMPL),
            Error::NoInterface { .. } => Some(E_NOINTERFACE),
            Error::NullPointer { .. } => Some(E_POINTER),
            Error::AccessDenied { .. } => Some(E_ACCESSDENIED),
            Error::OutOfMemory { .. } => Some(E_OUTOFMEMORY),
            Error::InvalidArgument { .. } => Some(E_INVALIDARG),
            Error::Windows(e) => Some(e.code()),
            Error::Dispatch { code, .. } => Some(HRESULT(*code as i32)),
            Error::ConnectionFailed(e) => Some(e.code()),
            _ => None,
        }
    }
}

/// Extension trait for converting `windows` crate `Result` types.
pub trait ResultExt<T> {
    /// Converts a Windows result to our Result type, applying the fixed
    /// HRESULT mapping table.
    fn to_result(self, context: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for windows::core::Result<T> {
    fn to_result(self, context: &'static str) -> Result<T> {
        self.map_err(|e| Error::from_windows(e, context))
    }
}

/// Checks an HRESULT, mapping failures through the fixed table.
pub fn check(hr: HRESULT, context: &'static str) -> Result<()> {
    if hr.is_ok() {
        Ok(())
    } else {
        Err(Error::from_hresult(hr, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_table_mapping() {
        assert!(matches!(
            Error::from_hresult(E_NOTIMPL, "op"),
            Error::NotImplemented { .. }
        ));
        assert!(matches!(
            Error::from_hresult(E_NOINTERFACE, "op"),
            Error::NoInterface { .. }
        ));
        assert!(matches!(
            Error::from_hresult(E_POINTER, "op"),
            Error::NullPointer { .. }
        ));
        assert!(matches!(
            Error::from_hresult(E_ACCESSDENIED, "op"),
            Error::AccessDenied { .. }
        ));
        assert!(matches!(
            Error::from_hresult(E_OUTOFMEMORY, "op"),
            Error::OutOfMemory { .. }
        ));
        assert!(matches!(
            Error::from_hresult(E_INVALIDARG, "op"),
            Error::InvalidArgument { .. }
        ));
    }

    #[test]
    fn test_unknown_code_keeps_exact_value() {
        let hr = HRESULT(0x8004_2042u32 as i32);
        let err = Error::from_hresult(hr, "op");
        match err {
            Error::Windows(e) => assert_eq!(e.code(), hr),
            other => panic!("expected generic Windows error, got {other:?}"),
        }
    }

    #[test]
    fn test_success_code_check() {
        assert!(check(HRESULT(0), "op").is_ok());
        assert!(check(E_NOTIMPL, "op").is_err());
    }

    #[test]
    fn test_hresult_roundtrip() {
        let err = Error::from_hresult(E_ACCESSDENIED, "op");
        assert_eq!(err.hresult(), Some(E_ACCESSDENIED));
    }
}
