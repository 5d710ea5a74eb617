//! # Ergonomic COM
//!
//! Ergonomic wrappers around Windows COM and OLE Automation for Rust.
//!
//! This crate provides safe, idiomatic Rust interfaces to the COM plumbing
//! that every automation client and in-process server needs:
//!
//! - **Error Handling**: Rich error types with HRESULT translation
//! - **Interface Handles**: Reference-counted smart pointers for COM interfaces
//! - **Strings**: BSTR and wide-string conversion utilities
//! - **Variants**: Owned, tag-checked VARIANT values
//! - **Safe Arrays**: Bounds-tracked SAFEARRAY ownership
//! - **Late-Bound Dispatch**: Call methods and properties by name via IDispatch
//! - **Events**: Connection-point sinks routing COM events to Rust closures
//! - **Type Libraries**: Member-name lookup from registered type libraries
//! - **Class Factories**: IClassFactory implementation and server registration
//! - **GUIDs**: Parsing, formatting, and generation
//!
//! ## Quick Start
//!
//! ```no_run
//! use ergonomic_com::com::ComGuard;
//! use ergonomic_com::dispatch::DispatchObject;
//! use ergonomic_com::variant::Variant;
//!
//! // COM must be initialized on this thread for the lifetime of all objects.
//! let _com = ComGuard::new()?;
//!
//! // Late-bound automation, the way a script host would do it.
//! let excel = DispatchObject::create("Excel.Application")?;
//! excel.put("Visible", Variant::from(true))?;
//! let workbooks = excel.get("Workbooks")?.get_dispatch()?;
//! # Ok::<(), ergonomic_com::error::Error>(())
//! ```
//!
//! ## Feature Highlights
//!
//! ### Reference-Counted Interface Handles
//!
//! Interface pointers are released exactly once, on every path:
//!
//! ```ignore
//! use ergonomic_com::com::ComPtr;
//! use windows::Win32::System::Com::IDispatch;
//!
//! {
//!     // Takes ownership of the +1 reference the factory returned.
//!     let handle: ComPtr<IDispatch> = unsafe { ComPtr::attach(raw) };
//!     let copy = handle.clone(); // AddRef
//! } // Both handles released here
//! ```
//!
//! ### Tag-Checked Variants
//!
//! ```no_run
//! use ergonomic_com::variant::Variant;
//!
//! let v = Variant::from(42i32);
//! assert_eq!(v.get_i32()?, 42);           // strict: tag must match
//! assert_eq!(v.to_string_value()?, "42"); // coercing: converts if possible
//! # Ok::<(), ergonomic_com::error::Error>(())
//! ```
//!
//! ### Event Sinks
//!
//! ```no_run
//! use ergonomic_com::events::EventSink;
//! use windows::core::GUID;
//!
//! # fn demo(source: &windows::Win32::System::Com::IDispatch) -> ergonomic_com::error::Result<()> {
//! const DIID_APP_EVENTS: GUID = GUID::from_u128(0x00024413_0000_0000_c000_000000000046);
//!
//! let mut sink = EventSink::new(DIID_APP_EVENTS);
//! sink.on(0x61d, |args| {
//!     println!("workbook opened with {} args", args.len());
//!     Ok(None)
//! });
//! sink.connect(source)?;
//! // ...
//! sink.disconnect()?; // idempotent; also runs on drop
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! COM objects are apartment-affine. Everything in this crate must be used on
//! the thread that initialized COM (see [`com::ComGuard`]); none of the
//! wrapper types are `Send` or `Sync`. Cross-apartment marshaling is the
//! caller's responsibility.

#![cfg(windows)]
#![warn(missing_docs)]

// Core modules
pub mod com;
pub mod error;
pub mod guid;
pub mod string;

// Automation data types
pub mod safearray;
pub mod variant;

// Late binding and events
pub mod dispatch;
pub mod events;
pub mod typelib;

// Server-side support
pub mod factory;
pub mod registry;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::com::{create_instance, ComGuard, ComPtr};
    pub use crate::dispatch::DispatchObject;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::events::EventSink;
    pub use crate::factory::{server_can_unload, ClassFactory, ServerRegistration};
    pub use crate::guid::{format_guid, parse_guid, GuidExt};
    pub use crate::registry::{Access, Key, RootKey};
    pub use crate::safearray::SafeArray;
    pub use crate::string::{from_wide, to_wide, BstrExt, WideString};
    pub use crate::typelib::{TypeDescription, TypeLibrary};
    pub use crate::variant::Variant;
}
