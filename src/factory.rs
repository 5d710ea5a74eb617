//! Class factories and in-process server registration.
//!
//! An in-process COM server exports four fixed entry points; this module
//! supplies the pieces behind them: an `IClassFactory` implementation that
//! hands out instances of a registered class (`DllGetClassObject`), the
//! process-wide lock count consulted by `DllCanUnloadNow`, and the registry
//! writes behind `DllRegisterServer`/`DllUnregisterServer`.

use crate::error::{Error, Result};
use crate::guid::GuidExt;
use crate::registry::{Access, Key, RootKey};
use std::ffi::c_void;
use std::sync::atomic::{AtomicIsize, Ordering};
use windows::core::{implement, GUID, IUnknown};
use windows::Win32::Foundation::{BOOL, CLASS_E_NOAGGREGATION, ERROR_FILE_NOT_FOUND, E_POINTER};
use windows::Win32::System::Com::IClassFactory_Impl;

// Process-wide server lock count: LockServer locks plus a host-maintained
// notion of live objects, if the host chooses to add one.
static SERVER_LOCKS: AtomicIsize = AtomicIsize::new(0);

/// Returns the current server lock count.
pub fn server_lock_count() -> isize {
    SERVER_LOCKS.load(Ordering::SeqCst)
}

/// Returns true when the module holds no server locks - the
/// `DllCanUnloadNow` answer.
pub fn server_can_unload() -> bool {
    server_lock_count() == 0
}

/// Adjusts the server lock count directly, for hosts that tie object
/// lifetimes into the unload decision.
pub fn lock_server(lock: bool) {
    if lock {
        SERVER_LOCKS.fetch_add(1, Ordering::SeqCst);
    } else {
        SERVER_LOCKS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A generic class factory.
///
/// Constructed with a producer closure that builds one instance of the
/// class; `CreateInstance` runs the producer and answers whatever interface
/// the caller requested.
///
/// # Example
///
/// ```ignore
/// use ergonomic_com::factory::ClassFactory;
/// use windows::Win32::System::Com::IClassFactory;
///
/// let factory: IClassFactory = ClassFactory::new(|| {
///     Ok(MyObject::new().into())
/// })
/// .into();
/// ```
#[implement(windows::Win32::System::Com::IClassFactory)]
pub struct ClassFactory {
    producer: Box<dyn Fn() -> windows::core::Result<IUnknown>>,
}

impl ClassFactory {
    /// Creates a factory from an object producer.
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn() -> windows::core::Result<IUnknown> + 'static,
    {
        Self {
            producer: Box::new(producer),
        }
    }
}

impl IClassFactory_Impl for ClassFactory_Impl {
    fn CreateInstance(
        &self,
        punkouter: Option<&IUnknown>,
        riid: *const GUID,
        ppvobject: *mut *mut c_void,
    ) -> windows::core::Result<()> {
        if ppvobject.is_null() || riid.is_null() {
            return Err(E_POINTER.into());
        }
        // SAFETY: clear the out parameter before any failure path.
        unsafe { *ppvobject = std::ptr::null_mut() };

        // Aggregation is not supported.
        if punkouter.is_some() {
            return Err(CLASS_E_NOAGGREGATION.into());
        }

        let object = (self.producer)()?;
        // SAFETY: query writes a +1 reference for the requested IID into the
        // cleared slot, or leaves it null.
        unsafe { object.query(riid, ppvobject) }.ok()
    }

    fn LockServer(&self, flock: BOOL) -> windows::core::Result<()> {
        lock_server(flock.as_bool());
        Ok(())
    }
}

/// Where a server registration is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationScope {
    /// Per-user registration under `HKCU\Software\Classes`; no elevation
    /// needed.
    User,
    /// Machine-wide registration under `HKEY_CLASSES_ROOT`; requires
    /// elevation.
    Machine,
}

impl RegistrationScope {
    fn root_and_prefix(self) -> (RootKey, &'static str) {
        match self {
            RegistrationScope::User => (RootKey::CURRENT_USER, r"Software\Classes"),
            RegistrationScope::Machine => (RootKey::CLASSES_ROOT, ""),
        }
    }
}

/// The registry footprint of one in-process server class.
#[derive(Clone, Debug)]
pub struct ServerRegistration {
    /// The class identifier.
    pub clsid: GUID,
    /// The version-independent ProgID, e.g. `"Sample.Widget"`.
    pub prog_id: String,
    /// Human-readable class description.
    pub description: String,
    /// Path of the DLL exporting the class object.
    pub module_path: String,
    /// COM threading model; automation servers are almost always
    /// `"Apartment"`.
    pub threading_model: String,
}

impl ServerRegistration {
    /// Creates a registration with the `Apartment` threading model.
    pub fn new(clsid: GUID, prog_id: &str, description: &str, module_path: &str) -> Self {
        Self {
            clsid,
            prog_id: prog_id.to_string(),
            description: description.to_string(),
            module_path: module_path.to_string(),
            threading_model: "Apartment".to_string(),
        }
    }

    /// Writes the CLSID and ProgID keys.
    pub fn register(&self, scope: RegistrationScope) -> Result<()> {
        let (root, prefix) = scope.root_and_prefix();
        let clsid = self.clsid.to_braced();

        let class_key = Key::create(root, &join(prefix, &format!(r"CLSID\{clsid}")))?;
        class_key.set_string(None, &self.description)?;

        let server_key = Key::create(
            root,
            &join(prefix, &format!(r"CLSID\{clsid}\InprocServer32")),
        )?;
        server_key.set_string(None, &self.module_path)?;
        server_key.set_string(Some("ThreadingModel"), &self.threading_model)?;

        let progid_ref = Key::create(root, &join(prefix, &format!(r"CLSID\{clsid}\ProgID")))?;
        progid_ref.set_string(None, &self.prog_id)?;

        let progid_key = Key::create(root, &join(prefix, &self.prog_id))?;
        progid_key.set_string(None, &self.description)?;

        let clsid_ref = Key::create(root, &join(prefix, &format!(r"{}\CLSID", self.prog_id)))?;
        clsid_ref.set_string(None, &clsid)?;

        Ok(())
    }

    /// Deletes the CLSID and ProgID keys. Keys that are already gone are not
    /// an error.
    pub fn unregister(&self, scope: RegistrationScope) -> Result<()> {
        let (root, prefix) = scope.root_and_prefix();
        let clsid = self.clsid.to_braced();

        // Children before parents; RegDeleteKey only removes leaves.
        for path in [
            format!(r"CLSID\{clsid}\InprocServer32"),
            format!(r"CLSID\{clsid}\ProgID"),
            format!(r"CLSID\{clsid}"),
            format!(r"{}\CLSID", self.prog_id),
            self.prog_id.clone(),
        ] {
            delete_ignoring_missing(root, &join(prefix, &path))?;
        }
        Ok(())
    }

    /// Reads back the CLSID registered for this registration's ProgID.
    pub fn registered_clsid(&self, scope: RegistrationScope) -> Result<GUID> {
        let (root, prefix) = scope.root_and_prefix();
        let key = Key::open(
            root,
            &join(prefix, &format!(r"{}\CLSID", self.prog_id)),
            Access::READ,
        )?;
        crate::guid::parse_guid(&key.get_string(None)?)
    }
}

fn join(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!(r"{prefix}\{path}")
    }
}

fn delete_ignoring_missing(root: RootKey, path: &str) -> Result<()> {
    match Key::delete_subkey(root, path) {
        Ok(()) => Ok(()),
        Err(Error::Windows(e)) if e.code() == ERROR_FILE_NOT_FOUND.to_hresult() => Ok(()),
        Err(e) => Err(e),
    }
}
