//! COM initialization and reference-counted interface handles.
//!
//! Provides the RAII pieces every COM client needs: [`ComGuard`] to pair
//! `CoInitializeEx` with `CoUninitialize`, and [`ComPtr`] to pair every
//! `AddRef` with exactly one `Release` - on every path, including early
//! returns.

use crate::error::{Error, Result, ResultExt};
use crate::string::WideString;
use std::ffi::c_void;
use std::marker::PhantomData;
use windows::core::{GUID, Interface, IUnknown, IUnknown_Vtbl};
use windows::Win32::System::Com::{
    CLSCTX_ALL, CLSCTX_LOCAL_SERVER, CLSIDFromProgID, CLSIDFromString, CoCreateInstance,
    CoInitializeEx, CoUninitialize, COINIT_APARTMENTTHREADED, COINIT_MULTITHREADED,
};
use windows::Win32::System::Ole::GetActiveObject;

/// Drop guard for COM thread initialization.
///
/// COM initialization is per-thread and apartment-affine: every interface
/// pointer created on this thread belongs to the apartment chosen here and
/// must not be used from another thread without platform marshaling. The
/// guard is `!Send`/`!Sync` so the uninitialize call cannot migrate.
///
/// # Example
///
/// ```no_run
/// use ergonomic_com::com::ComGuard;
///
/// let _com = ComGuard::new()?; // single-threaded apartment
/// // ... COM calls on this thread ...
/// // CoUninitialize runs automatically on drop
/// # Ok::<(), ergonomic_com::error::Error>(())
/// ```
#[derive(Debug)]
pub struct ComGuard {
    // Prevents Send + Sync auto-derivation; COM init is per-thread.
    _not_send: PhantomData<*mut ()>,
}

impl ComGuard {
    /// Initializes COM on this thread in a single-threaded apartment.
    ///
    /// Returns `Ok` on success, including `S_FALSE` (COM was already
    /// initialized on this thread with the same model).
    pub fn new() -> Result<Self> {
        // SAFETY: standard Win32 call; the matching CoUninitialize is
        // guaranteed by Drop on the same thread.
        let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
        hr.ok().to_result("CoInitializeEx")?;
        Ok(Self {
            _not_send: PhantomData,
        })
    }

    /// Initializes COM on this thread in the multi-threaded apartment.
    pub fn new_mta() -> Result<Self> {
        // SAFETY: as above.
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        hr.ok().to_result("CoInitializeEx")?;
        Ok(Self {
            _not_send: PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        // SAFETY: paired with the successful CoInitializeEx in the
        // constructor, on the same thread (the type is !Send).
        unsafe { CoUninitialize() };
    }
}

/// A reference-counted handle to a COM interface.
///
/// Owns at most one raw interface pointer. Cloning calls `AddRef`, dropping
/// calls `Release`, and [`ComPtr::detach`] hands the reference to the caller
/// without releasing - so the wrapped object's reference count always
/// reflects the number of live owning handles.
///
/// The handle may be null ([`ComPtr::null`]); accessors return a typed
/// null-pointer error rather than panicking.
pub struct ComPtr<T: Interface> {
    ptr: *mut c_void,
    _marker: PhantomData<T>,
}

impl<T: Interface> ComPtr<T> {
    /// Creates an empty handle.
    #[inline]
    pub const fn null() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Takes ownership of a raw interface pointer without calling `AddRef`.
    ///
    /// Use this for pointers returned at +1 from factory and query calls.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a valid pointer to an object implementing `T`,
    /// and the caller must transfer exactly one outstanding reference.
    #[inline]
    pub unsafe fn attach(raw: *mut c_void) -> Self {
        Self {
            ptr: raw,
            _marker: PhantomData,
        }
    }

    /// Stores a raw interface pointer after calling `AddRef` on it.
    ///
    /// Use this to share a pointer whose reference the caller keeps.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a valid pointer to an object implementing `T`
    /// that remains valid for the duration of this call.
    pub unsafe fn attach_retained(raw: *mut c_void) -> Self {
        if !raw.is_null() {
            ((*vtable(raw)).AddRef)(raw);
        }
        Self {
            ptr: raw,
            _marker: PhantomData,
        }
    }

    /// Returns true if no interface pointer is held.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Returns the raw pointer without affecting ownership.
    #[inline]
    pub fn as_raw(&self) -> *mut c_void {
        self.ptr
    }

    /// Releases ownership without calling `Release`, leaving the handle null.
    ///
    /// The caller becomes responsible for the outstanding reference. This is
    /// the shape out-parameters want: detach into the slot the platform will
    /// own.
    #[inline]
    pub fn detach(&mut self) -> *mut c_void {
        std::mem::replace(&mut self.ptr, std::ptr::null_mut())
    }

    /// Releases any held reference and leaves the handle null.
    pub fn reset(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: we own exactly one reference to a live object; after
            // the release the pointer is nulled and never used again.
            unsafe { ((*vtable(self.ptr)).Release)(self.ptr) };
            self.ptr = std::ptr::null_mut();
        }
    }

    /// Queries the object for another interface.
    ///
    /// On success the returned handle owns a fresh reference to the
    /// other-typed view. Failure leaves no partial ownership behind and maps
    /// `E_NOINTERFACE` to the typed no-interface error.
    pub fn query<U: Interface>(&self) -> Result<ComPtr<U>> {
        if self.ptr.is_null() {
            return Err(Error::null_pointer("query on null ComPtr"));
        }
        let mut out: *mut c_void = std::ptr::null_mut();
        // SAFETY: the pointer is non-null and owned; QueryInterface either
        // fills `out` with a +1 reference or leaves it null.
        let hr = unsafe { ((*vtable(self.ptr)).QueryInterface)(self.ptr, &U::IID, &mut out) };
        crate::error::check(hr, "QueryInterface")?;
        // SAFETY: QueryInterface succeeded, so `out` carries one reference.
        Ok(unsafe { ComPtr::attach(out) })
    }

    /// Queries for another interface, treating absence as an expected
    /// outcome: `E_NOINTERFACE` yields `Ok(None)` with no side effect.
    pub fn try_query<U: Interface>(&self) -> Result<Option<ComPtr<U>>> {
        match self.query::<U>() {
            Ok(handle) => Ok(Some(handle)),
            Err(Error::NoInterface { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Borrows the handle as the typed interface.
    ///
    /// Fails with a null-pointer error on an empty handle.
    pub fn interface(&self) -> Result<&T> {
        // SAFETY: the pointer, when non-null, refers to an object
        // implementing T; windows-core interface types are transparent
        // wrappers over the pointer.
        unsafe { T::from_raw_borrowed(&self.ptr) }
            .ok_or(Error::null_pointer("interface on null ComPtr"))
    }

    /// Returns an owned, `AddRef`ed copy of the typed interface.
    pub fn to_interface(&self) -> Result<T> {
        Ok(self.interface()?.clone())
    }
}

// Object layout: the interface pointer addresses a struct whose first word is
// the vtable pointer, and every COM vtable starts with IUnknown's three slots.
#[inline]
unsafe fn vtable(ptr: *mut c_void) -> *const IUnknown_Vtbl {
    *(ptr as *const *const IUnknown_Vtbl)
}

impl<T: Interface> Clone for ComPtr<T> {
    fn clone(&self) -> Self {
        // SAFETY: a non-null pointer is owned and alive, so AddRef is valid;
        // the copy owns the new reference.
        unsafe { Self::attach_retained(self.ptr) }
    }
}

impl<T: Interface> Drop for ComPtr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: Interface> Default for ComPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Interface> From<T> for ComPtr<T> {
    fn from(value: T) -> Self {
        // The windows-core smart pointer held one reference; take it over.
        // SAFETY: into_raw forgets the source without releasing.
        unsafe { Self::attach(value.into_raw()) }
    }
}

impl<T: Interface> std::fmt::Debug for ComPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComPtr({:p})", self.ptr)
    }
}

/// Resolves a ProgID (`"Excel.Application"`) or a braced CLSID string to a
/// class identifier.
pub fn clsid_from_text(text: &str) -> Result<GUID> {
    let wide = WideString::new(text);
    if text.starts_with('{') {
        // SAFETY: the buffer is null-terminated and outlives the call.
        unsafe { CLSIDFromString(wide.as_pcwstr()) }.to_result("CLSIDFromString")
    } else {
        // SAFETY: as above.
        unsafe { CLSIDFromProgID(wide.as_pcwstr()) }.to_result("CLSIDFromProgID")
    }
}

/// Creates an instance of the given class, asking for interface `T`.
///
/// Tries the full context first and falls back to an out-of-process server,
/// which is what script-style automation clients expect.
pub fn create_instance<T: Interface>(clsid: &GUID) -> Result<ComPtr<T>> {
    // SAFETY: standard activation call; the returned interface arrives at +1
    // and is owned by the windows-core smart pointer we immediately wrap.
    let created: windows::core::Result<T> = unsafe { CoCreateInstance(clsid, None, CLSCTX_ALL) };
    let instance = match created {
        Ok(value) => value,
        // SAFETY: as above.
        Err(_) => unsafe { CoCreateInstance(clsid, None, CLSCTX_LOCAL_SERVER) }
            .to_result("CoCreateInstance")?,
    };
    Ok(ComPtr::from(instance))
}

/// Retrieves a running, registered instance of the given class.
///
/// Returns `Ok(None)` when no instance is registered in the running object
/// table.
pub fn get_active_object(clsid: &GUID) -> Result<Option<ComPtr<IUnknown>>> {
    let mut unknown: Option<IUnknown> = None;
    // SAFETY: the reserved argument stays unset; the out parameter receives
    // a +1 reference on success.
    let result = unsafe { GetActiveObject(clsid, None, &mut unknown) };
    match result {
        Ok(()) => Ok(unknown.map(ComPtr::from)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use windows::core::implement;
    use windows::Win32::Foundation::E_NOTIMPL;
    use windows::Win32::System::Com::{
        IDispatch, IDispatch_Impl, ITypeInfo, DISPATCH_FLAGS, DISPPARAMS, EXCEPINFO,
    };
    use windows::Win32::System::Variant::VARIANT;

    // Minimal dispatch object whose drop is observable, so tests can verify
    // that every acquire was matched by exactly one release.
    #[implement(IDispatch)]
    struct Probe {
        alive: Rc<Cell<bool>>,
    }

    impl Probe {
        fn spawn() -> (IDispatch, Rc<Cell<bool>>) {
            let alive = Rc::new(Cell::new(true));
            let disp: IDispatch = Probe {
                alive: alive.clone(),
            }
            .into();
            (disp, alive)
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.alive.set(false);
        }
    }

    impl IDispatch_Impl for Probe_Impl {
        fn GetTypeInfoCount(&self) -> windows::core::Result<u32> {
            Ok(0)
        }

        fn GetTypeInfo(&self, _itinfo: u32, _lcid: u32) -> windows::core::Result<ITypeInfo> {
            Err(E_NOTIMPL.into())
        }

        fn GetIDsOfNames(
            &self,
            _riid: *const GUID,
            _rgsznames: *const windows::core::PCWSTR,
            _cnames: u32,
            _lcid: u32,
            _rgdispid: *mut i32,
        ) -> windows::core::Result<()> {
            Err(E_NOTIMPL.into())
        }

        fn Invoke(
            &self,
            _dispidmember: i32,
            _riid: *const GUID,
            _lcid: u32,
            _wflags: DISPATCH_FLAGS,
            _pdispparams: *const DISPPARAMS,
            _pvarresult: *mut VARIANT,
            _pexcepinfo: *mut EXCEPINFO,
            _puargerr: *mut u32,
        ) -> windows::core::Result<()> {
            Err(E_NOTIMPL.into())
        }
    }

    #[test]
    fn test_clone_and_drop_balance() {
        let (disp, alive) = Probe::spawn();
        {
            let handle = ComPtr::from(disp);
            let copy = handle.clone();
            let another = copy.clone();
            assert!(alive.get());
            drop(handle);
            drop(copy);
            assert!(alive.get());
            drop(another);
        }
        assert!(!alive.get());
    }

    #[test]
    fn test_detach_transfers_ownership() {
        let (disp, alive) = Probe::spawn();
        let mut handle = ComPtr::from(disp);
        let raw = handle.detach();
        assert!(handle.is_null());
        drop(handle);
        // The detached reference keeps the object alive.
        assert!(alive.get());
        // SAFETY: re-attach the reference we took above.
        let reattached: ComPtr<IDispatch> = unsafe { ComPtr::attach(raw) };
        drop(reattached);
        assert!(!alive.get());
    }

    #[test]
    fn test_attach_retained_adds_reference() {
        let (disp, alive) = Probe::spawn();
        let handle = ComPtr::from(disp);
        // SAFETY: the handle keeps the pointer alive across this call.
        let shared: ComPtr<IDispatch> = unsafe { ComPtr::attach_retained(handle.as_raw()) };
        drop(handle);
        assert!(alive.get());
        drop(shared);
        assert!(!alive.get());
    }

    #[test]
    fn test_query_known_and_unknown_interface() {
        let (disp, _alive) = Probe::spawn();
        let handle = ComPtr::from(disp);

        let unknown: ComPtr<IUnknown> = handle.query().unwrap();
        assert!(!unknown.is_null());

        // The probe does not implement ITypeInfo; absence is an expected,
        // handled outcome for try_query.
        let missing = handle.try_query::<ITypeInfo>().unwrap();
        assert!(missing.is_none());
        assert!(handle.query::<ITypeInfo>().is_err());
    }

    #[test]
    fn test_null_handle_accessors() {
        let handle: ComPtr<IDispatch> = ComPtr::null();
        assert!(handle.is_null());
        assert!(handle.interface().is_err());
        assert!(handle.query::<IUnknown>().is_err());
        let copy = handle.clone();
        assert!(copy.is_null());
    }
}
