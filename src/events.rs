//! Connection-point event sinks.
//!
//! A COM event source notifies listeners by calling back into a
//! dispatch-capable sink object registered ("advised") at one of the
//! source's connection points. [`EventSink`] is such a sink: it implements
//! `IDispatch` over a hand-rolled vtable - the event interface IID is only
//! known at runtime, so `QueryInterface` has to be answered dynamically -
//! and demultiplexes incoming invocations to Rust closures registered by
//! DISPID or by name.
//!
//! Incoming arguments arrive in the wire's reverse order and are presented
//! to handlers in logical order. A handler registered with declared
//! parameter tags gets each argument coerced to its tag by an explicit
//! per-tag loop; anything else is handed over as-is.

use crate::error::{Error, Result, ResultExt};
use crate::guid::GuidExt;
use crate::typelib::{TypeDescription, TypeLibrary};
use crate::variant::Variant;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use windows::core::{GUID, IUnknown, IUnknown_Vtbl, Interface, HRESULT};
use windows::Win32::Foundation::{
    DISP_E_BADPARAMCOUNT, DISP_E_MEMBERNOTFOUND, DISP_E_TYPEMISMATCH, DISP_E_UNKNOWNNAME, E_FAIL,
    E_NOTIMPL, E_POINTER, S_OK,
};
use windows::Win32::System::Com::{
    IConnectionPoint, IConnectionPointContainer, IDispatch, IDispatch_Vtbl, DISPATCH_FLAGS,
    DISPPARAMS, EXCEPINFO,
};
use windows::Win32::System::Variant::{VARENUM, VARIANT};

/// A handler invoked for one event member.
///
/// Arguments are in logical order; returning `Some` writes the value back as
/// the invocation result.
pub type EventHandler = Box<dyn Fn(&[Variant]) -> Result<Option<Variant>>>;

struct Binding {
    // Declared parameter tags; when present, incoming arguments are coerced
    // tag by tag and the count must match.
    params: Option<Vec<VARENUM>>,
    handler: EventHandler,
}

struct SinkState {
    event_iid: GUID,
    handlers: RefCell<HashMap<i32, Binding>>,
    // Lowercased member name -> DISPID, built lazily from the event
    // interface's type description.
    names: RefCell<Option<HashMap<String, i32>>>,
}

struct Connection {
    point: IConnectionPoint,
    cookie: u32,
}

/// A dispatch-callable event sink with connection-point bookkeeping.
///
/// # Example
///
/// ```no_run
/// use ergonomic_com::events::EventSink;
/// use windows::core::GUID;
///
/// # fn demo(source: &windows::Win32::System::Com::IDispatch) -> ergonomic_com::error::Result<()> {
/// let mut sink = EventSink::new(GUID::from_u128(0x4ef6100a_af88_11d0_9846_00c04fc29993));
/// sink.on(1, |args| {
///     println!("event with {} arguments", args.len());
///     Ok(None)
/// });
/// sink.connect(source)?;
/// # Ok(())
/// # }
/// ```
pub struct EventSink {
    state: Rc<SinkState>,
    dispatch: IDispatch,
    connection: Option<Connection>,
    library: Option<TypeLibrary>,
}

impl EventSink {
    /// Creates a sink for the event interface with the given identifier.
    pub fn new(event_iid: GUID) -> Self {
        let state = Rc::new(SinkState {
            event_iid,
            handlers: RefCell::new(HashMap::new()),
            names: RefCell::new(None),
        });
        let object = Box::new(SinkObject {
            vtbl: &SINK_VTBL,
            refs: AtomicU32::new(1),
            state: Rc::clone(&state),
        });
        // SAFETY: SinkObject is repr(C) with the vtable pointer first, so the
        // boxed object is a valid COM object carrying the one reference the
        // smart pointer takes over.
        let dispatch = unsafe { IDispatch::from_raw(Box::into_raw(object) as *mut c_void) };
        Self {
            state,
            dispatch,
            connection: None,
            library: None,
        }
    }

    /// Returns the sink as a dispatch interface, e.g. to advise it manually.
    pub fn dispatch(&self) -> &IDispatch {
        &self.dispatch
    }

    /// Supplies the type library describing the event interface, for
    /// name-based binding when no connected source can provide it.
    pub fn use_type_library(&mut self, library: TypeLibrary) {
        self.library = Some(library);
    }

    /// Registers a handler for the given member id.
    pub fn on<F>(&mut self, member_id: i32, handler: F)
    where
        F: Fn(&[Variant]) -> Result<Option<Variant>> + 'static,
    {
        self.state.handlers.borrow_mut().insert(
            member_id,
            Binding {
                params: None,
                handler: Box::new(handler),
            },
        );
    }

    /// Registers a handler with a declared parameter shape; incoming
    /// arguments are coerced to the given tags, and the argument count must
    /// match.
    pub fn on_typed<F>(&mut self, member_id: i32, params: &[VARENUM], handler: F)
    where
        F: Fn(&[Variant]) -> Result<Option<Variant>> + 'static,
    {
        self.state.handlers.borrow_mut().insert(
            member_id,
            Binding {
                params: Some(params.to_vec()),
                handler: Box::new(handler),
            },
        );
    }

    /// Registers a handler by member name.
    ///
    /// The name is resolved through the event interface's type description -
    /// from the explicitly supplied library, or from the connected source's
    /// containing library. An unresolvable name fails the bind.
    pub fn on_named<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&[Variant]) -> Result<Option<Variant>> + 'static,
    {
        let id = self.resolve_member(name)?;
        self.on(id, handler);
        Ok(())
    }

    /// Connects the sink to an event source.
    ///
    /// The source is queried for its connection-point container, the
    /// connection point matching the sink's event interface is looked up,
    /// and the sink is advised there. Each failing step surfaces as its own
    /// typed error. Connecting while already connected replaces the previous
    /// registration.
    pub fn connect<S: Interface>(&mut self, source: &S) -> Result<()> {
        let container: IConnectionPointContainer =
            source.cast().map_err(|_| Error::ConnectionUnsupported {
                context: "source has no connection-point container".to_string(),
            })?;
        // SAFETY: the container is a live interface; FindConnectionPoint
        // returns an owned connection point.
        let point = unsafe { container.FindConnectionPoint(&self.state.event_iid) }.map_err(
            |_| Error::ConnectionUnsupported {
                context: format!(
                    "no connection point for {}",
                    self.state.event_iid.to_braced()
                ),
            },
        )?;
        // SAFETY: the sink outlives the registration; Advise acquires its own
        // references.
        let cookie = unsafe { point.Advise(&self.dispatch) }.map_err(Error::ConnectionFailed)?;

        if let Some(previous) = self.connection.replace(Connection { point, cookie }) {
            // SAFETY: cookie came from the matching Advise.
            let _ = unsafe { previous.point.Unadvise(previous.cookie) };
        }

        // Opportunistically build the member-name table from the source's
        // type information.
        if self.state.names.borrow().is_none() {
            if let Ok(dispatch) = source.cast::<IDispatch>() {
                if let Ok(table) = names_from_source(&dispatch, &self.state.event_iid) {
                    *self.state.names.borrow_mut() = Some(table);
                }
            }
        }
        Ok(())
    }

    /// Unregisters from the connection point.
    ///
    /// Idempotent: calling it again (or during teardown) is a no-op.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            // SAFETY: cookie came from the matching Advise; the connection is
            // dropped afterwards so it cannot be unadvised twice.
            unsafe { connection.point.Unadvise(connection.cookie) }
                .to_result("IConnectionPoint::Unadvise")?;
        }
        Ok(())
    }

    /// Returns true while an advise registration is active.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn resolve_member(&self, name: &str) -> Result<i32> {
        if self.state.names.borrow().is_none() {
            if let Some(library) = &self.library {
                let table = library
                    .type_info_of(&self.state.event_iid)?
                    .member_names()?;
                *self.state.names.borrow_mut() = Some(table);
            }
        }
        self.state
            .names
            .borrow()
            .as_ref()
            .and_then(|table| table.get(&name.to_ascii_lowercase()).copied())
            .ok_or_else(|| Error::UnknownEventMember(name.to_string()))
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("event_iid", &self.state.event_iid.to_braced())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn names_from_source(source: &IDispatch, event_iid: &GUID) -> Result<HashMap<String, i32>> {
    TypeDescription::for_object(source)?
        .containing_library()?
        .type_info_of(event_iid)?
        .member_names()
}

// ---- the COM object backing the sink ----

// Layout contract: a COM object is a vtable pointer followed by instance
// data.
#[repr(C)]
struct SinkObject {
    vtbl: *const IDispatch_Vtbl,
    refs: AtomicU32,
    state: Rc<SinkState>,
}

static SINK_VTBL: IDispatch_Vtbl = IDispatch_Vtbl {
    base__: IUnknown_Vtbl {
        QueryInterface: sink_query_interface,
        AddRef: sink_add_ref,
        Release: sink_release,
    },
    GetTypeInfoCount: sink_get_type_info_count,
    GetTypeInfo: sink_get_type_info,
    GetIDsOfNames: sink_get_ids_of_names,
    Invoke: sink_invoke,
};

unsafe fn sink_state<'a>(this: *mut c_void) -> &'a SinkState {
    &(*(this as *const SinkObject)).state
}

unsafe extern "system" fn sink_query_interface(
    this: *mut c_void,
    iid: *const GUID,
    out: *mut *mut c_void,
) -> HRESULT {
    if iid.is_null() || out.is_null() {
        return E_POINTER;
    }
    let requested = *iid;
    let object = &*(this as *const SinkObject);
    if requested == IUnknown::IID
        || requested == IDispatch::IID
        || requested == object.state.event_iid
    {
        object.refs.fetch_add(1, Ordering::SeqCst);
        *out = this;
        S_OK
    } else {
        *out = std::ptr::null_mut();
        windows::Win32::Foundation::E_NOINTERFACE
    }
}

unsafe extern "system" fn sink_add_ref(this: *mut c_void) -> u32 {
    let object = &*(this as *const SinkObject);
    object.refs.fetch_add(1, Ordering::SeqCst) + 1
}

unsafe extern "system" fn sink_release(this: *mut c_void) -> u32 {
    let object = &*(this as *const SinkObject);
    let remaining = object.refs.fetch_sub(1, Ordering::SeqCst) - 1;
    if remaining == 0 {
        drop(Box::from_raw(this as *mut SinkObject));
    }
    remaining
}

unsafe extern "system" fn sink_get_type_info_count(
    _this: *mut c_void,
    pctinfo: *mut u32,
) -> HRESULT {
    if pctinfo.is_null() {
        return E_POINTER;
    }
    *pctinfo = 0;
    S_OK
}

unsafe extern "system" fn sink_get_type_info(
    _this: *mut c_void,
    _itinfo: u32,
    _lcid: u32,
    pptinfo: *mut *mut c_void,
) -> HRESULT {
    if !pptinfo.is_null() {
        *pptinfo = std::ptr::null_mut();
    }
    E_NOTIMPL
}

unsafe extern "system" fn sink_get_ids_of_names(
    this: *mut c_void,
    _riid: *const GUID,
    rgsznames: *const windows::core::PCWSTR,
    cnames: u32,
    _lcid: u32,
    rgdispid: *mut i32,
) -> HRESULT {
    if rgsznames.is_null() || rgdispid.is_null() {
        return E_POINTER;
    }
    let state = sink_state(this);
    let table = state.names.borrow();
    let Some(table) = table.as_ref() else {
        return DISP_E_UNKNOWNNAME;
    };
    for i in 0..cnames as usize {
        let Ok(name) = (*rgsznames.add(i)).to_string() else {
            return DISP_E_UNKNOWNNAME;
        };
        match table.get(&name.to_ascii_lowercase()) {
            Some(&id) => *rgdispid.add(i) = id,
            None => return DISP_E_UNKNOWNNAME,
        }
    }
    S_OK
}

unsafe extern "system" fn sink_invoke(
    this: *mut c_void,
    dispidmember: i32,
    _riid: *const GUID,
    _lcid: u32,
    _wflags: DISPATCH_FLAGS,
    pdispparams: *const DISPPARAMS,
    pvarresult: *mut VARIANT,
    _pexcepinfo: *mut EXCEPINFO,
    _puargerr: *mut u32,
) -> HRESULT {
    if pdispparams.is_null() {
        return E_POINTER;
    }
    let state = sink_state(this);
    let handlers = state.handlers.borrow();
    let Some(binding) = handlers.get(&dispidmember) else {
        return DISP_E_MEMBERNOTFOUND;
    };

    let params = &*pdispparams;
    let wire_args = if params.cArgs == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(params.rgvarg, params.cArgs as usize)
    };

    // Wire order is reversed; hand the handler logical order. The incoming
    // variants stay owned by the caller, so every argument is copied out.
    let mut args = Vec::with_capacity(wire_args.len());
    if let Some(tags) = &binding.params {
        if tags.len() != wire_args.len() {
            return DISP_E_BADPARAMCOUNT;
        }
        for (value, tag) in wire_args.iter().rev().zip(tags.iter()) {
            let Ok(mut arg) = Variant::from_raw_borrowed(value).try_clone() else {
                return E_FAIL;
            };
            if arg.vt() != *tag && arg.change_type(*tag).is_err() {
                return DISP_E_TYPEMISMATCH;
            }
            args.push(arg);
        }
    } else {
        for value in wire_args.iter().rev() {
            let Ok(arg) = Variant::from_raw_borrowed(value).try_clone() else {
                return E_FAIL;
            };
            args.push(arg);
        }
    }

    match (binding.handler)(&args) {
        Ok(Some(result)) => {
            if !pvarresult.is_null() {
                *pvarresult = result.into_raw();
            }
            S_OK
        }
        Ok(None) => S_OK,
        Err(error) => error.hresult().unwrap_or(E_FAIL),
    }
}
