//! Late-bound automation via IDispatch.
//!
//! [`DispatchObject`] drives any automation object the way a script host
//! would: member names are resolved to DISPIDs (and cached), arguments are
//! marshaled into a DISPPARAMS block in the reverse order the calling
//! convention requires, and failures come back as typed errors carrying the
//! richest message the callee offered.

use crate::com::{clsid_from_text, create_instance, get_active_object, ComPtr};
use crate::error::{Error, Result};
use crate::string::{BstrExt, WideString};
use crate::variant::Variant;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr;
use windows::core::GUID;
use windows::Win32::Foundation::{DISP_E_EXCEPTION, DISP_E_UNKNOWNNAME, E_ABORT};
use windows::Win32::Globalization::GetSystemDefaultLCID;
use windows::Win32::System::Com::{
    IDispatch, DISPATCH_FLAGS, DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT,
    DISPATCH_PROPERTYPUTREF, DISPPARAMS, EXCEPINFO,
};
use windows::Win32::System::Ole::{DISPID_PROPERTYPUT, DISPID_VALUE};
use windows::Win32::System::Variant::VARIANT;

/// A late-bound handle to an automation object.
///
/// # Example
///
/// ```no_run
/// use ergonomic_com::dispatch::DispatchObject;
/// use ergonomic_com::variant::Variant;
///
/// let excel = DispatchObject::create("Excel.Application")?;
/// excel.put("Visible", Variant::from(true))?;
/// let sum = excel.call("Evaluate", &[Variant::from("2+3")])?;
/// # Ok::<(), ergonomic_com::error::Error>(())
/// ```
pub struct DispatchObject {
    object: ComPtr<IDispatch>,
    // Member-name resolution is cached per object; names are
    // case-insensitive in the protocol.
    dispids: RefCell<HashMap<String, i32>>,
    lcid: u32,
}

impl DispatchObject {
    /// Creates the automation object named by a ProgID or braced CLSID.
    pub fn create(class: &str) -> Result<Self> {
        let clsid = clsid_from_text(class)?;
        Ok(Self::from_ptr(create_instance::<IDispatch>(&clsid)?))
    }

    /// Attaches to a running, registered instance of the given class.
    ///
    /// Returns `Ok(None)` when nothing is registered in the running object
    /// table.
    pub fn active(class: &str) -> Result<Option<Self>> {
        let clsid = clsid_from_text(class)?;
        match get_active_object(&clsid)? {
            Some(unknown) => Ok(Some(Self::from_ptr(unknown.query()?))),
            None => Ok(None),
        }
    }

    /// Wraps an owned interface handle.
    pub fn from_ptr(object: ComPtr<IDispatch>) -> Self {
        Self {
            object,
            dispids: RefCell::new(HashMap::new()),
            // SAFETY: plain system query with no preconditions.
            lcid: unsafe { GetSystemDefaultLCID() },
        }
    }

    /// Borrows the underlying handle.
    pub fn handle(&self) -> &ComPtr<IDispatch> {
        &self.object
    }

    /// Resolves a member name to its DISPID, consulting the per-object cache
    /// first.
    pub fn member_id(&self, name: &str) -> Result<i32> {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.dispids.borrow().get(&key) {
            return Ok(id);
        }
        let dispatch = self.object.interface()?;
        let wide = WideString::new(name);
        let names = [wide.as_pcwstr()];
        let mut dispid = 0i32;
        // SAFETY: the name buffer outlives the call and the out pointer is a
        // live local.
        unsafe {
            dispatch.GetIDsOfNames(&GUID::zeroed(), names.as_ptr(), 1, self.lcid, &mut dispid)
        }
        .map_err(|e| {
            if e.code() == DISP_E_UNKNOWNNAME {
                Error::member_not_found("IDispatch", name)
            } else {
                Error::from(e)
            }
        })?;
        self.dispids.borrow_mut().insert(key, dispid);
        Ok(dispid)
    }

    /// Invokes a method by name. Arguments are given in natural order.
    pub fn call(&self, name: &str, args: &[Variant]) -> Result<Variant> {
        let id = self.member_id(name)?;
        // Collection members answer to METHOD or PROPERTYGET depending on
        // how the library declared them; request both like script hosts do.
        self.invoke_by_id(id, DISPATCH_METHOD | DISPATCH_PROPERTYGET, args, name)
    }

    /// Reads a property by name.
    pub fn get(&self, name: &str) -> Result<Variant> {
        let id = self.member_id(name)?;
        self.invoke_by_id(id, DISPATCH_PROPERTYGET, &[], name)
    }

    /// Reads an indexed property by name.
    pub fn get_indexed(&self, name: &str, indices: &[Variant]) -> Result<Variant> {
        let id = self.member_id(name)?;
        self.invoke_by_id(id, DISPATCH_PROPERTYGET | DISPATCH_METHOD, indices, name)
    }

    /// Writes a property by name.
    pub fn put(&self, name: &str, value: Variant) -> Result<()> {
        let id = self.member_id(name)?;
        self.invoke_by_id(id, DISPATCH_PROPERTYPUT, std::slice::from_ref(&value), name)?;
        Ok(())
    }

    /// Writes an object-valued property by reference.
    pub fn put_ref(&self, name: &str, value: Variant) -> Result<()> {
        let id = self.member_id(name)?;
        self.invoke_by_id(
            id,
            DISPATCH_PROPERTYPUTREF,
            std::slice::from_ref(&value),
            name,
        )?;
        Ok(())
    }

    /// Writes an indexed property. `args` holds the indices followed by the
    /// value, e.g. `put_indexed("Cells", &[row, column, value])`.
    ///
    /// The invocation protocol has no multi-argument property setter, so more
    /// than one trailing argument is routed through the required two-level
    /// indirection: fetch the property as an object, default-member get with
    /// the first index, then default-member put of the rest on the indexer
    /// target.
    pub fn put_indexed(&self, name: &str, args: &[Variant]) -> Result<()> {
        match args.len() {
            0 => Err(Error::InvalidArgument {
                context: "put_indexed needs at least a value argument",
            }),
            1 => self.put_slice(name, args),
            _ => {
                let target = Self::from(self.get(name)?.get_dispatch()?);
                let indexer =
                    target.invoke_by_id(DISPID_VALUE, DISPATCH_PROPERTYGET, &args[0..1], name)?;
                let indexer = Self::from(indexer.get_dispatch()?);
                indexer.invoke_by_id(DISPID_VALUE, DISPATCH_PROPERTYPUT, &args[1..], name)?;
                Ok(())
            }
        }
    }

    fn put_slice(&self, name: &str, args: &[Variant]) -> Result<()> {
        let id = self.member_id(name)?;
        self.invoke_by_id(id, DISPATCH_PROPERTYPUT, args, name)?;
        Ok(())
    }

    /// Invokes a member by DISPID with explicit dispatch flags.
    ///
    /// This is the raw entry point the by-name helpers are layered on.
    pub fn invoke_by_id(
        &self,
        dispid: i32,
        flags: DISPATCH_FLAGS,
        args: &[Variant],
        member: &str,
    ) -> Result<Variant> {
        let dispatch = self.object.interface()?;

        // The calling convention wants arguments in reverse order. The packed
        // VARIANTs are shallow views; the caller-side `Variant`s keep
        // ownership and release their payloads when this call returns,
        // whatever the outcome.
        let mut packed: Vec<VARIANT> = args.iter().rev().map(|a| a.as_raw().clone()).collect();
        // A property-put carries exactly one named argument marking the value
        // slot.
        let mut named = [DISPID_PROPERTYPUT];
        let is_put =
            flags.contains(DISPATCH_PROPERTYPUT) || flags.contains(DISPATCH_PROPERTYPUTREF);

        let params = DISPPARAMS {
            rgvarg: if packed.is_empty() {
                ptr::null_mut()
            } else {
                packed.as_mut_ptr()
            },
            rgdispidNamedArgs: if is_put {
                named.as_mut_ptr()
            } else {
                ptr::null_mut()
            },
            cArgs: packed.len() as u32,
            cNamedArgs: if is_put { 1 } else { 0 },
        };

        let mut result = VARIANT::default();
        let mut excepinfo = EXCEPINFO::default();
        let mut arg_err = 0u32;
        // SAFETY: every pointer in the DISPPARAMS block outlives the call;
        // the out parameters are live locals.
        let outcome = unsafe {
            dispatch.Invoke(
                dispid,
                &GUID::zeroed(),
                self.lcid,
                flags,
                &params,
                Some(&mut result),
                Some(&mut excepinfo),
                Some(&mut arg_err),
            )
        };

        match outcome {
            Ok(()) => Ok(Variant::from_raw(result)),
            // An aborted call still yields whatever result was produced.
            Err(e) if e.code() == E_ABORT => Ok(Variant::from_raw(result)),
            Err(e) => Err(invoke_failure(member, e, &excepinfo)),
        }
    }
}

impl From<IDispatch> for DispatchObject {
    fn from(dispatch: IDispatch) -> Self {
        Self::from_ptr(ComPtr::from(dispatch))
    }
}

impl std::fmt::Debug for DispatchObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchObject")
            .field("object", &self.object)
            .finish()
    }
}

// Prefer the structured exception the callee raised; fall back to the system
// message for the code.
fn invoke_failure(member: &str, err: windows::core::Error, excepinfo: &EXCEPINFO) -> Error {
    let code = err.code();
    let message = if code == DISP_E_EXCEPTION && !excepinfo.bstrDescription.is_empty() {
        excepinfo
            .bstrDescription
            .to_string_checked()
            .unwrap_or_else(|_| err.message().to_string())
    } else {
        err.message().to_string()
    };
    Error::Dispatch {
        member: member.to_string(),
        code: code.0 as u32,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use windows::core::{implement, BSTR};
    use windows::Win32::Foundation::E_NOTIMPL;
    use windows::Win32::System::Com::{IDispatch_Impl, ITypeInfo};
    use windows::Win32::System::Variant::{VT_BSTR, VT_I4};

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Lookup(String),
        Invoke {
            node: String,
            dispid: i32,
            flags: u16,
            // Wire-order argument renderings, i.e. reversed logical order.
            args: Vec<String>,
            named: Vec<i32>,
        },
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    // Scripted automation object: resolves a fixed name table, records every
    // invocation, and hands out child nodes for collection-style access.
    #[implement(IDispatch)]
    struct Node {
        name: String,
        log: Log,
    }

    impl Node {
        fn spawn(name: &str, log: &Log) -> IDispatch {
            Node {
                name: name.to_string(),
                log: log.clone(),
            }
            .into()
        }
    }

    fn render(raw: &VARIANT) -> String {
        let v = Variant::from_raw_borrowed(raw);
        match v.vt() {
            vt if vt == VT_I4 => format!("{}", v.get_i32().unwrap()),
            vt if vt == VT_BSTR => v.get_string().unwrap(),
            vt => format!("vt{}", vt.0),
        }
    }

    impl IDispatch_Impl for Node_Impl {
        fn GetTypeInfoCount(&self) -> windows::core::Result<u32> {
            Ok(0)
        }

        fn GetTypeInfo(&self, _itinfo: u32, _lcid: u32) -> windows::core::Result<ITypeInfo> {
            Err(E_NOTIMPL.into())
        }

        fn GetIDsOfNames(
            &self,
            _riid: *const GUID,
            rgsznames: *const windows::core::PCWSTR,
            cnames: u32,
            _lcid: u32,
            rgdispid: *mut i32,
        ) -> windows::core::Result<()> {
            assert_eq!(cnames, 1);
            // SAFETY: the caller passes one valid name and one out slot.
            let name = unsafe { (*rgsznames).to_string() }
                .unwrap_or_default()
                .to_ascii_lowercase();
            self.log.borrow_mut().push(Event::Lookup(name.clone()));
            let id = match name.as_str() {
                "add" => 1,
                "cells" => 2,
                "visible" => 4,
                "boom" => 5,
                _ => return Err(DISP_E_UNKNOWNNAME.into()),
            };
            // SAFETY: as above.
            unsafe { *rgdispid = id };
            Ok(())
        }

        fn Invoke(
            &self,
            dispidmember: i32,
            _riid: *const GUID,
            _lcid: u32,
            wflags: DISPATCH_FLAGS,
            pdispparams: *const DISPPARAMS,
            pvarresult: *mut VARIANT,
            pexcepinfo: *mut EXCEPINFO,
            _puargerr: *mut u32,
        ) -> windows::core::Result<()> {
            // SAFETY: the dispatcher passes a valid DISPPARAMS block.
            let params = unsafe { &*pdispparams };
            let raw_args = if params.cArgs == 0 {
                &[][..]
            } else {
                // SAFETY: rgvarg holds cArgs variants.
                unsafe { std::slice::from_raw_parts(params.rgvarg, params.cArgs as usize) }
            };
            let named = if params.cNamedArgs == 0 {
                Vec::new()
            } else {
                // SAFETY: rgdispidNamedArgs holds cNamedArgs ids.
                unsafe {
                    std::slice::from_raw_parts(
                        params.rgdispidNamedArgs,
                        params.cNamedArgs as usize,
                    )
                }
                .to_vec()
            };
            self.log.borrow_mut().push(Event::Invoke {
                node: self.name.clone(),
                dispid: dispidmember,
                flags: wflags.0,
                args: raw_args.iter().map(render).collect(),
                named,
            });

            let produced: Option<Variant> = match dispidmember {
                // Add(a, b) -> a + b
                1 => {
                    assert_eq!(raw_args.len(), 2);
                    let sum: i32 = raw_args
                        .iter()
                        .map(|raw| Variant::from_raw_borrowed(raw).to_i32().unwrap())
                        .sum();
                    Some(Variant::from(sum))
                }
                // Cells -> child collection object
                2 if wflags.contains(DISPATCH_PROPERTYGET) => {
                    Some(Variant::from(Node::spawn("cells", &self.log)))
                }
                // Default member: get -> indexer child, put -> recorded only
                DISPID_VALUE if wflags.contains(DISPATCH_PROPERTYGET) => {
                    let index = render(&raw_args[0]);
                    Some(Variant::from(Node::spawn(
                        &format!("{}[{}]", self.name, index),
                        &self.log,
                    )))
                }
                DISPID_VALUE if wflags.contains(DISPATCH_PROPERTYPUT) => None,
                // Visible put
                4 => None,
                // Boom: structured failure with rich error info
                5 => {
                    if !pexcepinfo.is_null() {
                        // SAFETY: out pointer supplied by the dispatcher.
                        unsafe { (*pexcepinfo).bstrDescription = BSTR::from("kaboom") };
                    }
                    return Err(DISP_E_EXCEPTION.into());
                }
                other => panic!("unexpected dispid {other}"),
            };

            if let (Some(value), false) = (produced, pvarresult.is_null()) {
                // SAFETY: the result slot is a live, initialized VARIANT.
                unsafe { *pvarresult = value.into_raw() };
            }
            Ok(())
        }
    }

    fn scripted() -> (DispatchObject, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let object = DispatchObject::from(Node::spawn("root", &log));
        (object, log)
    }

    #[test]
    fn test_method_args_packed_in_reverse() {
        let (object, log) = scripted();
        let result = object
            .call("Add", &[Variant::from(2i32), Variant::from(3i32)])
            .unwrap();
        assert_eq!(result.get_i32().unwrap(), 5);

        let events = log.borrow();
        let Some(Event::Invoke { args, .. }) = events.last() else {
            panic!("no invoke recorded");
        };
        // Wire slot 0 carries the last logical argument.
        assert_eq!(args, &vec!["3".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_property_put_carries_named_slot() {
        let (object, log) = scripted();
        object.put("Visible", Variant::from(true)).unwrap();

        let events = log.borrow();
        let Some(Event::Invoke { flags, named, .. }) = events.last() else {
            panic!("no invoke recorded");
        };
        assert_eq!(flags & DISPATCH_PROPERTYPUT.0, DISPATCH_PROPERTYPUT.0);
        assert_eq!(named, &vec![DISPID_PROPERTYPUT]);
    }

    #[test]
    fn test_unknown_member() {
        let (object, _log) = scripted();
        match object.call("Nope", &[]) {
            Err(Error::MemberNotFound { member, .. }) => assert_eq!(member, "Nope"),
            other => panic!("expected MemberNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_member_id_cached() {
        let (object, log) = scripted();
        object.call("Add", &[Variant::from(1i32), Variant::from(1i32)]).unwrap();
        object.call("Add", &[Variant::from(2i32), Variant::from(2i32)]).unwrap();
        let lookups = log
            .borrow()
            .iter()
            .filter(|e| matches!(e, Event::Lookup(_)))
            .count();
        assert_eq!(lookups, 1);
    }

    #[test]
    fn test_indexed_put_uses_two_level_indirection() {
        let (object, log) = scripted();
        object
            .put_indexed(
                "Cells",
                &[
                    Variant::from(5i32),
                    Variant::from(3i32),
                    Variant::from("data"),
                ],
            )
            .unwrap();

        let events = log.borrow();
        let invokes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Invoke {
                    node,
                    dispid,
                    flags,
                    args,
                    named,
                } => Some((node.as_str(), *dispid, *flags, args.clone(), named.clone())),
                Event::Lookup(_) => None,
            })
            .collect();

        // get("Cells") -> default-get(5) -> default-put(3, "data"), in order.
        assert_eq!(invokes.len(), 3);
        assert_eq!(invokes[0].0, "root");
        assert_eq!(invokes[0].1, 2);
        assert_ne!(invokes[0].2 & DISPATCH_PROPERTYGET.0, 0);

        assert_eq!(invokes[1].0, "cells");
        assert_eq!(invokes[1].1, DISPID_VALUE);
        assert_eq!(invokes[1].3, vec!["5".to_string()]);

        assert_eq!(invokes[2].0, "cells[5]");
        assert_eq!(invokes[2].1, DISPID_VALUE);
        assert_ne!(invokes[2].2 & DISPATCH_PROPERTYPUT.0, 0);
        // Reverse order on the wire: value first, then the remaining index.
        assert_eq!(invokes[2].3, vec!["data".to_string(), "3".to_string()]);
        assert_eq!(invokes[2].4, vec![DISPID_PROPERTYPUT]);
    }

    #[test]
    fn test_dispatch_error_prefers_rich_info() {
        let (object, _log) = scripted();
        match object.call("Boom", &[]) {
            Err(Error::Dispatch { code, message, member }) => {
                assert_eq!(member, "Boom");
                assert_eq!(code, DISP_E_EXCEPTION.0 as u32);
                assert!(message.contains("kaboom"), "message was {message:?}");
            }
            other => panic!("expected Dispatch error, got {other:?}"),
        }
    }
}
