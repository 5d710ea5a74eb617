//! Type-library introspection for late binding.
//!
//! Automation interfaces are described by type libraries. This module loads
//! libraries (from a path or from their registry registration), finds type
//! descriptions by GUID, and enumerates member names into the name-to-DISPID
//! maps the event machinery binds against.

use crate::error::{Error, Result, ResultExt};
use crate::registry;
use crate::string::{BstrExt, WideString};
use std::collections::HashMap;
use windows::core::{BSTR, GUID};
use windows::Win32::System::Com::{IDispatch, ITypeInfo, ITypeLib};
use windows::Win32::System::Ole::{LoadTypeLibEx, REGKIND_NONE};

/// A loaded type library.
pub struct TypeLibrary {
    lib: ITypeLib,
}

impl TypeLibrary {
    /// Loads a type library from a file path (a `.tlb`, or a DLL/EXE with an
    /// embedded typelib resource).
    pub fn open(path: &str) -> Result<Self> {
        let wide = WideString::new(path);
        // SAFETY: the path buffer is null-terminated and outlives the call.
        let lib = unsafe { LoadTypeLibEx(wide.as_pcwstr(), REGKIND_NONE) }
            .to_result("LoadTypeLibEx")?;
        Ok(Self { lib })
    }

    /// Loads a registered type library by its identifier and version.
    ///
    /// Resolution runs through the registry (`HKCR\TypeLib\{libid}`) to the
    /// on-disk path; each missing link in that chain surfaces as its own
    /// error.
    pub fn open_registered(libid: &GUID, major: u16, minor: u16) -> Result<Self> {
        let path = registry::typelib_path(libid, major, minor)?;
        Self::open(&path)
    }

    /// Returns the library's name from its documentation strings.
    pub fn name(&self) -> Result<String> {
        let mut name = BSTR::new();
        // SAFETY: MEMBERID_NIL (-1) selects the library itself; out
        // parameters are live locals.
        unsafe {
            self.lib
                .GetDocumentation(-1, Some(&mut name), None, &mut 0, None)
        }
        .to_result("ITypeLib::GetDocumentation")?;
        name.to_string_checked()
    }

    /// Finds the type description with the given GUID.
    pub fn type_info_of(&self, guid: &GUID) -> Result<TypeDescription> {
        // SAFETY: plain lookup; the returned interface is owned.
        let info = unsafe { self.lib.GetTypeInfoOfGuid(guid) }.map_err(|_| {
            Error::ConnectionUnsupported {
                context: format!("type {:?} not described by the library", guid),
            }
        })?;
        Ok(TypeDescription { info })
    }

    /// Returns the number of type descriptions in the library.
    pub fn type_count(&self) -> u32 {
        // SAFETY: no preconditions.
        unsafe { self.lib.GetTypeInfoCount() }
    }

    /// Returns the type description at the given index.
    pub fn type_info_at(&self, index: u32) -> Result<TypeDescription> {
        // SAFETY: index validity is checked by the callee.
        let info =
            unsafe { self.lib.GetTypeInfo(index) }.to_result("ITypeLib::GetTypeInfo")?;
        Ok(TypeDescription { info })
    }
}

/// A single type description inside a type library.
pub struct TypeDescription {
    info: ITypeInfo,
}

impl TypeDescription {
    /// Wraps an owned `ITypeInfo`.
    pub fn from_interface(info: ITypeInfo) -> Self {
        Self { info }
    }

    /// Retrieves the type description of a live object's default interface.
    pub fn for_object(dispatch: &IDispatch) -> Result<Self> {
        // SAFETY: index 0 is the object's primary type info.
        let info = unsafe { dispatch.GetTypeInfo(0, 0) }.to_result("IDispatch::GetTypeInfo")?;
        Ok(Self { info })
    }

    /// Returns the type's name from its documentation strings.
    pub fn name(&self) -> Result<String> {
        let mut name = BSTR::new();
        // SAFETY: MEMBERID_NIL (-1) selects the type itself.
        unsafe {
            self.info
                .GetDocumentation(-1, Some(&mut name), None, &mut 0, None)
        }
        .to_result("ITypeInfo::GetDocumentation")?;
        name.to_string_checked()
    }

    /// Returns the interface identifier recorded in the type's attributes.
    pub fn guid(&self) -> Result<GUID> {
        // SAFETY: a successful GetTypeAttr must be paired with
        // ReleaseTypeAttr, done before returning.
        unsafe {
            let attr = self.info.GetTypeAttr().to_result("ITypeInfo::GetTypeAttr")?;
            let guid = (*attr).guid;
            self.info.ReleaseTypeAttr(attr);
            Ok(guid)
        }
    }

    /// Returns the library this type description lives in.
    pub fn containing_library(&self) -> Result<TypeLibrary> {
        let mut lib = None;
        // SAFETY: out parameters are live locals.
        unsafe { self.info.GetContainingTypeLib(&mut lib, &mut 0) }
            .to_result("ITypeInfo::GetContainingTypeLib")?;
        let lib = lib.ok_or(Error::null_pointer("GetContainingTypeLib returned nothing"))?;
        Ok(TypeLibrary { lib })
    }

    /// Resolves a single member name to its DISPID via the type description.
    pub fn member_id(&self, name: &str) -> Result<i32> {
        let wide = WideString::new(name);
        let names = [wide.as_pcwstr()];
        let mut memid = 0i32;
        // SAFETY: one valid name, one out slot.
        unsafe { self.info.GetIDsOfNames(names.as_ptr(), 1, &mut memid) }
            .map_err(|_| Error::member_not_found("type description", name))?;
        Ok(memid)
    }

    /// Enumerates the type's function descriptors into a lowercased
    /// name-to-DISPID map.
    ///
    /// This is the lookup table name-based event binding is built on; build
    /// it once and cache it.
    pub fn member_names(&self) -> Result<HashMap<String, i32>> {
        let mut members = HashMap::new();
        // SAFETY: each GetTypeAttr/GetFuncDesc is paired with its release
        // before any early return below.
        unsafe {
            let attr = self.info.GetTypeAttr().to_result("ITypeInfo::GetTypeAttr")?;
            let functions = (*attr).cFuncs as u32;
            self.info.ReleaseTypeAttr(attr);

            for index in 0..functions {
                let desc = self
                    .info
                    .GetFuncDesc(index)
                    .to_result("ITypeInfo::GetFuncDesc")?;
                let memid = (*desc).memid;
                self.info.ReleaseFuncDesc(desc);

                let mut name = BSTR::new();
                self.info
                    .GetDocumentation(memid, Some(&mut name), None, &mut 0, None)
                    .to_result("ITypeInfo::GetDocumentation")?;
                members.insert(name.to_string_checked()?.to_ascii_lowercase(), memid);
            }
        }
        Ok(members)
    }

    /// Borrows the underlying interface.
    pub fn interface(&self) -> &ITypeInfo {
        &self.info
    }
}

impl From<ITypeInfo> for TypeDescription {
    fn from(info: ITypeInfo) -> Self {
        Self::from_interface(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::ComGuard;

    // stdole2 is registered on every Windows installation and describes the
    // standard OLE types.
    const LIBID_STDOLE: GUID = GUID::from_u128(0x00020430_0000_0000_c000_000000000046);
    const DIID_FONT_EVENTS: GUID = GUID::from_u128(0x4ef6100a_af88_11d0_9846_00c04fc29993);

    #[test]
    fn test_open_registered_stdole() {
        let _com = ComGuard::new().unwrap();
        let lib = TypeLibrary::open_registered(&LIBID_STDOLE, 2, 0).unwrap();
        assert_eq!(lib.name().unwrap().to_ascii_lowercase(), "stdole");
        assert!(lib.type_count() > 0);
    }

    #[test]
    fn test_member_names_of_font_events() {
        let _com = ComGuard::new().unwrap();
        let lib = TypeLibrary::open_registered(&LIBID_STDOLE, 2, 0).unwrap();
        let events = lib.type_info_of(&DIID_FONT_EVENTS).unwrap();
        let members = events.member_names().unwrap();
        // FontEvents declares FontChanged.
        assert!(
            members.keys().any(|name| name.contains("fontchanged")),
            "members: {:?}",
            members
        );
    }

    #[test]
    fn test_unknown_type_guid() {
        let _com = ComGuard::new().unwrap();
        let lib = TypeLibrary::open_registered(&LIBID_STDOLE, 2, 0).unwrap();
        let absent = GUID::from_u128(0xdeadbeef_dead_beef_dead_beefdeadbeef);
        assert!(matches!(
            lib.type_info_of(&absent),
            Err(Error::ConnectionUnsupported { .. })
        ));
    }
}
