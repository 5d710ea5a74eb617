//! Owned, tag-checked VARIANT values.
//!
//! A VARIANT is the tagged union OLE Automation uses to pass arbitrarily
//! typed values across interface boundaries. [`Variant`] owns exactly one raw
//! `VARIANT`: owning payloads (strings, interfaces, arrays) are released by
//! `VariantClear` when the value is cleared, reassigned, or dropped, and
//! duplicated by `VariantCopy` when the value is cloned.
//!
//! Access comes in two strengths: the `get_*` accessors require the exact
//! tag and fail with a type-mismatch error otherwise, while the `to_*`
//! accessors additionally coerce through the platform's conversion facility
//! (`VariantChangeType`) when the representations are compatible.

use crate::error::{Error, Result};
use crate::safearray::SafeArray;
use crate::string::BstrExt;
use std::cmp::Ordering;
use std::mem::ManuallyDrop;
use std::ptr;
use windows::core::{BSTR, IUnknown};
use windows::Win32::Foundation::{DECIMAL, DISP_E_PARAMNOTFOUND, VARIANT_FALSE, VARIANT_TRUE};
use windows::Win32::Globalization::GetSystemDefaultLCID;
use windows::Win32::System::Com::IDispatch;
use windows::Win32::System::Ole::VarCmp;
use windows::Win32::System::Variant::{
    VariantChangeType, VariantClear, VariantCopy, VARENUM, VARIANT, VAR_CHANGE_FLAGS, VT_ARRAY,
    VT_BOOL, VT_BSTR, VT_BYREF, VT_DECIMAL, VT_DISPATCH, VT_EMPTY, VT_ERROR, VT_I1, VT_I2, VT_I4,
    VT_I8, VT_NULL, VT_R4, VT_R8, VT_UI1, VT_UI2, VT_UI4, VT_UI8, VT_UNKNOWN, VT_VARIANT,
};

// VARCMP return values of VarCmp; the HRESULT carries the ordering.
const VARCMP_LT: i32 = 0;
const VARCMP_EQ: i32 = 1;
const VARCMP_GT: i32 = 2;

/// An owned VARIANT value.
///
/// # Example
///
/// ```no_run
/// use ergonomic_com::variant::Variant;
///
/// let v = Variant::from("128");
/// assert_eq!(v.to_i32()?, 128);      // coerced
/// assert!(v.get_i32().is_err());     // strict: tag is VT_BSTR
/// # Ok::<(), ergonomic_com::error::Error>(())
/// ```
#[repr(transparent)]
pub struct Variant(VARIANT);

impl Variant {
    /// Creates an empty (`VT_EMPTY`) variant.
    #[inline]
    pub fn new() -> Self {
        Self(VARIANT::default())
    }

    /// Creates a `VT_NULL` variant - SQL-style "no value".
    pub fn null() -> Self {
        let mut v = VARIANT::default();
        // SAFETY: writing the tag of a freshly initialized variant.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_NULL);
        }
        Self(v)
    }

    /// Creates a dispatch-tagged variant holding no object - the automation
    /// `Nothing` value, distinct from both empty and null.
    pub fn nothing() -> Self {
        let mut v = VARIANT::default();
        // SAFETY: as above; a null interface payload is valid for
        // VT_DISPATCH and VariantClear handles it.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_DISPATCH);
            ptr::write(&mut inner.Anonymous.pdispVal, ManuallyDrop::new(None));
        }
        Self(v)
    }

    /// Creates the "parameter not supplied" placeholder used for optional
    /// arguments in late-bound calls.
    pub fn missing() -> Self {
        let mut v = VARIANT::default();
        // SAFETY: as above.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_ERROR);
            ptr::write(&mut inner.Anonymous.scode, DISP_E_PARAMNOTFOUND.0);
        }
        Self(v)
    }

    /// Creates a decimal-tagged variant.
    pub fn from_decimal(value: DECIMAL) -> Self {
        let mut v = VARIANT::default();
        // SAFETY: DECIMAL overlays the whole variant payload; the tag is
        // written afterwards because it shares storage with the decimal's
        // reserved word.
        unsafe {
            v.Anonymous.decVal = value;
            let inner = &mut *v.Anonymous.Anonymous;
            inner.vt = VT_DECIMAL;
        }
        Self(v)
    }

    /// Takes ownership of a raw VARIANT, including its payload.
    #[inline]
    pub fn from_raw(raw: VARIANT) -> Self {
        Self(raw)
    }

    /// Releases ownership of the raw VARIANT to the caller.
    #[inline]
    pub fn into_raw(self) -> VARIANT {
        let me = ManuallyDrop::new(self);
        // SAFETY: `me` is never dropped, so the payload moves out exactly once.
        unsafe { ptr::read(&me.0) }
    }

    /// Borrows the raw VARIANT, for passing to APIs that read one.
    #[inline]
    pub fn as_raw(&self) -> &VARIANT {
        &self.0
    }

    /// Returns the type tag.
    #[inline]
    pub fn vt(&self) -> VARENUM {
        // SAFETY: the tag field is always initialized.
        unsafe { self.0.Anonymous.Anonymous.vt }
    }

    /// Returns true for `VT_EMPTY`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vt() == VT_EMPTY
    }

    /// Returns true for `VT_NULL`.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.vt() == VT_NULL
    }

    /// Returns true for a dispatch- or unknown-tagged variant holding a null
    /// interface pointer (`Nothing`).
    pub fn is_nothing(&self) -> bool {
        // SAFETY: payload reads are guarded by the tag.
        unsafe {
            match self.vt() {
                vt if vt == VT_DISPATCH => self.0.Anonymous.Anonymous.Anonymous.pdispVal.is_none(),
                vt if vt == VT_UNKNOWN => self.0.Anonymous.Anonymous.Anonymous.punkVal.is_none(),
                _ => false,
            }
        }
    }

    /// Returns true when the tag carries the array flag.
    #[inline]
    pub fn is_array(&self) -> bool {
        self.vt().0 & VT_ARRAY.0 != 0
    }

    /// Returns true when the tag carries the by-reference flag.
    #[inline]
    pub fn is_by_ref(&self) -> bool {
        self.vt().0 & VT_BYREF.0 != 0
    }

    /// Releases any owning payload and resets the tag to `VT_EMPTY`.
    pub fn clear(&mut self) {
        // SAFETY: the variant is owned and initialized; VariantClear leaves
        // it VT_EMPTY regardless of the prior payload.
        unsafe {
            let _ = VariantClear(&mut self.0);
        }
    }

    /// Deep-copies the value: strings are duplicated, interface references
    /// re-acquired, arrays copied.
    pub fn try_clone(&self) -> Result<Self> {
        let mut copy = VARIANT::default();
        // SAFETY: destination is initialized empty; source is owned.
        unsafe { VariantCopy(&mut copy, &self.0) }.map_err(Error::from)?;
        Ok(Self(copy))
    }

    /// Converts the value in place to the given tag.
    pub fn change_type(&mut self, vt: VARENUM) -> Result<()> {
        let converted = self.coerced_raw(vt)?;
        *self = Self(converted);
        Ok(())
    }

    /// Compares against another variant using the platform's generic
    /// comparer.
    pub fn compare(&self, other: &Self) -> Result<Ordering> {
        // SAFETY: both operands are owned, initialized variants.
        let hr = unsafe { VarCmp(&self.0, &other.0, GetSystemDefaultLCID(), 0) };
        match hr.0 {
            VARCMP_LT => Ok(Ordering::Less),
            VARCMP_EQ => Ok(Ordering::Equal),
            VARCMP_GT => Ok(Ordering::Greater),
            _ => Err(Error::Incomparable {
                left: self.vt().0,
                right: other.vt().0,
            }),
        }
    }

    /// Resolves one level of `VT_BYREF | VT_VARIANT` indirection, copying the
    /// referenced value.
    pub fn dereference(&self) -> Result<Self> {
        let expected = VARENUM(VT_BYREF.0 | VT_VARIANT.0);
        if self.vt() != expected {
            return Err(self.mismatch(expected));
        }
        // SAFETY: tag guarantees pvarVal is the active payload; the pointee
        // is a live variant supplied by the caller that created the
        // reference.
        unsafe {
            let target = self.0.Anonymous.Anonymous.Anonymous.pvarVal;
            if target.is_null() {
                return Err(Error::null_pointer("by-ref variant holds null"));
            }
            Self::from_raw_borrowed(&*target).try_clone()
        }
    }

    /// Wraps a mutable variant in a `VT_BYREF | VT_VARIANT` reference for
    /// out-parameter style arguments.
    ///
    /// # Safety
    ///
    /// The referenced variant must outlive every use of the returned value;
    /// the reference is a raw pointer with no lifetime attached.
    pub unsafe fn by_ref(target: &mut Variant) -> Self {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VARENUM(VT_BYREF.0 | VT_VARIANT.0));
        ptr::write(&mut inner.Anonymous.pvarVal, &mut target.0 as *mut VARIANT);
        Self(v)
    }

    // Borrow a raw VARIANT as a Variant for the duration of a call.
    #[inline]
    pub(crate) fn from_raw_borrowed(raw: &VARIANT) -> &Self {
        // SAFETY: Variant is a transparent wrapper over VARIANT.
        unsafe { &*(raw as *const VARIANT as *const Variant) }
    }

    fn mismatch(&self, expected: VARENUM) -> Error {
        Error::TypeMismatch {
            expected: expected.0,
            actual: self.vt().0,
        }
    }

    fn coerced_raw(&self, vt: VARENUM) -> Result<VARIANT> {
        let mut out = VARIANT::default();
        // SAFETY: destination initialized empty; source owned; on failure the
        // destination stays empty and is safe to drop.
        unsafe { VariantChangeType(&mut out, &self.0, VAR_CHANGE_FLAGS(0), vt) }
            .map_err(|_| self.mismatch(vt))?;
        Ok(out)
    }

    // ---- strict accessors ----

    /// Reads a `VT_BOOL` payload.
    pub fn get_bool(&self) -> Result<bool> {
        if self.vt() != VT_BOOL {
            return Err(self.mismatch(VT_BOOL));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.boolVal }.as_bool())
    }

    /// Reads a `VT_I1` payload.
    pub fn get_i8(&self) -> Result<i8> {
        if self.vt() != VT_I1 {
            return Err(self.mismatch(VT_I1));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.cVal } as i8)
    }

    /// Reads a `VT_I2` payload.
    pub fn get_i16(&self) -> Result<i16> {
        if self.vt() != VT_I2 {
            return Err(self.mismatch(VT_I2));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.iVal })
    }

    /// Reads a `VT_I4` payload.
    pub fn get_i32(&self) -> Result<i32> {
        if self.vt() != VT_I4 {
            return Err(self.mismatch(VT_I4));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.lVal })
    }

    /// Reads a `VT_I8` payload.
    pub fn get_i64(&self) -> Result<i64> {
        if self.vt() != VT_I8 {
            return Err(self.mismatch(VT_I8));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.llVal })
    }

    /// Reads a `VT_UI1` payload.
    pub fn get_u8(&self) -> Result<u8> {
        if self.vt() != VT_UI1 {
            return Err(self.mismatch(VT_UI1));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.bVal })
    }

    /// Reads a `VT_UI2` payload.
    pub fn get_u16(&self) -> Result<u16> {
        if self.vt() != VT_UI2 {
            return Err(self.mismatch(VT_UI2));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.uiVal })
    }

    /// Reads a `VT_UI4` payload.
    pub fn get_u32(&self) -> Result<u32> {
        if self.vt() != VT_UI4 {
            return Err(self.mismatch(VT_UI4));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.ulVal })
    }

    /// Reads a `VT_UI8` payload.
    pub fn get_u64(&self) -> Result<u64> {
        if self.vt() != VT_UI8 {
            return Err(self.mismatch(VT_UI8));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.ullVal })
    }

    /// Reads a `VT_R4` payload.
    pub fn get_f32(&self) -> Result<f32> {
        if self.vt() != VT_R4 {
            return Err(self.mismatch(VT_R4));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.fltVal })
    }

    /// Reads a `VT_R8` payload.
    pub fn get_f64(&self) -> Result<f64> {
        if self.vt() != VT_R8 {
            return Err(self.mismatch(VT_R8));
        }
        // SAFETY: tag checked above.
        Ok(unsafe { self.0.Anonymous.Anonymous.Anonymous.dblVal })
    }

    /// Reads a `VT_DECIMAL` payload.
    pub fn get_decimal(&self) -> Result<DECIMAL> {
        if self.vt() != VT_DECIMAL {
            return Err(self.mismatch(VT_DECIMAL));
        }
        // SAFETY: tag checked above; the decimal overlays the payload.
        Ok(unsafe { self.0.Anonymous.decVal })
    }

    /// Reads a `VT_BSTR` payload as a Rust string. A null string payload
    /// reads as the empty string.
    pub fn get_string(&self) -> Result<String> {
        if self.vt() != VT_BSTR {
            return Err(self.mismatch(VT_BSTR));
        }
        // SAFETY: tag checked above; bstrVal is the active payload.
        let bstr: &BSTR = unsafe { &self.0.Anonymous.Anonymous.Anonymous.bstrVal };
        bstr.to_string_checked()
    }

    /// Reads a `VT_DISPATCH` payload, acquiring a new reference.
    pub fn get_dispatch(&self) -> Result<IDispatch> {
        if self.vt() != VT_DISPATCH {
            return Err(self.mismatch(VT_DISPATCH));
        }
        // SAFETY: tag checked above.
        let maybe: &Option<IDispatch> = unsafe { &self.0.Anonymous.Anonymous.Anonymous.pdispVal };
        maybe
            .clone()
            .ok_or(Error::null_pointer("VT_DISPATCH variant holds Nothing"))
    }

    /// Reads a `VT_UNKNOWN` payload, acquiring a new reference.
    pub fn get_unknown(&self) -> Result<IUnknown> {
        if self.vt() != VT_UNKNOWN {
            return Err(self.mismatch(VT_UNKNOWN));
        }
        // SAFETY: tag checked above.
        let maybe: &Option<IUnknown> = unsafe { &self.0.Anonymous.Anonymous.Anonymous.punkVal };
        maybe
            .clone()
            .ok_or(Error::null_pointer("VT_UNKNOWN variant holds Nothing"))
    }

    /// Takes the array payload out of an array-tagged variant.
    pub fn into_array(mut self) -> Result<SafeArray> {
        let vt = self.vt();
        if vt.0 & VT_ARRAY.0 == 0 || vt.0 & VT_BYREF.0 != 0 {
            return Err(self.mismatch(VT_ARRAY));
        }
        // SAFETY: the array flag guarantees parray is the active payload;
        // the tag is reset so drop will not double-free the transferred
        // array.
        unsafe {
            let inner = &mut *self.0.Anonymous.Anonymous;
            let psa = inner.Anonymous.parray;
            ptr::write(&mut inner.vt, VT_EMPTY);
            ptr::write(&mut inner.Anonymous.parray, std::ptr::null_mut());
            SafeArray::from_raw(psa, VARENUM(vt.0 & !VT_ARRAY.0))
        }
    }

    // ---- coercing accessors ----

    /// Converts to `bool` if the platform can coerce the value.
    pub fn to_bool(&self) -> Result<bool> {
        if self.vt() == VT_BOOL {
            return self.get_bool();
        }
        Self(self.coerced_raw(VT_BOOL)?).get_bool()
    }

    /// Converts to `i32` if the platform can coerce the value.
    pub fn to_i32(&self) -> Result<i32> {
        if self.vt() == VT_I4 {
            return self.get_i32();
        }
        Self(self.coerced_raw(VT_I4)?).get_i32()
    }

    /// Converts to `i64` if the platform can coerce the value.
    pub fn to_i64(&self) -> Result<i64> {
        if self.vt() == VT_I8 {
            return self.get_i64();
        }
        Self(self.coerced_raw(VT_I8)?).get_i64()
    }

    /// Converts to `f64` if the platform can coerce the value.
    pub fn to_f64(&self) -> Result<f64> {
        if self.vt() == VT_R8 {
            return self.get_f64();
        }
        Self(self.coerced_raw(VT_R8)?).get_f64()
    }

    /// Converts to a Rust `String` if the platform can coerce the value.
    pub fn to_string_value(&self) -> Result<String> {
        if self.vt() == VT_BSTR {
            return self.get_string();
        }
        Self(self.coerced_raw(VT_BSTR)?).get_string()
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Variant {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variant").field("vt", &self.vt().0).finish()
    }
}

macro_rules! variant_from_numeric {
    ($($ty:ty => $vt:expr, $field:ident;)*) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    let mut v = VARIANT::default();
                    // SAFETY: writing tag and matching payload of a freshly
                    // initialized variant.
                    unsafe {
                        let inner = &mut *v.Anonymous.Anonymous;
                        ptr::write(&mut inner.vt, $vt);
                        ptr::write(&mut inner.Anonymous.$field, value as _);
                    }
                    Self(v)
                }
            }
        )*
    };
}

variant_from_numeric! {
    i8 => VT_I1, cVal;
    i16 => VT_I2, iVal;
    i32 => VT_I4, lVal;
    i64 => VT_I8, llVal;
    u8 => VT_UI1, bVal;
    u16 => VT_UI2, uiVal;
    u32 => VT_UI4, ulVal;
    u64 => VT_UI8, ullVal;
}

impl From<f32> for Variant {
    fn from(value: f32) -> Self {
        let mut v = VARIANT::default();
        // SAFETY: tag and payload written together.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_R4);
            ptr::write(&mut inner.Anonymous.fltVal, value);
        }
        Self(v)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        let mut v = VARIANT::default();
        // SAFETY: tag and payload written together.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_R8);
            ptr::write(&mut inner.Anonymous.dblVal, value);
        }
        Self(v)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        let mut v = VARIANT::default();
        // SAFETY: tag and payload written together.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_BOOL);
            ptr::write(
                &mut inner.Anonymous.boolVal,
                if value { VARIANT_TRUE } else { VARIANT_FALSE },
            );
        }
        Self(v)
    }
}

impl From<BSTR> for Variant {
    fn from(value: BSTR) -> Self {
        let mut v = VARIANT::default();
        // SAFETY: the variant takes over the BSTR allocation; VariantClear
        // frees it.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_BSTR);
            ptr::write(&mut inner.Anonymous.bstrVal, ManuallyDrop::new(value));
        }
        Self(v)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::from(BSTR::from(value))
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<IDispatch> for Variant {
    fn from(value: IDispatch) -> Self {
        let mut v = VARIANT::default();
        // SAFETY: the variant takes over the interface reference;
        // VariantClear releases it.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_DISPATCH);
            ptr::write(&mut inner.Anonymous.pdispVal, ManuallyDrop::new(Some(value)));
        }
        Self(v)
    }
}

impl From<IUnknown> for Variant {
    fn from(value: IUnknown) -> Self {
        let mut v = VARIANT::default();
        // SAFETY: as above.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VT_UNKNOWN);
            ptr::write(&mut inner.Anonymous.punkVal, ManuallyDrop::new(Some(value)));
        }
        Self(v)
    }
}

impl From<SafeArray> for Variant {
    fn from(value: SafeArray) -> Self {
        let element_vt = value.element_type();
        let mut v = VARIANT::default();
        // SAFETY: the variant takes over the array; VariantClear destroys it.
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, VARENUM(VT_ARRAY.0 | element_vt.0));
            ptr::write(&mut inner.Anonymous.parray, value.into_raw());
        }
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_null_nothing_are_distinct() {
        let empty = Variant::new();
        let null = Variant::null();
        let nothing = Variant::nothing();
        assert!(empty.is_empty() && !empty.is_null() && !empty.is_nothing());
        assert!(null.is_null() && !null.is_empty() && !null.is_nothing());
        assert!(nothing.is_nothing() && !nothing.is_empty() && !nothing.is_null());
    }

    #[test]
    fn test_clear_resets_tag() {
        let mut v = Variant::from("payload");
        assert_eq!(v.vt(), VT_BSTR);
        v.clear();
        assert!(v.is_empty());
    }

    #[test]
    fn test_strict_accessors_roundtrip() {
        assert!(Variant::from(true).get_bool().unwrap());
        assert_eq!(Variant::from(-5i8).get_i8().unwrap(), -5);
        assert_eq!(Variant::from(-500i16).get_i16().unwrap(), -500);
        assert_eq!(Variant::from(42i32).get_i32().unwrap(), 42);
        assert_eq!(Variant::from(1i64 << 40).get_i64().unwrap(), 1i64 << 40);
        assert_eq!(Variant::from(7u8).get_u8().unwrap(), 7);
        assert_eq!(Variant::from(700u16).get_u16().unwrap(), 700);
        assert_eq!(Variant::from(70_000u32).get_u32().unwrap(), 70_000);
        assert_eq!(Variant::from(1u64 << 40).get_u64().unwrap(), 1u64 << 40);
        assert_eq!(Variant::from(1.5f32).get_f32().unwrap(), 1.5);
        assert_eq!(Variant::from(2.5f64).get_f64().unwrap(), 2.5);
        assert_eq!(Variant::from("text").get_string().unwrap(), "text");
    }

    #[test]
    fn test_strict_accessor_rejects_wrong_tag() {
        let v = Variant::from(42i32);
        match v.get_string() {
            Err(Error::TypeMismatch { expected, actual }) => {
                assert_eq!(expected, VT_BSTR.0);
                assert_eq!(actual, VT_I4.0);
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_coercion() {
        assert_eq!(Variant::from(42i32).to_string_value().unwrap(), "42");
        assert_eq!(Variant::from("128").to_i32().unwrap(), 128);
        assert_eq!(Variant::from("2.5").to_f64().unwrap(), 2.5);
        assert!(Variant::from("not a number").to_i32().is_err());
    }

    #[test]
    fn test_change_type_in_place() {
        let mut v = Variant::from(7i32);
        v.change_type(VT_BSTR).unwrap();
        assert_eq!(v.vt(), VT_BSTR);
        assert_eq!(v.get_string().unwrap(), "7");
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let original = Variant::from("shared?");
        let copy = original.try_clone().unwrap();
        drop(original);
        assert_eq!(copy.get_string().unwrap(), "shared?");
    }

    #[test]
    fn test_compare() {
        let one = Variant::from(1i32);
        let two = Variant::from(2i32);
        assert_eq!(one.compare(&two).unwrap(), Ordering::Less);
        assert_eq!(two.compare(&one).unwrap(), Ordering::Greater);
        assert_eq!(one.compare(&one).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_missing_parameter_marker() {
        let v = Variant::missing();
        assert_eq!(v.vt(), VT_ERROR);
    }

    #[test]
    fn test_by_ref_dereference() {
        let mut target = Variant::from(9i32);
        // SAFETY: `target` outlives `reference` in this scope.
        let reference = unsafe { Variant::by_ref(&mut target) };
        assert!(reference.is_by_ref());
        let resolved = reference.dereference().unwrap();
        drop(reference);
        assert_eq!(resolved.get_i32().unwrap(), 9);
    }

    #[test]
    fn test_array_roundtrip_through_variant() {
        let arr = SafeArray::from_variants(&[Variant::from(1i32), Variant::from(2i32)]).unwrap();
        let v = Variant::from(arr);
        assert!(v.is_array());
        let back = v.into_array().unwrap();
        assert_eq!(back.len().unwrap(), 2);
    }
}
