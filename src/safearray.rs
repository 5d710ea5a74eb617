//! Bounds-tracked SAFEARRAY ownership.
//!
//! A SAFEARRAY is OLE Automation's self-describing native array: one declared
//! element tag, explicit lower/upper bounds, and storage managed by the
//! system allocator. [`SafeArray`] owns a one-dimensional array, destroys it
//! on drop, and copies elements in and out through the platform accessors so
//! that owning elements (strings, nested variants) are duplicated rather
//! than aliased.

use crate::error::{Error, Result};
use crate::string::BstrExt;
use crate::variant::Variant;
use std::ffi::c_void;
use windows::core::BSTR;
use windows::Win32::System::Com::{SAFEARRAY, SAFEARRAYBOUND};
use windows::Win32::System::Ole::{
    SafeArrayAccessData, SafeArrayCreate, SafeArrayDestroy, SafeArrayGetElement,
    SafeArrayGetLBound, SafeArrayGetUBound, SafeArrayLock, SafeArrayPutElement, SafeArrayRedim,
    SafeArrayUnaccessData, SafeArrayUnlock,
};
use windows::Win32::System::Variant::{VARENUM, VT_BSTR, VT_I4, VT_R8, VT_VARIANT};

/// An owned, one-dimensional SAFEARRAY.
///
/// # Example
///
/// ```no_run
/// use ergonomic_com::safearray::SafeArray;
/// use ergonomic_com::variant::Variant;
///
/// let arr = SafeArray::from_variants(&[
///     Variant::from(1i32),
///     Variant::from("two"),
/// ])?;
/// assert_eq!(arr.len()?, 2);
/// # Ok::<(), ergonomic_com::error::Error>(())
/// ```
pub struct SafeArray {
    psa: *mut SAFEARRAY,
    element_vt: VARENUM,
}

impl SafeArray {
    /// Allocates an array of `VT_VARIANT` elements, copying each value in.
    pub fn from_variants(items: &[Variant]) -> Result<Self> {
        let array = Self::allocate(VT_VARIANT, items.len() as u32)?;
        for (i, item) in items.iter().enumerate() {
            let index = i as i32;
            // SAFETY: index is in bounds; for VT_VARIANT arrays PutElement
            // deep-copies the variant, so `item` stays owned by the caller.
            unsafe {
                SafeArrayPutElement(
                    array.psa,
                    &index,
                    item.as_raw() as *const _ as *const c_void,
                )
            }
            .map_err(Error::from)?;
        }
        Ok(array)
    }

    /// Allocates an array of `VT_BSTR` elements; each string is duplicated
    /// individually.
    pub fn from_strings<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let array = Self::allocate(VT_BSTR, items.len() as u32)?;
        for (i, item) in items.iter().enumerate() {
            let index = i as i32;
            let bstr = BSTR::from(item.as_ref());
            // SAFETY: for VT_BSTR arrays the element value is the BSTR
            // pointer itself and PutElement copies the string; our local
            // allocation is freed when `bstr` drops.
            unsafe { SafeArrayPutElement(array.psa, &index, bstr.as_ptr() as *const c_void) }
                .map_err(Error::from)?;
        }
        Ok(array)
    }

    /// Allocates an array of `VT_I4` elements.
    pub fn from_i32s(items: &[i32]) -> Result<Self> {
        let array = Self::allocate(VT_I4, items.len() as u32)?;
        for (i, item) in items.iter().enumerate() {
            let index = i as i32;
            // SAFETY: fixed-size element copied out of the borrowed slot.
            unsafe {
                SafeArrayPutElement(array.psa, &index, item as *const i32 as *const c_void)
            }
            .map_err(Error::from)?;
        }
        Ok(array)
    }

    /// Allocates an array of `VT_R8` elements.
    pub fn from_f64s(items: &[f64]) -> Result<Self> {
        let array = Self::allocate(VT_R8, items.len() as u32)?;
        for (i, item) in items.iter().enumerate() {
            let index = i as i32;
            // SAFETY: fixed-size element copied out of the borrowed slot.
            unsafe {
                SafeArrayPutElement(array.psa, &index, item as *const f64 as *const c_void)
            }
            .map_err(Error::from)?;
        }
        Ok(array)
    }

    fn allocate(element_vt: VARENUM, elements: u32) -> Result<Self> {
        let bound = SAFEARRAYBOUND {
            cElements: elements,
            lLbound: 0,
        };
        // SAFETY: a one-dimensional descriptor with a valid bound.
        let psa = unsafe { SafeArrayCreate(element_vt, 1, &bound) };
        if psa.is_null() {
            return Err(Error::OutOfMemory {
                context: "SafeArrayCreate",
            });
        }
        Ok(Self { psa, element_vt })
    }

    /// Takes ownership of a raw array pointer with the given element tag.
    ///
    /// # Safety
    ///
    /// `psa` must be a valid one-dimensional SAFEARRAY of `element_vt`
    /// elements, and the caller must transfer sole ownership.
    pub unsafe fn from_raw(psa: *mut SAFEARRAY, element_vt: VARENUM) -> Result<Self> {
        if psa.is_null() {
            return Err(Error::null_pointer("SafeArray::from_raw"));
        }
        Ok(Self { psa, element_vt })
    }

    /// Releases ownership of the raw array to the caller.
    pub fn into_raw(self) -> *mut SAFEARRAY {
        let psa = self.psa;
        std::mem::forget(self);
        psa
    }

    /// Returns the raw array pointer without affecting ownership.
    #[inline]
    pub fn as_raw(&self) -> *mut SAFEARRAY {
        self.psa
    }

    /// Returns the declared element tag.
    #[inline]
    pub fn element_type(&self) -> VARENUM {
        self.element_vt
    }

    /// Returns the lower bound of the single dimension.
    pub fn lower_bound(&self) -> Result<i32> {
        // SAFETY: the array is owned and one-dimensional.
        unsafe { SafeArrayGetLBound(self.psa, 1) }.map_err(Error::from)
    }

    /// Returns the element count: `upper - lower + 1`.
    pub fn len(&self) -> Result<usize> {
        // SAFETY: as above.
        let upper = unsafe { SafeArrayGetUBound(self.psa, 1) }.map_err(Error::from)?;
        let lower = self.lower_bound()?;
        Ok((upper - lower + 1) as usize)
    }

    /// Returns true when the array holds no elements.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resizes the array, preserving existing elements up to the new bound.
    pub fn resize(&mut self, new_len: u32) -> Result<()> {
        let mut bound = SAFEARRAYBOUND {
            cElements: new_len,
            lLbound: self.lower_bound()?,
        };
        // SAFETY: the array is owned; Redim reallocates in place.
        unsafe { SafeArrayRedim(self.psa, &mut bound) }.map_err(Error::from)
    }

    /// Reads the element at `index` of a `VT_VARIANT` array.
    pub fn get(&self, index: i32) -> Result<Variant> {
        self.require_variant_elements()?;
        let mut out = Variant::new();
        // SAFETY: out is an initialized variant; GetElement copies the
        // element into it, transferring fresh ownership of owning payloads.
        unsafe {
            SafeArrayGetElement(
                self.psa,
                &index,
                out.as_raw() as *const _ as *mut c_void,
            )
        }
        .map_err(Error::from)?;
        Ok(out)
    }

    /// Writes the element at `index` of a `VT_VARIANT` array, copying the
    /// value.
    pub fn put(&mut self, index: i32, value: &Variant) -> Result<()> {
        self.require_variant_elements()?;
        // SAFETY: PutElement deep-copies the variant.
        unsafe {
            SafeArrayPutElement(
                self.psa,
                &index,
                value.as_raw() as *const _ as *const c_void,
            )
        }
        .map_err(Error::from)
    }

    /// Reads the whole `VT_VARIANT` array back, in order.
    pub fn to_variants(&self) -> Result<Vec<Variant>> {
        let lower = self.lower_bound()?;
        let len = self.len()?;
        (lower..lower + len as i32).map(|i| self.get(i)).collect()
    }

    /// Reads the whole `VT_BSTR` array back, duplicating each string.
    pub fn to_strings(&self) -> Result<Vec<String>> {
        if self.element_vt != VT_BSTR {
            return Err(Error::TypeMismatch {
                expected: VT_BSTR.0,
                actual: self.element_vt.0,
            });
        }
        let lower = self.lower_bound()?;
        let len = self.len()?;
        (lower..lower + len as i32)
            .map(|i| {
                let mut copy = BSTR::new();
                // SAFETY: for VT_BSTR arrays GetElement writes a fresh copy
                // of the string, which `copy` then owns and frees.
                unsafe {
                    SafeArrayGetElement(
                        self.psa,
                        &i,
                        &mut copy as *mut BSTR as *mut c_void,
                    )
                }
                .map_err(Error::from)?;
                copy.to_string_checked()
            })
            .collect()
    }

    /// Reads the whole `VT_I4` array back.
    pub fn to_i32s(&self) -> Result<Vec<i32>> {
        if self.element_vt != VT_I4 {
            return Err(Error::TypeMismatch {
                expected: VT_I4.0,
                actual: self.element_vt.0,
            });
        }
        let lower = self.lower_bound()?;
        let len = self.len()?;
        (lower..lower + len as i32)
            .map(|i| {
                let mut out = 0i32;
                // SAFETY: fixed-size element copied into the local.
                unsafe {
                    SafeArrayGetElement(self.psa, &i, &mut out as *mut i32 as *mut c_void)
                }
                .map_err(Error::from)?;
                Ok(out)
            })
            .collect()
    }

    /// Increments the array's lock count, pinning its storage.
    ///
    /// Locking discipline is the caller's obligation: every `lock` must be
    /// matched by exactly one [`SafeArray::unlock`], and element storage must
    /// not be resized while locked. Violations are platform-defined caller
    /// errors, not validated here.
    pub fn lock(&self) -> Result<()> {
        // SAFETY: the array is owned and alive.
        unsafe { SafeArrayLock(self.psa) }.map_err(Error::from)
    }

    /// Decrements the array's lock count.
    pub fn unlock(&self) -> Result<()> {
        // SAFETY: as above; unbalanced calls are the caller's error.
        unsafe { SafeArrayUnlock(self.psa) }.map_err(Error::from)
    }

    /// Locks the array and exposes its raw element storage until the guard
    /// drops.
    pub fn access_data(&self) -> Result<DataGuard<'_>> {
        let mut data: *mut c_void = std::ptr::null_mut();
        // SAFETY: the array is owned; a successful AccessData must be paired
        // with UnaccessData, which the guard's Drop performs.
        unsafe { SafeArrayAccessData(self.psa, &mut data) }.map_err(Error::from)?;
        Ok(DataGuard { array: self, data })
    }

    /// Copies the array element by element.
    pub fn try_clone(&self) -> Result<Self> {
        let lower = self.lower_bound()?;
        let len = self.len()?;
        let mut bound = SAFEARRAYBOUND {
            cElements: len as u32,
            lLbound: lower,
        };
        // SAFETY: fresh descriptor with the same shape.
        let psa = unsafe { SafeArrayCreate(self.element_vt, 1, &mut bound) };
        if psa.is_null() {
            return Err(Error::OutOfMemory {
                context: "SafeArrayCreate",
            });
        }
        let clone = Self {
            psa,
            element_vt: self.element_vt,
        };
        for i in lower..lower + len as i32 {
            match self.element_vt {
                vt if vt == VT_VARIANT => {
                    let element = self.get(i)?;
                    // SAFETY: deep-copied again into the clone.
                    unsafe {
                        SafeArrayPutElement(
                            clone.psa,
                            &i,
                            element.as_raw() as *const _ as *const c_void,
                        )
                    }
                    .map_err(Error::from)?;
                }
                vt if vt == VT_BSTR => {
                    let mut copy = BSTR::new();
                    // SAFETY: GetElement hands us an owned string copy,
                    // PutElement duplicates it into the clone, and `copy`
                    // frees the intermediate.
                    unsafe {
                        SafeArrayGetElement(self.psa, &i, &mut copy as *mut BSTR as *mut c_void)
                            .map_err(Error::from)?;
                        SafeArrayPutElement(clone.psa, &i, copy.as_ptr() as *const c_void)
                            .map_err(Error::from)?;
                    }
                }
                _ => {
                    // Large enough and sufficiently aligned for any
                    // fixed-size element, DECIMAL included.
                    let mut scratch = 0u128;
                    // SAFETY: fixed-size elements are plain bit copies.
                    unsafe {
                        SafeArrayGetElement(
                            self.psa,
                            &i,
                            &mut scratch as *mut u128 as *mut c_void,
                        )
                        .map_err(Error::from)?;
                        SafeArrayPutElement(
                            clone.psa,
                            &i,
                            &scratch as *const u128 as *const c_void,
                        )
                        .map_err(Error::from)?;
                    }
                }
            }
        }
        Ok(clone)
    }

    fn require_variant_elements(&self) -> Result<()> {
        if self.element_vt != VT_VARIANT {
            return Err(Error::TypeMismatch {
                expected: VT_VARIANT.0,
                actual: self.element_vt.0,
            });
        }
        Ok(())
    }
}

impl Drop for SafeArray {
    fn drop(&mut self) {
        if !self.psa.is_null() {
            // SAFETY: sole owner; Destroy releases element payloads too.
            unsafe {
                let _ = SafeArrayDestroy(self.psa);
            }
        }
    }
}

impl std::fmt::Debug for SafeArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeArray")
            .field("element_vt", &self.element_vt.0)
            .field("len", &self.len().ok())
            .finish()
    }
}

/// RAII guard over a locked array's raw element storage.
///
/// Dropping the guard unlocks the array. The exposed pointer is valid only
/// while the guard lives; the dispatcher will not relocate storage underneath
/// it.
pub struct DataGuard<'a> {
    array: &'a SafeArray,
    data: *mut c_void,
}

impl DataGuard<'_> {
    /// Returns the pinned element storage.
    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.data
    }
}

impl Drop for DataGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: paired with the successful AccessData that built the guard.
        unsafe {
            let _ = SafeArrayUnaccessData(self.array.psa);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_len() {
        let arr = SafeArray::from_variants(&[
            Variant::from(1i32),
            Variant::from(2i32),
            Variant::from(3i32),
        ])
        .unwrap();
        assert_eq!(arr.len().unwrap(), 3);
        assert_eq!(arr.lower_bound().unwrap(), 0);
        assert_eq!(arr.element_type(), VT_VARIANT);
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let arr = SafeArray::from_variants(&[
            Variant::from(10i32),
            Variant::from("middle"),
            Variant::from(2.5f64),
        ])
        .unwrap();
        let back = arr.to_variants().unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0].get_i32().unwrap(), 10);
        assert_eq!(back[1].get_string().unwrap(), "middle");
        assert_eq!(back[2].get_f64().unwrap(), 2.5);
    }

    #[test]
    fn test_strings_are_duplicated() {
        let source = vec![String::from("a"), String::from("b")];
        let arr = SafeArray::from_strings(&source).unwrap();
        drop(source);
        assert_eq!(arr.to_strings().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_typed_i32_roundtrip() {
        let arr = SafeArray::from_i32s(&[4, 5, 6]).unwrap();
        assert_eq!(arr.to_i32s().unwrap(), vec![4, 5, 6]);
        assert!(arr.to_strings().is_err());
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut arr = SafeArray::from_variants(&[
            Variant::from(1i32),
            Variant::from(2i32),
        ])
        .unwrap();
        arr.resize(4).unwrap();
        assert_eq!(arr.len().unwrap(), 4);
        assert_eq!(arr.get(0).unwrap().get_i32().unwrap(), 1);
        assert_eq!(arr.get(1).unwrap().get_i32().unwrap(), 2);
        arr.resize(1).unwrap();
        assert_eq!(arr.len().unwrap(), 1);
        assert_eq!(arr.get(0).unwrap().get_i32().unwrap(), 1);
    }

    #[test]
    fn test_put_overwrites_element() {
        let mut arr = SafeArray::from_variants(&[Variant::from(1i32)]).unwrap();
        arr.put(0, &Variant::from("replaced")).unwrap();
        assert_eq!(arr.get(0).unwrap().get_string().unwrap(), "replaced");
    }

    #[test]
    fn test_lock_unlock_brackets() {
        let arr = SafeArray::from_i32s(&[1, 2]).unwrap();
        arr.lock().unwrap();
        arr.unlock().unwrap();
        {
            let guard = arr.access_data().unwrap();
            assert!(!guard.as_ptr().is_null());
        }
        // Guard released the lock; a fresh lock still works.
        arr.lock().unwrap();
        arr.unlock().unwrap();
    }

    #[test]
    fn test_try_clone_is_independent() {
        let arr = SafeArray::from_variants(&[Variant::from("x")]).unwrap();
        let copy = arr.try_clone().unwrap();
        drop(arr);
        assert_eq!(copy.get(0).unwrap().get_string().unwrap(), "x");
    }
}
