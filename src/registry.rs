//! Registry access for COM class and type-library lookups.
//!
//! COM stores its class registrations and type-library paths in the registry;
//! this module provides just enough ergonomic access for those lookups and
//! for in-process server registration: string values under
//! `HKEY_CLASSES_ROOT`, plus the documented `TypeLib` key layout.

use crate::error::{Error, Result};
use crate::guid::GuidExt;
use crate::string::{from_wide, to_wide, WideString};
use windows::core::GUID;
use windows::Win32::Foundation::{ERROR_MORE_DATA, ERROR_SUCCESS, WIN32_ERROR};
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteKeyW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
    HKEY, HKEY_CLASSES_ROOT, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_ALL_ACCESS, KEY_READ,
    KEY_WRITE, REG_OPTION_NON_VOLATILE, REG_SAM_FLAGS, REG_SZ, REG_VALUE_TYPE,
};

/// Helper to convert WIN32_ERROR to Result
fn check_error(err: WIN32_ERROR) -> Result<()> {
    if err == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(Error::Windows(windows::core::Error::from(err)))
    }
}

/// Predefined registry root keys.
#[derive(Clone, Copy, Debug)]
pub struct RootKey(pub HKEY);

impl RootKey {
    /// HKEY_CLASSES_ROOT - file associations and COM object registration.
    pub const CLASSES_ROOT: Self = Self(HKEY_CLASSES_ROOT);

    /// HKEY_CURRENT_USER - settings for the current user.
    pub const CURRENT_USER: Self = Self(HKEY_CURRENT_USER);

    /// HKEY_LOCAL_MACHINE - system-wide settings.
    pub const LOCAL_MACHINE: Self = Self(HKEY_LOCAL_MACHINE);
}

/// Registry access rights.
#[derive(Clone, Copy, Debug)]
pub struct Access(pub REG_SAM_FLAGS);

impl Access {
    /// Read access.
    pub const READ: Self = Self(KEY_READ);

    /// Write access.
    pub const WRITE: Self = Self(KEY_WRITE);

    /// Full access.
    pub const ALL: Self = Self(KEY_ALL_ACCESS);
}

/// An opened registry key.
pub struct Key {
    hkey: HKEY,
}

impl Key {
    /// Opens a registry key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not exist or access is denied.
    pub fn open(root: RootKey, path: &str, access: Access) -> Result<Self> {
        let path_wide = WideString::new(path);
        let mut hkey = HKEY::default();

        // SAFETY: root.0 is a predefined root handle, path_wide is a valid
        // null-terminated wide string, hkey is a live out parameter.
        let err = unsafe { RegOpenKeyExW(root.0, path_wide.as_pcwstr(), 0, access.0, &mut hkey) };
        check_error(err)?;

        Ok(Self { hkey })
    }

    /// Creates or opens a registry key with write access.
    pub fn create(root: RootKey, path: &str) -> Result<Self> {
        let path_wide = WideString::new(path);
        let mut hkey = HKEY::default();

        // SAFETY: as above; REG_OPTION_NON_VOLATILE persists the key.
        let err = unsafe {
            RegCreateKeyExW(
                root.0,
                path_wide.as_pcwstr(),
                0,
                None,
                REG_OPTION_NON_VOLATILE,
                Access::ALL.0,
                None,
                &mut hkey,
                None,
            )
        };
        check_error(err)?;

        Ok(Self { hkey })
    }

    /// Deletes a subkey. The subkey must have no children.
    pub fn delete_subkey(root: RootKey, path: &str) -> Result<()> {
        let path_wide = WideString::new(path);
        // SAFETY: root handle and wide path are valid.
        let err = unsafe { RegDeleteKeyW(root.0, path_wide.as_pcwstr()) };
        check_error(err)
    }

    /// Reads a string value. `None` reads the key's default value.
    pub fn get_string(&self, name: Option<&str>) -> Result<String> {
        let name_wide = name.map(WideString::new);
        let name_ptr = name_wide
            .as_ref()
            .map(|w| w.as_pcwstr())
            .unwrap_or(windows::core::PCWSTR::null());
        let mut value_type = REG_VALUE_TYPE::default();
        let mut size = 0u32;

        // First call to get the size
        // SAFETY: the name buffer (when present) outlives both calls; out
        // parameters are live locals.
        let err = unsafe {
            RegQueryValueExW(
                self.hkey,
                name_ptr,
                None,
                Some(&mut value_type),
                None,
                Some(&mut size),
            )
        };
        if err != ERROR_SUCCESS && err != ERROR_MORE_DATA {
            return Err(Error::Windows(windows::core::Error::from(err)));
        }

        let mut buffer = vec![0u8; size as usize];
        // SAFETY: as above, with a buffer of the reported size.
        let err = unsafe {
            RegQueryValueExW(
                self.hkey,
                name_ptr,
                None,
                Some(&mut value_type),
                Some(buffer.as_mut_ptr()),
                Some(&mut size),
            )
        };
        check_error(err)?;
        buffer.truncate(size as usize);

        if value_type != REG_SZ {
            return Err(Error::custom(format!(
                "Expected REG_SZ, found registry type {:?}",
                value_type
            )));
        }

        let wide: Vec<u16> = buffer
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        from_wide(&wide)
    }

    /// Writes a string value. `None` writes the key's default value.
    pub fn set_string(&self, name: Option<&str>, value: &str) -> Result<()> {
        let name_wide = name.map(WideString::new);
        let name_ptr = name_wide
            .as_ref()
            .map(|w| w.as_pcwstr())
            .unwrap_or(windows::core::PCWSTR::null());

        let wide = to_wide(value);
        let bytes: Vec<u8> = wide.iter().flat_map(|&w| w.to_le_bytes()).collect();

        // SAFETY: the data buffer is valid for the duration of the call.
        let err = unsafe { RegSetValueExW(self.hkey, name_ptr, 0, REG_SZ, Some(&bytes)) };
        check_error(err)
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        // SAFETY: the handle was opened by this wrapper and not closed since.
        unsafe {
            let _ = RegCloseKey(self.hkey);
        }
    }
}

/// Resolves the on-disk path of a registered type library.
///
/// Follows the documented layout
/// `HKCR\TypeLib\{libid}\major.minor\0\win64` (version numbers in hex),
/// preferring the 64-bit registration and falling back to the 32-bit one.
pub fn typelib_path(libid: &GUID, major: u16, minor: u16) -> Result<String> {
    let version_key = format!(r"TypeLib\{}\{:x}.{:x}\0", libid.to_braced(), major, minor);
    let mut last_err = None;
    for arch in ["win64", "win32"] {
        match Key::open(
            RootKey::CLASSES_ROOT,
            &format!(r"{version_key}\{arch}"),
            Access::READ,
        )
        .and_then(|key| key.get_string(None))
        {
            Ok(path) if !path.is_empty() => return Ok(path),
            Ok(_) => last_err = Some(Error::custom("Type library path value is empty")),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::custom("Type library is not registered")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PATH: &str = r"Software\ErgonomicComTests\Registry";

    #[test]
    fn test_string_value_roundtrip() {
        let key = Key::create(RootKey::CURRENT_USER, TEST_PATH).unwrap();
        key.set_string(Some("Sample"), "value one").unwrap();
        key.set_string(None, "default value").unwrap();

        let reopened = Key::open(RootKey::CURRENT_USER, TEST_PATH, Access::READ).unwrap();
        assert_eq!(reopened.get_string(Some("Sample")).unwrap(), "value one");
        assert_eq!(reopened.get_string(None).unwrap(), "default value");

        drop(reopened);
        drop(key);
        Key::delete_subkey(RootKey::CURRENT_USER, TEST_PATH).unwrap();
    }

    #[test]
    fn test_missing_key_is_error() {
        let missing = Key::open(
            RootKey::CURRENT_USER,
            r"Software\ErgonomicComTests\DoesNotExist",
            Access::READ,
        );
        assert!(missing.is_err());
    }

    #[test]
    fn test_stdole_typelib_path_resolves() {
        // stdole2 is registered on every Windows installation.
        let libid = GUID::from_u128(0x00020430_0000_0000_c000_000000000046);
        let path = typelib_path(&libid, 2, 0).unwrap();
        assert!(path.to_ascii_lowercase().contains("stdole2"), "{path}");
    }
}
