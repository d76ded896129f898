//! Secure string implementation with automatic memory zeroing

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroize;

/// A string that zeros its memory when dropped
///
/// Used for the AniDB password. `Debug` and `Display` never print the value,
/// so configuration structs holding one can be logged safely.
#[derive(Clone, Default, Zeroize)]
pub struct SecureString {
    inner: Vec<u8>,
}

impl SecureString {
    /// Create a new SecureString from a regular string
    pub fn new(s: impl Into<String>) -> Self {
        let inner = s.into().into_bytes();

        #[cfg(unix)]
        Self::try_lock_memory(&inner);

        Self { inner }
    }

    /// Whether the secret is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Try to get the string as a str reference
    pub fn to_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.inner)
    }

    /// Copy the secret into a regular String
    ///
    /// The copy is NOT zeroed on drop; only use it to build the outgoing
    /// datagram.
    pub fn expose_secret(&self) -> String {
        String::from_utf8_lossy(&self.inner).into_owned()
    }

    /// Constant-time comparison
    pub fn constant_time_eq(&self, other: &Self) -> bool {
        if self.inner.len() != other.inner.len() {
            return false;
        }

        self.inner
            .iter()
            .zip(other.inner.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Best-effort lock of the pages holding the secret
    #[cfg(unix)]
    fn try_lock_memory(data: &[u8]) {
        if data.is_empty() {
            return;
        }
        // SAFETY: mlock only reads the address range of a live allocation.
        unsafe {
            let _ = libc::mlock(data.as_ptr() as *const libc::c_void, data.len());
        }
    }

    #[cfg(unix)]
    fn try_unlock_memory(&self) {
        if self.inner.is_empty() {
            return;
        }
        // SAFETY: see try_lock_memory.
        unsafe {
            let _ = libc::munlock(self.inner.as_ptr() as *const libc::c_void, self.inner.len());
        }
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.try_unlock_memory();

        self.inner.zeroize();
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(***)")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        self.constant_time_eq(other)
    }
}

impl Eq for SecureString {}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// Configuration layers (TOML file, environment) hand the password over as a
// plain string.
impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl Serialize for SecureString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expose_secret())
    }
}
