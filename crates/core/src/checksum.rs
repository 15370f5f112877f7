//! Script checksum type.
//!
//! Digests are persisted next to every applied migration, so the algorithm
//! (MD5), the UTF-8 encoding, and the canonical form feeding it are a
//! durability contract: changing any of them invalidates every existing row.

use md5::{Digest, Md5};
use std::fmt;

/// An MD5 digest over the UTF-8 bytes of a canonical script body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 16]);

impl Checksum {
    /// Digest a canonical script body.
    pub fn compute(canonical: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(canonical.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Encode as lowercase hex, the persisted representation.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse from the persisted hex representation.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 32 {
            return Err(crate::Error::InvalidChecksum(format!(
                "expected 32 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidChecksum(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidChecksum(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Compare against a persisted hex digest.
    pub fn matches_hex(&self, hex: &str) -> bool {
        self.to_hex() == hex
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
