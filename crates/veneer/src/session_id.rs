//! Session identity embedded in every proxy URL.
//!
//! A session id scopes one browsing interaction. It is an opaque token to
//! everything except the codec, which only requires that it never contains
//! the `!` and `/` separators of the proxy URL path.

use crate::error::{Result, VeneerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a generated session id in random bytes (128 bits of entropy).
const SESSION_BYTES: usize = 16;

const HEX_CHARS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Validated session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a session id.
    ///
    /// Accepts non-empty strings of ASCII alphanumerics, `-`, `_`, `.` and `~`
    /// (the URL "unreserved" set), so the id survives URL parsing untouched.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(VeneerError::InvalidSession {
                value,
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(bad) = value.chars().find(|c| !is_unreserved(*c)) {
            let reason = format!("character {:?} is not allowed", bad);
            return Err(VeneerError::InvalidSession { value, reason });
        }
        Ok(Self(value))
    }

    /// Generate a fresh random session id (32 lowercase hex characters).
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; SESSION_BYTES];
        getrandom::fill(&mut bytes).map_err(|e| VeneerError::Random(e.to_string()))?;
        Ok(Self(hex_encode(&bytes)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~')
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len().saturating_mul(2));
    for byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize]);
        hex.push(HEX_CHARS[(byte & 0x0f) as usize]);
    }
    hex
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = VeneerError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length_and_charset() {
        let id = SessionId::generate().unwrap();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_unique() {
        let a = SessionId::generate().unwrap();
        let b = SessionId::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_separators() {
        assert!(SessionId::new("abc!def").is_err());
        assert!(SessionId::new("abc/def").is_err());
        assert!(SessionId::new("").is_err());
        assert!(SessionId::new("sessionId").is_ok());
        assert!(SessionId::new("a-b_c.d~e").is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let id: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert!(serde_json::from_str::<SessionId>("\"a!b\"").is_err());
    }
}
