//! Endpoint and room identifiers
//!
//! Both kinds of identifier are generated on the relay from the system
//! entropy source. Clients never choose their own endpoint id; they may
//! request a room code, which is normalized and validated first.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ROOM_CODE_LENGTH;

/// Number of random bytes in an endpoint id (hex encoded on the wire)
const ENDPOINT_ID_BYTES: usize = 16;

/// Characters used in generated room codes (unambiguous set)
const ROOM_CODE_CHARS: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Identifier of one connected endpoint, assigned by the relay
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Wrap an id received over the wire
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; ENDPOINT_ID_BYTES];
        getrandom::fill(&mut bytes)?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Room code, e.g. `K7WQ3M`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a room code as given, without normalization
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Generate a random room code
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; ROOM_CODE_LENGTH];
        getrandom::fill(&mut bytes)?;

        let code = bytes
            .iter()
            .map(|b| ROOM_CODE_CHARS[(*b as usize) % ROOM_CODE_CHARS.len()] as char)
            .collect();

        Ok(Self(code))
    }

    /// Normalized form of this code (trimmed, uppercase)
    pub fn normalized(&self) -> Self {
        Self(normalize_room_code(&self.0))
    }

    /// Whether this code has the fixed room-code shape
    pub fn is_valid(&self) -> bool {
        validate_room_code(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Normalize a room code (strip whitespace, uppercase)
pub fn normalize_room_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Validate a room code: exactly six ASCII alphanumerics after normalization
pub fn validate_room_code(code: &str) -> bool {
    let normalized = normalize_room_code(code);
    normalized.len() == ROOM_CODE_LENGTH && normalized.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_code_generation() {
        let code = RoomId::generate().unwrap();
        assert_eq!(code.as_str().len(), ROOM_CODE_LENGTH);
        assert!(code.is_valid());
        assert!(code.as_str().bytes().all(|b| ROOM_CODE_CHARS.contains(&b)));
    }

    #[test]
    fn test_room_code_uniqueness() {
        let codes: std::collections::HashSet<_> =
            (0..100).map(|_| RoomId::generate().unwrap()).collect();
        // 32^6 possibilities; 100 draws colliding would point at a broken RNG
        assert!(codes.len() > 95);
    }

    #[test]
    fn test_normalize_room_code() {
        assert_eq!(normalize_room_code(" abc123 "), "ABC123");
        assert_eq!(RoomId::from("k7wq3m").normalized(), RoomId::from("K7WQ3M"));
    }

    #[test]
    fn test_validate_room_code() {
        assert!(validate_room_code("ABC123"));
        assert!(validate_room_code("abc123"));
        assert!(!validate_room_code("ABC12"));
        assert!(!validate_room_code("ABC-123"));
        assert!(!validate_room_code("ABCDEFG"));
        assert!(!validate_room_code(""));
    }

    #[test]
    fn test_endpoint_id_generation() {
        let id1 = EndpointId::generate().unwrap();
        let id2 = EndpointId::generate().unwrap();

        assert_eq!(id1.as_str().len(), 32); // 16 bytes = 32 hex chars
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&RoomId::from("ABC123")).unwrap();
        assert_eq!(json, "\"ABC123\"");

        let id: EndpointId = serde_json::from_str("\"e1\"").unwrap();
        assert_eq!(id.as_str(), "e1");
    }
}
