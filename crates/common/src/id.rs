//! Time-ordered entity identifiers.

use std::str::FromStr;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENCODED_LEN: usize = 26;
const RANDOM_BITS: u32 = 80;

/// Unique identifier for a persisted entity.
///
/// 48 bits of millisecond timestamp followed by 80 random bits, rendered as
/// 26 characters of Crockford base32. String order matches creation order
/// at millisecond granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(u128);

impl EntityId {
    /// Creates a new identifier stamped with the current time.
    pub fn new() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u128;
        let random: u128 = rand::thread_rng().r#gen::<u128>() & ((1u128 << RANDOM_BITS) - 1);
        Self(((millis & 0xFFFF_FFFF_FFFF) << RANDOM_BITS) | random)
    }

    /// Returns the millisecond timestamp embedded in the identifier.
    pub fn timestamp_millis(&self) -> u64 {
        (self.0 >> RANDOM_BITS) as u64
    }

    /// Returns the raw 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = [0u8; ENCODED_LEN];
        for (i, slot) in buf.iter_mut().enumerate() {
            let shift = 125 - 5 * i as u32;
            *slot = ALPHABET[((self.0 >> shift) & 0x1F) as usize];
        }
        // The alphabet is ASCII, so the buffer is always valid UTF-8.
        f.write_str(std::str::from_utf8(&buf).map_err(|_| std::fmt::Error)?)
    }
}

/// Error returned when a string is not a valid entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entity id: {0}")]
pub struct ParseEntityIdError(pub String);

impl FromStr for EntityId {
    type Err = ParseEntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(ParseEntityIdError(s.to_string()));
        }
        // First character carries only the top 3 bits.
        let mut value: u128 = 0;
        for (i, c) in s.bytes().enumerate() {
            let digit = decode_char(c).ok_or_else(|| ParseEntityIdError(s.to_string()))?;
            if i == 0 && digit > 7 {
                return Err(ParseEntityIdError(s.to_string()));
            }
            value = (value << 5) | digit as u128;
        }
        Ok(Self(value))
    }
}

fn decode_char(c: u8) -> Option<u8> {
    let c = c.to_ascii_uppercase();
    match c {
        b'O' => Some(0),
        b'I' | b'L' => Some(1),
        _ => ALPHABET.iter().position(|&a| a == c).map(|p| p as u8),
    }
}

impl TryFrom<String> for EntityId {
    type Error = ParseEntityIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_is_26_chars() {
        let id = EntityId::new();
        assert_eq!(id.to_string().len(), 26);
    }

    #[test]
    fn entity_id_new_creates_unique_ids() {
        let id1 = EntityId::new();
        let id2 = EntityId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn entity_id_parse_roundtrip() {
        let id = EntityId::new();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn entity_id_sorts_by_time() {
        let first = EntityId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EntityId::new();
        assert!(first.to_string() < second.to_string());
        assert!(first.timestamp_millis() < second.timestamp_millis());
    }

    #[test]
    fn entity_id_rejects_bad_input() {
        assert!("short".parse::<EntityId>().is_err());
        assert!("UUUUUUUUUUUUUUUUUUUUUUUUUU".parse::<EntityId>().is_err());
        assert!("8ZZZZZZZZZZZZZZZZZZZZZZZZZ".parse::<EntityId>().is_err());
    }

    #[test]
    fn entity_id_serializes_as_string() {
        let id = EntityId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
