//! Object Module
//!
//! The typed record stored by the database.
//!
//! ## Responsibilities
//! - Tagged field value (integer / decimal / string)
//! - Access metadata (hit counter + last-access timestamp)
//! - Canonical binary serialization (see `codec`)
//!
//! ## Serialized Layout (all integers little-endian)
//! ```text
//! ┌─────────┬───────┬────────────────┬───────────────┬─────┬─────────────┐
//! │KeyLen(1)│  Key  │AccessTimes (8) │LastAccess (8) │Tag(1)│   Value    │
//! └─────────┴───────┴────────────────┴───────────────┴─────┴─────────────┘
//! ```
//! Value is 8 bytes for integer/decimal, or `u64 len + bytes` for string.

mod codec;

pub use codec::{deserialize, serialize};

use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 255;

/// Maximum string value length in bytes
pub const MAX_STR_LEN: usize = u32::MAX as usize;

/// Field discriminants on the wire
pub const TAG_INT: u8 = 0;
pub const TAG_DEC: u8 = 1;
pub const TAG_STR: u8 = 2;

/// A typed value
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Signed 64-bit integer
    Int(i64),

    /// IEEE-754 binary64
    Dec(f64),

    /// Arbitrary byte string
    Str(Vec<u8>),
}

impl Field {
    /// Wire discriminant for this field
    pub fn tag(&self) -> u8 {
        match self {
            Field::Int(_) => TAG_INT,
            Field::Dec(_) => TAG_DEC,
            Field::Str(_) => TAG_STR,
        }
    }

    /// Human-readable type name (the `TYPE` command output)
    pub fn type_name(&self) -> &'static str {
        match self {
            Field::Int(_) => "integer",
            Field::Dec(_) => "decimal",
            Field::Str(_) => "string",
        }
    }

    /// Serialized payload length in bytes
    pub fn payload_len(&self) -> u64 {
        match self {
            Field::Int(_) | Field::Dec(_) => 8,
            Field::Str(s) => s.len() as u64,
        }
    }
}

/// Access metadata carried by every object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Successful touches, saturating
    pub access_times: i64,

    /// Microseconds since epoch of the last touch
    pub last_access: i64,
}

impl Metadata {
    /// Fresh metadata for a newly created object
    pub fn new() -> Self {
        Metadata {
            access_times: 1,
            last_access: now_micros(),
        }
    }

    /// Record one touch: bump the counter, refresh the timestamp.
    ///
    /// `last_access` never moves backwards across touches.
    pub fn bump(&mut self) {
        self.access_times = self.access_times.saturating_add(1);
        self.last_access = self.last_access.max(now_micros());
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A keyed record with typed value and access metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Key bytes, length in [1, 255]
    pub key: Vec<u8>,

    /// The typed value
    pub field: Field,

    /// Access metadata
    pub metadata: Metadata,
}

impl Object {
    /// Create a new object with fresh metadata.
    ///
    /// The key is validated here; field limits are enforced by the codec
    /// and by the store on write.
    pub fn new(key: Vec<u8>, field: Field) -> crate::error::Result<Self> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(crate::error::RaptoError::TypeOverflow);
        }
        if let Field::Str(s) = &field {
            if s.len() > MAX_STR_LEN {
                return Err(crate::error::RaptoError::TypeOverflow);
            }
        }
        Ok(Object {
            key,
            field,
            metadata: Metadata::new(),
        })
    }

    /// Serialized size in bytes.
    ///
    /// `1 + key_len + 16 + 1 + (8 if string) + payload_len` — the exact
    /// length `serialize` produces, also the unit of capacity accounting.
    pub fn size(&self) -> u64 {
        let len_field = match self.field {
            Field::Str(_) => 8,
            _ => 0,
        };
        1 + self.key.len() as u64 + 16 + 1 + len_field + self.field.payload_len()
    }
}

/// Current wall clock in microseconds since the Unix epoch
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_limits() {
        assert!(Object::new(Vec::new(), Field::Int(0)).is_err());
        assert!(Object::new(vec![b'k'; 256], Field::Int(0)).is_err());
        assert!(Object::new(vec![b'k'; 255], Field::Int(0)).is_ok());
    }

    #[test]
    fn size_formula() {
        let int = Object::new(b"ab".to_vec(), Field::Int(7)).unwrap();
        assert_eq!(int.size(), 1 + 2 + 16 + 1 + 8);

        let dec = Object::new(b"ab".to_vec(), Field::Dec(1.5)).unwrap();
        assert_eq!(dec.size(), 1 + 2 + 16 + 1 + 8);

        let s = Object::new(b"ab".to_vec(), Field::Str(b"hello".to_vec())).unwrap();
        assert_eq!(s.size(), 1 + 2 + 16 + 1 + 8 + 5);
    }

    #[test]
    fn metadata_bump_is_monotonic() {
        let mut meta = Metadata::new();
        let before = meta.last_access;
        meta.bump();
        assert_eq!(meta.access_times, 2);
        assert!(meta.last_access >= before);
    }

    #[test]
    fn metadata_counter_saturates() {
        let mut meta = Metadata {
            access_times: i64::MAX,
            last_access: 0,
        };
        meta.bump();
        assert_eq!(meta.access_times, i64::MAX);
    }
}
