//! Object codec
//!
//! Canonical binary serialization of objects, shared by snapshots and the
//! `DUMP`/`RESTORE` commands. Metadata is carried verbatim; the codec does
//! not judge it — callers do.

use super::{Field, Metadata, Object, MAX_KEY_LEN, MAX_STR_LEN, TAG_DEC, TAG_INT, TAG_STR};
use crate::error::{RaptoError, Result};

/// Serialize an object into its canonical byte form
pub fn serialize(obj: &Object) -> Result<Vec<u8>> {
    if obj.key.is_empty() || obj.key.len() > MAX_KEY_LEN {
        return Err(RaptoError::TypeOverflow);
    }

    let mut out = Vec::with_capacity(obj.size() as usize);
    out.push(obj.key.len() as u8);
    out.extend_from_slice(&obj.key);
    out.extend_from_slice(&obj.metadata.access_times.to_le_bytes());
    out.extend_from_slice(&obj.metadata.last_access.to_le_bytes());
    out.push(obj.field.tag());

    match &obj.field {
        Field::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        Field::Dec(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
        Field::Str(s) => {
            if s.len() > MAX_STR_LEN {
                return Err(RaptoError::TypeOverflow);
            }
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s);
        }
    }

    Ok(out)
}

/// Deserialize an object from its canonical byte form
pub fn deserialize(bytes: &[u8]) -> Result<Object> {
    let mut cursor = Cursor::new(bytes);

    let key_len = cursor.take_u8()? as usize;
    if key_len == 0 {
        return Err(RaptoError::TypeOverflow);
    }
    let key = cursor.take_bytes(key_len)?.to_vec();

    let access_times = i64::from_le_bytes(cursor.take_array()?);
    let last_access = i64::from_le_bytes(cursor.take_array()?);

    let field = match cursor.take_u8()? {
        TAG_INT => Field::Int(i64::from_le_bytes(cursor.take_array()?)),
        TAG_DEC => Field::Dec(f64::from_bits(u64::from_le_bytes(cursor.take_array()?))),
        TAG_STR => {
            let len = u64::from_le_bytes(cursor.take_array()?);
            if len > MAX_STR_LEN as u64 {
                return Err(RaptoError::TypeOverflow);
            }
            Field::Str(cursor.take_bytes(len as usize)?.to_vec())
        }
        _ => return Err(RaptoError::UnsupportedType),
    };

    Ok(Object {
        key,
        field,
        metadata: Metadata {
            access_times,
            last_access,
        },
    })
}

/// Bounds-checked reader over a byte slice
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take_u8(&mut self) -> Result<u8> {
        let b = *self.bytes.get(self.pos).ok_or(RaptoError::EndOfStream)?;
        self.pos += 1;
        Ok(b)
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(RaptoError::EndOfStream)?;
        let slice = self.bytes.get(self.pos..end).ok_or(RaptoError::EndOfStream)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take_bytes(N)?;
        // take_bytes guarantees the length
        Ok(slice.try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(key: &[u8], field: Field) -> Object {
        Object::new(key.to_vec(), field).unwrap()
    }

    #[test]
    fn roundtrip_integer() {
        let original = obj(b"counter", Field::Int(-42));
        let bytes = serialize(&original).unwrap();
        let restored = deserialize(&bytes).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn roundtrip_decimal() {
        let original = obj(b"pi", Field::Dec(3.14159));
        let bytes = serialize(&original).unwrap();
        assert_eq!(deserialize(&bytes).unwrap(), original);
    }

    #[test]
    fn roundtrip_string() {
        let original = obj(b"name", Field::Str(b"Alice".to_vec()));
        let bytes = serialize(&original).unwrap();
        assert_eq!(deserialize(&bytes).unwrap(), original);
    }

    #[test]
    fn roundtrip_empty_string() {
        let original = obj(b"empty", Field::Str(Vec::new()));
        let bytes = serialize(&original).unwrap();
        assert_eq!(deserialize(&bytes).unwrap(), original);
    }

    #[test]
    fn serialized_length_matches_size() {
        for field in [
            Field::Int(1),
            Field::Dec(2.0),
            Field::Str(b"abcdef".to_vec()),
        ] {
            let o = obj(b"key", field);
            assert_eq!(serialize(&o).unwrap().len() as u64, o.size());
        }
    }

    #[test]
    fn reserialize_is_byte_identical() {
        let original = obj(b"stable", Field::Str(b"payload".to_vec()));
        let bytes = serialize(&original).unwrap();
        let again = serialize(&deserialize(&bytes).unwrap()).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = serialize(&obj(b"key", Field::Int(7))).unwrap();
        for cut in 0..bytes.len() {
            assert!(matches!(
                deserialize(&bytes[..cut]),
                Err(RaptoError::EndOfStream) | Err(RaptoError::TypeOverflow)
            ));
        }
    }

    #[test]
    fn unknown_tag_fails() {
        let mut bytes = serialize(&obj(b"key", Field::Int(7))).unwrap();
        // tag sits after key_len + key + 16 bytes of metadata
        let tag_pos = 1 + 3 + 16;
        bytes[tag_pos] = 9;
        assert!(matches!(
            deserialize(&bytes),
            Err(RaptoError::UnsupportedType)
        ));
    }

    #[test]
    fn zero_key_len_fails() {
        let bytes = [0u8, 0, 0];
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn metadata_survives_roundtrip() {
        let mut original = obj(b"meta", Field::Int(1));
        original.metadata.access_times = 12345;
        original.metadata.last_access = 1_700_000_000_000_000;
        let restored = deserialize(&serialize(&original).unwrap()).unwrap();
        assert_eq!(restored.metadata.access_times, 12345);
        assert_eq!(restored.metadata.last_access, 1_700_000_000_000_000);
    }
}
