//! Snapshot Module
//!
//! Whole-database persistence with per-object compression.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────┐
//! │ Frame 1                              │
//! │ ┌────────────────┬─────────────────┐ │
//! │ │ CompLen (8 LE) │ LZ4 block       │ │
//! │ └────────────────┴─────────────────┘ │
//! ├──────────────────────────────────────┤
//! │ Frame 2 …                            │
//! └──────────────────────────────────────┘
//! ```
//! Each LZ4 block decompresses to one canonical object serialization.
//! A length of 0 or end-of-file terminates the stream. No file header,
//! no file-level checksum.

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{RaptoError, Result};
use crate::object;
use crate::store::Store;

/// LZ4 worst-case expansion bound used as the decompression cap and as
/// the conservative admission gate on load.
const LZ4_MAX_RATIO: u64 = 255;

/// Autosnap trigger policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Minimum seconds between saves
    pub delay_secs: u64,

    /// Minimum modifications since the last save, clamped to >= 1
    pub count: u64,
}

impl SnapshotPolicy {
    pub fn new(delay_secs: u64, count: u64) -> Self {
        SnapshotPolicy {
            delay_secs,
            count: count.max(1),
        }
    }
}

/// Dump/restore engine bound to one snapshot file
pub struct SnapshotEngine {
    path: PathBuf,
}

impl SnapshotEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotEngine { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every object, cold end to hot end, then sync to stable
    /// storage. The file is truncated first.
    pub fn save(&self, store: &Store) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        for obj in store.iter() {
            let raw = object::serialize(obj)?;
            let compressed = lz4_flex::compress(&raw);
            write_checked(&mut writer, &(compressed.len() as u64).to_le_bytes())?;
            write_checked(&mut writer, &compressed)?;
        }

        if let Err(e) = writer.flush() {
            fail_if_out_of_disk(&e);
            return Err(e.into());
        }
        writer.get_ref().sync_all()?;

        tracing::debug!("Snapshot saved: {} objects", store.len());
        Ok(())
    }

    /// Read frames back into `store` until end-of-file or a zero length.
    ///
    /// Each frame passes a conservative admission gate before its bytes
    /// are even read: a compressed length whose worst-case expansion
    /// cannot fit in the remaining capacity fails the load. Decompression
    /// and deserialization failures end the load quietly with whatever
    /// was recovered so far. Returns the number of loaded objects.
    pub fn load(&self, store: &mut Store) -> Result<usize> {
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut loaded = 0usize;

        loop {
            let len = match read_len(&mut reader)? {
                Some(0) | None => break,
                Some(len) => len,
            };

            let worst_case = len
                .checked_mul(LZ4_MAX_RATIO)
                .ok_or(RaptoError::ExceededSpaceLimit)?;
            if worst_case > store.cap_remaining() {
                return Err(RaptoError::ExceededSpaceLimit);
            }

            let mut compressed = vec![0u8; len as usize];
            if let Err(e) = reader.read_exact(&mut compressed) {
                if e.kind() == ErrorKind::UnexpectedEof {
                    tracing::warn!("Snapshot truncated mid-frame, stopping load");
                    break;
                }
                return Err(e.into());
            }

            // Decompress into a worst-case buffer, then trim to the
            // actual length.
            let mut raw = vec![0u8; worst_case as usize];
            let raw = match lz4_flex::decompress_into(&compressed, &mut raw) {
                Ok(written) => {
                    raw.truncate(written);
                    raw
                }
                Err(e) => {
                    tracing::warn!("Snapshot frame failed to decompress, stopping load: {}", e);
                    break;
                }
            };

            let obj = match object::deserialize(&raw) {
                Ok(obj) => obj,
                Err(e) => {
                    tracing::warn!("Snapshot object failed to decode, stopping load: {}", e);
                    break;
                }
            };

            store.insert_raw(obj)?;
            loaded += 1;
        }

        tracing::debug!("Snapshot loaded: {} objects", loaded);
        Ok(loaded)
    }
}

/// Read a `u64le` frame length; `None` on clean end-of-file.
fn read_len<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                // Trailing partial length: legacy tolerance.
                tracing::warn!("Snapshot ends with a partial length field");
                return Ok(None);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

fn write_checked<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).map_err(|e| {
        fail_if_out_of_disk(&e);
        e.into()
    })
}

/// Disk exhaustion is fatal by contract: log and abort.
fn fail_if_out_of_disk(e: &std::io::Error) {
    if e.kind() == ErrorKind::StorageFull {
        tracing::error!("Out of disk while writing snapshot: {}", e);
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Field;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SnapshotEngine) {
        let dir = TempDir::new().unwrap();
        let engine = SnapshotEngine::new(dir.path().join("test.raptodb"));
        (dir, engine)
    }

    #[test]
    fn save_load_roundtrip() {
        let (_dir, engine) = setup();

        let mut store = Store::new(1 << 20);
        store.put(b"int", Field::Int(-5)).unwrap();
        store.put(b"dec", Field::Dec(2.5)).unwrap();
        store.put(b"str", Field::Str(b"hello".to_vec())).unwrap();
        engine.save(&store).unwrap();

        let mut restored = Store::new(1 << 20);
        let loaded = engine.load(&mut restored).unwrap();
        assert_eq!(loaded, 3);
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.peek(b"int").unwrap().field, Field::Int(-5));
        assert_eq!(restored.peek(b"dec").unwrap().field, Field::Dec(2.5));
        assert_eq!(
            restored.peek(b"str").unwrap().field,
            Field::Str(b"hello".to_vec())
        );
    }

    #[test]
    fn metadata_survives_save_load() {
        let (_dir, engine) = setup();

        let mut store = Store::new(1 << 20);
        store.put(b"k", Field::Int(1)).unwrap();
        store.object_at_mut(0).unwrap().metadata.access_times = 77;
        store.object_at_mut(0).unwrap().metadata.last_access = 123_456;
        engine.save(&store).unwrap();

        let mut restored = Store::new(1 << 20);
        engine.load(&mut restored).unwrap();
        let meta = restored.peek(b"k").unwrap().metadata;
        assert_eq!(meta.access_times, 77);
        assert_eq!(meta.last_access, 123_456);
    }

    #[test]
    fn load_then_prefetch_orders_by_last_access() {
        let (_dir, engine) = setup();

        let mut store = Store::new(1 << 20);
        for (key, stamp) in [(b"a", 300i64), (b"b", 100), (b"c", 200)] {
            store.put(key, Field::Int(0)).unwrap();
            let i = store.find(key).unwrap();
            store.object_at_mut(i).unwrap().metadata.last_access = stamp;
        }
        engine.save(&store).unwrap();

        let mut restored = Store::new(1 << 20);
        engine.load(&mut restored).unwrap();
        restored.prefetch();
        let stamps: Vec<i64> = restored.iter().map(|o| o.metadata.last_access).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn missing_file_loads_nothing() {
        let (_dir, engine) = setup();
        let mut store = Store::new(1024);
        assert_eq!(engine.load(&mut store).unwrap(), 0);
    }

    #[test]
    fn zero_length_terminates() {
        let (_dir, engine) = setup();

        let mut store = Store::new(1 << 20);
        store.put(b"kept", Field::Int(1)).unwrap();
        engine.save(&store).unwrap();

        // Append a zero length and a garbage frame behind it.
        let mut bytes = std::fs::read(engine.path()).unwrap();
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(b"garbage after terminator");
        std::fs::write(engine.path(), bytes).unwrap();

        let mut restored = Store::new(1 << 20);
        assert_eq!(engine.load(&mut restored).unwrap(), 1);
    }

    #[test]
    fn corrupt_frame_stops_quietly() {
        let (_dir, engine) = setup();

        let mut store = Store::new(1 << 20);
        store.put(b"first", Field::Int(1)).unwrap();
        store.put(b"second", Field::Int(2)).unwrap();
        engine.save(&store).unwrap();

        // Flip a byte inside the second frame's payload.
        let mut bytes = std::fs::read(engine.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(engine.path(), bytes).unwrap();

        let mut restored = Store::new(1 << 20);
        let loaded = engine.load(&mut restored).unwrap();
        assert!(loaded <= 2);
        assert!(restored.find(b"first").is_some());
    }

    #[test]
    fn admission_gate_rejects_oversized_frames() {
        let (_dir, engine) = setup();

        let mut store = Store::new(1 << 20);
        store.put(b"obj", Field::Str(vec![b'x'; 4096])).unwrap();
        engine.save(&store).unwrap();

        // A tiny store cannot admit a frame whose worst-case expansion
        // exceeds its whole budget.
        let mut tiny = Store::new(64);
        assert!(matches!(
            engine.load(&mut tiny),
            Err(RaptoError::ExceededSpaceLimit)
        ));
    }

    #[test]
    fn policy_clamps_count() {
        let policy = SnapshotPolicy::new(10, 0);
        assert_eq!(policy.count, 1);
        assert_eq!(SnapshotPolicy::new(10, 5).count, 5);
    }

    #[test]
    fn save_truncates_previous_content() {
        let (_dir, engine) = setup();

        let mut store = Store::new(1 << 20);
        for i in 0..10u8 {
            store.put(&[b'k', i + b'0'], Field::Int(i as i64)).unwrap();
        }
        engine.save(&store).unwrap();
        let big = std::fs::metadata(engine.path()).unwrap().len();

        store.clear();
        store.put(b"only", Field::Int(1)).unwrap();
        engine.save(&store).unwrap();
        let small = std::fs::metadata(engine.path()).unwrap().len();

        assert!(small < big);

        let mut restored = Store::new(1 << 20);
        assert_eq!(engine.load(&mut restored).unwrap(), 1);
    }
}
