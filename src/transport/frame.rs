//! Length-prefixed framing
//!
//! Every logical message on the wire is `u64 little-endian length`
//! followed by exactly that many payload bytes. The same envelope is
//! reused inside AEAD frames (the decrypted plaintext is itself a
//! frame), so encode/decode work on byte buffers as well as streams.

use std::io::{ErrorKind, Read, Write};

use crate::error::{RaptoError, Result};

/// Largest payload a frame may carry (512 MiB)
pub const MAX_FRAME_LEN: u64 = 512 * 1024 * 1024;

/// Size of the length prefix
pub const LEN_PREFIX: usize = 8;

/// Encode a payload into a standalone frame buffer
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX + payload.len());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode a standalone frame buffer back into its payload.
///
/// Unlike stream frames, buffer frames admit an empty payload: the
/// inner frame of an encrypted message may legitimately carry zero
/// bytes (an empty client name).
pub fn decode(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < LEN_PREFIX {
        return Err(RaptoError::EndOfStream);
    }
    let len = u64::from_le_bytes(bytes[..LEN_PREFIX].try_into().expect("prefix length"));
    if len > MAX_FRAME_LEN {
        return Err(RaptoError::InvalidLength(len));
    }
    let end = LEN_PREFIX + len as usize;
    let payload = bytes.get(LEN_PREFIX..end).ok_or(RaptoError::EndOfStream)?;
    Ok(payload.to_vec())
}

/// Write one frame and flush it
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    check_len(payload.len() as u64)?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one complete frame.
///
/// A zero-byte read on the length prefix means the peer went away
/// (`PeerReset`); a length outside [1, 512 MiB] is `InvalidLength`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LEN_PREFIX];
    read_exact_or_reset(reader, &mut prefix)?;
    let len = u64::from_le_bytes(prefix);
    check_len(len)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

fn check_len(len: u64) -> Result<()> {
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(RaptoError::InvalidLength(len));
    }
    Ok(())
}

/// Like `read_exact`, but distinguishes "nothing at all" (peer reset)
/// from a mid-prefix truncation.
fn read_exact_or_reset<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(RaptoError::PeerReset),
            Ok(0) => return Err(RaptoError::EndOfStream),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_over_stream() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello frame").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"hello frame");
    }

    #[test]
    fn encode_decode_buffer() {
        let frame = encode(b"payload");
        assert_eq!(frame.len(), LEN_PREFIX + 7);
        assert_eq!(decode(&frame).unwrap(), b"payload");
    }

    #[test]
    fn zero_length_rejected() {
        let mut cursor = Cursor::new(0u64.to_le_bytes().to_vec());
        assert!(matches!(
            read_frame(&mut cursor),
            Err(RaptoError::InvalidLength(0))
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut cursor = Cursor::new((MAX_FRAME_LEN + 1).to_le_bytes().to_vec());
        assert!(matches!(
            read_frame(&mut cursor),
            Err(RaptoError::InvalidLength(_))
        ));
        assert!(write_frame(&mut Vec::new(), &[]).is_err());
    }

    #[test]
    fn empty_stream_is_peer_reset() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(read_frame(&mut cursor), Err(RaptoError::PeerReset)));
    }

    #[test]
    fn truncated_prefix_is_end_of_stream() {
        let mut cursor = Cursor::new(vec![1, 2, 3]);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(RaptoError::EndOfStream)
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").unwrap();
        write_frame(&mut buf, b"second").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"second");
    }
}
