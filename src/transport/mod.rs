//! Transport Module
//!
//! The layered wire stack shared by server and client:
//! - length-prefixed frames over any `Read`/`Write` stream (`frame`)
//! - per-session ChaCha20-Poly1305 state (`cipher`)
//! - key-delivery handshake and password auth (`handshake`)
//!
//! An encrypted message is an outer frame whose payload is
//! `nonce || tag || ciphertext`; the decrypted plaintext is itself an
//! inner plain frame. `secure_write`/`secure_read` are the only code
//! paths that build or consume that nesting.

pub mod cipher;
pub mod frame;
pub mod handshake;

pub use cipher::{SessionCipher, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};

use std::io::{Read, Write};

use crate::error::Result;

/// Seal a payload and send it as one encrypted frame
pub fn secure_write<W: Write>(
    writer: &mut W,
    cipher: &mut SessionCipher,
    payload: &[u8],
) -> Result<()> {
    let inner = frame::encode(payload);
    let sealed = cipher.seal(&inner)?;
    frame::write_frame(writer, &sealed)
}

/// Receive one encrypted frame and unseal its payload
pub fn secure_read<R: Read>(reader: &mut R, cipher: &SessionCipher) -> Result<Vec<u8>> {
    let sealed = frame::read_frame(reader)?;
    let inner = cipher.open(&sealed)?;
    frame::decode(&inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn secure_roundtrip() {
        let mut writer_cipher = SessionCipher::random();
        let reader_cipher = SessionCipher::from_key(*writer_cipher.key());

        let mut wire = Vec::new();
        secure_write(&mut wire, &mut writer_cipher, b"GET name").unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(
            secure_read(&mut cursor, &reader_cipher).unwrap(),
            b"GET name"
        );
    }

    #[test]
    fn sealed_frames_are_opaque() {
        let mut cipher = SessionCipher::random();
        let mut wire = Vec::new();
        secure_write(&mut wire, &mut cipher, b"PING").unwrap();

        // Neither the plaintext nor the inner length prefix leaks.
        assert!(!wire.windows(4).any(|w| w == b"PING"));
    }
}
