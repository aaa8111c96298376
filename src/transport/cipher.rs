//! Per-session AEAD state
//!
//! ChaCha20-Poly1305 with a 32-byte key and a 12-byte write nonce. The
//! nonce counter and the seal operation live behind one type so the
//! increment-then-encrypt order cannot be bypassed: every `seal`
//! advances the counter before touching the plaintext, and the nonce
//! travels inside the frame, so `open` never needs counter state.
//!
//! Wire layout of a sealed frame payload:
//! ```text
//! ┌───────────┬──────────┬──────────────┐
//! │ Nonce (12)│ Tag (16) │  Ciphertext  │
//! └───────────┴──────────┴──────────────┘
//! ```

use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{RaptoError, Result};

/// Symmetric key length in bytes
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag length in bytes
pub const TAG_LEN: usize = 16;

/// AEAD state for one session direction
pub struct SessionCipher {
    cipher: ChaCha20Poly1305,
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
}

impl SessionCipher {
    /// Fresh cipher with a random key and random starting nonce
    pub fn random() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::from_key(key)
    }

    /// Cipher over a known key with a random starting nonce
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        SessionCipher {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            key,
            nonce,
        }
    }

    /// The session key (the handshake ships it to the peer)
    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Encrypt a plaintext into a `nonce || tag || ciphertext` payload.
    ///
    /// The write nonce is incremented before use; the counter is wide
    /// enough that a session cannot wrap back onto a used value.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        increment_nonce(&mut self.nonce);

        let mut buf = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&self.nonce), b"", &mut buf)
            .map_err(|_| RaptoError::Unknown)?;

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + buf.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&buf);
        Ok(out)
    }

    /// Decrypt a `nonce || tag || ciphertext` payload.
    ///
    /// Truncated input and any verification failure both surface as
    /// `DecryptionFail`.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(RaptoError::DecryptionFail);
        }
        let (nonce, rest) = sealed.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut buf = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                &mut buf,
                Tag::from_slice(tag),
            )
            .map_err(|_| RaptoError::DecryptionFail)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

/// Increment with carry, starting from the last byte
fn increment_nonce(nonce: &mut [u8; NONCE_LEN]) {
    for byte in nonce.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let mut alice = SessionCipher::random();
        let bob = SessionCipher::from_key(*alice.key());

        let sealed = alice.seal(b"secret payload").unwrap();
        assert_eq!(bob.open(&sealed).unwrap(), b"secret payload");
    }

    #[test]
    fn nonce_advances_every_seal() {
        let mut cipher = SessionCipher::random();
        let a = cipher.seal(b"one").unwrap();
        let b = cipher.seal(b"one").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn bit_flips_fail_decryption() {
        let mut alice = SessionCipher::random();
        let bob = SessionCipher::from_key(*alice.key());
        let sealed = alice.seal(b"integrity matters").unwrap();

        // Flip one bit in every position: nonce, tag, and ciphertext.
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(bob.open(&tampered), Err(RaptoError::DecryptionFail)),
                "flip at byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn short_payload_rejected() {
        let cipher = SessionCipher::random();
        assert!(matches!(
            cipher.open(&[0u8; NONCE_LEN + TAG_LEN - 1]),
            Err(RaptoError::DecryptionFail)
        ));
    }

    #[test]
    fn wrong_key_rejected() {
        let mut alice = SessionCipher::random();
        let eve = SessionCipher::random();
        let sealed = alice.seal(b"not for eve").unwrap();
        assert!(matches!(eve.open(&sealed), Err(RaptoError::DecryptionFail)));
    }

    #[test]
    fn increment_carries() {
        let mut nonce = [0xFFu8; NONCE_LEN];
        nonce[0] = 0;
        increment_nonce(&mut nonce);
        // Carry ripples from the last byte up through byte 1.
        let mut expected = [0u8; NONCE_LEN];
        expected[0] = 1;
        assert_eq!(nonce, expected);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let mut cipher = SessionCipher::random();
        let peer = SessionCipher::from_key(*cipher.key());
        let sealed = cipher.seal(b"").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN);
        assert_eq!(peer.open(&sealed).unwrap(), b"");
    }
}
