//! Session handshake and password auth
//!
//! A server-driven key delivery exchange shaped like TLS but without
//! certificates or ephemeral agreement: the client's X25519 public key
//! is used directly as a wrapping key for the session secret. This is a
//! confidentiality primitive only — it does not authenticate either end
//! and does not resist an active man-in-the-middle. It must never be
//! described as TLS proper.
//!
//! Exchange, server-driven:
//! 1. server: `send-pk`
//! 2. client: 32-byte public key
//! 3. server: `send-sk`
//! 4. server: session key sealed under the client public key
//! 5. client: `recvd-sk`
//!
//! Password auth runs after the handshake, entirely over AEAD:
//! `send-authpass`, password bytes, then `recvd-authpass:OK` or
//! `recvd-authpass:NO` followed by a close.

use std::io::{Read, Write};

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use super::cipher::{SessionCipher, KEY_LEN};
use super::frame;
use super::{secure_read, secure_write};
use crate::error::{RaptoError, Result};

pub const REQ_SEND_PK: &[u8] = b"send-pk";
pub const REQ_SEND_SK: &[u8] = b"send-sk";
pub const ACK_RECVD_SK: &[u8] = b"recvd-sk";
pub const REQ_SEND_AUTHPASS: &[u8] = b"send-authpass";
pub const AUTH_OK: &[u8] = b"recvd-authpass:OK";
pub const AUTH_NO: &[u8] = b"recvd-authpass:NO";

/// Server side of the handshake. Returns the established session cipher.
pub fn server_handshake<S: Read + Write>(stream: &mut S) -> Result<SessionCipher> {
    frame::write_frame(stream, REQ_SEND_PK)?;

    let client_pk: [u8; KEY_LEN] = frame::read_frame(stream)?
        .try_into()
        .map_err(|_| RaptoError::HandshakeFail)?;

    frame::write_frame(stream, REQ_SEND_SK)?;

    let session = SessionCipher::random();
    let mut wrapping = SessionCipher::from_key(client_pk);
    secure_write(stream, &mut wrapping, session.key())?;

    if frame::read_frame(stream)? != ACK_RECVD_SK {
        return Err(RaptoError::HandshakeFail);
    }
    Ok(session)
}

/// Client side of the handshake. Returns the established session cipher.
pub fn client_handshake<S: Read + Write>(stream: &mut S) -> Result<SessionCipher> {
    if frame::read_frame(stream)? != REQ_SEND_PK {
        return Err(RaptoError::HandshakeFail);
    }

    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    frame::write_frame(stream, public.as_bytes())?;

    if frame::read_frame(stream)? != REQ_SEND_SK {
        return Err(RaptoError::HandshakeFail);
    }

    let wrapping = SessionCipher::from_key(*public.as_bytes());
    let shared: [u8; KEY_LEN] = secure_read(stream, &wrapping)?
        .try_into()
        .map_err(|_| RaptoError::HandshakeFail)?;

    frame::write_frame(stream, ACK_RECVD_SK)?;
    Ok(SessionCipher::from_key(shared))
}

/// Server side of password auth over the established cipher.
///
/// A wrong password is answered with `recvd-authpass:NO` and reported
/// as `AuthFail`; the caller closes the connection.
pub fn server_auth<S: Read + Write>(
    stream: &mut S,
    cipher: &mut SessionCipher,
    password: &[u8],
) -> Result<()> {
    secure_write(stream, cipher, REQ_SEND_AUTHPASS)?;
    let attempt = secure_read(stream, cipher)?;

    if attempt == password {
        secure_write(stream, cipher, AUTH_OK)
    } else {
        secure_write(stream, cipher, AUTH_NO)?;
        Err(RaptoError::AuthFail)
    }
}

/// Client side of password auth over the established cipher.
pub fn client_auth<S: Read + Write>(
    stream: &mut S,
    cipher: &mut SessionCipher,
    password: &[u8],
) -> Result<()> {
    if secure_read(stream, cipher)? != REQ_SEND_AUTHPASS {
        return Err(RaptoError::AuthFail);
    }
    secure_write(stream, cipher, password)?;

    if secure_read(stream, cipher)? == AUTH_OK {
        Ok(())
    } else {
        Err(RaptoError::AuthFail)
    }
}
