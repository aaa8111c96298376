//! Connected-client session state
//!
//! A session's reader half lives on its connection thread; the writer
//! half (socket clone plus cipher) sits behind a mutex so the executor
//! can answer queries on the originating connection. The mutex is held
//! only around a single frame write, never around store work.

use std::net::{SocketAddr, TcpStream};

use parking_lot::Mutex;

use crate::error::Result;
use crate::transport::{self, SessionCipher};

/// One connected client session
pub struct Client {
    id: u64,
    addr: SocketAddr,
    name: Mutex<String>,
    writer: Mutex<Writer>,
}

struct Writer {
    stream: TcpStream,
    cipher: Option<SessionCipher>,
}

impl Client {
    /// Wrap an accepted connection's writer half.
    ///
    /// `id` is assigned by the accept loop, strictly increasing across
    /// accepts. `cipher` is the session cipher established by the
    /// handshake, or None for plain sessions.
    pub fn new(
        id: u64,
        addr: SocketAddr,
        stream: TcpStream,
        cipher: Option<SessionCipher>,
    ) -> Self {
        Client {
            id,
            addr,
            name: Mutex::new(String::new()),
            writer: Mutex::new(Writer { stream, cipher }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.lock() = name;
    }

    pub fn is_encrypted(&self) -> bool {
        self.writer.lock().cipher.is_some()
    }

    /// Send one response frame, sealed when the session is encrypted.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        let Writer { stream, cipher } = &mut *writer;
        match cipher {
            Some(cipher) => transport::secure_write(stream, cipher, payload),
            None => transport::write_frame(stream, payload),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("name", &self.name())
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}
