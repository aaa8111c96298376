//! Blocking client
//!
//! Speaks the full session protocol: version exchange, the client side
//! of the key-delivery handshake, password auth, the named-session
//! frame, then plain query/response. Used by the `raptodb connect` REPL
//! and by the integration tests.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::Result;
use crate::transport::{self, frame, handshake, SessionCipher};

/// Client-side session options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Expect the server to run the handshake
    pub tls: bool,

    /// Password to present when the server asks
    pub auth: Option<Vec<u8>>,

    /// Display name sent after the preamble (may be empty)
    pub name: String,

    /// Socket read/write timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            tls: false,
            auth: None,
            name: String::new(),
            timeout_ms: 5000,
        }
    }
}

/// An established session with a Rapto server
pub struct Connection {
    stream: TcpStream,
    cipher: Option<SessionCipher>,
}

impl Connection {
    /// Connect and run the session preamble.
    ///
    /// Supplying a password forces the handshake on, mirroring the
    /// server's auth-implies-tls rule.
    pub fn connect(addr: impl ToSocketAddrs, options: ClientOptions) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_millis(options.timeout_ms)))?;
        stream.set_write_timeout(Some(Duration::from_millis(options.timeout_ms)))?;

        frame::write_frame(&mut stream, crate::VERSION.as_bytes())?;

        let tls = options.tls || options.auth.is_some();
        let cipher = if tls {
            let mut cipher = handshake::client_handshake(&mut stream)?;
            if let Some(password) = &options.auth {
                handshake::client_auth(&mut stream, &mut cipher, password)?;
            }
            Some(cipher)
        } else {
            None
        };

        let mut conn = Connection { stream, cipher };
        conn.send_name(options.name.as_bytes())?;
        Ok(conn)
    }

    /// Send one query frame
    pub fn send(&mut self, line: &[u8]) -> Result<()> {
        match &mut self.cipher {
            Some(cipher) => transport::secure_write(&mut self.stream, cipher, line),
            None => frame::write_frame(&mut self.stream, line),
        }
    }

    /// Receive one response frame
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => transport::secure_read(&mut self.stream, cipher),
            None => frame::read_frame(&mut self.stream),
        }
    }

    /// Send a query and wait for its response
    pub fn query(&mut self, line: &[u8]) -> Result<Vec<u8>> {
        self.send(line)?;
        self.recv()
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// The name frame is the one message allowed to be empty; plain
    /// sessions ship it as a bare zero-length prefix.
    fn send_name(&mut self, name: &[u8]) -> Result<()> {
        match &mut self.cipher {
            Some(cipher) => transport::secure_write(&mut self.stream, cipher, name),
            None if name.is_empty() => {
                use std::io::Write;
                self.stream.write_all(&0u64.to_le_bytes())?;
                self.stream.flush()?;
                Ok(())
            }
            None => frame::write_frame(&mut self.stream, name),
        }
    }
}
