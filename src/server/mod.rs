//! Server Module
//!
//! TCP front end and single-consumer executor.
//!
//! ## Architecture
//! - Main thread accepts connections and assigns session ids
//! - One thread per connection performs the session preamble (version,
//!   handshake, auth, name) and turns frames into queries
//! - A single executor thread owns the store outright and runs every
//!   query; responses go back on the originating session's writer half
//! - An autosnap worker watches the modification counter and routes
//!   saves through the executor, so the store never needs a lock
//!
//! The crossbeam channel between producers and the executor is the only
//! synchronization point touching the data path.

mod client;
mod resolver;

pub use client::Client;
pub use resolver::{parse, Outcome, Query, Resolver};

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{RaptoError, Result};
use crate::snapshot::{SnapshotEngine, SnapshotPolicy};
use crate::store::Store;
use crate::transport::{self, frame, handshake, SessionCipher};

/// Work item for the executor thread
enum Job {
    /// A client query to resolve
    Query(Query),

    /// Autosnap-triggered persistence
    Save,

    /// Stop the executor
    Shutdown,
}

/// Shared handles for controlling a running server
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    bound: Arc<Mutex<Option<SocketAddr>>>,
}

impl ServerHandle {
    /// Address the listener actually bound, once it is up
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    /// Signal the server to stop accepting and wind down
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// TCP server for Rapto
pub struct Server {
    config: Config,
    shutdown: Arc<AtomicBool>,
    bound: Arc<Mutex<Option<SocketAddr>>>,

    /// Modifications since the last save, observed by autosnap
    mods: Arc<AtomicU64>,

    /// Connected sessions by id
    clients: Arc<Mutex<HashMap<u64, Arc<Client>>>>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Server {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            bound: Arc::new(Mutex::new(None)),
            mods: Arc::new(AtomicU64::new(0)),
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Control handle usable from other threads
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
            bound: Arc::clone(&self.bound),
        }
    }

    /// Start the server (blocking until shutdown).
    ///
    /// This method:
    /// 1. Resolves capacity and loads the snapshot file
    /// 2. Binds the listener and spawns executor + autosnap threads
    /// 3. Accepts connections until shutdown is signaled
    /// 4. Joins every thread before returning
    pub fn run(self) -> Result<()> {
        let capacity = self.config.resolve_capacity()?;
        let storage = self.config.storage_file();
        if let Some(parent) = storage.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let engine = SnapshotEngine::new(&storage);
        let mut store = Store::new(capacity);
        let loaded = engine.load(&mut store)?;
        store.prefetch();
        tracing::info!(
            "Database '{}' opened: {} objects loaded, {} of {} bytes free",
            self.config.name,
            loaded,
            store.cap_remaining(),
            capacity
        );

        let listener = TcpListener::bind(&self.config.listen_addr).map_err(|e| {
            RaptoError::Network(format!(
                "Failed to bind to {}: {}",
                self.config.listen_addr, e
            ))
        })?;
        // Non-blocking so the accept loop can watch the shutdown flag.
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        *self.bound.lock() = Some(local_addr);
        tracing::info!(
            "Server listening on {}{}",
            local_addr,
            if self.config.tls { " (encrypted)" } else { "" }
        );

        let (tx, rx) = unbounded::<Job>();

        let resolver = Resolver::new(store, engine, self.config.name.clone());
        let persist = self.config.save_policy.is_some();
        let executor = {
            let shutdown = Arc::clone(&self.shutdown);
            let mods = Arc::clone(&self.mods);
            thread::Builder::new()
                .name("rapto-executor".to_string())
                .spawn(move || executor_loop(rx, resolver, shutdown, mods, persist))
                .map_err(|e| RaptoError::Network(format!("Failed to spawn executor: {}", e)))?
        };

        let autosnap = match self.config.save_policy {
            Some(policy) => {
                let shutdown = Arc::clone(&self.shutdown);
                let mods = Arc::clone(&self.mods);
                let tx = tx.clone();
                Some(
                    thread::Builder::new()
                        .name("rapto-autosnap".to_string())
                        .spawn(move || autosnap_loop(policy, mods, tx, shutdown))
                        .map_err(|e| {
                            RaptoError::Network(format!("Failed to spawn autosnap: {}", e))
                        })?,
                )
            }
            None => None,
        };

        self.accept_loop(&listener, &tx);

        // Wake the executor in case shutdown came from outside a DOWN.
        let _ = tx.send(Job::Shutdown);
        if executor.join().is_err() {
            tracing::error!("Executor thread panicked");
        }
        if let Some(worker) = autosnap {
            if worker.join().is_err() {
                tracing::error!("Autosnap thread panicked");
            }
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Main accept loop
    fn accept_loop(&self, listener: &TcpListener, tx: &Sender<Job>) {
        let config = Arc::new(self.config.clone());
        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        let mut next_id: u64 = 1;

        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let id = next_id;
                    next_id += 1;
                    tracing::debug!("Accepted connection from {} (id={})", addr, id);

                    let config = Arc::clone(&config);
                    let tx = tx.clone();
                    let clients = Arc::clone(&self.clients);
                    let shutdown = Arc::clone(&self.shutdown);

                    let spawned = thread::Builder::new()
                        .name(format!("rapto-conn-{}", id))
                        .spawn(move || {
                            if let Err(e) =
                                handle_connection(stream, id, addr, config, tx, clients, shutdown)
                            {
                                tracing::debug!("Connection {} ended: {}", addr, e);
                            }
                        });
                    match spawned {
                        Ok(handle) => connections.push(handle),
                        Err(e) => tracing::error!("Failed to spawn connection thread: {}", e),
                    }

                    // Reap finished connection threads as we go.
                    connections.retain(|h| !h.is_finished());
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::SeqCst) {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        }

        tracing::info!("Shutting down server...");
        for handle in connections {
            if handle.join().is_err() {
                tracing::error!("Connection thread panicked");
            }
        }
    }
}

/// Session preamble plus the read loop for one connection.
///
/// Preamble order: version check, optional handshake, optional auth,
/// client name. After that every frame is parsed into a query and
/// handed to the executor.
fn handle_connection(
    mut stream: TcpStream,
    id: u64,
    addr: SocketAddr,
    config: Arc<Config>,
    tx: Sender<Job>,
    clients: Arc<Mutex<HashMap<u64, Arc<Client>>>>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms)))?;
    stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;

    // Version check: the first frame must byte-equal our version.
    let version = frame::read_frame(&mut stream)?;
    if version != crate::VERSION.as_bytes() {
        tracing::warn!(
            "[{}] version mismatch: client sent {:?}",
            addr,
            String::from_utf8_lossy(&version)
        );
        let msg = RaptoError::UnmatchVersion(crate::VERSION.to_string()).to_string();
        frame::write_frame(&mut stream, msg.as_bytes())?;
        return Ok(());
    }

    let cipher = if config.tls {
        let mut cipher = handshake::server_handshake(&mut stream).map_err(|e| {
            tracing::warn!("[{}] handshake failed: {}", addr, e);
            RaptoError::HandshakeFail
        })?;
        if let Some(password) = &config.auth {
            match handshake::server_auth(&mut stream, &mut cipher, password) {
                Ok(()) => {}
                Err(RaptoError::AuthFail) => {
                    tracing::warn!("[{}] auth failed, closing", addr);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Some(cipher)
    } else {
        None
    };

    // The reader half decrypts with its own cipher instance; incoming
    // nonces travel in the frames, so no counter is shared.
    let reader_cipher = cipher.as_ref().map(|c| SessionCipher::from_key(*c.key()));
    let writer = stream.try_clone()?;
    let client = Arc::new(Client::new(id, addr, writer, cipher));

    // Client display name: the next frame, possibly empty.
    let name = match read_message(&mut stream, &reader_cipher) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(RaptoError::InvalidLength(0)) => String::new(),
        Err(e) => return Err(e),
    };
    client.set_name(name);

    clients.lock().insert(client.id(), Arc::clone(&client));
    tracing::info!(
        "Client connected: {} (id={}, name='{}')",
        addr,
        client.id(),
        client.name()
    );

    let result = read_loop(&mut stream, &reader_cipher, &client, &tx, &shutdown);

    clients.lock().remove(&client.id());
    tracing::info!("Client disconnected: {} (id={})", addr, client.id());
    result
}

/// Frame-to-query pump for one established session
fn read_loop(
    stream: &mut TcpStream,
    reader_cipher: &Option<SessionCipher>,
    client: &Arc<Client>,
    tx: &Sender<Job>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    while !shutdown.load(Ordering::SeqCst) {
        let payload = match read_message(stream, reader_cipher) {
            Ok(payload) => payload,
            Err(RaptoError::PeerReset) => return Ok(()),
            Err(e) if e.is_recoverable_read() => continue,
            Err(e) => return Err(e),
        };

        match parse(&payload) {
            Ok((command, args)) => {
                let query = Query {
                    client: Arc::clone(client),
                    command,
                    args,
                };
                if tx.send(Job::Query(query)).is_err() {
                    // Executor is gone; the session has nowhere to go.
                    return Ok(());
                }
            }
            Err(e) => {
                let msg = format!("ERR: {}", e);
                client.send(msg.as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Read one message, decrypting when the session is encrypted
fn read_message(
    stream: &mut TcpStream,
    reader_cipher: &Option<SessionCipher>,
) -> Result<Vec<u8>> {
    match reader_cipher {
        Some(cipher) => transport::secure_read(stream, cipher),
        None => frame::read_frame(stream),
    }
}

/// Single consumer: pops jobs and runs them against the store it owns
fn executor_loop(
    rx: Receiver<Job>,
    mut resolver: Resolver,
    shutdown: Arc<AtomicBool>,
    mods: Arc<AtomicU64>,
    persist: bool,
) {
    tracing::debug!("Executor started");

    while let Ok(job) = rx.recv() {
        match job {
            Job::Query(query) => match resolver.resolve(&query.command, &query.args) {
                Ok(Outcome::Reply(reply)) => {
                    if persist {
                        mods.fetch_add(1, Ordering::SeqCst);
                    }
                    if let Err(e) = query.client.send(&reply) {
                        tracing::debug!(
                            "[{}] response write failed: {}",
                            query.client.addr(),
                            e
                        );
                    }
                }
                Ok(Outcome::Shutdown) => {
                    tracing::info!("DOWN received, stopping executor");
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    let msg = format!("ERR: {}", e);
                    if let Err(e) = query.client.send(msg.as_bytes()) {
                        tracing::debug!(
                            "[{}] error write failed: {}",
                            query.client.addr(),
                            e
                        );
                    }
                }
            },
            Job::Save => {
                if let Err(e) = resolver.save() {
                    tracing::warn!("Autosnap save failed: {}", e);
                }
            }
            Job::Shutdown => break,
        }
    }

    tracing::debug!("Executor stopped");
}

/// Periodic trigger for snapshot persistence.
///
/// Sleeps a second at a time; once both the delay and the modification
/// threshold are met, routes a save through the executor so the worker
/// itself never touches the store.
fn autosnap_loop(
    policy: SnapshotPolicy,
    mods: Arc<AtomicU64>,
    tx: Sender<Job>,
    shutdown: Arc<AtomicBool>,
) {
    let mut last_save = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));

        let due = last_save.elapsed().as_secs() >= policy.delay_secs
            && mods.load(Ordering::SeqCst) >= policy.count;
        if !due {
            continue;
        }

        tracing::debug!("Autosnap triggered");
        if tx.send(Job::Save).is_err() {
            break;
        }
        mods.store(0, Ordering::SeqCst);
        last_save = Instant::now();
    }

    tracing::debug!("Autosnap stopped");
}
