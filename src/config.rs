//! Configuration for Rapto
//!
//! Centralized configuration with sensible defaults. Invariants that
//! span flags (auth implies tls, save count clamped, capacity resolved
//! against an existing storage file) are enforced here rather than in
//! the CLI so every embedder gets the same rules.

use std::path::PathBuf;

use rand::Rng;

use crate::error::{RaptoError, Result};
use crate::snapshot::SnapshotPolicy;

/// Log verbosity levels exposed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Silent,

    /// Warnings and errors
    #[default]
    Warnings,

    /// Everything down to debug
    Noisy,
}

impl Verbosity {
    /// Tracing filter directive for this level
    pub fn filter(&self) -> &'static str {
        match self {
            Verbosity::Silent => "error",
            Verbosity::Warnings => "warn",
            Verbosity::Noisy => "debug",
        }
    }
}

impl std::str::FromStr for Verbosity {
    type Err = RaptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "silent" => Ok(Verbosity::Silent),
            "warnings" => Ok(Verbosity::Warnings),
            "noisy" => Ok(Verbosity::Noisy),
            other => Err(RaptoError::Config(format!(
                "unknown verbosity level: {}",
                other
            ))),
        }
    }
}

/// Main configuration for a Rapto server instance
#[derive(Debug, Clone)]
pub struct Config {
    /// Database name; also names the storage file
    pub name: String,

    /// TCP listen address
    pub listen_addr: String,

    /// Directory holding the storage file
    pub db_path: PathBuf,

    /// Requested capacity in bytes (None defers to an existing file)
    pub db_size: Option<u64>,

    /// Autosnap policy; None disables persistence triggers
    pub save_policy: Option<SnapshotPolicy>,

    /// Encrypt sessions with the handshake cipher
    pub tls: bool,

    /// Session password; forces `tls` on
    pub auth: Option<Vec<u8>>,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,

    /// Log verbosity
    pub verbosity: Verbosity,
}

impl Config {
    /// Start building a config for the named database
    pub fn builder(name: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            name: name.into(),
            listen_addr: None,
            db_path: PathBuf::from("."),
            db_size: None,
            save_policy: None,
            tls: false,
            auth: None,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            verbosity: Verbosity::default(),
        }
    }

    /// Path of the storage file: `<db_path>/<name>.raptodb`.
    ///
    /// Backslashes in the configured path are normalized to forward
    /// slashes first.
    pub fn storage_file(&self) -> PathBuf {
        let normalized = self.db_path.to_string_lossy().replace('\\', "/");
        PathBuf::from(normalized).join(format!("{}.raptodb", self.name))
    }

    /// Resolve the capacity budget against the storage file.
    ///
    /// An existing file wins over a smaller request; a missing file
    /// makes `db_size` mandatory.
    pub fn resolve_capacity(&self) -> Result<u64> {
        let file_size = std::fs::metadata(self.storage_file())
            .map(|m| m.len())
            .ok();
        match (file_size, self.db_size) {
            (Some(on_disk), requested) => Ok(on_disk.max(requested.unwrap_or(0))),
            (None, Some(requested)) => Ok(requested),
            (None, None) => Err(RaptoError::Config(
                "capacity undefined: --db-size is required for a new database".to_string(),
            )),
        }
    }
}

/// Builder for Config
#[derive(Debug)]
pub struct ConfigBuilder {
    name: String,
    listen_addr: Option<String>,
    db_path: PathBuf,
    db_size: Option<u64>,
    save_policy: Option<SnapshotPolicy>,
    tls: bool,
    auth: Option<Vec<u8>>,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
    verbosity: Verbosity,
}

impl ConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn db_size(mut self, bytes: u64) -> Self {
        self.db_size = Some(bytes);
        self
    }

    /// Enable autosnap with the given delay and count; the count is
    /// clamped to at least 1.
    pub fn save_policy(mut self, delay_secs: u64, count: u64) -> Self {
        self.save_policy = Some(SnapshotPolicy::new(delay_secs, count));
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn auth(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.auth = Some(password.into());
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.write_timeout_ms = ms;
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.name.is_empty() {
            return Err(RaptoError::Config("database name is required".to_string()));
        }

        // Auth without encryption would put the password on the wire in
        // the clear; the upgrade is silent.
        let tls = self.tls || self.auth.is_some();

        let listen_addr = match self.listen_addr {
            Some(addr) => addr,
            None if tls => "127.0.0.1:8443".to_string(),
            None => {
                let port: u16 = rand::thread_rng().gen_range(10000..19999);
                format!("127.0.0.1:{}", port)
            }
        };

        Ok(Config {
            name: self.name,
            listen_addr,
            db_path: self.db_path,
            db_size: self.db_size,
            save_policy: self.save_policy,
            tls,
            auth: self.auth,
            read_timeout_ms: self.read_timeout_ms,
            write_timeout_ms: self.write_timeout_ms,
            verbosity: self.verbosity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_implies_tls() {
        let config = Config::builder("db").auth("secret").db_size(1024).build().unwrap();
        assert!(config.tls);
    }

    #[test]
    fn tls_default_port() {
        let config = Config::builder("db").tls(true).db_size(1024).build().unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8443");
    }

    #[test]
    fn plain_default_port_in_range() {
        let config = Config::builder("db").db_size(1024).build().unwrap();
        let port: u16 = config.listen_addr.rsplit(':').next().unwrap().parse().unwrap();
        assert!((10000..19999).contains(&port));
    }

    #[test]
    fn storage_file_normalizes_backslashes() {
        let mut config = Config::builder("mydb").db_size(1).build().unwrap();
        config.db_path = PathBuf::from(r"data\nested");
        assert_eq!(
            config.storage_file(),
            PathBuf::from("data/nested/mydb.raptodb")
        );
    }

    #[test]
    fn capacity_requires_size_or_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::builder("db").db_path(dir.path()).build().unwrap();
        assert!(config.resolve_capacity().is_err());
    }

    #[test]
    fn capacity_prefers_larger_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::builder("db")
            .db_path(dir.path())
            .db_size(10)
            .build()
            .unwrap();
        std::fs::write(config.storage_file(), vec![0u8; 100]).unwrap();
        assert_eq!(config.resolve_capacity().unwrap(), 100);

        let bigger = Config::builder("db")
            .db_path(dir.path())
            .db_size(1000)
            .build()
            .unwrap();
        assert_eq!(bigger.resolve_capacity().unwrap(), 1000);
    }

    #[test]
    fn verbosity_parses() {
        assert_eq!("silent".parse::<Verbosity>().unwrap(), Verbosity::Silent);
        assert_eq!("noisy".parse::<Verbosity>().unwrap(), Verbosity::Noisy);
        assert!("loud".parse::<Verbosity>().is_err());
    }
}
