//! # Rapto
//!
//! An in-memory key-value database server with:
//! - Bounded byte capacity with a checked accounting ledger
//! - Transposition-heuristic LRU ordering (promote-by-one on hit)
//! - Compressed whole-database snapshots with an autosnap trigger
//! - A framed, optionally encrypted and password-authenticated protocol
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TCP Acceptor                          │
//! │                 (one thread per connection)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ parsed queries
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Work Queue                             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ single consumer
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Executor                               │
//! │               (sole owner of the Store)                     │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │                              │
//!            ▼                              ▼
//!     ┌─────────────┐               ┌──────────────┐
//!     │    Store    │               │   Snapshot   │
//!     │ (LRU order) │               │ (LZ4 frames) │
//!     └─────────────┘               └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod mem;
pub mod object;
pub mod store;
pub mod snapshot;
pub mod transport;
pub mod server;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{RaptoError, Result};
pub use config::{Config, Verbosity};
pub use object::{Field, Metadata, Object};
pub use store::Store;
pub use snapshot::{SnapshotEngine, SnapshotPolicy};
pub use server::{Server, ServerHandle};
pub use client::{ClientOptions, Connection};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Rapto; sessions are rejected on mismatch
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
