//! Query parsing and command dispatch
//!
//! A query frame is `COMMAND [args…]`: the command is the upper-cased
//! token before the first space, the args are the remainder verbatim
//! (which for `RESTORE` is raw binary). The resolver executes commands
//! against the store and snapshot engine and produces the response
//! payload; the server layer turns errors into `ERR: <phrase>` frames.

use std::borrow::Cow;
use std::num::IntErrorKind;
use std::sync::Arc;

use crate::error::{RaptoError, Result};
use crate::mem::MEM;
use crate::object::{self, now_micros, Field};
use crate::snapshot::SnapshotEngine;
use crate::store::Store;

use super::client::Client;

/// Fixed per-object overhead reported by the `SIZE` command
const OBJECT_OVERHEAD: u64 = 56;

/// A parsed query bound to its originating session
pub struct Query {
    pub client: Arc<Client>,
    pub command: Vec<u8>,
    pub args: Vec<u8>,
}

/// Split a frame into `(COMMAND, args)`.
///
/// Leading spaces are skipped; an empty or all-space frame is an
/// `EmptyQuery`. The command token is upper-cased, the args are left
/// untouched.
pub fn parse(frame: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let start = frame
        .iter()
        .position(|&b| b != b' ')
        .ok_or(RaptoError::EmptyQuery)?;
    let frame = &frame[start..];

    let (command, args) = match frame.iter().position(|&b| b == b' ') {
        Some(space) => (&frame[..space], &frame[space + 1..]),
        None => (frame, &frame[frame.len()..]),
    };
    Ok((command.to_ascii_uppercase(), args.to_vec()))
}

/// What the executor should do after a resolution
pub enum Outcome {
    /// Send this payload back on the originating session
    Reply(Cow<'static, [u8]>),

    /// `DOWN`: no response, stop the server
    Shutdown,
}

impl Outcome {
    fn reply(bytes: impl Into<Cow<'static, [u8]>>) -> Result<Outcome> {
        Ok(Outcome::Reply(bytes.into()))
    }

    fn ok() -> Result<Outcome> {
        Self::reply(&b"OK"[..])
    }
}

/// Executes queries against the store
pub struct Resolver {
    store: Store,
    snapshots: SnapshotEngine,
    db_name: String,
}

impl Resolver {
    pub fn new(store: Store, snapshots: SnapshotEngine, db_name: String) -> Self {
        Resolver {
            store,
            snapshots,
            db_name,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Dispatch one command. The command token is expected upper-cased
    /// (as produced by `parse`).
    pub fn resolve(&mut self, command: &[u8], args: &[u8]) -> Result<Outcome> {
        match command {
            b"PING" => Outcome::reply(&b"pong"[..]),
            b"ISET" => self.set_int(args),
            b"DSET" => self.set_dec(args),
            b"SSET" => self.set_str(args),
            b"UPDATE" => self.update(args),
            b"RENAME" => self.rename(args),
            b"GET" => self.get(args),
            b"TYPE" => self.type_of(args),
            b"CHECK" => self.check(args),
            b"COUNT" => Outcome::reply(self.store.len().to_string().into_bytes()),
            b"LIST" => self.list(),
            b"TOUCH" => self.touch(args),
            b"HEAD" => self.reorder(args, Store::swap_with_head),
            b"TAIL" => self.reorder(args, Store::swap_with_tail),
            b"SHEAD" => self.reorder(args, Store::move_to_head),
            b"STAIL" => self.reorder(args, Store::move_to_tail),
            b"SORT" => {
                self.store.prefetch();
                Outcome::ok()
            }
            b"FREQ" => self.freq(args),
            b"LAST" => self.last(args),
            b"IDLE" => self.idle(args),
            b"LEN" => self.len(args),
            b"SIZE" => self.size(args),
            b"MEM" => self.mem(args),
            b"DB" => self.db(args),
            b"DUMP" => self.dump(args),
            b"RESTORE" => self.restore(args),
            b"ERASE" => {
                self.store.clear();
                Outcome::ok()
            }
            b"DEL" => self.del(args),
            b"SAVE" => {
                self.save()?;
                Outcome::ok()
            }
            b"COPY" => self.copy(args),
            b"DOWN" => {
                if let Err(e) = self.save() {
                    tracing::warn!("Final snapshot on DOWN failed: {}", e);
                }
                Ok(Outcome::Shutdown)
            }
            _ => Err(RaptoError::CommandNotFound),
        }
    }

    /// Persist the store, mapping any failure to the resolver error.
    pub fn save(&mut self) -> Result<()> {
        self.snapshots
            .save(&self.store)
            .map_err(|e| {
                tracing::error!("Snapshot save failed: {}", e);
                RaptoError::SaveFailed
            })
    }

    // -------------------------------------------------------------------------
    // Write Commands
    // -------------------------------------------------------------------------

    fn set_int(&mut self, args: &[u8]) -> Result<Outcome> {
        let (key, value) = split_pair(args)?;
        let value = parse_i64(value)?;
        self.store.put(key, Field::Int(value))?;
        Outcome::ok()
    }

    fn set_dec(&mut self, args: &[u8]) -> Result<Outcome> {
        let (key, value) = split_pair(args)?;
        let value = parse_f64(value)?;
        self.store.put(key, Field::Dec(value))?;
        Outcome::ok()
    }

    fn set_str(&mut self, args: &[u8]) -> Result<Outcome> {
        let (key, value) = split_pair(args)?;
        self.store.put(key, Field::Str(value.to_vec()))?;
        Outcome::ok()
    }

    fn update(&mut self, args: &[u8]) -> Result<Outcome> {
        let (key, delta) = split_pair(args)?;

        // Validate the type and the delta before touching the store, so
        // a rejected update leaves position and metadata as they were.
        let obj = self.store.peek(key).ok_or(RaptoError::KeyNotFound)?;
        let updated = match obj.field {
            Field::Int(v) => Field::Int(v.saturating_add(parse_i64(delta)?)),
            Field::Dec(v) => Field::Dec(v + parse_f64(delta)?),
            Field::Str(_) => return Err(RaptoError::MismatchType),
        };

        let i = self.store.search(key).ok_or(RaptoError::KeyNotFound)?;
        let obj = self.store.object_at_mut(i).ok_or(RaptoError::KeyNotFound)?;
        obj.field = updated;
        Outcome::ok()
    }

    fn rename(&mut self, args: &[u8]) -> Result<Outcome> {
        let (old, new) = split_pair(args)?;
        self.store.rename(old, new)?;
        Outcome::ok()
    }

    fn del(&mut self, args: &[u8]) -> Result<Outcome> {
        self.store.remove(single_key(args)?)?;
        Outcome::ok()
    }

    // -------------------------------------------------------------------------
    // Read Commands
    // -------------------------------------------------------------------------

    fn get(&mut self, args: &[u8]) -> Result<Outcome> {
        let obj = self
            .store
            .get(single_key(args)?)
            .ok_or(RaptoError::KeyNotFound)?;
        let reply = match &obj.field {
            Field::Int(v) => v.to_string().into_bytes(),
            Field::Dec(v) => format_decimal(*v).into_bytes(),
            Field::Str(s) => {
                let mut quoted = Vec::with_capacity(s.len() + 2);
                quoted.push(b'"');
                quoted.extend_from_slice(s);
                quoted.push(b'"');
                quoted
            }
        };
        Outcome::reply(reply)
    }

    fn type_of(&mut self, args: &[u8]) -> Result<Outcome> {
        let obj = self
            .store
            .peek(single_key(args)?)
            .ok_or(RaptoError::KeyNotFound)?;
        Outcome::reply(obj.field.type_name().as_bytes())
    }

    fn check(&mut self, args: &[u8]) -> Result<Outcome> {
        let found = self.store.find(single_key(args)?).is_some();
        Outcome::reply(if found { &b"1"[..] } else { &b"0"[..] })
    }

    fn list(&mut self) -> Result<Outcome> {
        if self.store.is_empty() {
            return Err(RaptoError::NoKeysFound);
        }
        let keys = self.store.list_keys();
        let mut reply = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                reply.push(b' ');
            }
            reply.extend_from_slice(key);
        }
        Outcome::reply(reply)
    }

    fn touch(&mut self, args: &[u8]) -> Result<Outcome> {
        self.store
            .search(single_key(args)?)
            .ok_or(RaptoError::KeyNotFound)?;
        Outcome::ok()
    }

    fn reorder(&mut self, args: &[u8], op: fn(&mut Store, &[u8]) -> Result<()>) -> Result<Outcome> {
        op(&mut self.store, single_key(args)?)?;
        Outcome::ok()
    }

    // -------------------------------------------------------------------------
    // Metadata Commands
    // -------------------------------------------------------------------------

    fn freq(&mut self, args: &[u8]) -> Result<Outcome> {
        let (key, value) = split_optional_pair(args)?;
        let i = self.store.find(key).ok_or(RaptoError::KeyNotFound)?;
        let obj = self.store.object_at_mut(i).ok_or(RaptoError::KeyNotFound)?;
        if let Some(value) = value {
            obj.metadata.access_times = parse_i64(value)?;
        }
        Outcome::reply(obj.metadata.access_times.to_string().into_bytes())
    }

    fn last(&mut self, args: &[u8]) -> Result<Outcome> {
        let (key, value) = split_optional_pair(args)?;
        let i = self.store.find(key).ok_or(RaptoError::KeyNotFound)?;
        let obj = self.store.object_at_mut(i).ok_or(RaptoError::KeyNotFound)?;
        if let Some(value) = value {
            obj.metadata.last_access = parse_i64(value)?;
        }
        Outcome::reply(obj.metadata.last_access.to_string().into_bytes())
    }

    fn idle(&mut self, args: &[u8]) -> Result<Outcome> {
        let obj = self
            .store
            .peek(single_key(args)?)
            .ok_or(RaptoError::KeyNotFound)?;
        let idle = now_micros()
            .checked_sub(obj.metadata.last_access)
            .filter(|idle| *idle >= 0)
            .ok_or(RaptoError::InvalidMetadata)?;
        Outcome::reply(idle.to_string().into_bytes())
    }

    fn len(&mut self, args: &[u8]) -> Result<Outcome> {
        let obj = self
            .store
            .peek(single_key(args)?)
            .ok_or(RaptoError::KeyNotFound)?;
        let len = match &obj.field {
            Field::Str(s) => s.len() as u64,
            _ => 8,
        };
        Outcome::reply(len.to_string().into_bytes())
    }

    fn size(&mut self, args: &[u8]) -> Result<Outcome> {
        let obj = self
            .store
            .peek(single_key(args)?)
            .ok_or(RaptoError::KeyNotFound)?;
        let payload = match &obj.field {
            Field::Str(s) => s.len() as u64,
            _ => 8,
        };
        let size = OBJECT_OVERHEAD + obj.key.len() as u64 + payload;
        Outcome::reply(size.to_string().into_bytes())
    }

    // -------------------------------------------------------------------------
    // Introspection Commands
    // -------------------------------------------------------------------------

    fn mem(&mut self, args: &[u8]) -> Result<Outcome> {
        let value = match args {
            b"LIVE" => MEM.live(),
            b"PEAK" => MEM.peak(),
            b"TOTAL" => MEM.total(),
            b"ALLOC" => MEM.allocs(),
            b"FREE" => MEM.frees(),
            b"RESET-PEAK" => {
                MEM.reset_peak();
                0
            }
            b"RESET-TOTAL" => {
                MEM.reset_total();
                0
            }
            b"RESET-COUNT" => {
                MEM.reset_count();
                0
            }
            _ => return Err(RaptoError::UnknownArgument),
        };
        Outcome::reply(value.to_string().into_bytes())
    }

    fn db(&mut self, args: &[u8]) -> Result<Outcome> {
        let reply = match args {
            b"NAME" => self.db_name.clone().into_bytes(),
            b"CAP" => self.store.capacity().to_string().into_bytes(),
            b"SIZE" => (self.store.capacity() - self.store.cap_remaining())
                .to_string()
                .into_bytes(),
            _ => return Err(RaptoError::UnknownArgument),
        };
        Outcome::reply(reply)
    }

    // -------------------------------------------------------------------------
    // Persistence Commands
    // -------------------------------------------------------------------------

    fn dump(&mut self, args: &[u8]) -> Result<Outcome> {
        let obj = self
            .store
            .peek(single_key(args)?)
            .ok_or(RaptoError::KeyNotFound)?;
        Outcome::reply(object::serialize(obj)?)
    }

    fn restore(&mut self, args: &[u8]) -> Result<Outcome> {
        if args.is_empty() {
            return Err(RaptoError::MissingTokens);
        }
        let obj = object::deserialize(args).map_err(|_| RaptoError::InvalidObject)?;
        self.store.restore(obj)?;
        Outcome::ok()
    }

    fn copy(&mut self, args: &[u8]) -> Result<Outcome> {
        let (src, dst) = split_pair(args)?;
        let obj = self.store.peek(src).ok_or(RaptoError::KeyNotFound)?;

        // Round-trip through the codec so the copy carries the exact
        // canonical form, metadata included.
        let bytes = object::serialize(obj).map_err(|_| RaptoError::InvalidObject)?;
        let mut copy = object::deserialize(&bytes).map_err(|_| RaptoError::InvalidObject)?;
        if dst.is_empty() || dst.len() > object::MAX_KEY_LEN {
            return Err(RaptoError::InvalidObject);
        }
        copy.key = dst.to_vec();
        self.store.restore(copy)?;
        Outcome::ok()
    }
}

// -----------------------------------------------------------------------------
// Argument Helpers
// -----------------------------------------------------------------------------

/// The whole remainder as one key
fn single_key(args: &[u8]) -> Result<&[u8]> {
    if args.is_empty() {
        return Err(RaptoError::MissingTokens);
    }
    Ok(args)
}

/// First token, then the rest verbatim; both must be non-empty
fn split_pair(args: &[u8]) -> Result<(&[u8], &[u8])> {
    let space = args
        .iter()
        .position(|&b| b == b' ')
        .ok_or(RaptoError::MissingTokens)?;
    let (first, rest) = (&args[..space], &args[space + 1..]);
    if first.is_empty() || rest.is_empty() {
        return Err(RaptoError::MissingTokens);
    }
    Ok((first, rest))
}

/// Key with an optional second token
fn split_optional_pair(args: &[u8]) -> Result<(&[u8], Option<&[u8]>)> {
    match args.iter().position(|&b| b == b' ') {
        Some(space) => {
            let (key, rest) = (&args[..space], &args[space + 1..]);
            if key.is_empty() || rest.is_empty() {
                return Err(RaptoError::MissingTokens);
            }
            Ok((key, Some(rest)))
        }
        None => Ok((single_key(args)?, None)),
    }
}

/// Parse a signed integer; overflow is a type error, anything else a
/// mismatch.
fn parse_i64(bytes: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(bytes).map_err(|_| RaptoError::MismatchType)?;
    text.parse::<i64>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => RaptoError::TypeOverflow,
        _ => RaptoError::MismatchType,
    })
}

fn parse_f64(bytes: &[u8]) -> Result<f64> {
    let text = std::str::from_utf8(bytes).map_err(|_| RaptoError::MismatchType)?;
    text.parse::<f64>().map_err(|_| RaptoError::MismatchType)
}

/// Decimal rendering: integral values are forced to one fractional
/// digit so `1` reads back as `1.0`.
fn format_decimal(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}
