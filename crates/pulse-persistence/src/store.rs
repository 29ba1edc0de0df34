//! Key/value stores.
//!
//! `JsonFileStore` keeps every key in one JSON object on disk. Writes go to a sibling
//! temp file that is renamed over the target, so an interrupted write leaves the previous
//! snapshot intact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Well-known keys.
pub mod keys {
    pub const REFRESH_RATE: &str = "tp_refresh";
    pub const BALANCE: &str = "tp_balance";
    pub const POSITIONS: &str = "tp_positions";
    pub const SYMBOL: &str = "tp_symbol";
    pub const TIMEFRAME: &str = "tp_timeframe";
}

/// Opaque key/value snapshot storage.
pub trait KvStore: Send + Sync {
    /// `Ok(None)` when the key has never been stored.
    fn load(&self, key: &str) -> PersistenceResult<Option<String>>;

    fn store(&self, key: &str, value: &str) -> PersistenceResult<()>;
}

/// Load and decode a JSON value. Undecodable values are logged and treated as absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> PersistenceResult<Option<T>> {
    let Some(raw) = store.load(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable snapshot value");
            Ok(None)
        }
    }
}

/// Encode `value` as JSON and store it.
pub fn store_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> PersistenceResult<()> {
    let raw = serde_json::to_string(value)?;
    store.store(key, &raw)
}

/// In-memory store, used in tests and when persistence is disabled.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn load(&self, key: &str) -> PersistenceResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Single-file JSON store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A corrupt file is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Snapshot file unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), keys = entries.len(), "Snapshot store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> PersistenceResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), keys = entries.len(), "Snapshot flushed");
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn load(&self, key: &str) -> PersistenceResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }
}
