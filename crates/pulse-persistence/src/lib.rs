//! Key/value snapshot persistence.
//!
//! Best-effort storage for cadence preferences, balance and open positions. Absence of a
//! key is never an error; values are opaque strings (usually JSON).

pub mod error;
pub mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use store::{keys, load_json, store_json, JsonFileStore, KvStore, MemoryStore};
