//! Keyed and bulk record caches for Larder.
//!
//! A cache can be declared long before the store behind it exists. Each
//! [`StorageHandle`] opens its database in the background once the shared
//! [`VersionGate`] has been given the schema version; until then every read
//! resolves to `None` and every write is skipped. Nothing blocks and nothing
//! fails loudly: the cache is a write-behind copy of data that lives
//! elsewhere.
//!
//! # Variants
//!
//! - [`KeyedCache`] stores one record per key and supports single-key and
//!   bulk access.
//! - [`BulkCache`] stores a whole collection as one [`Envelope`] record and
//!   only supports bulk access.
//!
//! Both implement [`Cache`], including the fill-if-empty combinators that
//! populate an [`ObservableRef`] without ever overwriting it.
//!
//! # Schema versions
//!
//! Bumping the version wipes every collection the next time it is opened.
//! There is no data-preserving migration: cached data is always
//! reconstructible from its source.

pub mod bulk;
pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod handle;
pub mod keyed;
pub mod observable;
pub mod root;
pub mod warm;

pub use bulk::{BulkCache, Envelope, ENVELOPE_KEY};
pub use cache::{Cache, PendingWrite, Record, WriteOutcome};
pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use gate::VersionGate;
pub use handle::{Queued, Readiness, StorageHandle};
pub use keyed::KeyedCache;
pub use larder_store::{Key, StoreConfig, StoreEngine, SyncMode, TxMode};
pub use observable::ObservableRef;
pub use root::CacheRoot;
pub use warm::{Fetch, WarmLoader};
