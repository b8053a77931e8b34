//! Versioned local record store for Larder.
//!
//! The store is organised the way a browser object database is: a
//! [`StoreEngine`] hands out [`Database`] connections by name, each database
//! carries an integer schema version, and each database holds named
//! collections of JSON records keyed by a declared field.
//!
//! # Opening
//!
//! [`StoreEngine::open`] takes the requested version and an upgrade callback.
//! When the requested version is higher than the stored one (including the
//! very first open) the callback runs against an [`Upgrade`], which is the
//! only place collections can be created or dropped. Opening at a lower
//! version fails.
//!
//! # Transactions
//!
//! All record access goes through a [`Transaction`] scoped to one collection,
//! in [`TxMode::ReadOnly`] or [`TxMode::ReadWrite`]. Writes are staged and
//! applied all-or-nothing on [`Transaction::commit`]; the first failed
//! request aborts the transaction.
//!
//! # Persistence
//!
//! With a root directory configured, every committed transaction is appended
//! to `<root>/<database>.journal` as one CRC-framed record (see [`journal`]).
//! Without one the engine is purely in-memory.

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod journal;
pub mod key;
pub mod transaction;

pub use config::{StoreConfig, SyncMode};
pub use database::{Database, Upgrade};
pub use engine::StoreEngine;
pub use error::{StoreError, StoreResult};
pub use journal::{Journal, JournalFrame, JournalOp};
pub use key::Key;
pub use transaction::{Transaction, TxMode};
