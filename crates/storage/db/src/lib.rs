//! Transactional key-value store used by the sync pipeline.
//!
//! # Overview
//!
//! - [`Database`] hands out read-only snapshots ([`DbTx`]) and the single read-write transaction
//!   ([`DbTxMut`]).
//! - [`tables`] declares the tables and the types stored in them.
//! - [`MemoryDatabase`] is a multi-version in-memory engine: readers see an immutable snapshot,
//!   the writer builds a copy-on-write overlay that is published on commit.
//! - [`MemoryOverlay`] layers uncommittable scratch writes over any read transaction and is used
//!   for speculative execution.

mod codecs;
mod database;
mod error;
mod mem;
mod overlay;
mod provider;
pub mod table;
pub mod tables;
mod transaction;

pub use database::{Database, TxFactory};
pub use error::DatabaseError;
pub use mem::{MemTx, MemTxMut, MemoryDatabase};
pub use overlay::MemoryOverlay;
pub use provider::{ChainReader, ChainWriter};
pub use tables::models::BlockNumberAddress;
pub use transaction::{DbTx, DbTxMut, RawRange};
