//! Ordered transactional key-value engine for livekv.
//!
//! This crate defines the narrow engine contract the live-query layer
//! consumes and ships an in-memory implementation of it. Keys are opaque
//! byte strings compared lexicographically; values are opaque bytes.
//!
//! # Contract
//!
//! All backends implement the [`KvEngine`] trait:
//!
//! - [`ReadTransaction`] -- point reads and a [`Cursor`] over one
//!   consistent snapshot
//! - [`WriteTransaction`] -- read-modify-write of single keys, applied
//!   atomically on commit and discarded when dropped uncommitted
//!
//! # Backends
//!
//! - [`MemoryEngine`] -- `BTreeMap`-based engine for tests and embedding,
//!   optionally persisted to a snapshot file on every write commit
//!
//! # Design Rules
//!
//! 1. Read transactions never observe a partially committed write.
//! 2. Write transactions are serialized: a read-then-write pair inside one
//!    write transaction sees no interleaved writer.
//! 3. Cursors are read-only and never outlive their transaction.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod snapshot;
pub mod traits;

pub use error::{EngineError, EngineResult};
pub use memory::MemoryEngine;
pub use traits::{Cursor, KvEngine, ReadTransaction, WriteTransaction};
