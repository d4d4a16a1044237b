use crate::error::EngineResult;

/// Ordered transactional key-value engine.
///
/// All implementations must satisfy these invariants:
/// - Keys are ordered byte-lexicographically.
/// - A read transaction observes one consistent snapshot for its whole life.
/// - Write transactions are serialized against each other, so a `get`
///   followed by a `put` of the same key inside one write transaction is
///   atomic.
/// - Uncommitted write transactions leave no trace when dropped.
pub trait KvEngine: Send + Sync {
    /// Open a read-only transaction over a consistent snapshot.
    fn begin_read(&self) -> EngineResult<Box<dyn ReadTransaction + '_>>;

    /// Open a read-write transaction.
    ///
    /// Blocks until any other write transaction has committed or been
    /// dropped.
    fn begin_write(&self) -> EngineResult<Box<dyn WriteTransaction + '_>>;
}

/// Read-only transaction.
pub trait ReadTransaction {
    /// Read the value stored at `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Open a cursor positioned nowhere; call one of the seek methods first.
    fn cursor(&self) -> EngineResult<Box<dyn Cursor + '_>>;

    /// Release the transaction.
    fn commit(self: Box<Self>) -> EngineResult<()>;
}

/// Read-write transaction.
pub trait WriteTransaction {
    /// Read the value stored at `key`, including writes made earlier in this
    /// transaction.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Create or overwrite `key`.
    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Delete `key`. Returns `true` if the key existed.
    fn delete(&mut self, key: &[u8]) -> EngineResult<bool>;

    /// Atomically apply every write made in this transaction.
    fn commit(self: Box<Self>) -> EngineResult<()>;
}

/// Read-only ordered cursor over a [`ReadTransaction`].
///
/// Every movement returns the key the cursor landed on, or `None` when it
/// ran off either end (after which it is unpositioned).
pub trait Cursor {
    /// Move to the smallest key.
    fn seek_first(&mut self) -> EngineResult<Option<Vec<u8>>>;

    /// Move to the largest key.
    fn seek_last(&mut self) -> EngineResult<Option<Vec<u8>>>;

    /// Move to the smallest key `>= key`.
    fn seek_to_or_after(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Move to the largest key `<= key`.
    fn seek_to_or_before(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Move to the next larger key.
    fn next(&mut self) -> EngineResult<Option<Vec<u8>>>;

    /// Move to the next smaller key.
    fn prev(&mut self) -> EngineResult<Option<Vec<u8>>>;
}
