use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::snapshot;
use crate::traits::{Cursor, KvEngine, ReadTransaction, WriteTransaction};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory, `BTreeMap`-based ordered engine.
///
/// Committed data lives in an `Arc<BTreeMap>`: read transactions clone the
/// `Arc` and walk that snapshot without holding any lock, while write
/// transactions are serialized by a writer mutex and publish a new map on
/// commit. When opened with [`MemoryEngine::open`], every write commit is
/// also persisted to a snapshot file before it becomes visible.
pub struct MemoryEngine {
    data: RwLock<Arc<Map>>,
    writer: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryEngine {
    /// Create a new empty, purely in-memory engine.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Arc::new(BTreeMap::new())),
            writer: Mutex::new(()),
            snapshot_path: None,
        }
    }

    /// Open an engine persisted to the snapshot file at `path`, loading its
    /// current contents. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = snapshot::load(&path)?;
        info!(path = %path.display(), entries = entries.len(), "engine opened");
        Ok(Self {
            data: RwLock::new(Arc::new(entries)),
            writer: Mutex::new(()),
            snapshot_path: Some(path),
        })
    }

    /// The snapshot file backing this engine, if any.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.current().map(|map| map.len()).unwrap_or(0)
    }

    /// Returns `true` if no key is committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> EngineResult<Arc<Map>> {
        let data = self.data.read().map_err(|e| EngineError::Poisoned(e.to_string()))?;
        Ok(Arc::clone(&data))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("keys", &self.len())
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

impl KvEngine for MemoryEngine {
    fn begin_read(&self) -> EngineResult<Box<dyn ReadTransaction + '_>> {
        Ok(Box::new(MemoryReadTxn {
            snapshot: self.current()?,
        }))
    }

    fn begin_write(&self) -> EngineResult<Box<dyn WriteTransaction + '_>> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| EngineError::Poisoned(e.to_string()))?;
        Ok(Box::new(MemoryWriteTxn {
            engine: self,
            writer,
            base: self.current()?,
            writes: BTreeMap::new(),
        }))
    }
}

struct MemoryReadTxn {
    snapshot: Arc<Map>,
}

impl ReadTransaction for MemoryReadTxn {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key).cloned())
    }

    fn cursor(&self) -> EngineResult<Box<dyn Cursor + '_>> {
        Ok(Box::new(MemoryCursor {
            map: self.snapshot.as_ref(),
            position: None,
        }))
    }

    fn commit(self: Box<Self>) -> EngineResult<()> {
        Ok(())
    }
}

struct MemoryWriteTxn<'a> {
    engine: &'a MemoryEngine,
    writer: MutexGuard<'a, ()>,
    base: Arc<Map>,
    /// Pending writes; `None` marks a delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteTransaction for MemoryWriteTxn<'_> {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.base.get(key).cloned()),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<bool> {
        let existed = self.get(key)?.is_some();
        self.writes.insert(key.to_vec(), None);
        Ok(existed)
    }

    fn commit(self: Box<Self>) -> EngineResult<()> {
        let MemoryWriteTxn {
            engine,
            writer,
            base,
            writes,
        } = *self;
        drop(base);

        if writes.is_empty() {
            return Ok(());
        }

        let count = writes.len();
        let mut data = engine
            .data
            .write()
            .map_err(|e| EngineError::Poisoned(e.to_string()))?;

        match engine.snapshot_path.as_deref() {
            None => apply(Arc::make_mut(&mut data), writes),
            Some(path) => {
                // Persist first so a failed save leaves the visible state untouched.
                let mut next = (**data).clone();
                apply(&mut next, writes);
                snapshot::save(path, &next)?;
                *data = Arc::new(next);
            }
        }

        drop(data);
        drop(writer);
        debug!(writes = count, "write transaction committed");
        Ok(())
    }
}

fn apply(map: &mut Map, writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>) {
    for (key, value) in writes {
        match value {
            Some(value) => {
                map.insert(key, value);
            }
            None => {
                map.remove(&key);
            }
        }
    }
}

struct MemoryCursor<'a> {
    map: &'a Map,
    position: Option<Vec<u8>>,
}

impl MemoryCursor<'_> {
    fn land(&mut self, key: Option<&Vec<u8>>) -> EngineResult<Option<Vec<u8>>> {
        self.position = key.cloned();
        Ok(self.position.clone())
    }
}

impl Cursor for MemoryCursor<'_> {
    fn seek_first(&mut self) -> EngineResult<Option<Vec<u8>>> {
        let map = self.map;
        let key = map.keys().next();
        self.land(key)
    }

    fn seek_last(&mut self) -> EngineResult<Option<Vec<u8>>> {
        let map = self.map;
        let key = map.keys().next_back();
        self.land(key)
    }

    fn seek_to_or_after(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let map = self.map;
        let found = map
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k);
        self.land(found)
    }

    fn seek_to_or_before(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let map = self.map;
        let found = map
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(k, _)| k);
        self.land(found)
    }

    fn next(&mut self) -> EngineResult<Option<Vec<u8>>> {
        let Some(current) = self.position.take() else {
            return Ok(None);
        };
        let map = self.map;
        let found = map
            .range::<[u8], _>((Bound::Excluded(current.as_slice()), Bound::Unbounded))
            .next()
            .map(|(k, _)| k);
        self.land(found)
    }

    fn prev(&mut self) -> EngineResult<Option<Vec<u8>>> {
        let Some(current) = self.position.take() else {
            return Ok(None);
        };
        let map = self.map;
        let found = map
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(current.as_slice())))
            .next_back()
            .map(|(k, _)| k);
        self.land(found)
    }
}
