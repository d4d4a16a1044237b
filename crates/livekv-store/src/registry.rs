//! The registry: write path, point and range reads, and the set of live
//! observables.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use livekv_engine::{KvEngine, ReadTransaction};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::broadcast::Observable;
use crate::codec::{Codec, JsonCodec};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::index::RangeIndex;
use crate::object::ObjectObservable;
use crate::range::{Endpoint, RangeSpec};
use crate::range_observable::RangeObservable;
use crate::record::{Key, Record};
use crate::scanner;

/// Entry point of the store.
///
/// Writes go through [`put`](Self::put) and [`delete`](Self::delete), which
/// commit one engine transaction and then notify every observable the write
/// can affect. A process-wide writer lock spans commit and notification, so
/// observers see writes in commit order. Cloning is cheap and clones share
/// the same observables.
///
/// Observables are not torn down when their last subscriber drops: the
/// registry keeps routing writes to them until they are disposed, either
/// one by one with [`Observable::dispose`] or in bulk with
/// [`release_idle`](Self::release_idle). Hosts that open many short-lived
/// views should call `release_idle` periodically.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    engine: Arc<dyn KvEngine>,
    codec: Box<dyn Codec>,
    pub(crate) config: StoreConfig,
    pub(crate) runtime: Handle,
    state: Mutex<RegistryState>,
    /// Sequence number of the last committed write.
    writer: Mutex<u64>,
}

#[derive(Default)]
struct RegistryState {
    objects: HashMap<Key, Arc<ObjectObservable>>,
    ranges: HashMap<String, Arc<RangeObservable>>,
    index: RangeIndex<Endpoint, Arc<RangeObservable>>,
}

impl Registry {
    /// Open a registry that runs loads and refills on the current tokio
    /// runtime.
    pub fn open(engine: Arc<dyn KvEngine>, config: StoreConfig) -> StoreResult<Self> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        Self::with_runtime(engine, config, runtime)
    }

    /// Open a registry bound to an explicit runtime.
    pub fn with_runtime(
        engine: Arc<dyn KvEngine>,
        config: StoreConfig,
        runtime: Handle,
    ) -> StoreResult<Self> {
        Self::with_codec(engine, config, runtime, Box::new(JsonCodec))
    }

    /// Open a registry with a custom value codec.
    pub fn with_codec(
        engine: Arc<dyn KvEngine>,
        config: StoreConfig,
        runtime: Handle,
        codec: Box<dyn Codec>,
    ) -> StoreResult<Self> {
        config.validate()?;
        info!(
            channel_capacity = config.channel_capacity,
            notify_on_failed_delete = config.notify_on_failed_delete,
            "registry opened"
        );
        Ok(Self {
            inner: Arc::new(RegistryInner {
                engine,
                codec,
                config,
                runtime,
                state: Mutex::new(RegistryState::default()),
                writer: Mutex::new(0),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Point read in its own transaction. A missing key is `Ok(None)`.
    pub fn get(&self, key: &str) -> StoreResult<Option<Record>> {
        require_key(key)?;
        let txn = self.inner.engine.begin_read()?;
        let read = self.inner.read_point(txn.as_ref(), key);
        let released = txn.commit();
        let record = read?;
        released?;
        Ok(record)
    }

    /// One-shot scan of `spec`.
    pub fn range_get(&self, spec: &RangeSpec) -> StoreResult<Vec<Record>> {
        spec.validate()?;
        self.inner.scan(spec)
    }

    // -----------------------------------------------------------------------
    // Observables
    // -----------------------------------------------------------------------

    /// The canonical live view of `key`, created and loaded on first use.
    pub fn object_observable(&self, key: &str) -> StoreResult<Arc<ObjectObservable>> {
        require_key(key)?;
        let created = {
            let mut state = self.inner.lock_state();
            if let Some(existing) = state.objects.get(key) {
                return Ok(Arc::clone(existing));
            }
            let created = ObjectObservable::new(key.to_string(), &self.inner);
            state.objects.insert(key.to_string(), Arc::clone(&created));
            created
        };
        debug!(key, "object observable created");
        created.start();
        Ok(created)
    }

    /// The canonical live window for `spec`, created and loaded on first
    /// use. Equal specs share one observable.
    pub fn range_observable(&self, spec: &RangeSpec) -> StoreResult<Arc<RangeObservable>> {
        spec.validate()?;
        let canonical = spec.canonical_key();
        let created = {
            let mut state = self.inner.lock_state();
            if let Some(existing) = state.ranges.get(&canonical) {
                return Ok(Arc::clone(existing));
            }
            let created = RangeObservable::new(spec.clone(), &self.inner);
            state.insert_range(&created);
            created
        };
        debug!(range = %canonical, "range observable created");
        created.start();
        Ok(created)
    }

    /// Dispose every canonical observable nobody is subscribed to.
    /// Returns how many were disposed.
    ///
    /// Holding an `Arc` without subscribing does not keep an observable
    /// alive here; a later [`Observable::respawn`] brings it back.
    pub fn release_idle(&self) -> usize {
        let (objects, ranges) = {
            let state = self.inner.lock_state();
            let objects: Vec<_> = state
                .objects
                .values()
                .filter(|o| o.observer_count() == 0)
                .cloned()
                .collect();
            let ranges: Vec<_> = state
                .ranges
                .values()
                .filter(|r| r.observer_count() == 0)
                .cloned()
                .collect();
            (objects, ranges)
        };

        let mut released = 0;
        for object in objects {
            if object.observer_count() == 0 {
                object.dispose();
                released += 1;
            }
        }
        for range in ranges {
            if range.observer_count() == 0 {
                range.dispose();
                released += 1;
            }
        }
        debug!(released, "idle observables released");
        released
    }

    /// Number of registered object observables.
    pub fn object_count(&self) -> usize {
        self.inner.lock_state().objects.len()
    }

    /// Number of range observables in the routing index.
    pub fn range_count(&self) -> usize {
        self.inner.lock_state().index.len()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store `record` under its `id` and return the value it replaced.
    pub fn put(&self, record: Record) -> StoreResult<Option<Record>> {
        let key = record.require_id()?.to_string();
        let bytes = self.inner.codec.encode(&record).map_err(|e| {
            StoreError::InvalidArgument(format!("cannot encode record {key:?}: {e}"))
        })?;

        let mut seq = self.inner.lock_writer();
        let mut txn = self.inner.engine.begin_write()?;
        let old = match txn.get(key.as_bytes())? {
            Some(bytes) => self.inner.decode_old(&key, &bytes),
            None => None,
        };
        txn.put(key.as_bytes(), &bytes)?;
        txn.commit()?;
        *seq += 1;

        debug!(key = %key, seq = *seq, replaced = old.is_some(), "put committed");
        self.inner.notify_put(*seq, &key, &record);
        Ok(old)
    }

    /// Remove `key` and return the value it held.
    ///
    /// If the engine fails after the old value was read, observers are
    /// still told about the removal when
    /// [`StoreConfig::notify_on_failed_delete`] is set, and the engine error
    /// is returned.
    pub fn delete(&self, key: &str) -> StoreResult<Option<Record>> {
        require_key(key)?;

        let mut seq = self.inner.lock_writer();
        let mut txn = self.inner.engine.begin_write()?;
        let (existed, old) = match txn.get(key.as_bytes())? {
            Some(bytes) => (true, self.inner.decode_old(key, &bytes)),
            None => (false, None),
        };
        let removed = match txn.delete(key.as_bytes()) {
            Ok(_) => txn.commit(),
            Err(e) => Err(e),
        };

        match removed {
            Ok(()) => {
                if existed {
                    *seq += 1;
                    debug!(key, seq = *seq, "delete committed");
                    self.inner.notify_delete(*seq, key);
                }
                Ok(old)
            }
            Err(e) => {
                error!(key, error = %e, "delete failed after reading the old value");
                if existed && self.inner.config.notify_on_failed_delete {
                    *seq += 1;
                    self.inner.notify_delete(*seq, key);
                }
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Registry")
            .field("objects", &state.objects.len())
            .field("ranges", &state.index.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl RegistryState {
    fn insert_range(&mut self, range: &Arc<RangeObservable>) {
        let (low, high) = range.interval().clone();
        self.ranges
            .insert(range.canonical_key().to_string(), Arc::clone(range));
        self.index.insert(low, high, Arc::clone(range));
    }
}

impl RegistryInner {
    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, u64> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_point(&self, txn: &dyn ReadTransaction, key: &str) -> StoreResult<Option<Record>> {
        match txn.get(key.as_bytes())? {
            Some(bytes) => self
                .codec
                .decode(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Decode the value a write is about to replace. An undecodable value
    /// must not block overwriting it.
    fn decode_old(&self, key: &str, bytes: &[u8]) -> Option<Record> {
        match self.codec.decode(bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "replaced value could not be decoded");
                None
            }
        }
    }

    /// Run `read` against a transaction opened at a known write sequence.
    ///
    /// The transaction is opened under the writer lock, so it reflects
    /// every write up to the returned sequence and none after it. The lock
    /// is released before `read` runs.
    fn at_sequence<T>(
        &self,
        read: impl FnOnce(&dyn ReadTransaction) -> StoreResult<T>,
    ) -> StoreResult<(u64, T)> {
        let (seq, txn) = {
            let writer = self.lock_writer();
            (*writer, self.engine.begin_read()?)
        };
        let value = read(txn.as_ref());
        let released = txn.commit();
        let value = value?;
        released?;
        Ok((seq, value))
    }

    pub(crate) fn load_object(&self, key: &str) -> StoreResult<(u64, Option<Record>)> {
        self.at_sequence(|txn| self.read_point(txn, key))
    }

    pub(crate) fn load_range(&self, spec: &RangeSpec) -> StoreResult<(u64, Vec<Record>)> {
        self.at_sequence(|txn| scanner::walk(txn, self.codec.as_ref(), spec))
    }

    pub(crate) fn scan(&self, spec: &RangeSpec) -> StoreResult<Vec<Record>> {
        scanner::scan(self.engine.as_ref(), self.codec.as_ref(), spec)
    }

    /// Register `object` as canonical for its key, or return the live
    /// observable that already is.
    pub(crate) fn claim_object(
        &self,
        object: &Arc<ObjectObservable>,
    ) -> Option<Arc<ObjectObservable>> {
        let mut state = self.lock_state();
        match state.objects.get(object.key()) {
            Some(existing) if !Arc::ptr_eq(existing, object) => Some(Arc::clone(existing)),
            Some(_) => None,
            None => {
                state
                    .objects
                    .insert(object.key().to_string(), Arc::clone(object));
                None
            }
        }
    }

    /// Deregister `object` if it is the canonical one for its key.
    pub(crate) fn release_object(&self, object: &ObjectObservable) {
        let mut state = self.lock_state();
        if state
            .objects
            .get(object.key())
            .is_some_and(|o| std::ptr::eq(o.as_ref(), object))
        {
            state.objects.remove(object.key());
        }
    }

    pub(crate) fn claim_range(&self, range: &Arc<RangeObservable>) -> Option<Arc<RangeObservable>> {
        let mut state = self.lock_state();
        match state.ranges.get(range.canonical_key()) {
            Some(existing) if !Arc::ptr_eq(existing, range) => Some(Arc::clone(existing)),
            Some(_) => None,
            None => {
                state.insert_range(range);
                None
            }
        }
    }

    /// Remove `range` from the range map and the routing index, using the
    /// interval computed when it was created.
    pub(crate) fn release_range(&self, range: &RangeObservable) {
        let mut state = self.lock_state();
        let canonical = range.canonical_key();
        if state
            .ranges
            .get(canonical)
            .is_some_and(|r| std::ptr::eq(r.as_ref(), range))
        {
            state.ranges.remove(canonical);
        }
        let (low, high) = range.interval();
        state
            .index
            .remove(low, high, |r| std::ptr::eq(r.as_ref(), range));
    }

    /// Observables a write to `key` can affect.
    fn routes(&self, key: &str) -> (Option<Arc<ObjectObservable>>, Vec<Arc<RangeObservable>>) {
        let state = self.lock_state();
        let object = state.objects.get(key).cloned();
        let ranges = state
            .index
            .query(&Endpoint::Key(key.to_string()))
            .into_iter()
            .cloned()
            .collect();
        (object, ranges)
    }

    fn notify_put(&self, seq: u64, key: &str, record: &Record) {
        let (object, ranges) = self.routes(key);
        debug!(key, seq, ranges = ranges.len(), "routing put");
        if let Some(object) = object {
            object.apply_write(seq, Some(record.clone()));
        }
        for range in ranges {
            range.apply_put(seq, record);
        }
    }

    fn notify_delete(&self, seq: u64, key: &str) {
        let (object, ranges) = self.routes(key);
        debug!(key, seq, ranges = ranges.len(), "routing delete");
        if let Some(object) = object {
            object.apply_write(seq, None);
        }
        for range in ranges {
            range.apply_delete(seq, key);
        }
    }
}

fn require_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use livekv_engine::MemoryEngine;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::open(Arc::new(MemoryEngine::new()), StoreConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn put_returns_previous_value() {
        let reg = registry();
        assert_eq!(reg.put(Record::new("a").with("v", 1)).unwrap(), None);
        let old = reg.put(Record::new("a").with("v", 2)).unwrap().unwrap();
        assert_eq!(old.get("v"), Some(&json!(1)));
        assert_eq!(reg.get("a").unwrap().unwrap().get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.put(Record::new("")),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(reg.get(""), Err(StoreError::InvalidArgument(_))));
        assert!(matches!(
            reg.delete(""),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.range_get(&RangeSpec::all().limit(0)),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(reg.object_observable("").is_err());
        assert!(reg.range_observable(
            &RangeSpec::all().gt("b").lt("a")).is_err(
        ));
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_none() {
        let reg = registry();
        assert_eq!(reg.delete("nope").unwrap(), None);
        reg.put(Record::new("a")).unwrap();
        assert_eq!(reg.delete("a").unwrap(), Some(Record::new("a")));
        assert_eq!(reg.get("a").unwrap(), None);
    }

    #[tokio::test]
    async fn observables_are_canonical() {
        let reg = registry();
        let a = reg.object_observable("k").unwrap();
        let b = reg.object_observable("k").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.object_count(), 1);

        let spec = RangeSpec::all().gte("a").limit(3);
        let r1 = reg.range_observable(&spec).unwrap();
        let r2 = reg.range_observable(&spec.clone()).unwrap();
        assert!(Arc::ptr_eq(&r1, &r2));
        let r3 = reg.range_observable(&spec.reversed()).unwrap();
        assert!(!Arc::ptr_eq(&r1, &r3));
        assert_eq!(reg.range_count(), 2);
    }

    #[tokio::test]
    async fn release_idle_keeps_subscribed_observables() {
        let reg = registry();
        let watched = reg.object_observable("a").unwrap();
        let _rx = watched.subscribe();
        let idle = reg.object_observable("b").unwrap();
        let range = reg.range_observable(&RangeSpec::all()).unwrap();

        assert_eq!(reg.release_idle(), 2);
        assert!(idle.is_disposed());
        assert!(range.is_disposed());
        assert!(!watched.is_disposed());
        assert_eq!(reg.object_count(), 1);
        assert_eq!(reg.range_count(), 0);
    }

    #[test]
    fn open_outside_runtime_fails() {
        let err =
            Registry::open(Arc::new(MemoryEngine::new()), StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::NoRuntime));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let config = StoreConfig {
            channel_capacity: 0,
            ..StoreConfig::default()
        };
        let engine = Arc::new(MemoryEngine::new());
        let err = Registry::with_runtime(engine, config, runtime.handle().clone()).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
