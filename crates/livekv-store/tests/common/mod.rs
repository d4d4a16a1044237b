#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use livekv_engine::{
    Cursor, EngineError, EngineResult, KvEngine, MemoryEngine, ReadTransaction, WriteTransaction,
};
use livekv_store::{EventStream, Record, Registry, StoreConfig};

/// Blocks engine reads while closed.
#[derive(Default)]
pub struct Gate {
    closed: Mutex<bool>,
    cond: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    pub fn open(&self) {
        *self.closed.lock().unwrap() = false;
        self.cond.notify_all();
    }

    /// Readers currently parked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            while *closed {
                closed = self.cond.wait(closed).unwrap();
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Memory engine with a read gate, a read-transaction counter and
/// injectable read and delete failures.
#[derive(Default)]
pub struct TestEngine {
    inner: MemoryEngine,
    pub gate: Gate,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl TestEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Read transactions begun so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make `begin_read` fail until switched off again.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl KvEngine for TestEngine {
    fn begin_read(&self) -> EngineResult<Box<dyn ReadTransaction + '_>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EngineError::Backend("injected read failure".into()));
        }
        Ok(Box::new(TestRead {
            inner: self.inner.begin_read()?,
            gate: &self.gate,
        }))
    }

    fn begin_write(&self) -> EngineResult<Box<dyn WriteTransaction + '_>> {
        Ok(Box::new(TestWrite {
            inner: self.inner.begin_write()?,
            fail_deletes: self.fail_deletes.load(Ordering::SeqCst),
        }))
    }
}

struct TestRead<'a> {
    inner: Box<dyn ReadTransaction + 'a>,
    gate: &'a Gate,
}

impl ReadTransaction for TestRead<'_> {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.gate.pass();
        self.inner.get(key)
    }

    fn cursor(&self) -> EngineResult<Box<dyn Cursor + '_>> {
        self.gate.pass();
        self.inner.cursor()
    }

    fn commit(self: Box<Self>) -> EngineResult<()> {
        self.inner.commit()
    }
}

struct TestWrite<'a> {
    inner: Box<dyn WriteTransaction + 'a>,
    fail_deletes: bool,
}

impl WriteTransaction for TestWrite<'_> {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<bool> {
        if self.fail_deletes {
            return Err(EngineError::Backend("injected delete failure".into()));
        }
        self.inner.delete(key)
    }

    fn commit(self: Box<Self>) -> EngineResult<()> {
        self.inner.commit()
    }
}

pub fn registry(engine: Arc<dyn KvEngine>) -> Registry {
    Registry::open(engine, StoreConfig::default()).unwrap()
}

pub fn memory_registry() -> Registry {
    registry(Arc::new(MemoryEngine::new()))
}

pub fn put_ids(registry: &Registry, ids: &[&str]) {
    for id in ids {
        registry.put(Record::new(*id)).unwrap();
    }
}

pub fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.id().unwrap_or_default().to_string())
        .collect()
}

/// Everything currently buffered on `rx`.
pub fn drain<E: Clone>(rx: &mut EventStream<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
