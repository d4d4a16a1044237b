//! Live, ordered, optionally limited window over a key range.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::broadcast::{wait_for_status, Broadcaster, EventStream, Lifecycle, Observable, Status};
use crate::error::StoreResult;
use crate::event::RangeEvent;
use crate::range::{Endpoint, RangeSpec};
use crate::record::{Key, Record};
use crate::registry::RegistryInner;
use crate::window::{Outcome, RefillRequest, Window};

/// Write routed to a range that is still loading.
#[derive(Debug)]
enum Routed {
    Put(Record),
    Delete(Key),
}

/// Materialized result of a [`RangeSpec`], maintained incrementally.
///
/// After the initial scan, puts and deletes routed through the
/// [`RangeIndex`](crate::RangeIndex) update the window in place. Deletes
/// from a full window read just enough rows past the boundary to top it
/// back up; these refills run on the blocking pool and only the latest one
/// is ever applied.
pub struct RangeObservable {
    spec: RangeSpec,
    canonical_key: String,
    /// Computed once so deregistration removes exactly what was inserted.
    interval: (Endpoint, Endpoint),
    this: Weak<RangeObservable>,
    registry: Weak<RegistryInner>,
    broadcaster: Broadcaster<RangeEvent>,
    state: Mutex<RangeState>,
    status: watch::Sender<Status>,
}

struct RangeState {
    lifecycle: Lifecycle<RangeObservable>,
    generation: u64,
    loading: bool,
    window: Window,
    pending: Vec<(u64, Routed)>,
}

impl RangeObservable {
    pub(crate) fn new(spec: RangeSpec, registry: &Arc<RegistryInner>) -> Arc<Self> {
        let capacity = registry.config.channel_capacity;
        let (status, _) = watch::channel(Status::default());
        Arc::new_cyclic(|this| Self {
            canonical_key: spec.canonical_key(),
            interval: spec.interval(),
            spec: spec.clone(),
            this: this.clone(),
            registry: Arc::downgrade(registry),
            broadcaster: Broadcaster::new(capacity),
            state: Mutex::new(RangeState {
                lifecycle: Lifecycle::Active,
                generation: 1,
                loading: true,
                window: Window::new(spec),
                pending: Vec::new(),
            }),
            status,
        })
    }

    pub fn spec(&self) -> &RangeSpec {
        &self.spec
    }

    pub(crate) fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    pub(crate) fn interval(&self) -> &(Endpoint, Endpoint) {
        &self.interval
    }

    /// The window in the range's logical order.
    pub fn list(&self) -> Vec<Record> {
        let state = self.lock();
        match state.lifecycle.target() {
            Some(target) => target.list(),
            None => state.window.records().to_vec(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status_receiver().borrow().ready
    }

    /// Resolve once the initial scan has been applied.
    pub async fn ready(&self) {
        wait_for_status(self.status_receiver(), |s| s.ready).await;
    }

    /// Resolve once ready with no refill outstanding.
    pub async fn settled(&self) {
        wait_for_status(self.status_receiver(), |s| s.ready && !s.refilling).await;
    }

    pub(crate) fn start(&self) {
        let generation = self.lock().generation;
        self.spawn_load(generation);
    }

    pub(crate) fn apply_put(&self, seq: u64, record: &Record) {
        let mut state = self.lock();
        if !state.lifecycle.is_active() {
            return;
        }
        if state.loading {
            state.pending.push((seq, Routed::Put(record.clone())));
            return;
        }
        let outcome = state.window.put(record.clone());
        self.publish(&mut state, outcome);
    }

    pub(crate) fn apply_delete(&self, seq: u64, key: &str) {
        let mut state = self.lock();
        if !state.lifecycle.is_active() {
            return;
        }
        if state.loading {
            state.pending.push((seq, Routed::Delete(key.to_string())));
            return;
        }
        let outcome = state.window.delete(key);
        self.publish(&mut state, outcome);
    }

    /// Broadcast `outcome` and start its refill, if any. Called with the
    /// state lock held so events leave in the order they were produced.
    fn publish(&self, state: &mut RangeState, outcome: Outcome) {
        for event in outcome.events {
            self.broadcaster.emit(event);
        }
        if let Some(request) = outcome.refill {
            self.spawn_refill(state.generation, request);
        }
        self.publish_status(state);
    }

    fn publish_status(&self, state: &RangeState) {
        let next = Status {
            ready: !state.loading,
            refilling: state.window.refill_pending(),
            disposed: false,
        };
        self.status.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    fn spawn_load(&self, generation: u64) {
        let (Some(registry), Some(this)) = (self.registry.upgrade(), self.this.upgrade()) else {
            return;
        };
        let runtime = registry.runtime.clone();
        runtime.spawn_blocking(move || {
            let loaded = registry.load_range(&this.spec);
            this.finish_load(generation, loaded);
        });
    }

    fn finish_load(&self, generation: u64, loaded: StoreResult<(u64, Vec<Record>)>) {
        let mut state = self.lock();
        if state.generation != generation || !state.lifecycle.is_active() {
            debug!(range = %self.canonical_key, generation, "stale range load discarded");
            return;
        }

        let snapshot_seq = match loaded {
            Ok((seq, records)) => {
                debug!(range = %self.canonical_key, seq, count = records.len(), "range loaded");
                state.window.reset(records.clone());
                self.broadcaster.emit(RangeEvent::Set(records));
                seq
            }
            Err(e) => {
                warn!(range = %self.canonical_key, error = %e, "range load failed");
                state.window.invalidate();
                self.broadcaster.emit(RangeEvent::Error(e.to_string()));
                0
            }
        };
        state.loading = false;

        let pending = std::mem::take(&mut state.pending);
        for (seq, routed) in pending {
            if seq <= snapshot_seq {
                continue;
            }
            let outcome = match routed {
                Routed::Put(record) => state.window.put(record),
                Routed::Delete(key) => state.window.delete(&key),
            };
            self.publish(&mut state, outcome);
        }
        self.publish_status(&state);
    }

    fn spawn_refill(&self, generation: u64, request: RefillRequest) {
        let (Some(registry), Some(this)) = (self.registry.upgrade(), self.this.upgrade()) else {
            return;
        };
        let runtime = registry.runtime.clone();
        runtime.spawn_blocking(move || {
            let rows = registry.scan(&request.spec);
            this.finish_refill(generation, request.token, rows);
        });
    }

    fn finish_refill(&self, generation: u64, token: u64, rows: StoreResult<Vec<Record>>) {
        let mut state = self.lock();
        if state.generation != generation || !state.lifecycle.is_active() {
            debug!(range = %self.canonical_key, token, "stale refill discarded");
            return;
        }

        match rows {
            Ok(rows) => match state.window.commit_refill(token, rows) {
                Some(events) => {
                    debug!(
                        range = %self.canonical_key,
                        token,
                        inserted = events.len(),
                        "refill applied"
                    );
                    for event in events {
                        self.broadcaster.emit(event);
                    }
                }
                None => debug!(range = %self.canonical_key, token, "superseded refill discarded"),
            },
            Err(e) => {
                if state.window.abandon_refill(token) {
                    warn!(range = %self.canonical_key, token, error = %e, "refill failed");
                    self.broadcaster.emit(RangeEvent::Error(e.to_string()));
                }
            }
        }
        self.publish_status(&state);
    }

    fn status_receiver(&self) -> watch::Receiver<Status> {
        let state = self.lock();
        match state.lifecycle.target() {
            Some(target) => target.status.subscribe(),
            None => self.status.subscribe(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Observable for RangeObservable {
    type Event = RangeEvent;

    fn subscribe(&self) -> EventStream<RangeEvent> {
        self.broadcaster.subscribe()
    }

    fn observer_count(&self) -> usize {
        self.broadcaster.observer_count()
    }

    fn dispose(&self) {
        let mut state = self.lock();
        match std::mem::replace(&mut state.lifecycle, Lifecycle::Disposed) {
            Lifecycle::Disposed => return,
            Lifecycle::Forwarding { target, relay } => {
                target.broadcaster.detach(relay);
            }
            Lifecycle::Active => {
                state.generation += 1;
                state.loading = false;
                state.pending.clear();
                state.window.reset(Vec::new());
                if let Some(registry) = self.registry.upgrade() {
                    registry.release_range(self);
                }
            }
        }
        self.status.send_replace(Status {
            disposed: true,
            ..Status::default()
        });
        debug!(range = %self.canonical_key, "range observable disposed");
    }

    fn respawn(&self) {
        let mut state = self.lock();
        if !matches!(state.lifecycle, Lifecycle::Disposed) {
            return;
        }
        let (Some(registry), Some(this)) = (self.registry.upgrade(), self.this.upgrade()) else {
            warn!(range = %self.canonical_key, "respawn after registry shutdown ignored");
            return;
        };

        match registry.claim_range(&this) {
            Some(target) => {
                let target_state = target.lock();
                let relay = target.broadcaster.attach(&self.broadcaster);
                if !target_state.loading {
                    self.broadcaster
                        .emit(RangeEvent::Set(target_state.window.records().to_vec()));
                }
                drop(target_state);
                debug!(range = %self.canonical_key, "range observable forwarding to peer");
                state.lifecycle = Lifecycle::Forwarding { target, relay };
                self.status.send_replace(Status::default());
            }
            None => {
                state.lifecycle = Lifecycle::Active;
                state.generation += 1;
                state.loading = true;
                let generation = state.generation;
                drop(state);
                self.status.send_replace(Status::default());
                debug!(range = %self.canonical_key, generation, "range observable respawned");
                self.spawn_load(generation);
            }
        }
    }

    fn is_disposed(&self) -> bool {
        matches!(self.lock().lifecycle, Lifecycle::Disposed)
    }

    fn is_forwarding(&self) -> bool {
        self.lock().lifecycle.target().is_some()
    }
}

impl std::fmt::Debug for RangeObservable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeObservable")
            .field("range", &self.canonical_key)
            .field("observers", &self.observer_count())
            .finish()
    }
}
