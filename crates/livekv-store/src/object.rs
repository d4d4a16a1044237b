//! Live view of a single key.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::broadcast::{wait_for_status, Broadcaster, EventStream, Lifecycle, Observable, Status};
use crate::error::StoreResult;
use crate::event::ObjectEvent;
use crate::record::{Key, Record};
use crate::registry::RegistryInner;

/// Current value of one key, kept up to date by the registry's write path.
///
/// The observable is registered before its initial load starts, so writes
/// committed during the load are routed to it. They are buffered with
/// their commit sequence and replayed after the snapshot is applied,
/// skipping any the snapshot already reflects.
pub struct ObjectObservable {
    key: Key,
    this: Weak<ObjectObservable>,
    registry: Weak<RegistryInner>,
    broadcaster: Broadcaster<ObjectEvent>,
    state: Mutex<ObjectState>,
    status: watch::Sender<Status>,
}

struct ObjectState {
    lifecycle: Lifecycle<ObjectObservable>,
    generation: u64,
    loading: bool,
    value: Option<Record>,
    /// Writes routed here while loading, as `(sequence, new value)`.
    pending: Vec<(u64, Option<Record>)>,
}

impl ObjectObservable {
    pub(crate) fn new(key: Key, registry: &Arc<RegistryInner>) -> Arc<Self> {
        let capacity = registry.config.channel_capacity;
        let (status, _) = watch::channel(Status::default());
        Arc::new_cyclic(|this| Self {
            key,
            this: this.clone(),
            registry: Arc::downgrade(registry),
            broadcaster: Broadcaster::new(capacity),
            state: Mutex::new(ObjectState {
                lifecycle: Lifecycle::Active,
                generation: 1,
                loading: true,
                value: None,
                pending: Vec::new(),
            }),
            status,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The current value; `None` while loading or when the key is absent.
    pub fn value(&self) -> Option<Record> {
        let state = self.lock();
        match state.lifecycle.target() {
            Some(target) => target.value(),
            None => state.value.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status_receiver().borrow().ready
    }

    /// Resolve once the initial load has been applied (or the observable
    /// is disposed).
    pub async fn ready(&self) {
        wait_for_status(self.status_receiver(), |s| s.ready).await;
    }

    /// Kick off the initial load for the current generation.
    pub(crate) fn start(&self) {
        let generation = self.lock().generation;
        self.spawn_load(generation);
    }

    /// Apply a committed write. `value` is `None` for a delete.
    pub(crate) fn apply_write(&self, seq: u64, value: Option<Record>) {
        let mut state = self.lock();
        if !state.lifecycle.is_active() {
            return;
        }
        if state.loading {
            state.pending.push((seq, value));
            return;
        }
        state.value = value.clone();
        self.broadcaster.emit(ObjectEvent::Set(value));
    }

    fn spawn_load(&self, generation: u64) {
        let (Some(registry), Some(this)) = (self.registry.upgrade(), self.this.upgrade()) else {
            return;
        };
        let runtime = registry.runtime.clone();
        runtime.spawn_blocking(move || {
            let loaded = registry.load_object(&this.key);
            this.finish_load(generation, loaded);
        });
    }

    fn finish_load(&self, generation: u64, loaded: StoreResult<(u64, Option<Record>)>) {
        let mut state = self.lock();
        if state.generation != generation || !state.lifecycle.is_active() {
            debug!(key = %self.key, generation, "stale object load discarded");
            return;
        }

        let snapshot_seq = match loaded {
            Ok((seq, value)) => {
                debug!(key = %self.key, seq, found = value.is_some(), "object loaded");
                state.value = value.clone();
                self.broadcaster.emit(ObjectEvent::Set(value));
                seq
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "object load failed");
                state.value = None;
                self.broadcaster.emit(ObjectEvent::Error(e.to_string()));
                0
            }
        };

        let pending = std::mem::take(&mut state.pending);
        for (seq, value) in pending {
            if seq > snapshot_seq {
                state.value = value.clone();
                self.broadcaster.emit(ObjectEvent::Set(value));
            }
        }
        state.loading = false;
        self.status.send_replace(Status {
            ready: true,
            ..Status::default()
        });
    }

    fn status_receiver(&self) -> watch::Receiver<Status> {
        let state = self.lock();
        match state.lifecycle.target() {
            Some(target) => target.status.subscribe(),
            None => self.status.subscribe(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ObjectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Observable for ObjectObservable {
    type Event = ObjectEvent;

    fn subscribe(&self) -> EventStream<ObjectEvent> {
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
                if let Some(registry) = self.registry.upgrade() {
                    registry.release_object(self);
                }
            }
        }
        self.status.send_replace(Status {
            disposed: true,
            ..Status::default()
        });
        debug!(key = %self.key, "object observable disposed");
    }

    fn respawn(&self) {
        let mut state = self.lock();
        if !matches!(state.lifecycle, Lifecycle::Disposed) {
            return;
        }
        let (Some(registry), Some(this)) = (self.registry.upgrade(), self.this.upgrade()) else {
            warn!(key = %self.key, "respawn after registry shutdown ignored");
            return;
        };

        match registry.claim_object(&this) {
            Some(target) => {
                // Hold the target's lock so no event slips between the
                // current value and the relay.
                let target_state = target.lock();
                let relay = target.broadcaster.attach(&self.broadcaster);
                if !target_state.loading {
                    self.broadcaster.emit(ObjectEvent::Set(target_state.value.clone()));
                }
                drop(target_state);
                debug!(key = %self.key, "object observable forwarding to canonical peer");
                state.lifecycle = Lifecycle::Forwarding { target, relay };
                self.status.send_replace(Status::default());
            }
            None => {
                state.lifecycle = Lifecycle::Active;
                state.generation += 1;
                state.loading = true;
                state.value = None;
                let generation = state.generation;
                drop(state);
                self.status.send_replace(Status::default());
                debug!(key = %self.key, generation, "object observable respawned");
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

impl std::fmt::Debug for ObjectObservable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectObservable")
            .field("key", &self.key)
            .field("observers", &self.observer_count())
            .finish()
    }
}
