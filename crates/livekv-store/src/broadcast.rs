//! Event fan-out shared by both observable kinds.
//!
//! A [`Broadcaster`] owns a `tokio::sync::broadcast` channel. Forwarding
//! shims attach their own broadcaster to a canonical one as a relay, so
//! their subscribers keep receiving events without the shim holding any
//! state of its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};

/// A broadcast channel receiver for observable events.
pub type EventStream<E> = broadcast::Receiver<E>;

/// Handle of a relay attached to a [`Broadcaster`].
pub type RelayId = u64;

/// Capability shared by object and range observables.
pub trait Observable: Send + Sync {
    type Event: Clone + Send + 'static;

    /// Register an external observer.
    fn subscribe(&self) -> EventStream<Self::Event>;

    /// External observers currently attached, including those reached
    /// through forwarding shims.
    fn observer_count(&self) -> usize;

    /// Detach from the registry. Idempotent; outstanding loads and refills
    /// complete without effect.
    fn dispose(&self);

    /// Reactivate a disposed observable, either reloading it or forwarding
    /// to a canonical peer that appeared meanwhile.
    fn respawn(&self);

    fn is_disposed(&self) -> bool;

    fn is_forwarding(&self) -> bool;
}

/// Where an observable stands in its lifecycle.
pub(crate) enum Lifecycle<T> {
    Active,
    /// Stood down in favor of a canonical peer whose events are relayed to
    /// this observable's subscribers.
    Forwarding { target: Arc<T>, relay: RelayId },
    Disposed,
}

impl<T> Lifecycle<T> {
    pub(crate) fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub(crate) fn target(&self) -> Option<&Arc<T>> {
        match self {
            Lifecycle::Forwarding { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Progress published on an observable's watch channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Status {
    pub ready: bool,
    pub refilling: bool,
    pub disposed: bool,
}

/// Wait until `done` holds or the observable is disposed.
pub(crate) async fn wait_for_status(
    mut status: watch::Receiver<Status>,
    done: fn(&Status) -> bool,
) {
    // A closed channel means the observable was dropped.
    let _ = status.wait_for(|s| s.disposed || done(s)).await;
}

/// Fan-out of events to subscribers and attached relays.
pub struct Broadcaster<E> {
    sender: broadcast::Sender<E>,
    relays: Mutex<Vec<(RelayId, broadcast::Sender<E>)>>,
    next_relay: AtomicU64,
}

impl<E: Clone> Broadcaster<E> {
    /// Create a broadcaster whose subscribers may lag by up to `capacity`
    /// events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            relays: Mutex::new(Vec::new()),
            next_relay: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> EventStream<E> {
        self.sender.subscribe()
    }

    /// Deliver `event` to every subscriber and relay. Having no receivers is
    /// not an error.
    pub fn emit(&self, event: E) {
        let relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, relay) in relays.iter() {
            let _ = relay.send(event.clone());
        }
        let _ = self.sender.send(event);
    }

    /// Forward every future event to `other`'s subscribers.
    pub fn attach(&self, other: &Broadcaster<E>) -> RelayId {
        let id = self.next_relay.fetch_add(1, Ordering::Relaxed);
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, other.sender.clone()));
        id
    }

    /// Stop forwarding to a relay. Returns `true` if it was attached.
    pub fn detach(&self, id: RelayId) -> bool {
        let mut relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        let before = relays.len();
        relays.retain(|(relay, _)| *relay != id);
        relays.len() != before
    }

    /// Direct subscribers plus subscribers of attached relays.
    pub fn observer_count(&self) -> usize {
        let relays = self.relays.lock().unwrap_or_else(PoisonError::into_inner);
        self.sender.receiver_count()
            + relays
                .iter()
                .map(|(_, relay)| relay.receiver_count())
                .sum::<usize>()
    }

    /// Number of attached relays.
    pub fn relay_count(&self) -> usize {
        self.relays.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<E> std::fmt::Debug for Broadcaster<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
