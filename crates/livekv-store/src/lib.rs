//! Live queries over an ordered key-value engine.
//!
//! Records are JSON objects stored under their `id`. Besides one-shot
//! reads, the [`Registry`] hands out two kinds of observables that stay
//! current as writes commit:
//!
//! - [`ObjectObservable`] -- the value of one key
//! - [`RangeObservable`] -- an ordered window over a key range, with an
//!   optional limit and direction
//!
//! Writes are routed to the observables they can affect: the exact-key
//! map for objects and a [`RangeIndex`] interval query for ranges. Range
//! windows are maintained incrementally; deletes from a full window read
//! only the rows needed to top it back up.
//!
//! Initial loads and refills run on the tokio blocking pool. Everything
//! else happens synchronously on the writer's thread, in commit order.

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod object;
pub mod range;
pub mod range_observable;
pub mod record;
pub mod registry;
pub mod scanner;
pub mod window;

pub use broadcast::{Broadcaster, EventStream, Observable};
pub use codec::{Codec, JsonCodec};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use event::{ObjectEvent, RangeEvent};
pub use index::RangeIndex;
pub use object::ObjectObservable;
pub use range::{Bound, Endpoint, RangeSpec};
pub use range_observable::RangeObservable;
pub use record::{Key, Record, ID_FIELD};
pub use registry::Registry;
pub use scanner::scan;
pub use window::{Outcome, RefillRequest, Window};
