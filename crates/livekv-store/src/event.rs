use crate::range::RangeSpec;
use crate::record::{Key, Record};

/// Event broadcast by an [`ObjectObservable`](crate::ObjectObservable).
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectEvent {
    /// The key now holds this value (`None` once deleted or when absent).
    Set(Option<Record>),
    /// The initial load failed; the view stays empty until the next write.
    Error(String),
}

/// Event broadcast by a [`RangeObservable`](crate::RangeObservable).
#[derive(Clone, Debug, PartialEq)]
pub enum RangeEvent {
    /// Initial contents of the window, in logical order.
    Set(Vec<Record>),
    /// A record entered the window. `from_tail` is set for reversed
    /// windows, whose lists grow from the tail side of the key space.
    Insert {
        key: Key,
        value: Record,
        from_tail: bool,
    },
    /// A record already in the window changed.
    Update { key: Key, value: Record, old: Record },
    /// A record left the window.
    Remove { key: Key, value: Record },
    /// The initial load failed; the window stays empty until writes arrive.
    Error(String),
}

impl RangeEvent {
    /// Apply this event to a client-side copy of the window.
    ///
    /// `spec` supplies the ordering; inserts land at their sorted position.
    pub fn apply(&self, list: &mut Vec<Record>, spec: &RangeSpec) {
        match self {
            RangeEvent::Set(records) => *list = records.clone(),
            RangeEvent::Insert { key, value, .. } | RangeEvent::Update { key, value, .. } => {
                match list.binary_search_by(|r| spec.cmp_keys(r.key(), key)) {
                    Ok(i) => list[i] = value.clone(),
                    Err(i) => list.insert(i, value.clone()),
                }
            }
            RangeEvent::Remove { key, .. } => list.retain(|r| r.key() != key.as_str()),
            RangeEvent::Error(_) => {}
        }
    }

    /// The key this event touches, if it touches exactly one.
    pub fn key(&self) -> Option<&str> {
        match self {
            RangeEvent::Insert { key, .. }
            | RangeEvent::Update { key, .. }
            | RangeEvent::Remove { key, .. } => Some(key),
            RangeEvent::Set(_) | RangeEvent::Error(_) => None,
        }
    }
}
