//! Range specifications and their projections.
//!
//! A [`RangeSpec`] describes a bounded, ordered subset of keys with an
//! optional limit and direction. It is projected two ways:
//!
//! - [`RangeSpec::canonical_key`] -- a stable string used to deduplicate
//!   observables for the same range
//! - [`RangeSpec::interval`] -- a closed `[low, high]` interval of
//!   [`Endpoint`]s used by the [`RangeIndex`](crate::RangeIndex); a missing
//!   bound maps to the [`Endpoint::Min`] / [`Endpoint::Max`] sentinel and
//!   exclusive bounds are widened to inclusive (routing is a superset; the
//!   observable re-validates)

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::record::Key;

/// One side of a range.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Inclusive(Key),
    Exclusive(Key),
}

impl Bound {
    pub fn key(&self) -> &str {
        match self {
            Bound::Inclusive(key) | Bound::Exclusive(key) => key,
        }
    }

    pub fn is_inclusive(&self) -> bool {
        matches!(self, Bound::Inclusive(_))
    }
}

/// Point on the ordered key line, extended with sentinels for unbounded
/// sides.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Endpoint {
    Min,
    Key(Key),
    Max,
}

/// A bounded ordered range with optional limit and direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSpec {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl RangeSpec {
    /// The whole key space, ascending, unlimited.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn gt(mut self, key: impl Into<Key>) -> Self {
        self.lower = Some(Bound::Exclusive(key.into()));
        self
    }

    pub fn gte(mut self, key: impl Into<Key>) -> Self {
        self.lower = Some(Bound::Inclusive(key.into()));
        self
    }

    pub fn lt(mut self, key: impl Into<Key>) -> Self {
        self.upper = Some(Bound::Exclusive(key.into()));
        self
    }

    pub fn lte(mut self, key: impl Into<Key>) -> Self {
        self.upper = Some(Bound::Inclusive(key.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Reject a zero limit and ranges that can never contain a key.
    pub fn validate(&self) -> StoreResult<()> {
        if self.limit == Some(0) {
            return Err(StoreError::InvalidArgument(
                "range limit must be positive".into(),
            ));
        }
        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            let empty = match lower.key().cmp(upper.key()) {
                Ordering::Greater => true,
                Ordering::Equal => !(lower.is_inclusive() && upper.is_inclusive()),
                Ordering::Less => false,
            };
            if empty {
                return Err(StoreError::InvalidArgument(format!(
                    "empty range: lower {lower:?} is not below upper {upper:?}"
                )));
            }
        }
        Ok(())
    }

    /// Whether `key` satisfies both bounds.
    pub fn contains(&self, key: &str) -> bool {
        self.satisfies_lower(key) && self.satisfies_upper(key)
    }

    pub(crate) fn satisfies_lower(&self, key: &str) -> bool {
        match &self.lower {
            None => true,
            Some(Bound::Inclusive(bound)) => key >= bound.as_str(),
            Some(Bound::Exclusive(bound)) => key > bound.as_str(),
        }
    }

    pub(crate) fn satisfies_upper(&self, key: &str) -> bool {
        match &self.upper {
            None => true,
            Some(Bound::Inclusive(bound)) => key <= bound.as_str(),
            Some(Bound::Exclusive(bound)) => key < bound.as_str(),
        }
    }

    /// Logical order of two keys in this range's direction.
    pub fn cmp_keys(&self, a: &str, b: &str) -> Ordering {
        if self.reverse {
            b.cmp(a)
        } else {
            a.cmp(b)
        }
    }

    /// Stable string identifying this range; equal specs map to equal keys.
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    /// Closed interval routing writes to this range.
    pub fn interval(&self) -> (Endpoint, Endpoint) {
        let low = self
            .lower
            .as_ref()
            .map_or(Endpoint::Min, |b| Endpoint::Key(b.key().to_string()));
        let high = self
            .upper
            .as_ref()
            .map_or(Endpoint::Max, |b| Endpoint::Key(b.key().to_string()));
        (low, high)
    }

    /// The range continuing strictly past `boundary` in walk order, limited
    /// to `count` keys (unlimited for `None`). Without a boundary the walk
    /// restarts at the near bound.
    pub fn continuation(&self, boundary: Option<&str>, count: Option<usize>) -> RangeSpec {
        let mut next = self.clone();
        next.limit = count;
        if let Some(boundary) = boundary {
            let past = Some(Bound::Exclusive(boundary.to_string()));
            if self.reverse {
                next.upper = past;
            } else {
                next.lower = past;
            }
        }
        next
    }
}
