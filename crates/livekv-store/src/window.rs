//! Incremental maintenance of an ordered, optionally limited window.
//!
//! [`Window`] is the synchronous core of a
//! [`RangeObservable`](crate::RangeObservable): it applies single-key puts
//! and deletes to the materialized list and reports the events to broadcast
//! plus any refill read to issue. It never touches the engine itself.
//!
//! Invariants:
//! - `records` is sorted in the range's logical order, holds at most
//!   `limit` records, and every record satisfies the range bounds.
//! - With no refill pending, a window shorter than its limit holds every
//!   matching key; a full window holds the first `limit` of them.
//! - With a refill pending, the window holds every matching key up to its
//!   last element. Writes that would break this (a put beyond the last
//!   element, or any delete) supersede the pending refill with a new token,
//!   so the refill that is eventually applied was read after them.
//! - After a failed read the window is marked incomplete: it still holds a
//!   prefix of the range but may be missing keys past its last element. It
//!   is treated like a window with a refill pending, so the next delete or
//!   put past the boundary issues a fresh read. The mark clears once a
//!   refill is applied or the window is full again.

use tracing::debug;

use crate::event::RangeEvent;
use crate::range::RangeSpec;
use crate::record::Record;

/// A read the owner must run to top the window back up.
#[derive(Clone, Debug, PartialEq)]
pub struct RefillRequest {
    pub token: u64,
    pub spec: RangeSpec,
}

/// Result of applying one write.
#[derive(Debug, Default)]
pub struct Outcome {
    pub events: Vec<RangeEvent>,
    pub refill: Option<RefillRequest>,
}

#[derive(Clone, Debug)]
pub struct Window {
    spec: RangeSpec,
    records: Vec<Record>,
    pending_refill: Option<u64>,
    incomplete: bool,
    last_token: u64,
}

impl Window {
    pub fn new(spec: RangeSpec) -> Self {
        Self {
            spec,
            records: Vec::new(),
            pending_refill: None,
            incomplete: false,
            last_token: 0,
        }
    }

    pub fn spec(&self) -> &RangeSpec {
        &self.spec
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn refill_pending(&self) -> bool {
        self.pending_refill.is_some()
    }

    /// Whether a failed read left keys past the last element unknown.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// Replace the contents with a fresh scan, abandoning any pending refill.
    pub fn reset(&mut self, records: Vec<Record>) {
        self.records = records;
        self.pending_refill = None;
        self.incomplete = false;
    }

    /// Empty the window after its initial scan failed. The next write
    /// routed here reads the range again from the near bound.
    pub fn invalidate(&mut self) {
        self.records.clear();
        self.pending_refill = None;
        self.incomplete = true;
    }

    fn awaiting_rows(&self) -> bool {
        self.pending_refill.is_some() || self.incomplete
    }

    /// Apply a put of `record`, whose id the caller routed here.
    pub fn put(&mut self, record: Record) -> Outcome {
        let mut outcome = Outcome::default();
        let key = record.key().to_string();
        if !self.spec.contains(&key) {
            return outcome;
        }

        let pos = match self.locate(&key) {
            Ok(i) => {
                let old = std::mem::replace(&mut self.records[i], record.clone());
                outcome.events.push(RangeEvent::Update {
                    key,
                    value: record,
                    old,
                });
                return outcome;
            }
            Err(pos) => pos,
        };

        if pos == self.records.len() {
            if self.is_full() {
                // Sorts after everything kept by a full window.
                return outcome;
            }
            if self.awaiting_rows() {
                // Keys between the boundary and this one are unknown; read
                // again past the boundary after this put.
                outcome.refill = self.issue_refill();
                return outcome;
            }
        }

        self.insert_at(pos, record, &mut outcome.events);
        outcome
    }

    /// Apply a delete of `key`.
    pub fn delete(&mut self, key: &str) -> Outcome {
        let mut outcome = Outcome::default();
        if !self.spec.contains(key) {
            return outcome;
        }

        let awaiting = self.awaiting_rows();
        let needs_refill = awaiting || self.is_full();

        let removed = match self.locate(key) {
            Ok(i) => Some(self.records.remove(i)),
            Err(_) => None,
        };
        let was_tracked = removed.is_some();
        if let Some(value) = removed {
            outcome.events.push(RangeEvent::Remove {
                key: key.to_string(),
                value,
            });
        }

        if needs_refill && (was_tracked || awaiting) {
            outcome.refill = self.issue_refill();
        }
        outcome
    }

    /// Merge the rows read for refill `token`.
    ///
    /// Returns `None` when the token is no longer the latest one; the rows
    /// are then discarded. Rows already present are skipped, since a put
    /// applied after the read already carries the newer value.
    pub fn commit_refill(&mut self, token: u64, rows: Vec<Record>) -> Option<Vec<RangeEvent>> {
        if self.pending_refill != Some(token) {
            return None;
        }
        self.pending_refill = None;
        self.incomplete = false;

        let mut events = Vec::new();
        let limit = self.spec.limit.unwrap_or(usize::MAX);
        for row in rows {
            if !self.spec.contains(row.key()) {
                continue;
            }
            let pos = match self.locate(row.key()) {
                Ok(_) => continue,
                Err(pos) => pos,
            };
            if self.records.len() >= limit && pos >= self.records.len() {
                // Rows arrive in walk order, so every later row is excluded too.
                break;
            }
            self.insert_at(pos, row, &mut events);
        }
        Some(events)
    }

    /// Give up on refill `token` after its read failed. The window keeps
    /// its current prefix and is marked incomplete, so the next delete or
    /// put past the boundary issues a new refill.
    pub fn abandon_refill(&mut self, token: u64) -> bool {
        if self.pending_refill == Some(token) {
            self.pending_refill = None;
            self.incomplete = true;
            true
        } else {
            false
        }
    }

    fn insert_at(&mut self, pos: usize, record: Record, events: &mut Vec<RangeEvent>) {
        let key = record.key().to_string();
        self.records.insert(pos, record.clone());
        events.push(RangeEvent::Insert {
            key,
            value: record,
            from_tail: self.spec.reverse,
        });

        if let Some(limit) = self.spec.limit {
            if self.records.len() > limit {
                if let Some(evicted) = self.records.pop() {
                    events.push(RangeEvent::Remove {
                        key: evicted.key().to_string(),
                        value: evicted,
                    });
                }
            }
        }
    }

    fn is_full(&self) -> bool {
        self.spec
            .limit
            .is_some_and(|limit| self.records.len() >= limit)
    }

    /// Allocate a new refill token covering the gap below the limit, or
    /// everything past the boundary for an unlimited window.
    fn issue_refill(&mut self) -> Option<RefillRequest> {
        let missing = match self.spec.limit {
            Some(limit) => match limit.saturating_sub(self.records.len()) {
                0 => {
                    // Full again: any outstanding read is obsolete.
                    self.pending_refill = None;
                    self.incomplete = false;
                    return None;
                }
                missing => Some(missing),
            },
            None => None,
        };

        self.last_token += 1;
        let token = self.last_token;
        self.pending_refill = Some(token);
        let boundary = self.records.last().map(Record::key);
        let spec = self.spec.continuation(boundary, missing);
        debug!(token, ?missing, ?boundary, "refill issued");
        Some(RefillRequest { token, spec })
    }

    fn locate(&self, key: &str) -> Result<usize, usize> {
        let spec = &self.spec;
        self.records.binary_search_by(|r| spec.cmp_keys(r.key(), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Bound;

    fn records(ids: &[&str]) -> Vec<Record> {
        ids.iter().map(|id| Record::new(*id)).collect()
    }

    fn ids(window: &Window) -> Vec<&str> {
        window.records().iter().map(|r| r.key()).collect()
    }

    fn window(spec: RangeSpec, ids: &[&str]) -> Window {
        let mut w = Window::new(spec);
        w.reset(records(ids));
        w
    }

    fn insert(key: &str, from_tail: bool) -> RangeEvent {
        RangeEvent::Insert {
            key: key.into(),
            value: Record::new(key),
            from_tail,
        }
    }

    fn remove(key: &str) -> RangeEvent {
        RangeEvent::Remove {
            key: key.into(),
            value: Record::new(key),
        }
    }

    // -----------------------------------------------------------------------
    // Puts
    // -----------------------------------------------------------------------

    #[test]
    fn unlimited_put_inserts_sorted() {
        let mut w = window(RangeSpec::all(), &["a", "c"]);
        let out = w.put(Record::new("b"));
        assert_eq!(out.events, vec![insert("b", false)]);
        assert!(out.refill.is_none());
        assert_eq!(ids(&w), ["a", "b", "c"]);
    }

    #[test]
    fn put_of_existing_id_updates_in_place() {
        let mut w = window(RangeSpec::all().limit(2), &["a", "b"]);
        let out = w.put(Record::new("b").with("v", 2));
        assert_eq!(
            out.events,
            vec![RangeEvent::Update {
                key: "b".into(),
                value: Record::new("b").with("v", 2),
                old: Record::new("b"),
            }]
        );
        assert_eq!(ids(&w), ["a", "b"]);
    }

    #[test]
    fn full_window_inserts_and_evicts_tail() {
        let mut w = window(RangeSpec::all().gte("a").limit(2), &["a", "b"]);
        let out = w.put(Record::new("aa"));
        assert_eq!(out.events, vec![insert("aa", false), remove("b")]);
        assert_eq!(ids(&w), ["a", "aa"]);
    }

    #[test]
    fn full_window_excludes_later_ids() {
        let mut w = window(RangeSpec::all().limit(2), &["a", "b"]);
        let out = w.put(Record::new("c"));
        assert!(out.events.is_empty());
        assert_eq!(ids(&w), ["a", "b"]);
    }

    #[test]
    fn reversed_window_keeps_largest_ids() {
        let mut w = window(RangeSpec::all().limit(2).reversed(), &["d", "b"]);
        let out = w.put(Record::new("c"));
        assert_eq!(out.events, vec![insert("c", true), remove("b")]);
        assert_eq!(ids(&w), ["d", "c"]);

        let out = w.put(Record::new("e"));
        assert_eq!(out.events, vec![insert("e", true), remove("c")]);
        assert_eq!(ids(&w), ["e", "d"]);

        assert!(w.put(Record::new("a")).events.is_empty());
    }

    #[test]
    fn out_of_bounds_put_is_ignored() {
        let mut w = window(RangeSpec::all().gt("b").lt("d"), &["c"]);
        assert!(w.put(Record::new("b")).events.is_empty());
        assert!(w.put(Record::new("d")).events.is_empty());
        assert_eq!(ids(&w), ["c"]);
    }

    // -----------------------------------------------------------------------
    // Deletes and refills
    // -----------------------------------------------------------------------

    #[test]
    fn delete_from_unfilled_window_needs_no_refill() {
        let mut w = window(RangeSpec::all().limit(3), &["a", "b"]);
        let out = w.delete("a");
        assert_eq!(out.events, vec![remove("a")]);
        assert!(out.refill.is_none());
    }

    #[test]
    fn delete_from_full_window_requests_refill_past_boundary() {
        let mut w = window(RangeSpec::all().gte("a").limit(2), &["a", "aa"]);
        let out = w.delete("a");
        assert_eq!(out.events, vec![remove("a")]);
        let refill = out.refill.unwrap();
        assert_eq!(refill.spec.lower, Some(Bound::Exclusive("aa".into())));
        assert_eq!(refill.spec.limit, Some(1));
        assert!(w.refill_pending());

        let events = w.commit_refill(refill.token, records(&["b"])).unwrap();
        assert_eq!(events, vec![insert("b", false)]);
        assert_eq!(ids(&w), ["aa", "b"]);
        assert!(!w.refill_pending());
    }

    #[test]
    fn delete_of_untracked_id_from_full_window_is_noop() {
        let mut w = window(RangeSpec::all().limit(2), &["a", "b"]);
        let out = w.delete("z");
        assert!(out.events.is_empty());
        assert!(out.refill.is_none());
    }

    #[test]
    fn emptied_window_refills_from_range_start() {
        let mut w = window(RangeSpec::all().gte("a").limit(1), &["a"]);
        let refill = w.delete("a").refill.unwrap();
        assert_eq!(refill.spec.lower, Some(Bound::Inclusive("a".into())));
        assert_eq!(refill.spec.limit, Some(1));
    }

    #[test]
    fn superseded_refill_is_discarded() {
        let mut w = window(RangeSpec::all().limit(3), &["a", "b", "c"]);
        let first = w.delete("a").refill.unwrap();
        let second = w.delete("b").refill.unwrap();
        assert!(second.token > first.token);
        assert_eq!(second.spec.limit, Some(2));

        assert!(w.commit_refill(first.token, records(&["d"])).is_none());
        assert_eq!(ids(&w), ["c"]);

        w.commit_refill(second.token, records(&["d", "e"])).unwrap();
        assert_eq!(ids(&w), ["c", "d", "e"]);
        // A late duplicate of a committed token does nothing.
        assert!(w.commit_refill(second.token, records(&["f"])).is_none());
    }

    #[test]
    fn delete_while_refilling_always_reissues() {
        let mut w = window(RangeSpec::all().limit(2), &["a", "b"]);
        let first = w.delete("a").refill.unwrap();
        // "c" was never tracked but the pending read may still contain it.
        let second = w.delete("c").refill.unwrap();
        assert!(second.token > first.token);
        assert!(w.commit_refill(first.token, records(&["c"])).is_none());
        w.commit_refill(second.token, records(&["d"])).unwrap();
        assert_eq!(ids(&w), ["b", "d"]);
    }

    #[test]
    fn put_past_boundary_while_refilling_reissues() {
        let mut w = window(RangeSpec::all().limit(3), &["a", "b", "c"]);
        let first = w.delete("a").refill.unwrap();
        let out = w.put(Record::new("z"));
        assert!(out.events.is_empty());
        let second = out.refill.unwrap();
        assert!(second.token > first.token);

        // Puts inside the kept prefix apply immediately.
        assert_eq!(w.put(Record::new("bb")).events, vec![insert("bb", false)]);
        assert_eq!(ids(&w), ["b", "bb", "c"]);
        // Full again: the refill result can only be excluded.
        assert_eq!(
            w.commit_refill(second.token, records(&["d"])).unwrap(),
            vec![]
        );
        assert_eq!(ids(&w), ["b", "bb", "c"]);
    }

    #[test]
    fn refill_skips_rows_already_present() {
        let mut w = window(RangeSpec::all().limit(3), &["a", "b", "c"]);
        let refill = w.delete("b").refill.unwrap();
        w.put(Record::new("bb").with("v", 2));
        let events = w.commit_refill(refill.token, records(&["d"])).unwrap();
        assert!(events.is_empty());
        assert_eq!(ids(&w), ["a", "bb", "c"]);
        assert_eq!(w.records()[1].get("v"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn reversed_refill_walks_downward() {
        let mut w = window(RangeSpec::all().gte("a").limit(2).reversed(), &["d", "c"]);
        let refill = w.delete("d").refill.unwrap();
        assert_eq!(refill.spec.upper, Some(Bound::Exclusive("c".into())));
        assert_eq!(refill.spec.lower, Some(Bound::Inclusive("a".into())));
        assert!(refill.spec.reverse);
        let events = w.commit_refill(refill.token, records(&["b"])).unwrap();
        assert_eq!(events, vec![insert("b", true)]);
        assert_eq!(ids(&w), ["c", "b"]);
    }

    #[test]
    fn abandoned_refill_ignores_late_rows() {
        let mut w = window(RangeSpec::all().limit(2), &["a", "b"]);
        let refill = w.delete("a").refill.unwrap();
        assert!(w.abandon_refill(refill.token));
        assert!(!w.abandon_refill(refill.token));
        assert!(!w.refill_pending());
        assert!(w.is_incomplete());
        assert!(w.commit_refill(refill.token, records(&["c"])).is_none());
        assert_eq!(ids(&w), ["b"]);
    }

    #[test]
    fn abandoned_refill_is_retried_by_later_writes() {
        // Store holds a..e; the refill after deleting "a" fails.
        let mut w = window(RangeSpec::all().limit(3), &["a", "b", "c"]);
        let failed = w.delete("a").refill.unwrap();
        w.abandon_refill(failed.token);

        // "z" may not jump over the unread "d" and "e".
        let out = w.put(Record::new("z"));
        assert!(out.events.is_empty());
        let retry = out.refill.unwrap();
        assert_eq!(retry.spec.lower, Some(Bound::Exclusive("c".into())));
        assert_eq!(retry.spec.limit, Some(1));
        w.commit_refill(retry.token, records(&["d"])).unwrap();
        assert!(!w.is_incomplete());
        assert_eq!(ids(&w), ["b", "c", "d"]);

        let refill = w.delete("b").refill.unwrap();
        w.commit_refill(refill.token, records(&["e"])).unwrap();
        assert_eq!(ids(&w), ["c", "d", "e"]);
    }

    #[test]
    fn delete_of_untracked_id_retries_abandoned_refill() {
        let mut w = window(RangeSpec::all().limit(2), &["a", "b"]);
        let failed = w.delete("a").refill.unwrap();
        w.abandon_refill(failed.token);
        let retry = w.delete("q").refill.unwrap();
        assert_eq!(retry.spec.lower, Some(Bound::Exclusive("b".into())));
        w.commit_refill(retry.token, records(&["c"])).unwrap();
        assert_eq!(ids(&w), ["b", "c"]);
    }

    #[test]
    fn refilling_to_capacity_clears_incomplete_mark() {
        let mut w = window(RangeSpec::all().limit(2), &["b", "c"]);
        let failed = w.delete("c").refill.unwrap();
        w.abandon_refill(failed.token);
        // Inside the prefix: applied directly, and the window is full again.
        let out = w.put(Record::new("a"));
        assert_eq!(out.events, vec![insert("a", false)]);
        assert!(w.is_incomplete());
        let out = w.delete("zz");
        assert!(out.refill.is_none());
        assert!(!w.is_incomplete());
        assert_eq!(ids(&w), ["a", "b"]);
    }

    #[test]
    fn invalidated_window_rereads_on_next_write() {
        let mut w = Window::new(RangeSpec::all().gte("b").limit(2));
        w.invalidate();
        let out = w.put(Record::new("x"));
        assert!(out.events.is_empty());
        let refill = out.refill.unwrap();
        assert_eq!(refill.spec.lower, Some(Bound::Inclusive("b".into())));
        assert_eq!(refill.spec.limit, Some(2));
        w.commit_refill(refill.token, records(&["c", "x"])).unwrap();
        assert_eq!(ids(&w), ["c", "x"]);
        assert!(!w.is_incomplete());
    }

    #[test]
    fn invalidated_unlimited_window_rereads_everything() {
        let mut w = Window::new(RangeSpec::all());
        w.invalidate();
        let refill = w.delete("a").refill.unwrap();
        assert_eq!(refill.spec.limit, None);
        assert_eq!(refill.spec.lower, None);
        w.commit_refill(refill.token, records(&["b", "c"])).unwrap();
        assert_eq!(ids(&w), ["b", "c"]);

        // Complete again: puts past the end insert directly.
        assert_eq!(w.put(Record::new("d")).events, vec![insert("d", false)]);
    }

    #[test]
    fn empty_refill_completes_as_noop() {
        let mut w = window(RangeSpec::all().limit(2), &["a", "b"]);
        let refill = w.delete("b").refill.unwrap();
        assert_eq!(w.commit_refill(refill.token, vec![]).unwrap(), vec![]);
        assert!(!w.refill_pending());
        assert_eq!(ids(&w), ["a"]);
    }
}
