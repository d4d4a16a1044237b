//! Interval index of active range subscriptions.
//!
//! [`RangeIndex`] answers "which intervals contain this point" in
//! `O(log n + k)`. Entries are kept sorted by their low endpoint, so the
//! candidates for a point `p` are exactly the prefix with `low <= p`; a
//! segment tree of the maximum high endpoint over array positions then
//! prunes every subtree whose intervals all end before `p`.
//!
//! Inserts and removes rebuild the tree in `O(n)`. Subscriptions come and
//! go far less often than writes are routed, so the query path is the one
//! kept sublinear.

/// One indexed interval and its payload.
#[derive(Clone, Debug)]
struct Entry<K, V> {
    low: K,
    high: K,
    value: V,
}

/// Closed-interval index keyed on `[low, high]`.
#[derive(Clone, Debug)]
pub struct RangeIndex<K, V> {
    /// Sorted by `low`; equal lows keep insertion order.
    entries: Vec<Entry<K, V>>,
    /// Heap-ordered max of `high` per node; leaves start at `leaves`.
    max_high: Vec<Option<K>>,
    leaves: usize,
}

impl<K: Ord + Clone, V> Default for RangeIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V> RangeIndex<K, V> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_high: vec![None, None],
            leaves: 1,
        }
    }

    /// Number of indexed intervals.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index `value` under the closed interval `[low, high]`.
    pub fn insert(&mut self, low: K, high: K, value: V) {
        let pos = self.entries.partition_point(|e| e.low <= low);
        self.entries.insert(pos, Entry { low, high, value });
        self.rebuild();
    }

    /// Remove the first entry with exactly this interval whose value
    /// satisfies `matches`.
    pub fn remove(&mut self, low: &K, high: &K, matches: impl Fn(&V) -> bool) -> Option<V> {
        let start = self.entries.partition_point(|e| e.low < *low);
        let end = self.entries.partition_point(|e| e.low <= *low);
        let found = (start..end)
            .find(|&i| self.entries[i].high == *high && matches(&self.entries[i].value))?;
        let entry = self.entries.remove(found);
        self.rebuild();
        Some(entry.value)
    }

    /// All values whose interval contains `point`, ordered by low endpoint.
    pub fn query(&self, point: &K) -> Vec<&V> {
        self.overlapping(point, point)
    }

    /// All values whose interval intersects `[low, high]`.
    pub fn overlapping(&self, low: &K, high: &K) -> Vec<&V> {
        let mut out = Vec::new();
        let prefix = self.entries.partition_point(|e| e.low <= *high);
        if prefix > 0 {
            self.collect(1, 0, self.leaves, prefix, low, &mut out);
        }
        out
    }

    /// Iterate over `(low, high, value)` in low-endpoint order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &K, &V)> {
        self.entries.iter().map(|e| (&e.low, &e.high, &e.value))
    }

    /// Visit `node`, covering positions `[start, end)`.
    fn collect<'a>(
        &'a self,
        node: usize,
        start: usize,
        end: usize,
        prefix: usize,
        min_high: &K,
        out: &mut Vec<&'a V>,
    ) {
        if start >= prefix {
            return;
        }
        match &self.max_high[node] {
            Some(max) if max >= min_high => {}
            _ => return,
        }
        if node >= self.leaves {
            out.push(&self.entries[start].value);
            return;
        }
        let mid = (start + end) / 2;
        self.collect(2 * node, start, mid, prefix, min_high, out);
        self.collect(2 * node + 1, mid, end, prefix, min_high, out);
    }

    fn rebuild(&mut self) {
        self.leaves = self.entries.len().next_power_of_two().max(1);
        self.max_high = vec![None; 2 * self.leaves];
        for (i, entry) in self.entries.iter().enumerate() {
            self.max_high[self.leaves + i] = Some(entry.high.clone());
        }
        for node in (1..self.leaves).rev() {
            let max = std::cmp::max(&self.max_high[2 * node], &self.max_high[2 * node + 1]).clone();
            self.max_high[node] = max;
        }
    }
}
