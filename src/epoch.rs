//! Epoch-tagged accumulator slots.
//!
//! Every node carries four scalar accumulators (value, dot, gradient,
//! grad_dot). Instead of clearing all of them before each pass, each slot is
//! paired with a `u64` epoch tag and the graph keeps one monotonic counter
//! per pass kind. A slot is *live* for the current pass iff its tag equals
//! the counter; a stale slot reads as zero and is zeroed lazily on first
//! write. The cost of a pass is therefore proportional to the nodes it
//! touches, not to the size of the graph.
//!
//! Slots use `Cell` so that a rule invoked with a shared graph reference can
//! write its own output and accumulate into several input nodes in one call.
//! This makes `Graph` `Send` but not `Sync`: disjoint graphs may run on
//! different threads, concurrent mutation of one graph cannot compile.

use std::cell::Cell;

/// One scalar accumulator plus its epoch tag.
#[derive(Debug)]
pub struct Slot {
    val: Cell<f64>,
    epoch: Cell<u64>,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            val: Cell::new(0.0),
            // Counters start at 0 and only ever increment, so u64::MAX is a
            // tag no pass can reach: a fresh slot is stale for every pass.
            epoch: Cell::new(u64::MAX),
        }
    }
}

impl Slot {
    /// A stale slot holding zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the slot live for `current` without writing the value.
    ///
    /// Used by nullary nodes whose stored value was placed by the feeding
    /// step, and by specialized forward bodies that set the value elsewhere.
    #[inline]
    pub fn touch(&self, current: u64) {
        self.epoch.set(current);
    }

    /// Unconditionally writes `v` and marks the slot live for `current`.
    ///
    /// The write path for *produced* (non-accumulated) outputs.
    #[inline]
    pub fn set(&self, current: u64, v: f64) {
        self.val.set(v);
        self.epoch.set(current);
    }

    /// Lazily zeroes the slot if it is stale, marks it live, and returns the
    /// now-live value. The left-hand side of every `+=` accumulation.
    #[inline]
    pub fn ensure_zero(&self, current: u64) -> f64 {
        if self.epoch.get() != current {
            self.val.set(0.0);
            self.epoch.set(current);
        }
        self.val.get()
    }

    /// `ensure_zero` followed by `+= v`.
    #[inline]
    pub fn add(&self, current: u64, v: f64) {
        let live = self.ensure_zero(current);
        self.val.set(live + v);
    }

    /// Raw read without an epoch check.
    ///
    /// Rules use this for input slots whose liveness the pass ordering
    /// already guarantees (values after a forward pass, adjoints of a node
    /// whose consumers have all propagated).
    #[inline]
    pub fn get(&self) -> f64 {
        self.val.get()
    }

    /// Epoch-checked read: a stale slot reads as zero.
    ///
    /// The read path for result accessors, where the caller cannot know
    /// whether the last pass reached this node.
    #[inline]
    pub fn get_or_zero(&self, current: u64) -> f64 {
        if self.epoch.get() == current {
            self.val.get()
        } else {
            0.0
        }
    }

    /// Stores a value without touching the epoch tag.
    ///
    /// The feeding step writes variable values and tangents this way; the
    /// next forward / forward-dot pass marks them live via [`Slot::touch`].
    #[inline]
    pub fn store(&self, v: f64) {
        self.val.set(v);
    }

    /// Whether the slot is live for `current`.
    #[inline]
    pub fn is_live(&self, current: u64) -> bool {
        self.epoch.get() == current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_slot_is_stale() {
        let s = Slot::new();
        assert!(!s.is_live(1));
        assert_eq!(s.get_or_zero(1), 0.0);
    }

    #[test]
    fn test_set_marks_live() {
        let s = Slot::new();
        s.set(3, 1.5);
        assert!(s.is_live(3));
        assert_eq!(s.get_or_zero(3), 1.5);
        // A later pass sees the slot stale again.
        assert_eq!(s.get_or_zero(4), 0.0);
    }

    #[test]
    fn test_ensure_zero_clears_stale_value() {
        let s = Slot::new();
        s.set(1, 42.0);
        // New pass: the stale 42.0 must not leak into the accumulation.
        assert_eq!(s.ensure_zero(2), 0.0);
        assert!(s.is_live(2));
    }

    #[test]
    fn test_ensure_zero_preserves_live_value() {
        let s = Slot::new();
        s.set(5, 2.0);
        assert_eq!(s.ensure_zero(5), 2.0);
        assert_eq!(s.get(), 2.0);
    }

    #[test]
    fn test_add_accumulates_within_one_epoch() {
        let s = Slot::new();
        s.set(1, 99.0); // stale leftovers from a previous pass
        s.add(2, 1.0);
        s.add(2, 2.5);
        assert_eq!(s.get(), 3.5);
    }

    #[test]
    fn test_store_then_touch_exposes_fed_value() {
        let s = Slot::new();
        s.store(7.0);
        assert_eq!(s.get_or_zero(1), 0.0); // not yet blessed by a pass
        s.touch(1);
        assert_eq!(s.get_or_zero(1), 7.0);
    }
}
