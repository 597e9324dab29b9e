//! Per-thread scratch buffers for the n-ary rules.
//!
//! The n-ary product and softmax rules need short-lived arrays sized by the
//! node's arity (input values, tangents, prefix/suffix tables, normalized
//! probabilities). Allocating them per invocation would dominate the cost of
//! small nodes, so each thread keeps one reusable set; buffers grow to the
//! largest arity seen and are never aliased between threads. The rules are
//! synchronous with no suspension points, so nothing borrowed from the pool
//! can outlive an invocation.

use std::cell::RefCell;

/// Growable scalar buffers reused across rule invocations on one thread.
#[derive(Default)]
pub(crate) struct Scratch {
    /// Input values, indexed like `inputs`.
    pub vals: Vec<f64>,
    /// Input tangents, indexed like `inputs`.
    pub dots: Vec<f64>,
    /// Prefix products: `pre[i] = v_0 * ... * v_{i-1}`, `pre[0] = 1`.
    pub pre: Vec<f64>,
    /// Suffix products: `suf[i] = v_i * ... * v_{m-1}`, `suf[m] = 1`.
    pub suf: Vec<f64>,
    /// Softmax probabilities.
    pub y: Vec<f64>,
}

thread_local! {
    static SCRATCH: RefCell<Scratch> = RefCell::new(Scratch::default());
}

/// Runs `f` with this thread's scratch pool.
pub(crate) fn with_scratch<R>(f: impl FnOnce(&mut Scratch) -> R) -> R {
    SCRATCH.with(|s| f(&mut s.borrow_mut()))
}

/// Fills `pre`/`suf` so that the product of all values except index `i`
/// is `pre[i] * suf[i + 1]`, in O(m) and without division.
pub(crate) fn build_prefix_suffix(vals: &[f64], pre: &mut Vec<f64>, suf: &mut Vec<f64>) {
    let m = vals.len();
    pre.clear();
    pre.resize(m + 1, 1.0);
    suf.clear();
    suf.resize(m + 1, 1.0);
    for i in 0..m {
        pre[i + 1] = pre[i] * vals[i];
    }
    for i in (0..m).rev() {
        suf[i] = suf[i + 1] * vals[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_suffix_tables() {
        let vals = [2.0, 3.0, 5.0];
        let (mut pre, mut suf) = (Vec::new(), Vec::new());
        build_prefix_suffix(&vals, &mut pre, &mut suf);

        assert_eq!(pre, vec![1.0, 2.0, 6.0, 30.0]);
        assert_eq!(suf, vec![30.0, 15.0, 5.0, 1.0]);
        // Product of all but index i.
        assert_eq!(pre[0] * suf[1], 15.0);
        assert_eq!(pre[1] * suf[2], 10.0);
        assert_eq!(pre[2] * suf[3], 6.0);
    }

    #[test]
    fn test_prefix_suffix_with_zero() {
        let vals = [2.0, 0.0, 5.0];
        let (mut pre, mut suf) = (Vec::new(), Vec::new());
        build_prefix_suffix(&vals, &mut pre, &mut suf);

        // The zero poisons the total product but not the one-sided tables.
        assert_eq!(pre[1] * suf[2], 10.0); // all but the zero itself
        assert_eq!(pre[0] * suf[1], 0.0);
        assert_eq!(pre[2] * suf[3], 0.0);
    }

    #[test]
    fn test_scratch_reuse_grows_buffers() {
        with_scratch(|s| {
            s.vals.clear();
            s.vals.resize(4, 1.0);
        });
        with_scratch(|s| {
            // Same thread, same pool: capacity persists across invocations.
            assert!(s.vals.capacity() >= 4);
        });
    }
}
