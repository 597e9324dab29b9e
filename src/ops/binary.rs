//! Binary operator rules.
//!
//! A rule supplies the primal `f(a, b)`, both first partials and the three
//! second partials; the generic pass bodies derive the four passes:
//!
//! - forward:      `n.value = f(A, B)`
//! - forward_dot:  `n.dot = dfa * a.dot + dfb * b.dot`
//! - backward:     `a.gradient += w * dfa`, `b.gradient += w * dfb`
//! - hvp_backward: additionally
//!   `a.grad_dot += wdot * dfa + w * (d2aa * a.dot + d2ab * b.dot)` and
//!   `b.grad_dot += wdot * dfb + w * (d2ab * a.dot + d2bb * b.dot)`.

use crate::graph::{Graph, Node, NodeId};
use crate::numeric::safe_div;

use super::binary_operands;

/// Scalar rule for a two-input operator.
pub trait BinaryRule {
    fn f(a: f64, b: f64) -> f64;
    /// `∂f/∂a`
    fn dfa(a: f64, b: f64) -> f64;
    /// `∂f/∂b`
    fn dfb(a: f64, b: f64) -> f64;
    /// `∂²f/∂a²`
    fn d2aa(a: f64, b: f64) -> f64;
    /// `∂²f/∂a∂b`
    fn d2ab(a: f64, b: f64) -> f64;
    /// `∂²f/∂b²`
    fn d2bb(a: f64, b: f64) -> f64;

    /// JVP body; overridable for rules with a cheaper closed form.
    fn forward_dot(n: &Node, a: &Node, b: &Node, g: &Graph) {
        let (av, bv) = (a.value.get(), b.value.get());
        n.dot.set(
            g.cur_dot_epoch(),
            Self::dfa(av, bv) * a.dot.get() + Self::dfb(av, bv) * b.dot.get(),
        );
        n.value.touch(g.cur_val_epoch());
    }
}

pub(crate) fn forward<R: BinaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    n.value
        .set(g.cur_val_epoch(), R::f(a.value.get(), b.value.get()));
}

pub(crate) fn forward_dot<R: BinaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    R::forward_dot(n, a, b, g);
}

pub(crate) fn backward<R: BinaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    let (av, bv, w) = (a.value.get(), b.value.get(), n.gradient.get());
    a.gradient.add(g.cur_grad_epoch(), w * R::dfa(av, bv));
    b.gradient.add(g.cur_grad_epoch(), w * R::dfb(av, bv));
}

pub(crate) fn hvp_backward<R: BinaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    let (av, bv) = (a.value.get(), b.value.get());
    let (adot, bdot) = (a.dot.get(), b.dot.get());
    let (w, wdot) = (n.gradient.get(), n.grad_dot.get());

    a.gradient.add(g.cur_grad_epoch(), w * R::dfa(av, bv));
    b.gradient.add(g.cur_grad_epoch(), w * R::dfb(av, bv));

    // grad_dot_i += wdot * df_i + w * (H_ia * adot + H_ib * bdot)
    a.grad_dot.add(
        g.cur_gdot_epoch(),
        wdot * R::dfa(av, bv) + w * (R::d2aa(av, bv) * adot + R::d2ab(av, bv) * bdot),
    );
    b.grad_dot.add(
        g.cur_gdot_epoch(),
        wdot * R::dfb(av, bv) + w * (R::d2ab(av, bv) * adot + R::d2bb(av, bv) * bdot),
    );
}

// ---------------------------------------------------------------------------
// Concrete rules
// ---------------------------------------------------------------------------

/// `a + b`. Dispatch routes `Add` to the n-ary sum for every arity; this
/// table is the two-input fallback the generic plumbing is written against.
pub struct AddRule;

impl BinaryRule for AddRule {
    fn f(a: f64, b: f64) -> f64 {
        a + b
    }
    fn dfa(_a: f64, _b: f64) -> f64 {
        1.0
    }
    fn dfb(_a: f64, _b: f64) -> f64 {
        1.0
    }
    fn d2aa(_a: f64, _b: f64) -> f64 {
        0.0
    }
    fn d2ab(_a: f64, _b: f64) -> f64 {
        0.0
    }
    fn d2bb(_a: f64, _b: f64) -> f64 {
        0.0
    }
}

/// `a - b`.
pub struct SubRule;

impl BinaryRule for SubRule {
    fn f(a: f64, b: f64) -> f64 {
        a - b
    }
    fn dfa(_a: f64, _b: f64) -> f64 {
        1.0
    }
    fn dfb(_a: f64, _b: f64) -> f64 {
        -1.0
    }
    fn d2aa(_a: f64, _b: f64) -> f64 {
        0.0
    }
    fn d2ab(_a: f64, _b: f64) -> f64 {
        0.0
    }
    fn d2bb(_a: f64, _b: f64) -> f64 {
        0.0
    }
}

/// `a / b`, with every partial gated on `b != 0` so a pole clamps to 0
/// instead of propagating `inf`/`NaN` through the accumulators.
pub struct DivRule;

impl BinaryRule for DivRule {
    fn f(a: f64, b: f64) -> f64 {
        safe_div(a, b)
    }
    fn dfa(_a: f64, b: f64) -> f64 {
        if b != 0.0 { 1.0 / b } else { 0.0 }
    }
    fn dfb(a: f64, b: f64) -> f64 {
        if b != 0.0 { -a / (b * b) } else { 0.0 }
    }
    fn d2aa(_a: f64, _b: f64) -> f64 {
        0.0
    }
    fn d2ab(_a: f64, b: f64) -> f64 {
        if b != 0.0 { -1.0 / (b * b) } else { 0.0 }
    }
    fn d2bb(a: f64, b: f64) -> f64 {
        if b != 0.0 { 2.0 * a / (b * b * b) } else { 0.0 }
    }

    // (adot * b - a * bdot) / b^2, one guard instead of two partials
    fn forward_dot(n: &Node, a: &Node, b: &Node, g: &Graph) {
        let d = b.value.get();
        let dot = if d != 0.0 {
            (a.dot.get() * d - a.value.get() * b.dot.get()) / (d * d)
        } else {
            0.0
        };
        n.dot.set(g.cur_dot_epoch(), dot);
        n.value.touch(g.cur_val_epoch());
    }
}
