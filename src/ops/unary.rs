//! Unary operator rules.
//!
//! A rule supplies three pure scalar functions (the primal `f`, its first
//! derivative `df`, its second derivative `d2`) and the generic pass bodies
//! below derive all four passes from them:
//!
//! - forward:      `n.value = f(a.value)`
//! - forward_dot:  `n.dot = df(a.value) * a.dot`
//! - backward:     `a.gradient += n.gradient * df(a.value)`
//! - hvp_backward: `a.grad_dot += n.grad_dot * df + n.gradient * d2 * a.dot`
//!
//! Rules whose tangent shares a guarded subexpression with the derivative
//! (log, tan) override `forward_dot` instead of paying for `df` twice.

use crate::graph::{Graph, Node, NodeId};
use crate::numeric::{sigmoid, SQRT_2_OVER_PI};

use super::unary_operands;

/// Scalar rule for a one-input operator.
pub trait UnaryRule {
    /// Primal function.
    fn f(x: f64) -> f64;
    /// First derivative.
    fn df(x: f64) -> f64;
    /// Second derivative, used by the HVP pass.
    fn d2(x: f64) -> f64;

    /// JVP body. The default derives the tangent from [`UnaryRule::df`];
    /// overriding rules must also keep the value epoch live.
    fn forward_dot(n: &Node, a: &Node, g: &Graph) {
        n.dot
            .set(g.cur_dot_epoch(), Self::df(a.value.get()) * a.dot.get());
        n.value.touch(g.cur_val_epoch());
    }
}

pub(crate) fn forward<R: UnaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a)) = unary_operands(id, g) else {
        return;
    };
    n.value.set(g.cur_val_epoch(), R::f(a.value.get()));
}

pub(crate) fn forward_dot<R: UnaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a)) = unary_operands(id, g) else {
        return;
    };
    R::forward_dot(n, a, g);
}

pub(crate) fn backward<R: UnaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a)) = unary_operands(id, g) else {
        return;
    };
    a.gradient
        .add(g.cur_grad_epoch(), n.gradient.get() * R::df(a.value.get()));
}

pub(crate) fn hvp_backward<R: UnaryRule>(id: NodeId, g: &Graph) {
    let Some((n, a)) = unary_operands(id, g) else {
        return;
    };
    let x = a.value.get();
    let xdot = a.dot.get();
    let (df, d2) = (R::df(x), R::d2(x));
    let (w, wdot) = (n.gradient.get(), n.grad_dot.get());

    a.gradient.add(g.cur_grad_epoch(), w * df);
    a.grad_dot
        .add(g.cur_gdot_epoch(), wdot * df + w * d2 * xdot);
}

// ---------------------------------------------------------------------------
// Concrete rules
// ---------------------------------------------------------------------------

pub struct SinRule;

impl UnaryRule for SinRule {
    fn f(x: f64) -> f64 {
        x.sin()
    }
    fn df(x: f64) -> f64 {
        x.cos()
    }
    fn d2(x: f64) -> f64 {
        -x.sin()
    }
}

pub struct CosRule;

impl UnaryRule for CosRule {
    fn f(x: f64) -> f64 {
        x.cos()
    }
    fn df(x: f64) -> f64 {
        -x.sin()
    }
    fn d2(x: f64) -> f64 {
        -x.cos()
    }
}

pub struct ExpRule;

impl UnaryRule for ExpRule {
    fn f(x: f64) -> f64 {
        x.exp()
    }
    fn df(x: f64) -> f64 {
        x.exp()
    }
    fn d2(x: f64) -> f64 {
        x.exp()
    }
}

/// Natural logarithm. The derivatives clamp to 0 at `x == 0` instead of
/// producing a pole; the custom tangent shares the guard and skips `df`.
pub struct LogRule;

impl UnaryRule for LogRule {
    fn f(x: f64) -> f64 {
        x.ln()
    }
    fn df(x: f64) -> f64 {
        if x != 0.0 { 1.0 / x } else { 0.0 }
    }
    fn d2(x: f64) -> f64 {
        if x != 0.0 { -1.0 / (x * x) } else { 0.0 }
    }

    fn forward_dot(n: &Node, a: &Node, g: &Graph) {
        let x = a.value.get();
        let dot = if x != 0.0 { a.dot.get() / x } else { 0.0 };
        n.dot.set(g.cur_dot_epoch(), dot);
        n.value.touch(g.cur_val_epoch());
    }
}

/// Tangent, guarded at `cos x == 0`.
pub struct TanRule;

impl UnaryRule for TanRule {
    fn f(x: f64) -> f64 {
        x.tan()
    }
    // sec^2 x
    fn df(x: f64) -> f64 {
        let c = x.cos();
        if c != 0.0 { 1.0 / (c * c) } else { 0.0 }
    }
    // 2 sec^2 x tan x = 2 sin x / cos^3 x
    fn d2(x: f64) -> f64 {
        let (s, c) = x.sin_cos();
        if c != 0.0 { 2.0 * s / (c * c * c) } else { 0.0 }
    }

    fn forward_dot(n: &Node, a: &Node, g: &Graph) {
        let c = a.value.get().cos();
        let dot = if c != 0.0 { a.dot.get() / (c * c) } else { 0.0 };
        n.dot.set(g.cur_dot_epoch(), dot);
        n.value.touch(g.cur_val_epoch());
    }
}

pub struct TanhRule;

impl UnaryRule for TanhRule {
    fn f(x: f64) -> f64 {
        x.tanh()
    }
    // sech^2 x
    fn df(x: f64) -> f64 {
        let t = x.tanh();
        1.0 - t * t
    }
    fn d2(x: f64) -> f64 {
        let t = x.tanh();
        -2.0 * t * (1.0 - t * t)
    }
}

/// SiLU (swish): `x * sigma(x)` with the numerically stable sigmoid.
pub struct SiluRule;

impl UnaryRule for SiluRule {
    fn f(x: f64) -> f64 {
        x * sigmoid(x)
    }
    // sigma + x sigma (1 - sigma)
    fn df(x: f64) -> f64 {
        let s = sigmoid(x);
        s * (1.0 + x * (1.0 - s))
    }
    // 2 sigma' + x sigma' (1 - 2 sigma)
    fn d2(x: f64) -> f64 {
        let s = sigmoid(x);
        let sp = s * (1.0 - s);
        sp * (2.0 + x * (1.0 - 2.0 * s))
    }
}

/// GELU in the exact erf-based form, `0.5 x (1 + erf(x / sqrt 2))`.
pub struct GeluRule;

impl UnaryRule for GeluRule {
    fn f(x: f64) -> f64 {
        let z = x * std::f64::consts::FRAC_1_SQRT_2;
        0.5 * x * (1.0 + libm::erf(z))
    }
    fn df(x: f64) -> f64 {
        let z = x * std::f64::consts::FRAC_1_SQRT_2;
        let a = SQRT_2_OVER_PI * (-0.5 * x * x).exp();
        0.5 * (1.0 + libm::erf(z)) + 0.5 * x * a
    }
    fn d2(x: f64) -> f64 {
        let a = SQRT_2_OVER_PI * (-0.5 * x * x).exp();
        a * (1.0 - 0.5 * x * x)
    }
}

/// ReLU is nonsmooth at 0; both derivatives take the left subgradient there.
pub struct ReluRule;

impl UnaryRule for ReluRule {
    fn f(x: f64) -> f64 {
        if x > 0.0 { x } else { 0.0 }
    }
    fn df(x: f64) -> f64 {
        if x > 0.0 { 1.0 } else { 0.0 }
    }
    fn d2(_x: f64) -> f64 {
        0.0
    }
}
