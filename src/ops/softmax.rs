//! Single-component softmax.
//!
//! The node's inputs are the full vector `x_0..x_{m-1}` and its output is
//! the first component of `softmax(x)`; gradients and Hessian-vector
//! contributions still flow to every input. The forward pass max-shifts the
//! exponents for stability, and the analytic forms below reuse the
//! normalized probabilities rather than re-deriving them per input:
//!
//! - Jacobian row: `∂y_0/∂x_k = y_0 (δ_{0k} - y_k)`
//! - JVP:          `dot = y_0 (xd_0 - s)` with `s = Σ_j y_j xd_j`
//! - Hessian column (`H · xd`): `y_0 (1 - 2 y_0)(xd_0 - s)` at `k = 0`,
//!   `y_0 y_k (2 s - xd_0 - xd_k)` otherwise.

use crate::graph::{Graph, NodeId};
use crate::scratch::with_scratch;

use super::nary_node;

/// Normalizes `vals` into probabilities in `y` using a max-shift.
///
/// `Z` cannot reach zero for finite inputs (the shifted maximum contributes
/// `exp(0) = 1`), so the clamp to 1 only fires on upstream garbage; debug
/// builds assert instead of masking it.
fn softmax_probs(vals: &[f64], y: &mut Vec<f64>) {
    let xmax = vals.iter().fold(f64::NEG_INFINITY, |m, &x| m.max(x));
    y.clear();
    y.extend(vals.iter().map(|&x| (x - xmax).exp()));
    let z: f64 = y.iter().sum();
    debug_assert!(z > 0.0, "softmax normalizer collapsed to {z}");
    let z = if z > 0.0 { z } else { 1.0 };
    for p in y.iter_mut() {
        *p /= z;
    }
}

pub(crate) fn forward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let y0 = with_scratch(|s| {
        s.vals.clear();
        s.vals.extend(n.inputs.iter().map(|&i| g.node(i).value.get()));
        softmax_probs(&s.vals, &mut s.y);
        s.y[0]
    });
    n.value.set(g.cur_val_epoch(), y0);
}

pub(crate) fn forward_dot(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let dot = with_scratch(|s| {
        s.vals.clear();
        s.dots.clear();
        for &i in &n.inputs {
            let a = g.node(i);
            s.vals.push(a.value.get());
            s.dots.push(a.dot.get());
        }
        softmax_probs(&s.vals, &mut s.y);

        let sdot: f64 = s.y.iter().zip(&s.dots).map(|(y, xd)| y * xd).sum();
        s.y[0] * (s.dots[0] - sdot)
    });
    n.dot.set(g.cur_dot_epoch(), dot);
    n.value.touch(g.cur_val_epoch());
}

pub(crate) fn backward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let w = n.gradient.get();
    with_scratch(|s| {
        s.vals.clear();
        s.vals.extend(n.inputs.iter().map(|&i| g.node(i).value.get()));
        softmax_probs(&s.vals, &mut s.y);

        let y0 = s.y[0];
        for (k, &input) in n.inputs.iter().enumerate() {
            let delta = if k == 0 { 1.0 } else { 0.0 };
            let dfk = y0 * (delta - s.y[k]);
            g.node(input).gradient.add(g.cur_grad_epoch(), w * dfk);
        }
    });
}

pub(crate) fn hvp_backward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let (w, wdot) = (n.gradient.get(), n.grad_dot.get());
    with_scratch(|s| {
        s.vals.clear();
        s.dots.clear();
        for &i in &n.inputs {
            let a = g.node(i);
            s.vals.push(a.value.get());
            s.dots.push(a.dot.get());
        }
        softmax_probs(&s.vals, &mut s.y);

        let y0 = s.y[0];
        let sdot: f64 = s.y.iter().zip(&s.dots).map(|(y, xd)| y * xd).sum();

        for (k, &input) in n.inputs.iter().enumerate() {
            let delta = if k == 0 { 1.0 } else { 0.0 };
            let dfk = y0 * (delta - s.y[k]);
            let hv_k = if k == 0 {
                y0 * (1.0 - 2.0 * y0) * (s.dots[0] - sdot)
            } else {
                y0 * s.y[k] * (2.0 * sdot - s.dots[0] - s.dots[k])
            };

            let a = g.node(input);
            a.gradient.add(g.cur_grad_epoch(), w * dfk);
            a.grad_dot.add(g.cur_gdot_epoch(), wdot * dfk + w * hv_k);
        }
    });
}
