//! N-ary sum and product, and the nonsmooth binary max.
//!
//! - `sum(x_0..x_{m-1})`: the Jacobian row is all ones, so backward is a
//!   broadcast of the adjoint and the HVP adds a broadcast of `grad_dot`.
//! - `prod(x_0..x_{m-1})`: the partial with respect to `x_i` is the product
//!   of every other input. Prefix/suffix tables give that in O(1) per input
//!   without dividing by `x_i`, which keeps the rule exact when inputs are
//!   zero. The HVP cross term re-derives excluded-pair products the same
//!   division-free way.
//! - `max(a, b)`: routes everything to the winning branch; ties go to the
//!   first input. A subgradient choice, no smoothing.

use crate::graph::{Graph, NodeId};
use crate::scratch::{build_prefix_suffix, with_scratch};

use super::{binary_operands, nary_node};

// ---------------------------------------------------------------------------
// Sum
// ---------------------------------------------------------------------------

pub(crate) fn sum_forward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let s: f64 = n.inputs.iter().map(|&i| g.node(i).value.get()).sum();
    n.value.set(g.cur_val_epoch(), s);
}

pub(crate) fn sum_forward_dot(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let sd: f64 = n.inputs.iter().map(|&i| g.node(i).dot.get()).sum();
    n.dot.set(g.cur_dot_epoch(), sd);
    n.value.touch(g.cur_val_epoch());
}

pub(crate) fn sum_backward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let w = n.gradient.get();
    for &i in &n.inputs {
        g.node(i).gradient.add(g.cur_grad_epoch(), w);
    }
}

pub(crate) fn sum_hvp_backward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let (w, wdot) = (n.gradient.get(), n.grad_dot.get());
    for &i in &n.inputs {
        let a = g.node(i);
        a.gradient.add(g.cur_grad_epoch(), w);
        a.grad_dot.add(g.cur_gdot_epoch(), wdot);
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

pub(crate) fn prod_forward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let p: f64 = n.inputs.iter().map(|&i| g.node(i).value.get()).product();
    n.value.set(g.cur_val_epoch(), p);
}

pub(crate) fn prod_forward_dot(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let m = n.inputs.len();
    let dot = with_scratch(|s| {
        load_values(n.inputs.as_slice(), g, &mut s.vals, Some(&mut s.dots));
        build_prefix_suffix(&s.vals, &mut s.pre, &mut s.suf);
        (0..m).map(|i| s.dots[i] * s.pre[i] * s.suf[i + 1]).sum()
    });
    n.dot.set(g.cur_dot_epoch(), dot);
    n.value.touch(g.cur_val_epoch());
}

pub(crate) fn prod_backward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let w = n.gradient.get();
    with_scratch(|s| {
        load_values(n.inputs.as_slice(), g, &mut s.vals, None);
        build_prefix_suffix(&s.vals, &mut s.pre, &mut s.suf);
        for (i, &input) in n.inputs.iter().enumerate() {
            let p_wo_i = s.pre[i] * s.suf[i + 1];
            g.node(input).gradient.add(g.cur_grad_epoch(), w * p_wo_i);
        }
    });
}

pub(crate) fn prod_hvp_backward(id: NodeId, g: &Graph) {
    let Some(n) = nary_node(id, g) else {
        return;
    };
    let m = n.inputs.len();
    let (w, wdot) = (n.gradient.get(), n.grad_dot.get());

    // Binary product has a closed form; skip the tables.
    if m == 2 {
        let (a, b) = (g.node(n.inputs[0]), g.node(n.inputs[1]));
        let (av, bv) = (a.value.get(), b.value.get());
        let (adot, bdot) = (a.dot.get(), b.dot.get());

        a.gradient.add(g.cur_grad_epoch(), w * bv);
        b.gradient.add(g.cur_grad_epoch(), w * av);
        a.grad_dot.add(g.cur_gdot_epoch(), wdot * bv + w * bdot);
        b.grad_dot.add(g.cur_gdot_epoch(), wdot * av + w * adot);
        return;
    }

    with_scratch(|s| {
        load_values(n.inputs.as_slice(), g, &mut s.vals, Some(&mut s.dots));
        build_prefix_suffix(&s.vals, &mut s.pre, &mut s.suf);

        for (i, &input) in n.inputs.iter().enumerate() {
            let p_wo_i = s.pre[i] * s.suf[i + 1];

            // sum_{k != i} dot_k * prod_{l not in {i,k}} v_l
            let mut cross = 0.0;
            for k in 0..m {
                if k == i {
                    continue;
                }
                // Excluded-pair product, assembled from the one-sided tables
                // plus the short segment strictly between the two indices.
                // Never divides, so v_l == 0 stays exact where the naive
                // total / v_i / v_k would hit 0/0.
                let (lo, hi) = if i < k { (i, k) } else { (k, i) };
                let mut mid = 1.0;
                for t in lo + 1..hi {
                    mid *= s.vals[t];
                    if mid == 0.0 {
                        break;
                    }
                }
                cross += s.dots[k] * (s.pre[lo] * mid * s.suf[hi + 1]);
            }

            let a = g.node(input);
            a.gradient.add(g.cur_grad_epoch(), w * p_wo_i);
            a.grad_dot
                .add(g.cur_gdot_epoch(), wdot * p_wo_i + w * cross);
        }
    });
}

/// Copies input values (and optionally tangents) into scratch buffers.
fn load_values(inputs: &[NodeId], g: &Graph, vals: &mut Vec<f64>, dots: Option<&mut Vec<f64>>) {
    vals.clear();
    vals.extend(inputs.iter().map(|&i| g.node(i).value.get()));
    if let Some(dots) = dots {
        dots.clear();
        dots.extend(inputs.iter().map(|&i| g.node(i).dot.get()));
    }
}

// ---------------------------------------------------------------------------
// Max
// ---------------------------------------------------------------------------

pub(crate) fn max_forward(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    let (av, bv) = (a.value.get(), b.value.get());
    n.value
        .set(g.cur_val_epoch(), if av >= bv { av } else { bv });
}

pub(crate) fn max_forward_dot(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    let dot = if a.value.get() >= b.value.get() {
        a.dot.get()
    } else {
        b.dot.get()
    };
    n.dot.set(g.cur_dot_epoch(), dot);
    n.value.touch(g.cur_val_epoch());
}

pub(crate) fn max_backward(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    let winner = if a.value.get() >= b.value.get() { a } else { b };
    winner.gradient.add(g.cur_grad_epoch(), n.gradient.get());
}

pub(crate) fn max_hvp_backward(id: NodeId, g: &Graph) {
    let Some((n, a, b)) = binary_operands(id, g) else {
        return;
    };
    let winner = if a.value.get() >= b.value.get() { a } else { b };
    winner.gradient.add(g.cur_grad_epoch(), n.gradient.get());
    winner.grad_dot.add(g.cur_gdot_epoch(), n.grad_dot.get());
}
