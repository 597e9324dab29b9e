//! End-to-end pass tests: the JVP/VJP/HVP consistency laws, the epoch
//! protocol observed through the public API, and concrete worked scenarios.

mod common;

use common::{approx_eq, central_diff, init_logs, FD_TOL};

use cograd::{Graph, NodeId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Feeds `vals` into `vars` and runs a forward pass.
fn eval_at(g: &Graph, vars: &[NodeId], vals: &[f64], y: NodeId) -> f64 {
    for (&id, &v) in vars.iter().zip(vals) {
        g.set_value(id, v);
    }
    g.forward(y)
}

/// Computes `H · v` at `vals` by forward-over-reverse.
fn hvp(g: &Graph, vars: &[NodeId], vals: &[f64], tangent: &[f64], y: NodeId) -> Vec<f64> {
    for ((&id, &v), &t) in vars.iter().zip(vals).zip(tangent) {
        g.set_value(id, v);
        g.set_dot(id, t);
    }
    g.forward(y);
    g.forward_dot(y);
    g.hvp_backward(y);
    vars.iter().map(|&id| g.grad_dot(id)).collect()
}

/// A graph mixing every operator family: products of both arities, softmax,
/// a guarded division, a max, and several unary rules.
fn build_mixed() -> (Graph, Vec<NodeId>, NodeId) {
    let mut g = Graph::new();
    let x0 = g.var(0.0);
    let x1 = g.var(0.0);
    let x2 = g.var(0.0);

    let m = g.mul(&[x0, x1, x2]);
    let s = g.sin(m);
    let e = g.exp(x1);
    let q = g.div(s, e);

    let sm = g.silu(x1);
    let t = g.tanh(x2);
    let p = g.mul(&[sm, t]);

    let d = g.sub(x0, x2);
    let ge = g.gelu(d);
    let sf = g.softmax(&[x0, x1, x2]);
    let mx = g.max(p, q);

    let y = g.add(&[q, ge, sf, mx, p]);
    (g, vec![x0, x1, x2], y)
}

// Evaluation point where the max branch is decided by a wide margin, so the
// finite-difference probes below cannot flip it.
const X: [f64; 3] = [0.4, -0.3, 0.7];

// ---------------------------------------------------------------------------
// Laws
// ---------------------------------------------------------------------------

#[test]
fn jvp_matches_directional_finite_difference() {
    init_logs();
    let (g, vars, y) = build_mixed();
    let u = [0.6, -1.1, 0.8];

    eval_at(&g, &vars, &X, y);
    for (&id, &t) in vars.iter().zip(&u) {
        g.set_dot(id, t);
    }
    let jvp = g.forward_dot(y);

    let eps = 1e-5;
    let shift = |s: f64| -> Vec<f64> { X.iter().zip(&u).map(|(x, t)| x + s * t).collect() };
    let fd = (eval_at(&g, &vars, &shift(eps), y) - eval_at(&g, &vars, &shift(-eps), y))
        / (2.0 * eps);

    assert!(approx_eq(jvp, fd, FD_TOL), "jvp {jvp} vs fd {fd}");
}

#[test]
fn vjp_contracts_to_jvp() {
    let (g, vars, y) = build_mixed();
    let u = [0.6, -1.1, 0.8];

    eval_at(&g, &vars, &X, y);
    for (&id, &t) in vars.iter().zip(&u) {
        g.set_dot(id, t);
    }
    let jvp = g.forward_dot(y);

    g.backward(y);
    let vjp_dot_u: f64 = vars.iter().zip(&u).map(|(&id, &t)| g.gradient(id) * t).sum();

    // Both sides are analytic; they differ only by rounding.
    assert!(approx_eq(vjp_dot_u, jvp, 1e-12), "{vjp_dot_u} vs {jvp}");
}

#[test]
fn hvp_is_symmetric_in_the_tangents() {
    let (g, vars, y) = build_mixed();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..8 {
        let u: Vec<f64> = (0..3).map(|_| rng.random_range(-1.0..1.0)).collect();
        let v: Vec<f64> = (0..3).map(|_| rng.random_range(-1.0..1.0)).collect();

        let hv = hvp(&g, &vars, &X, &v, y);
        let hu = hvp(&g, &vars, &X, &u, y);

        let u_hv: f64 = u.iter().zip(&hv).map(|(a, b)| a * b).sum();
        let v_hu: f64 = v.iter().zip(&hu).map(|(a, b)| a * b).sum();
        assert!(approx_eq(u_hv, v_hu, 1e-10), "{u_hv} vs {v_hu}");
    }
}

#[test]
fn hvp_matches_finite_difference_of_gradient() {
    let (g, vars, y) = build_mixed();
    let v = [0.9, 0.2, -0.5];

    let hv = hvp(&g, &vars, &X, &v, y);

    let eps = 1e-5;
    let grad_at = |s: f64| -> Vec<f64> {
        let shifted: Vec<f64> = X.iter().zip(&v).map(|(x, t)| x + s * t).collect();
        eval_at(&g, &vars, &shifted, y);
        g.backward(y);
        vars.iter().map(|&id| g.gradient(id)).collect()
    };
    let gp = grad_at(eps);
    let gm = grad_at(-eps);

    for i in 0..3 {
        let fd = (gp[i] - gm[i]) / (2.0 * eps);
        assert!(approx_eq(hv[i], fd, 1e-5), "component {i}: {} vs {fd}", hv[i]);
    }
}

// ---------------------------------------------------------------------------
// Epoch protocol through the public API
// ---------------------------------------------------------------------------

#[test]
fn gradients_of_an_untouched_subgraph_read_zero() {
    let mut g = Graph::new();
    let x1 = g.var(0.5);
    let x2 = g.var(0.8);
    let y1 = g.sin(x1);
    let y2 = g.cos(x2);

    g.forward(y1);
    g.forward(y2);

    g.backward(y1);
    assert!(approx_eq(g.gradient(x1), 0.5f64.cos(), 1e-12));
    // x2 is not below y1; its slot was never written this pass.
    assert_eq!(g.gradient(x2), 0.0);

    // A new pass over the other subtree: x1's stale gradient must not leak.
    g.backward(y2);
    assert!(approx_eq(g.gradient(x2), -(0.8f64.sin()), 1e-12));
    assert_eq!(g.gradient(x1), 0.0);
}

#[test]
fn passes_mark_exactly_the_visited_slots_live() {
    let mut g = Graph::new();
    let x = g.var(1.2);
    let y = g.tanh(x);
    let orphan = g.var(9.0);

    g.forward(y);
    for id in [x, y] {
        assert!(g.node(id).value.is_live(g.cur_val_epoch()));
    }
    assert!(!g.node(orphan).value.is_live(g.cur_val_epoch()));

    g.backward(y);
    assert!(g.node(x).gradient.is_live(g.cur_grad_epoch()));
    assert!(!g.node(orphan).gradient.is_live(g.cur_grad_epoch()));
}

#[test]
fn repeated_passes_accumulate_fresh_sums() {
    // x feeds the sum twice; its adjoint is 2 on every pass, not 2, 4, 6...
    let mut g = Graph::new();
    let x = g.var(3.0);
    let y = g.add(&[x, x]);

    g.forward(y);
    for _ in 0..3 {
        g.backward(y);
        assert_eq!(g.gradient(x), 2.0);
    }
}

// ---------------------------------------------------------------------------
// Worked scenarios
// ---------------------------------------------------------------------------

#[test]
fn sine_at_quarter_pi() {
    let mut g = Graph::new();
    let x = g.var(std::f64::consts::FRAC_PI_4);
    let y = g.sin(x);
    let r = std::f64::consts::FRAC_1_SQRT_2;

    assert!(approx_eq(g.forward(y), r, 1e-9));

    g.set_dot(x, 1.0);
    assert!(approx_eq(g.forward_dot(y), r, 1e-9));

    g.backward(y);
    assert!(approx_eq(g.gradient(x), r, 1e-9));

    g.hvp_backward(y);
    assert!(approx_eq(g.grad_dot(x), -r, 1e-9));
}

#[test]
fn log_at_zero_clamps_instead_of_nan() {
    let mut g = Graph::new();
    let x = g.var(0.0);
    let y = g.log(x);

    assert_eq!(g.forward(y), f64::NEG_INFINITY);

    g.set_dot(x, 1.0);
    assert_eq!(g.forward_dot(y), 0.0);

    g.backward(y);
    assert_eq!(g.gradient(x), 0.0);

    g.hvp_backward(y);
    assert_eq!(g.grad_dot(x), 0.0);
    assert!(!g.gradient(x).is_nan());
}

#[test]
fn division_by_zero_clamps_instead_of_nan() {
    let mut g = Graph::new();
    let a = g.var(3.0);
    let b = g.var(0.0);
    let y = g.div(a, b);

    assert_eq!(g.forward(y), 0.0);
    g.set_dot(a, 1.0);
    g.set_dot(b, 1.0);
    assert_eq!(g.forward_dot(y), 0.0);
    g.backward(y);
    assert_eq!(g.gradient(a), 0.0);
    assert_eq!(g.gradient(b), 0.0);
}

#[test]
fn ternary_product_gradients_and_hvp() {
    let mut g = Graph::new();
    let a = g.var(2.0);
    let b = g.var(3.0);
    let c = g.var(5.0);
    let y = g.mul(&[a, b, c]);

    assert_eq!(g.forward(y), 30.0);

    g.set_dot(a, 1.0);
    g.set_dot(b, 0.0);
    g.set_dot(c, 0.0);
    assert_eq!(g.forward_dot(y), 15.0);

    g.backward(y);
    assert_eq!(g.gradient(a), 15.0);
    assert_eq!(g.gradient(b), 10.0);
    assert_eq!(g.gradient(c), 6.0);

    g.hvp_backward(y);
    assert_eq!(g.grad_dot(a), 0.0);
    assert_eq!(g.grad_dot(b), 5.0);
    assert_eq!(g.grad_dot(c), 3.0);
}

#[test]
fn product_hvp_stays_exact_through_a_zero_factor() {
    // A zero factor is where total / v_i / v_k would produce 0/0; the
    // pairwise products never divide, so the cross terms stay exact.
    let mut g = Graph::new();
    let a = g.var(2.0);
    let b = g.var(0.0);
    let c = g.var(5.0);
    let y = g.mul(&[a, b, c]);

    assert_eq!(g.forward(y), 0.0);

    g.set_dot(a, 1.0);
    g.set_dot(b, 0.0);
    g.set_dot(c, 1.0);
    g.forward_dot(y);
    g.hvp_backward(y);

    assert_eq!(g.gradient(a), 0.0);
    assert_eq!(g.gradient(b), 10.0);
    assert_eq!(g.gradient(c), 0.0);

    assert_eq!(g.grad_dot(b), 7.0); // adot * c + cdot * a
    assert_eq!(g.grad_dot(a), 0.0);
    assert_eq!(g.grad_dot(c), 0.0);
    assert!(!g.grad_dot(b).is_nan());
}

#[test]
fn product_hvp_with_two_zero_factors() {
    let mut g = Graph::new();
    let xs: Vec<NodeId> = [2.0, 0.0, 0.0, 5.0].iter().map(|&v| g.var(v)).collect();
    let y = g.mul(&xs);

    assert_eq!(g.forward(y), 0.0);

    for (&id, &t) in xs.iter().zip(&[0.0, 0.0, 1.0, 0.0]) {
        g.set_dot(id, t);
    }
    g.forward_dot(y);
    g.hvp_backward(y);

    for &id in &xs {
        assert_eq!(g.gradient(id), 0.0);
    }
    // Only the slot paired with the perturbed zero sees a second-order term.
    assert_eq!(g.grad_dot(xs[1]), 10.0);
    assert_eq!(g.grad_dot(xs[0]), 0.0);
    assert_eq!(g.grad_dot(xs[2]), 0.0);
    assert_eq!(g.grad_dot(xs[3]), 0.0);
}

#[test]
fn quaternary_product_hvp_matches_gradient_finite_difference() {
    let mut g = Graph::new();
    let vars: Vec<NodeId> = (0..4).map(|_| g.var(0.0)).collect();
    let y = g.mul(&vars);

    let x = [1.5, -2.0, 0.5, 3.0];
    let v = [1.0, 2.0, -1.0, 0.5];
    let hv = hvp(&g, &vars, &x, &v, y);

    let eps = 1e-5;
    let grad_at = |s: f64| -> Vec<f64> {
        let shifted: Vec<f64> = x.iter().zip(&v).map(|(a, t)| a + s * t).collect();
        eval_at(&g, &vars, &shifted, y);
        g.backward(y);
        vars.iter().map(|&id| g.gradient(id)).collect()
    };
    let gp = grad_at(eps);
    let gm = grad_at(-eps);

    for i in 0..4 {
        let fd = (gp[i] - gm[i]) / (2.0 * eps);
        assert!(approx_eq(hv[i], fd, 1e-5), "component {i}: {} vs {fd}", hv[i]);
    }
}

#[test]
fn softmax_first_component() {
    let mut g = Graph::new();
    let x0 = g.var(1.0);
    let x1 = g.var(2.0);
    let x2 = g.var(3.0);
    let y = g.softmax(&[x0, x1, x2]);

    let z = 1.0f64.exp() + 2.0f64.exp() + 3.0f64.exp();
    let (y0, y1, y2) = (1.0f64.exp() / z, 2.0f64.exp() / z, 3.0f64.exp() / z);

    assert!(approx_eq(g.forward(y), y0, 1e-9));
    assert!(approx_eq(g.value(y), 0.090_030_573, 1e-8));

    g.backward(y);
    assert!(approx_eq(g.gradient(x0), y0 * (1.0 - y0), 1e-12));
    assert!(approx_eq(g.gradient(x1), -y0 * y1, 1e-12));
    assert!(approx_eq(g.gradient(x2), -y0 * y2, 1e-12));
}

#[test]
fn softmax_is_invariant_under_shift() {
    // softmax(x + c) == softmax(x); the max-shift makes huge inputs safe.
    let mut g = Graph::new();
    let x0 = g.var(1.0);
    let x1 = g.var(2.0);
    let x2 = g.var(3.0);
    let y = g.softmax(&[x0, x1, x2]);

    let base = g.forward(y);
    eval_at(&g, &[x0, x1, x2], &[701.0, 702.0, 703.0], y);
    assert!(approx_eq(g.value(y), base, 1e-12));
    assert!(g.value(y).is_finite());
}

#[test]
fn max_tie_routes_to_first_input() {
    let mut g = Graph::new();
    let a = g.var(3.0);
    let b = g.var(3.0);
    let y = g.max(a, b);

    assert_eq!(g.forward(y), 3.0);

    g.set_dot(a, 2.0);
    g.set_dot(b, 7.0);
    assert_eq!(g.forward_dot(y), 2.0);

    g.backward(y);
    assert_eq!(g.gradient(a), 1.0);
    assert_eq!(g.gradient(b), 0.0);

    g.hvp_backward(y);
    assert_eq!(g.gradient(a), 1.0);
    assert_eq!(g.grad_dot(b), 0.0);
}

#[test]
fn max_routes_to_strict_winner() {
    let mut g = Graph::new();
    let a = g.var(1.0);
    let b = g.var(4.0);
    let y = g.max(a, b);

    assert_eq!(g.forward(y), 4.0);
    g.backward(y);
    assert_eq!(g.gradient(a), 0.0);
    assert_eq!(g.gradient(b), 1.0);
}

#[test]
fn unary_chain_second_order() {
    // y = tanh(sin(x)): d2y/dx2 has contributions from both rules' d2 terms.
    let mut g = Graph::new();
    let x = g.var(0.6);
    let s = g.sin(x);
    let y = g.tanh(s);

    let x0 = 0.6;
    let hv = hvp(&g, &[x], &[x0], &[1.0], y);

    let f = |x: f64| x.sin().tanh();
    let fd = central_diff(|x| central_diff(f, x, 1e-5), x0, 1e-4);
    assert!(approx_eq(hv[0], fd, 1e-5), "{} vs {fd}", hv[0]);
}
