//! Shared helpers for the integration tests.

#![allow(dead_code)]

/// Absolute tolerance for first-derivative checks against central
/// differences at step `1e-5`.
pub const FD_TOL: f64 = 1e-6;

pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

/// Central difference `(f(x+h) - f(x-h)) / 2h`.
pub fn central_diff(f: impl Fn(f64) -> f64, x: f64, h: f64) -> f64 {
    (f(x + h) - f(x - h)) / (2.0 * h)
}

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}
