//! cograd: scalar reverse-mode automatic differentiation with epoch-tagged
//! accumulators.
//!
//! The engine evaluates four passes over a shared DAG of scalar operations:
//! primal values, forward tangents (JVP), reverse gradients (VJP), and
//! Hessian-vector products (HVP, forward-over-reverse). Each node carries
//! one epoch-tagged accumulator per pass; bumping a pass counter invalidates
//! every stale slot at once, so repeated evaluations never pay for
//! whole-graph clearing.
//!
//! # Example
//!
//! ```rust
//! use cograd::Graph;
//!
//! let mut g = Graph::new();
//! let x = g.var(std::f64::consts::FRAC_PI_4);
//! let y = g.sin(x);
//!
//! let v = g.forward(y);
//! assert!((v - 0.5f64.sqrt()).abs() < 1e-12);
//!
//! g.backward(y);
//! assert!((g.gradient(x) - std::f64::consts::FRAC_PI_4.cos()).abs() < 1e-12);
//! ```

pub mod epoch;
pub mod error;
pub mod graph;
pub mod numeric;
pub mod ops;

mod scratch;

pub use epoch::Slot;
pub use error::GraphError;
pub use graph::{topological_order, Graph, Node, NodeId};
pub use ops::Operator;
