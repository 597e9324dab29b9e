//! Operator rules and dispatch.
//!
//! Each operator maps to an [`OpTable`]: a human-readable name plus the four
//! pass bodies (primal forward, forward tangent, reverse gradient, and
//! forward-over-reverse HVP). The pass drivers in [`crate::graph`] look the
//! table up by tag and invoke one entry per visited node.
//!
//! Supported derivative rules:
//!
//! ## Unary
//! - `sin, cos, tan, exp, log, tanh, silu, gelu, relu`: see the
//!   [`unary::UnaryRule`] implementations for the `f / f' / f''` triples.
//!   `log` and `tan` clamp their derivatives to 0 at the singular point.
//! ## Binary
//! - `subtract`, `divide` (pole-guarded), and the two-input `add` fallback.
//! ## N-ary
//! - `add` (sum), `multiply` (prefix/suffix products), `softmax` (single
//!   component), `max` (binary, nonsmooth, ties to the first input).
//!
//! Every rule body is guarded by an arity check: a node whose input list
//! does not match its operator is skipped without reading or writing any
//! slot. Operators added in the future dispatch to the no-op table until
//! they get rules of their own.

use crate::graph::{Graph, Node, NodeId};

pub mod binary;
pub mod nary;
pub mod softmax;
pub mod unary;

use binary::{BinaryRule, DivRule, SubRule};
use unary::{
    CosRule, ExpRule, GeluRule, LogRule, ReluRule, SiluRule, SinRule, TanRule, TanhRule, UnaryRule,
};

/// Tags for every differentiable operation a node can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Operator {
    /// Constant leaf; the value is placed by the builder.
    Const,
    /// Variable leaf; value and tangent are placed by the feeding step.
    Var,
    /// N-ary sum (arity >= 1).
    Add,
    Subtract,
    /// N-ary product (arity >= 1).
    Multiply,
    Divide,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    /// Binary maximum; ties route to the first input.
    Max,
    Tanh,
    Silu,
    Gelu,
    Relu,
    /// Single-component softmax over all inputs (arity >= 1).
    Softmax,
}

/// The four pass entry points and the stable name for one operator.
pub struct OpTable {
    /// Stable C-style operator name.
    pub name: &'static str,
    /// Primal evaluation: writes `node.value`.
    pub forward: fn(NodeId, &Graph),
    /// Tangent propagation (JVP): writes `node.dot`.
    pub forward_dot: fn(NodeId, &Graph),
    /// Adjoint accumulation (VJP): accumulates into the inputs' `gradient`.
    pub backward: fn(NodeId, &Graph),
    /// Forward-over-reverse HVP: accumulates into the inputs' `gradient`
    /// and `grad_dot`.
    pub hvp_backward: fn(NodeId, &Graph),
}

impl Operator {
    /// Looks up the dispatch table for this tag.
    pub fn table(self) -> &'static OpTable {
        match self {
            Operator::Const => &CONST,
            Operator::Var => &VAR,
            Operator::Add => &ADD,
            Operator::Subtract => &SUBTRACT,
            Operator::Multiply => &MULTIPLY,
            Operator::Divide => &DIVIDE,
            Operator::Sin => &SIN,
            Operator::Cos => &COS,
            Operator::Tan => &TAN,
            Operator::Exp => &EXP,
            Operator::Log => &LOG,
            Operator::Max => &MAX,
            Operator::Tanh => &TANH,
            Operator::Silu => &SILU,
            Operator::Gelu => &GELU,
            Operator::Relu => &RELU,
            Operator::Softmax => &SOFTMAX,
            #[allow(unreachable_patterns)]
            _ => &NOOP,
        }
    }

    /// Stable human-readable name of the operator.
    pub fn name(self) -> &'static str {
        self.table().name
    }
}

/// Runs the primal pass body for `id`.
pub fn forward(id: NodeId, g: &Graph) {
    (g.node(id).op.table().forward)(id, g)
}

/// Runs the tangent (JVP) pass body for `id`.
pub fn forward_dot(id: NodeId, g: &Graph) {
    (g.node(id).op.table().forward_dot)(id, g)
}

/// Runs the adjoint (VJP) pass body for `id`.
pub fn backward(id: NodeId, g: &Graph) {
    (g.node(id).op.table().backward)(id, g)
}

/// Runs the forward-over-reverse (HVP) pass body for `id`.
pub fn hvp_backward(id: NodeId, g: &Graph) {
    (g.node(id).op.table().hvp_backward)(id, g)
}

// ---------------------------------------------------------------------------
// Operand guards
// ---------------------------------------------------------------------------
//
// A mismatched arity or a dangling input id is a builder bug; the rules skip
// such nodes without touching any slot so previously written accumulators
// stay intact. `Graph::validate` reports the same conditions loudly.

fn unary_operands(id: NodeId, g: &Graph) -> Option<(&Node, &Node)> {
    let n = g.node(id);
    if n.inputs.len() != 1 {
        return None;
    }
    Some((n, g.get(n.inputs[0])?))
}

fn binary_operands(id: NodeId, g: &Graph) -> Option<(&Node, &Node, &Node)> {
    let n = g.node(id);
    if n.inputs.len() != 2 {
        return None;
    }
    Some((n, g.get(n.inputs[0])?, g.get(n.inputs[1])?))
}

fn nary_node(id: NodeId, g: &Graph) -> Option<&Node> {
    let n = g.node(id);
    if n.inputs.is_empty() || n.inputs.iter().any(|&i| g.get(i).is_none()) {
        return None;
    }
    Some(n)
}

// ---------------------------------------------------------------------------
// Nullary bodies
// ---------------------------------------------------------------------------

// Leaves produce nothing: the stored value (and tangent, for variables) was
// written by the feeding step, and the pass only asserts its liveness.
fn leaf_forward(id: NodeId, g: &Graph) {
    g.node(id).value.touch(g.cur_val_epoch());
}

fn leaf_forward_dot(id: NodeId, g: &Graph) {
    let n = g.node(id);
    n.dot.touch(g.cur_dot_epoch());
    n.value.touch(g.cur_val_epoch());
}

fn noop_pass(_id: NodeId, _g: &Graph) {}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

static NOOP: OpTable = OpTable {
    name: "unknown",
    forward: noop_pass,
    forward_dot: noop_pass,
    backward: noop_pass,
    hvp_backward: noop_pass,
};

static CONST: OpTable = OpTable {
    name: "cte",
    forward: leaf_forward,
    forward_dot: leaf_forward_dot,
    backward: noop_pass,
    hvp_backward: noop_pass,
};

static VAR: OpTable = OpTable {
    name: "var",
    forward: leaf_forward,
    forward_dot: leaf_forward_dot,
    backward: noop_pass,
    hvp_backward: noop_pass,
};

const fn unary_table<R: UnaryRule>(name: &'static str) -> OpTable {
    OpTable {
        name,
        forward: unary::forward::<R>,
        forward_dot: unary::forward_dot::<R>,
        backward: unary::backward::<R>,
        hvp_backward: unary::hvp_backward::<R>,
    }
}

const fn binary_table<R: BinaryRule>(name: &'static str) -> OpTable {
    OpTable {
        name,
        forward: binary::forward::<R>,
        forward_dot: binary::forward_dot::<R>,
        backward: binary::backward::<R>,
        hvp_backward: binary::hvp_backward::<R>,
    }
}

static SIN: OpTable = unary_table::<SinRule>("sin");
static COS: OpTable = unary_table::<CosRule>("cos");
static TAN: OpTable = unary_table::<TanRule>("tan");
static EXP: OpTable = unary_table::<ExpRule>("exp");
static LOG: OpTable = unary_table::<LogRule>("log");
static TANH: OpTable = unary_table::<TanhRule>("tanh");
static SILU: OpTable = unary_table::<SiluRule>("silu");
static GELU: OpTable = unary_table::<GeluRule>("gelu");
static RELU: OpTable = unary_table::<ReluRule>("relu");

static SUBTRACT: OpTable = binary_table::<SubRule>("subtract");
static DIVIDE: OpTable = binary_table::<DivRule>("divide");

// The sum rule covers every arity, overriding the binary `AddRule` fallback.
static ADD: OpTable = OpTable {
    name: "add",
    forward: nary::sum_forward,
    forward_dot: nary::sum_forward_dot,
    backward: nary::sum_backward,
    hvp_backward: nary::sum_hvp_backward,
};

static MULTIPLY: OpTable = OpTable {
    name: "multiply",
    forward: nary::prod_forward,
    forward_dot: nary::prod_forward_dot,
    backward: nary::prod_backward,
    hvp_backward: nary::prod_hvp_backward,
};

static MAX: OpTable = OpTable {
    name: "max",
    forward: nary::max_forward,
    forward_dot: nary::max_forward_dot,
    backward: nary::max_backward,
    hvp_backward: nary::max_hvp_backward,
};

static SOFTMAX: OpTable = OpTable {
    name: "softmax",
    forward: softmax::forward,
    forward_dot: softmax::forward_dot,
    backward: softmax::backward,
    hvp_backward: softmax::hvp_backward,
};
