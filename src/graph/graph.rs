use std::cell::Cell;

use log::trace;

use crate::error::GraphError;
use crate::graph::node::{Node, NodeId};
use crate::graph::traversal::topological_order;
use crate::ops::{self, Operator};

/// Owns all the nodes of a computation graph, plus one monotonic epoch
/// counter per pass kind.
///
/// Nodes live in an arena and refer to their inputs by [`NodeId`]; the graph
/// alone governs their lifetime. Building mutates the arena through
/// `&mut self`; the passes take `&self` and write node slots through their
/// interior mutability, which is what lets one rule invocation update
/// several nodes' accumulators.
///
/// A counter is incremented at the start of its pass, which marks every slot
/// tagged with an older epoch stale at once, with no per-node clearing.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    cur_val_epoch: Cell<u64>,
    cur_dot_epoch: Cell<u64>,
    cur_grad_epoch: Cell<u64>,
    cur_gdot_epoch: Cell<u64>,
}

impl Graph {
    /// Creates a new, empty computation graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// The node for `id`, or `None` if the id is out of bounds.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Adds a new node to the arena. Internal; the typed builder methods
    /// below are the public surface.
    fn push(&mut self, op: Operator, inputs: Vec<NodeId>) -> NodeId {
        for &input in &inputs {
            assert!(
                input.0 < self.nodes.len(),
                "input {input:?} does not belong to this graph"
            );
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(op, inputs));
        id
    }

    // --- Leaves ---------------------------------------------------------

    /// Adds a constant leaf holding `v`.
    pub fn constant(&mut self, v: f64) -> NodeId {
        let id = self.push(Operator::Const, Vec::new());
        self.nodes[id.0].value.store(v);
        id
    }

    /// Adds a variable leaf holding `v`, with tangent 0.
    ///
    /// Value and tangent can be re-fed later with [`Graph::set_value`] and
    /// [`Graph::set_dot`]; the next pass picks the new numbers up.
    pub fn var(&mut self, v: f64) -> NodeId {
        let id = self.push(Operator::Var, Vec::new());
        self.nodes[id.0].value.store(v);
        id
    }

    // --- Unary operations -----------------------------------------------

    pub fn sin(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Sin, vec![x])
    }

    pub fn cos(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Cos, vec![x])
    }

    pub fn tan(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Tan, vec![x])
    }

    pub fn exp(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Exp, vec![x])
    }

    pub fn log(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Log, vec![x])
    }

    pub fn tanh(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Tanh, vec![x])
    }

    pub fn silu(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Silu, vec![x])
    }

    pub fn gelu(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Gelu, vec![x])
    }

    pub fn relu(&mut self, x: NodeId) -> NodeId {
        self.push(Operator::Relu, vec![x])
    }

    // --- Binary operations ----------------------------------------------

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push(Operator::Subtract, vec![a, b])
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push(Operator::Divide, vec![a, b])
    }

    /// Binary maximum. At a tie the gradient routes to `a`.
    pub fn max(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push(Operator::Max, vec![a, b])
    }

    // --- N-ary operations -----------------------------------------------

    /// Sum of one or more inputs.
    pub fn add(&mut self, xs: &[NodeId]) -> NodeId {
        assert!(!xs.is_empty(), "add requires at least one input");
        self.push(Operator::Add, xs.to_vec())
    }

    /// Product of one or more inputs.
    pub fn mul(&mut self, xs: &[NodeId]) -> NodeId {
        assert!(!xs.is_empty(), "mul requires at least one input");
        self.push(Operator::Multiply, xs.to_vec())
    }

    /// First component of `softmax(xs)`.
    pub fn softmax(&mut self, xs: &[NodeId]) -> NodeId {
        assert!(!xs.is_empty(), "softmax requires at least one input");
        self.push(Operator::Softmax, xs.to_vec())
    }

    // --- Feeding and reading --------------------------------------------

    /// Stores a new value on a leaf. The next forward pass marks it live.
    pub fn set_value(&self, id: NodeId, v: f64) {
        self.node(id).value.store(v);
    }

    /// Stores a new tangent on a leaf. The next forward-dot pass marks it
    /// live. Tangents persist across passes until overwritten.
    pub fn set_dot(&self, id: NodeId, v: f64) {
        self.node(id).dot.store(v);
    }

    /// Primal value of `id` after the last forward pass; 0 if the pass did
    /// not reach this node.
    pub fn value(&self, id: NodeId) -> f64 {
        self.node(id).value.get_or_zero(self.cur_val_epoch.get())
    }

    /// Tangent of `id` after the last forward-dot pass; 0 if unreached.
    pub fn dot(&self, id: NodeId) -> f64 {
        self.node(id).dot.get_or_zero(self.cur_dot_epoch.get())
    }

    /// Adjoint of `id` after the last backward pass; 0 if unreached.
    pub fn gradient(&self, id: NodeId) -> f64 {
        self.node(id).gradient.get_or_zero(self.cur_grad_epoch.get())
    }

    /// Second-order accumulator of `id` after the last HVP pass; 0 if
    /// unreached.
    pub fn grad_dot(&self, id: NodeId) -> f64 {
        self.node(id).grad_dot.get_or_zero(self.cur_gdot_epoch.get())
    }

    // --- Pass counters ---------------------------------------------------

    pub fn cur_val_epoch(&self) -> u64 {
        self.cur_val_epoch.get()
    }

    pub fn cur_dot_epoch(&self) -> u64 {
        self.cur_dot_epoch.get()
    }

    pub fn cur_grad_epoch(&self) -> u64 {
        self.cur_grad_epoch.get()
    }

    pub fn cur_gdot_epoch(&self) -> u64 {
        self.cur_gdot_epoch.get()
    }

    // --- Pass drivers -----------------------------------------------------

    /// Primal evaluation: visits the subgraph below `output` in topological
    /// order and returns the output value.
    pub fn forward(&self, output: NodeId) -> f64 {
        let order = topological_order(self, output);
        if order.is_empty() {
            return 0.0;
        }
        self.cur_val_epoch.set(self.cur_val_epoch.get() + 1);
        trace!("forward: {} node(s)", order.len());
        for &id in &order {
            ops::forward(id, self);
        }
        self.value(output)
    }

    /// Tangent propagation (JVP): with leaf tangents fed via
    /// [`Graph::set_dot`], returns the directional derivative at `output`.
    /// Expects a prior [`Graph::forward`] so the primal values are live.
    pub fn forward_dot(&self, output: NodeId) -> f64 {
        let order = topological_order(self, output);
        if order.is_empty() {
            return 0.0;
        }
        self.cur_dot_epoch.set(self.cur_dot_epoch.get() + 1);
        trace!("forward_dot: {} node(s)", order.len());
        for &id in &order {
            ops::forward_dot(id, self);
        }
        self.dot(output)
    }

    /// Reverse gradient accumulation (VJP): seeds `output.gradient = 1` and
    /// visits the subgraph in reverse topological order. Leaf gradients are
    /// read back with [`Graph::gradient`].
    pub fn backward(&self, output: NodeId) {
        let order = topological_order(self, output);
        if order.is_empty() {
            return;
        }
        self.cur_grad_epoch.set(self.cur_grad_epoch.get() + 1);
        trace!("backward: {} node(s)", order.len());
        self.node(output).gradient.set(self.cur_grad_epoch.get(), 1.0);
        for &id in order.iter().rev() {
            ops::backward(id, self);
        }
    }

    /// Hessian-vector product via forward-over-reverse: seeds
    /// `output.gradient = 1, output.grad_dot = 0` and accumulates both
    /// first- and second-order adjoints. Expects prior [`Graph::forward`]
    /// and [`Graph::forward_dot`] passes; `H · v` for the tangent vector `v`
    /// fed through [`Graph::set_dot`] is read back with [`Graph::grad_dot`].
    pub fn hvp_backward(&self, output: NodeId) {
        let order = topological_order(self, output);
        if order.is_empty() {
            return;
        }
        self.cur_grad_epoch.set(self.cur_grad_epoch.get() + 1);
        self.cur_gdot_epoch.set(self.cur_gdot_epoch.get() + 1);
        trace!("hvp_backward: {} node(s)", order.len());
        let out = self.node(output);
        out.gradient.set(self.cur_grad_epoch.get(), 1.0);
        out.grad_dot.set(self.cur_gdot_epoch.get(), 0.0);
        for &id in order.iter().rev() {
            ops::hvp_backward(id, self);
        }
    }

    // --- Validation -------------------------------------------------------

    /// Checks per-operator arity and input ids for every node.
    ///
    /// The passes skip malformed nodes silently; this is the loud variant
    /// for builders that want such bugs surfaced up front.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (idx, n) in self.nodes.iter().enumerate() {
            for (j, &input) in n.inputs.iter().enumerate() {
                if input.0 >= self.nodes.len() {
                    return Err(GraphError::DanglingInput { node: idx, input: j });
                }
            }
            let got = n.inputs.len();
            let (ok, expected) = match n.op {
                Operator::Const | Operator::Var => (got == 0, "0"),
                Operator::Subtract | Operator::Divide | Operator::Max => (got == 2, "2"),
                Operator::Add | Operator::Multiply | Operator::Softmax => (got >= 1, "at least 1"),
                // every remaining operator is unary
                _ => (got == 1, "1"),
            };
            if !ok {
                return Err(GraphError::ArityMismatch {
                    op: n.op.name(),
                    expected,
                    got,
                });
            }
        }
        Ok(())
    }
}
