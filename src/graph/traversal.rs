//! Graph traversal: the ordering contract of the pass drivers.
//!
//! Forward passes must see every input before its consumer; reverse passes
//! walk the same order backwards so every consumer has propagated into a
//! node before the node itself runs. One DFS post-order serves both.

use crate::graph::graph::Graph;
use crate::graph::node::NodeId;

/// Topological order of the subgraph reachable from `output`: inputs before
/// consumers, `output` last.
///
/// Iterative DFS post-order; shared subexpressions appear once. Ids are
/// dense arena indices, so a plain bit vector tracks visits. Inputs that do
/// not resolve to a node are skipped; the rules guard against them again
/// node-by-node.
pub fn topological_order(g: &Graph, output: NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    if g.get(output).is_none() {
        return order;
    }

    let mut visited = vec![false; g.len()];
    let mut stack: Vec<(NodeId, usize)> = vec![(output, 0)];
    visited[output.0] = true;

    while let Some((id, child)) = stack.last_mut() {
        let inputs = &g.node(*id).inputs;
        if *child < inputs.len() {
            let next = inputs[*child];
            *child += 1;
            if next.0 < g.len() && !visited[next.0] {
                visited[next.0] = true;
                stack.push((next, 0));
            }
        } else {
            order.push(*id);
            stack.pop();
        }
    }

    order
}
