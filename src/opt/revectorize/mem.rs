//! Memory address utilities for revectorization.
//!
//! Load/store nodes address linear memory as `memory_start + offset` in
//! value input 0 and a dynamic index in value input 1. Two accesses belong
//! to the same chain when their index nodes match, and they are adjacent
//! when their decoded static offsets differ by one 128-bit lane.

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::Operator;

use super::trace;

/// Bytes in one 128-bit SIMD lane.
pub const SIMD128_BYTES: i64 = 16;

/// The literal of an `Int64Constant`, if the node is one.
pub fn constant_value(graph: &Graph, node: NodeId) -> Option<i64> {
    match graph.node(node).op {
        Operator::Int64Constant(value) => Some(value),
        _ => None,
    }
}

/// Decode the static memory offset of a load or store.
///
/// Value input 0 is `memory_start + offset`. A raw memory-start pointer
/// (`Load`/`LoadFromObject`) means offset 0; `Int64Add` with a constant
/// operand yields that constant; anything else is undecodable.
pub fn memory_offset(graph: &Graph, node: NodeId) -> Option<i64> {
    debug_assert!(matches!(
        graph.node(node).op,
        Operator::ProtectedLoad(_) | Operator::Store(_) | Operator::ProtectedStore(_)
    ));

    let base = graph.node(node).value_input(0);
    match graph.node(base).op {
        Operator::Load(_) | Operator::LoadFromObject(_) => Some(0),
        Operator::Int64Add => {
            let add = graph.node(base);
            constant_value(graph, add.value_input(0))
                .or_else(|| constant_value(graph, add.value_input(1)))
        }
        _ => None,
    }
}

/// The address-equivalence key of a load or store: its index input, with a
/// `ChangeUint32ToUint64` wrapper peeled off (memory32 widens the index).
pub fn node_address(graph: &Graph, node: NodeId) -> NodeId {
    let address = graph.node(node).value_input(1);
    match graph.node(address).op {
        Operator::ChangeUint32ToUint64 => graph.node(address).value_input(0),
        _ => address,
    }
}

/// Check that every adjacent pair of accesses is exactly one 128-bit lane
/// apart. Gaps, overlaps, reversed order, and undecodable offsets all fail.
pub fn is_continuous_access(graph: &Graph, nodes: &[NodeId]) -> bool {
    debug_assert!(!nodes.is_empty());
    let mut previous = memory_offset(graph, nodes[0]);
    for &node in &nodes[1..] {
        let current = memory_offset(graph, node);
        match (previous, current) {
            (Some(prev), Some(curr)) if curr - prev == SIMD128_BYTES => {}
            _ => {
                trace!("Non-continuous store!");
                return false;
            }
        }
        previous = current;
    }
    true
}

// =============================================================================
// Tests
// =============================================================================
