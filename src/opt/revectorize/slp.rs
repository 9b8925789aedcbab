//! SLP tree construction for revectorization.
//!
//! Starting from a pair of adjacent 128-bit stores, the builder recursively
//! proves that the upward dataflow cones of both lanes can be packed into a
//! single 256-bit computation. Each provable group becomes a [`PackNode`];
//! the transitive operand links of the root form a DAG covering every node
//! the rewriter must widen.
//!
//! The recursion is guarded three ways:
//! - a depth limit bounds pathological chains;
//! - a visit stack detects cycles, admitting only loop back-edges that
//!   re-enter through a packed phi;
//! - a node-to-pack memo merges diamonds (two paths reaching the same
//!   group) and rejects partial overlaps (two paths reaching the same node
//!   with different groups).

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ir::arena::{Arena, Id};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{LoadTransformation, Operator, Simd128Op, ValueType};

use super::mem::{is_continuous_access, memory_offset, node_address};
use super::trace;

/// Recursion limit for one tree build.
const RECURSION_MAX_DEPTH: usize = 16;

// =============================================================================
// Node Groups
// =============================================================================

/// An ordered pair of nodes considered as the two lanes of one 256-bit
/// operation. Index 0 is lane 0.
pub type NodeGroup = [NodeId; 2];

/// Returns true if every node in the group is a constant.
fn all_constant(graph: &Graph, group: &NodeGroup) -> bool {
    group.iter().all(|&node| graph.node(node).is_constant())
}

/// Returns true if all addresses of the nodes in the group are identical.
fn all_same_address(graph: &Graph, group: &NodeGroup) -> bool {
    let address = node_address(graph, group[0]);
    for &node in &group[1..] {
        let other = node_address(graph, node);
        if other != address {
            trace!("Diff address {:?},{:?}!", address, other);
            return false;
        }
    }
    true
}

/// Returns true if the group members have the same operator, comparing the
/// opcode and its parameters. Lane indices of `ExtractF128` are per-lane
/// values, so two extracts count as the same operator; the lane relationship
/// is checked by the extract leaf rule.
fn all_same_operator(graph: &Graph, group: &NodeGroup) -> bool {
    let op = &graph.node(group[0]).op;
    let other = &graph.node(group[1]).op;
    match (op, other) {
        (Operator::ExtractF128(_), Operator::ExtractF128(_)) => true,
        _ => op == other,
    }
}

/// Returns true if all nodes in the group are one and the same node. Splat
/// opcodes in WASM SIMD create vectors with identical lanes.
fn is_splat(group: &NodeGroup) -> bool {
    group[1..].iter().all(|&node| node == group[0])
}

/// Only protected, plain, and transforming loads take the load-leaf path.
#[cfg(debug_assertions)]
fn is_supported_load(graph: &Graph, group: &NodeGroup) -> bool {
    group.iter().all(|&node| {
        matches!(
            graph.node(node).op,
            Operator::ProtectedLoad(_) | Operator::Load(_) | Operator::LoadTransform(_)
        )
    })
}

// =============================================================================
// PackNode
// =============================================================================

/// Pack identifier (index into the tree's pack arena).
pub type PackId = Id<PackNode>;

/// A group of source nodes that will be fused into one widened node.
#[derive(Debug, Clone)]
pub struct PackNode {
    /// The source nodes in lane order.
    nodes: NodeGroup,
    /// Child packs per value-input index, filled in during tree building.
    operands: SmallVec<[Option<PackId>; 4]>,
    /// The 256-bit replacement node, filled in by the rewriter.
    vector_node: Option<NodeId>,
}

impl PackNode {
    fn new(nodes: NodeGroup) -> Self {
        PackNode {
            nodes,
            operands: SmallVec::new(),
            vector_node: None,
        }
    }

    /// The source nodes in lane order.
    #[inline]
    pub fn nodes(&self) -> &NodeGroup {
        &self.nodes
    }

    /// Check whether this pack covers exactly the given group, in order.
    #[inline]
    pub fn is_same(&self, group: &NodeGroup) -> bool {
        self.nodes == *group
    }

    /// Child pack at a value-input index.
    pub fn operand(&self, index: usize) -> Option<PackId> {
        self.operands.get(index).copied().flatten()
    }

    fn set_operand(&mut self, index: usize, child: PackId) {
        if self.operands.len() <= index {
            self.operands.resize(index + 1, None);
        }
        self.operands[index] = Some(child);
    }

    /// Iterate the filled operand slots as (input index, child pack).
    pub fn operands(&self) -> impl Iterator<Item = (usize, PackId)> + '_ {
        self.operands
            .iter()
            .enumerate()
            .filter_map(|(i, child)| child.map(|c| (i, c)))
    }

    /// The widened replacement node, if the rewriter has produced one.
    #[inline]
    pub fn vector_node(&self) -> Option<NodeId> {
        self.vector_node
    }

    /// Record the widened replacement node.
    pub fn set_vector_node(&mut self, node: NodeId) {
        self.vector_node = Some(node);
    }
}

// =============================================================================
// SLP Tree
// =============================================================================

/// The workspace of one SLP tree build.
///
/// Holds the pack arena, the node-to-pack memo, and the cycle-detection
/// stack. Reset at the start of every build; a successful build's packs stay
/// readable until the next build begins.
pub struct SlpTree<'g> {
    /// The scheduled graph being packed.
    graph: &'g Graph,
    /// All packs created by the current build.
    packs: Arena<PackNode>,
    /// Memo from source node to its containing pack.
    node_to_pack: FxHashMap<NodeId, PackId>,
    /// Groups currently being constructed, outermost first.
    stack: Vec<NodeGroup>,
    /// Union of the nodes in the stacked groups.
    on_stack: FxHashSet<NodeId>,
}

impl<'g> SlpTree<'g> {
    /// Create a tree builder over the given graph.
    pub fn new(graph: &'g Graph) -> Self {
        SlpTree {
            graph,
            packs: Arena::new(),
            node_to_pack: FxHashMap::default(),
            stack: Vec::new(),
            on_stack: FxHashSet::default(),
        }
    }

    // =========================================================================
    // Pack Access
    // =========================================================================

    /// Get a pack by ID.
    #[inline]
    pub fn pack(&self, id: PackId) -> &PackNode {
        &self.packs[id]
    }

    /// Get a mutable pack by ID (the rewriter records widened nodes here).
    #[inline]
    pub fn pack_mut(&mut self, id: PackId) -> &mut PackNode {
        &mut self.packs[id]
    }

    /// Number of packs created by the current build.
    #[inline]
    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    /// The pack containing a source node, if any.
    pub fn pack_of(&self, node: NodeId) -> Option<PackId> {
        self.node_to_pack.get(&node).copied()
    }

    /// Iterate over all packs of the current build.
    pub fn packs(&self) -> impl Iterator<Item = (PackId, &PackNode)> {
        self.packs.iter()
    }

    /// Drop all packs, the memo, and the stack.
    pub fn clear(&mut self) {
        self.stack.clear();
        self.on_stack.clear();
        self.node_to_pack.clear();
        self.packs.clear();
    }

    // =========================================================================
    // Tree Building
    // =========================================================================

    /// Build the pack DAG upward from a root group.
    ///
    /// On success the returned pack's transitive operands cover every node
    /// that must be widened and the visit stack is empty. On failure the
    /// builder returns `None` with the memo cleared, leaving the graph
    /// untouched for this seed.
    pub fn build_tree(&mut self, roots: NodeGroup) -> Option<PackId> {
        trace!("Enter build_tree");
        self.clear();

        let root = self.build_tree_rec(roots, 0);
        if root.is_none() {
            // Abandoned recursion leaves stacked groups and partial packs.
            self.clear();
        }
        debug_assert!(root.is_none() || self.stack.is_empty());
        root
    }

    fn build_tree_rec(&mut self, group: NodeGroup, recursion_depth: usize) -> Option<PackId> {
        trace!("Enter build_tree_rec");
        let graph = self.graph;
        let [node0, node1] = group;

        if recursion_depth == RECURSION_MAX_DEPTH {
            trace!("Failed due to max recursion depth!");
            return None;
        }

        if self.all_on_stack(&group) && !self.stack_top_is_phi() {
            trace!(
                "Failed due to ({:?} {}, {:?} {}) on stack!",
                node0,
                graph.node(node0).op,
                node1,
                graph.node(node1).op
            );
            return None;
        }
        self.push_stack(group);

        if !self.can_be_packed(&group) {
            return None;
        }

        debug_assert!(all_constant(graph, &group) || all_same_operator(graph, &group));

        // Check if this is a duplicate of another entry.
        for &node in &group {
            if let Some(pack) = self.pack_of(node) {
                if !self.packs[pack].is_same(&group) {
                    trace!(
                        "Failed due to partial overlap at {:?},{}!",
                        node,
                        graph.node(node).op
                    );
                    return None;
                }

                self.pop_stack();
                trace!("Perfect diamond merge at {:?},{}", node, graph.node(node).op);
                return Some(pack);
            }
        }

        if let Operator::ExtractF128(lane0) = graph.node(node0).op {
            let source = graph.node(node0).value_input(0);
            trace!(
                "Extract leaf node from {:?},{}!",
                source,
                graph.node(source).op
            );
            // For 256-bit packing both extracts must read the same source:
            // a transforming load is a broadcast (one extract used twice),
            // anything else needs adjacent lanes.
            let lanes_fuse = if matches!(graph.node(source).op, Operator::LoadTransform(_)) {
                node0 == node1
            } else {
                graph.node(node1).op.extract_lane_index() == Some(lane0 + 1)
            };
            if source == graph.node(node1).value_input(0) && lanes_fuse {
                trace!("Added a pair of Extract.");
                let pnode = self.new_pack_node(group);
                self.pop_stack();
                return Some(pnode);
            }
            trace!("Failed due to ExtractF128!");
            return None;
        }

        if matches!(
            graph.node(node0).op,
            Operator::ProtectedLoad(_) | Operator::LoadTransform(_)
        ) {
            trace!("Load leaf node");
            if !all_same_address(graph, &group) {
                trace!("Failed due to different load addr!");
                return None;
            }

            if let Operator::ProtectedLoad(rep) = graph.node(node0).op {
                if rep != ValueType::Simd128 {
                    return None;
                }
                // Sort loads by offset
                let mut sorted_node_group = group;
                sorted_node_group.sort_by_key(|&node| memory_offset(graph, node));
                if !is_continuous_access(graph, &sorted_node_group) {
                    trace!("Failed due to non-continuous load!");
                    return None;
                }
            }

            if let Operator::LoadTransform(transformation) = graph.node(node0).op {
                if !is_splat(&group) {
                    trace!("LoadTransform Failed due to IsSplat!");
                    return None;
                }
                if transformation != LoadTransformation::S128Load32Splat
                    && transformation != LoadTransformation::S128Load64Splat
                {
                    trace!("LoadTransform failed due to unsupported type {:?}!", node0);
                    return None;
                }
            }

            if !self.is_side_effect_free_load(&group) {
                trace!("Failed due to dependency check");
                return None;
            }
            let pnode = self.new_pack_node(group);
            self.pop_stack();
            return Some(pnode);
        }

        let value_in_count = graph.node(node0).value_input_count();
        match graph.node(node0).op {
            Operator::Phi(rep) => {
                trace!("Added a vector of PHI nodes.");
                if rep != ValueType::Simd128 {
                    return None;
                }
                let pnode = self.new_pack_node_and_recurse(group, 0, value_in_count, recursion_depth);
                self.pop_stack();
                pnode
            }
            Operator::LoopExitValue(rep) => {
                if rep != ValueType::Simd128 {
                    return None;
                }
                let pnode = self.new_pack_node_and_recurse(group, 0, value_in_count, recursion_depth);
                self.pop_stack();
                pnode
            }
            Operator::Simd128(Simd128Op::F32x4Add | Simd128Op::F32x4Mul) => {
                trace!("Added a vector of un/bin op.");
                let pnode = self.new_pack_node_and_recurse(group, 0, value_in_count, recursion_depth);
                self.pop_stack();
                pnode
            }
            Operator::Store(_) | Operator::ProtectedStore(_) => {
                trace!("Added a vector of stores.");
                if !all_same_address(graph, &group) {
                    trace!("Failed due to different store addr!");
                    return None;
                }
                // Inputs 0 (memory base) and 1 (index) are shared; only the
                // stored value is packed.
                let pnode = self.new_pack_node_and_recurse(group, 2, 1, recursion_depth);
                self.pop_stack();
                pnode
            }
            ref op => {
                trace!("Default branch {:?}:{}", node0, op);
                None
            }
        }
    }

    /// Create a pack for the group and memoize its members.
    fn new_pack_node(&mut self, group: NodeGroup) -> PackId {
        trace!(
            "PackNode {}({:?}, {:?})",
            self.graph.node(group[0]).op,
            group[0],
            group[1]
        );
        let pnode = self.packs.alloc(PackNode::new(group));
        for &node in &group {
            self.node_to_pack.insert(node, pnode);
        }
        pnode
    }

    /// Create a pack and recurse on `count` value inputs starting at
    /// `start_index`, linking each child pack into the operand table.
    fn new_pack_node_and_recurse(
        &mut self,
        group: NodeGroup,
        start_index: usize,
        count: usize,
        recursion_depth: usize,
    ) -> Option<PackId> {
        let graph = self.graph;
        let pnode = self.new_pack_node(group);
        for i in start_index..start_index + count {
            let operands = [
                graph.node(group[0]).value_input(i),
                graph.node(group[1]).value_input(i),
            ];
            let child = self.build_tree_rec(operands, recursion_depth + 1)?;
            self.packs[pnode].set_operand(i, child);
        }
        Some(pnode)
    }

    // =========================================================================
    // Legality
    // =========================================================================

    /// Structural gate every group must pass before opcode dispatch.
    fn can_be_packed(&self, group: &NodeGroup) -> bool {
        let graph = self.graph;
        let [node0, node1] = *group;
        if !graph.same_basic_block(node0, node1) {
            trace!(
                "{}({:?}, {:?}) not in same BB!",
                graph.node(node0).op,
                node0,
                node1
            );
            return false;
        }
        if !all_same_operator(graph, group) {
            trace!(
                "{}({:?}, {:?}) have different operator!",
                graph.node(node0).op,
                node0,
                node1
            );
            return false;
        }
        if all_constant(graph, group) {
            trace!(
                "{}({:?}, {:?}) are constant, not supported yet!",
                graph.node(node0).op,
                node0,
                node1
            );
            return false;
        }

        // Only SIMD-128 operators, or common operators that can carry a
        // Simd128 representation. The root's representation was checked by
        // the seed collector and leaf representations are checked in the
        // leaf handlers, so only the opcode is tested here.
        let op = &graph.node(node0).op;
        op.is_simd128_operation()
            || matches!(
                op,
                Operator::Store(_)
                    | Operator::ProtectedStore(_)
                    | Operator::Load(_)
                    | Operator::ProtectedLoad(_)
                    | Operator::Phi(_)
                    | Operator::LoopExitValue(_)
                    | Operator::ExtractF128(_)
            )
    }

    /// Prove that packing the load group does not reorder the loads across
    /// effects of the computation being packed above them.
    ///
    /// Walks backward from every non-control input of every load, skipping
    /// inputs inside the group. Reaching a node on the visit stack means the
    /// load depends on an in-flight packed computation. Inputs outside the
    /// loads' basic block were ordered by cross-block scheduling already and
    /// end the walk along that edge.
    fn is_side_effect_free_load(&self, group: &NodeGroup) -> bool {
        let graph = self.graph;
        #[cfg(debug_assertions)]
        debug_assert!(is_supported_load(graph, group));
        trace!(
            "Enter is_side_effect_free_load ({:?} {}, {:?} {})",
            group[0],
            graph.node(group[0]).op,
            group[1],
            graph.node(group[1]).op
        );

        let mut to_visit: Vec<NodeId> = Vec::new();
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();

        for &load in group {
            let node = graph.node(load);
            for &input in &node.inputs()[..node.first_control_index()] {
                if !group.contains(&input) {
                    to_visit.push(input);
                }
            }
        }

        while let Some(input) = to_visit.pop() {
            trace!(
                "is_side_effect_free_load visit ({:?} {})",
                input,
                graph.node(input).op
            );
            if visited.insert(input) {
                if self.on_stack.contains(&input) {
                    trace!(
                        "Has internal dependency because ({:?} {}) on stack",
                        input,
                        graph.node(input).op
                    );
                    return false;
                }

                if graph.same_basic_block(input, group[0]) {
                    let node = graph.node(input);
                    for &next in &node.inputs()[..node.first_control_index()] {
                        to_visit.push(next);
                    }
                }
            }
        }
        true
    }

    // =========================================================================
    // Visit Stack
    // =========================================================================

    fn push_stack(&mut self, group: NodeGroup) {
        trace!(
            "Stack Push ({:?} {}, {:?} {})",
            group[0],
            self.graph.node(group[0]).op,
            group[1],
            self.graph.node(group[1]).op
        );
        for &node in &group {
            self.on_stack.insert(node);
        }
        self.stack.push(group);
    }

    fn pop_stack(&mut self) {
        if let Some(group) = self.stack.pop() {
            trace!(
                "Stack Pop ({:?} {}, {:?} {})",
                group[0],
                self.graph.node(group[0]).op,
                group[1],
                self.graph.node(group[1]).op
            );
            for &node in &group {
                self.on_stack.remove(&node);
            }
        }
    }

    fn all_on_stack(&self, group: &NodeGroup) -> bool {
        group.iter().all(|node| self.on_stack.contains(node))
    }

    fn stack_top_is_phi(&self) -> bool {
        self.stack
            .last()
            .is_some_and(|group| self.graph.node(group[0]).is_phi())
    }

    // =========================================================================
    // Printing
    // =========================================================================

    /// Trace every distinct pack of the current build.
    pub fn print(&self, info: &str) {
        trace!("{}, Packed node:", info);
        if !log::log_enabled!(target: "revec", log::Level::Trace) {
            return;
        }

        let mut visited: FxHashSet<PackId> = FxHashSet::default();
        for &pnode in self.node_to_pack.values() {
            if visited.insert(pnode) {
                self.print_pack(pnode);
            }
        }
    }

    fn print_pack(&self, id: PackId) {
        let pack = &self.packs[id];
        let [node0, node1] = *pack.nodes();
        match pack.vector_node() {
            Some(vector) => trace!(
                "{} {:?}:{}({:?} {:?}, {})",
                id,
                vector,
                self.graph.node(vector).op,
                node0,
                node1,
                self.graph.node(node0).op
            ),
            None => trace!(
                "{} null({:?} {:?}, {})",
                id,
                node0,
                node1,
                self.graph.node(node0).op
            ),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    /// Memory environment shared by the scenario graphs: a memory-start
    /// pointer loaded from the instance and an index widened from 32 bits.
    struct TestEnv {
        graph: Graph,
        mem_start: NodeId,
        index: NodeId,
        effect: NodeId,
        control: NodeId,
    }

    fn test_env() -> TestEnv {
        let mut graph = Graph::new();
        let start = graph.start();
        let instance = graph.parameter(0);
        let field_offset = graph.int64_constant(8);
        let mem_start =
            graph.load_from_object(ValueType::Int64, instance, field_offset, start);
        let index32 = graph.parameter(1);
        let index = graph.change_uint32_to_uint64(index32);
        TestEnv {
            graph,
            mem_start,
            index,
            effect: start,
            control: start,
        }
    }

    impl TestEnv {
        fn base_at(&mut self, offset: i64) -> NodeId {
            if offset == 0 {
                self.mem_start
            } else {
                let c = self.graph.int64_constant(offset);
                self.graph.int64_add(self.mem_start, c)
            }
        }

        fn load_at(&mut self, offset: i64) -> NodeId {
            let base = self.base_at(offset);
            self.graph.protected_load(
                ValueType::Simd128,
                base,
                self.index,
                self.effect,
                self.control,
            )
        }

        /// Store chained on the environment's running effect.
        fn store_at(&mut self, offset: i64, value: NodeId) -> NodeId {
            let base = self.base_at(offset);
            let store = self.graph.protected_store(
                ValueType::Simd128,
                base,
                self.index,
                value,
                self.effect,
                self.control,
            );
            self.effect = store;
            store
        }
    }

    /// Builds the S2 shape: stores of `F32x4Add` over two adjacent load
    /// pairs. Returns (env, stores, adds, a-loads, b-loads).
    #[allow(clippy::type_complexity)]
    fn add_tree_env() -> (TestEnv, NodeGroup, NodeGroup, NodeGroup, NodeGroup) {
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);
        let b0 = env.load_at(32);
        let b1 = env.load_at(48);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, a0, b0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Add, a1, b1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);
        (env, [s0, s1], [v0, v1], [a0, a1], [b0, b1])
    }

    fn assert_no_shared_nodes(tree: &SlpTree<'_>) {
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        for (_, pack) in tree.packs() {
            let mut in_pack: FxHashSet<NodeId> = FxHashSet::default();
            for &node in pack.nodes() {
                if in_pack.insert(node) {
                    assert!(seen.insert(node), "two packs share {:?}", node);
                }
            }
        }
    }

    fn assert_memo_consistent(tree: &SlpTree<'_>) {
        for (&node, &pack) in &tree.node_to_pack {
            assert!(tree.pack(pack).nodes().contains(&node));
        }
    }

    // -------------------------------------------------------------------------
    // PackNode Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_pack_node_operands_sparse() {
        let mut pack = PackNode::new([NodeId::new(1), NodeId::new(2)]);
        assert_eq!(pack.operand(0), None);
        assert_eq!(pack.operand(2), None);

        pack.set_operand(2, PackId::new(7));
        assert_eq!(pack.operand(0), None);
        assert_eq!(pack.operand(2), Some(PackId::new(7)));
        assert_eq!(pack.operands().collect::<Vec<_>>(), vec![(2, PackId::new(7))]);
    }

    #[test]
    fn test_pack_node_is_same_is_ordered() {
        let pack = PackNode::new([NodeId::new(1), NodeId::new(2)]);
        assert!(pack.is_same(&[NodeId::new(1), NodeId::new(2)]));
        assert!(!pack.is_same(&[NodeId::new(2), NodeId::new(1)]));
    }

    #[test]
    fn test_pack_node_vector_node_slot() {
        let mut pack = PackNode::new([NodeId::new(1), NodeId::new(2)]);
        assert_eq!(pack.vector_node(), None);
        pack.set_vector_node(NodeId::new(9));
        assert_eq!(pack.vector_node(), Some(NodeId::new(9)));
    }

    // -------------------------------------------------------------------------
    // Group Predicate Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_group_predicates() {
        let mut env = test_env();
        let c0 = env.graph.int64_constant(42);
        let c1 = env.graph.int64_constant(42);
        let p = env.graph.parameter(5);
        assert!(all_constant(&env.graph, &[c0, c1]));
        assert!(!all_constant(&env.graph, &[c0, p]));

        assert!(is_splat(&[c0, c0]));
        assert!(!is_splat(&[c0, c1]));

        assert!(all_same_operator(&env.graph, &[c0, c1]));
        let c2 = env.graph.int64_constant(43);
        assert!(!all_same_operator(&env.graph, &[c0, c2]));
    }

    #[test]
    fn test_extract_operators_compare_by_opcode() {
        let mut env = test_env();
        let src = env.graph.parameter(3);
        let e0 = env.graph.extract_f128(0, src);
        let e1 = env.graph.extract_f128(1, src);
        assert!(all_same_operator(&env.graph, &[e0, e1]));
    }

    #[test]
    fn test_all_same_address() {
        let mut env = test_env();
        let l0 = env.load_at(0);
        let l1 = env.load_at(16);
        assert!(all_same_address(&env.graph, &[l0, l1]));

        let other_index = env.graph.parameter(7);
        let base = env.base_at(0);
        let l2 = env.graph.protected_load(
            ValueType::Simd128,
            base,
            other_index,
            env.effect,
            env.control,
        );
        assert!(!all_same_address(&env.graph, &[l0, l2]));
    }

    // -------------------------------------------------------------------------
    // Scenario Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_constant_values_cannot_pack() {
        // S1: both stored values are constants.
        let mut env = test_env();
        let c0 = env.graph.int64_constant(42);
        let c1 = env.graph.int64_constant(42);
        let s0 = env.store_at(0, c0);
        let s1 = env.store_at(16, c1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
        assert!(tree.node_to_pack.is_empty());
        assert!(tree.stack.is_empty());
    }

    #[test]
    fn test_store_add_load_tree() {
        // S2: stores of adds over two adjacent load pairs.
        let (env, stores, adds, a_loads, b_loads) = add_tree_env();

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree(stores).expect("tree should build");

        let root_pack = tree.pack(root);
        assert_eq!(root_pack.nodes(), &stores);

        let add = root_pack.operand(2).expect("store packs its value input");
        let add_pack = tree.pack(add);
        assert_eq!(add_pack.nodes(), &adds);

        let lhs = add_pack.operand(0).expect("lhs loads packed");
        let rhs = add_pack.operand(1).expect("rhs loads packed");
        assert_eq!(tree.pack(lhs).nodes(), &a_loads);
        assert_eq!(tree.pack(rhs).nodes(), &b_loads);

        assert_eq!(tree.pack_count(), 4);
        assert_memo_consistent(&tree);
        assert_no_shared_nodes(&tree);
        assert!(tree.stack.is_empty());
    }

    #[test]
    fn test_tree_build_is_idempotent() {
        let (env, stores, ..) = add_tree_env();
        let mut tree = SlpTree::new(&env.graph);

        let first = tree.build_tree(stores).expect("first build");
        let first_shape: Vec<(NodeGroup, Vec<(usize, u32)>)> = tree
            .packs()
            .map(|(_, p)| (*p.nodes(), p.operands().map(|(i, c)| (i, c.index())).collect()))
            .collect();

        let second = tree.build_tree(stores).expect("second build");
        let second_shape: Vec<(NodeGroup, Vec<(usize, u32)>)> = tree
            .packs()
            .map(|(_, p)| (*p.nodes(), p.operands().map(|(i, c)| (i, c.index())).collect()))
            .collect();

        assert_eq!(first, second);
        assert_eq!(first_shape, second_shape);
    }

    #[test]
    fn test_gapped_loads_fail() {
        // S3 variant at the builder level: the b-loads leave a gap.
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);
        let b0 = env.load_at(32);
        let b1 = env.load_at(64); // gap
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, a0, b0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Add, a1, b1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
        assert!(tree.node_to_pack.is_empty(), "failure clears the memo");
    }

    #[test]
    fn test_reversed_loads_pack_after_offset_sort() {
        // Lane order reverses the offsets; the load leaf sorts a copy before
        // the continuity check, so the pack keeps the group's lane order.
        let mut env = test_env();
        let a0 = env.load_at(16);
        let a1 = env.load_at(0);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Mul, a0, a0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Mul, a1, a1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([s0, s1]).expect("tree should build");
        let add = tree.pack(tree.pack(root).operand(2).unwrap()).operand(0).unwrap();
        assert_eq!(tree.pack(add).nodes(), &[a0, a1]);
    }

    #[test]
    fn test_extract_pair_tree() {
        // S4: stores of ExtractF128 lanes 0 and 1 from one 256-bit source.
        let mut env = test_env();
        let src = env.graph.parameter(3);
        let e0 = env.graph.extract_f128(0, src);
        let e1 = env.graph.extract_f128(1, src);
        let s0 = env.store_at(0, e0);
        let s1 = env.store_at(16, e1);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([s0, s1]).expect("tree should build");

        let extract = tree.pack(root).operand(2).expect("extract leaf");
        let extract_pack = tree.pack(extract);
        assert_eq!(extract_pack.nodes(), &[e0, e1]);
        assert_eq!(extract_pack.operands().count(), 0, "extract is a leaf");
    }

    #[test]
    fn test_extract_wrong_lane_order_fails() {
        let mut env = test_env();
        let src = env.graph.parameter(3);
        let e0 = env.graph.extract_f128(1, src);
        let e1 = env.graph.extract_f128(0, src);
        let s0 = env.store_at(0, e0);
        let s1 = env.store_at(16, e1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_extract_different_sources_fail() {
        let mut env = test_env();
        let src0 = env.graph.parameter(3);
        let src1 = env.graph.parameter(4);
        let e0 = env.graph.extract_f128(0, src0);
        let e1 = env.graph.extract_f128(1, src1);
        let s0 = env.store_at(0, e0);
        let s1 = env.store_at(16, e1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_phi_self_cycle_packs() {
        // S5: each lane's value is a phi whose back-edge input is itself.
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);

        let loop_block = env.graph.add_block();
        env.graph.set_current_block(loop_block);
        let hdr = env.graph.loop_header(env.control);
        let phi0 = env.graph.phi(ValueType::Simd128, &[a0, a0], hdr);
        let phi1 = env.graph.phi(ValueType::Simd128, &[a1, a1], hdr);
        env.graph.set_value_input(phi0, 1, phi0);
        env.graph.set_value_input(phi1, 1, phi1);

        env.control = hdr;
        let s0 = env.store_at(0, phi0);
        let s1 = env.store_at(16, phi1);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([s0, s1]).expect("phi cycle should pack");

        let phi_pack_id = tree.pack(root).operand(2).expect("phi pack");
        let phi_pack = tree.pack(phi_pack_id);
        assert_eq!(phi_pack.nodes(), &[phi0, phi1]);
        // Back edge resolves to the phi pack itself by diamond merge.
        assert_eq!(phi_pack.operand(1), Some(phi_pack_id));
        assert!(tree.stack.is_empty());
    }

    #[test]
    fn test_cycle_without_phi_fails() {
        // A self-referential non-phi cycle must be rejected by the guard.
        let mut env = test_env();
        let b0 = env.load_at(0);
        let b1 = env.load_at(16);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, b0, b0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Add, b1, b1);
        env.graph.set_value_input(v0, 0, v0);
        env.graph.set_value_input(v1, 0, v1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_loop_exit_value_packs() {
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);
        let exit = env.graph.loop_exit(env.control);
        let lev0 = env.graph.loop_exit_value(ValueType::Simd128, a0, exit);
        let lev1 = env.graph.loop_exit_value(ValueType::Simd128, a1, exit);
        let s0 = env.store_at(0, lev0);
        let s1 = env.store_at(16, lev1);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([s0, s1]).expect("loop exit values pack");

        let lev = tree.pack(root).operand(2).expect("loop exit pack");
        assert_eq!(tree.pack(lev).nodes(), &[lev0, lev1]);
        let loads = tree.pack(lev).operand(0).expect("load leaf");
        assert_eq!(tree.pack(loads).nodes(), &[a0, a1]);
    }

    #[test]
    fn test_non_simd_loop_exit_value_fails() {
        let mut env = test_env();
        let x = env.graph.parameter(3);
        let y = env.graph.parameter(4);
        let exit = env.graph.loop_exit(env.control);
        let lev0 = env.graph.loop_exit_value(ValueType::Float64, x, exit);
        let lev1 = env.graph.loop_exit_value(ValueType::Float64, y, exit);
        let s0 = env.store_at(0, lev0);
        let s1 = env.store_at(16, lev1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_non_simd_phi_fails() {
        let mut env = test_env();
        let region = env.graph.region(&[env.control]);
        let x = env.graph.parameter(3);
        let y = env.graph.parameter(4);
        let phi0 = env.graph.phi(ValueType::Float64, &[x, y], region);
        let phi1 = env.graph.phi(ValueType::Float64, &[y, x], region);
        let s0 = env.store_at(0, phi0);
        let s1 = env.store_at(16, phi1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_load_transform_splat_packs() {
        // S6: both lanes read the same 32-bit splat load.
        let mut env = test_env();
        let base = env.base_at(0);
        let lt = env.graph.load_transform(
            LoadTransformation::S128Load32Splat,
            base,
            env.index,
            env.effect,
            env.control,
        );
        let s0 = env.store_at(0, lt);
        let s1 = env.store_at(16, lt);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([s0, s1]).expect("splat should pack");
        let splat = tree.pack(root).operand(2).expect("splat leaf");
        assert_eq!(tree.pack(splat).nodes(), &[lt, lt]);
        assert_eq!(tree.pack(splat).operands().count(), 0);
    }

    #[test]
    fn test_extract_broadcast_from_load_transform() {
        // Both lanes store one extract whose source is a transforming load.
        let mut env = test_env();
        let base = env.base_at(0);
        let lt = env.graph.load_transform(
            LoadTransformation::S128Load64Splat,
            base,
            env.index,
            env.effect,
            env.control,
        );
        let extract = env.graph.extract_f128(0, lt);
        let s0 = env.store_at(0, extract);
        let s1 = env.store_at(16, extract);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([s0, s1]).expect("broadcast should pack");
        let leaf = tree.pack(root).operand(2).expect("extract leaf");
        assert_eq!(tree.pack(leaf).nodes(), &[extract, extract]);
    }

    #[test]
    fn test_load_transform_unsupported_kind_fails() {
        let mut env = test_env();
        let base = env.base_at(0);
        let lt = env.graph.load_transform(
            LoadTransformation::S128Load64Zero,
            base,
            env.index,
            env.effect,
            env.control,
        );
        let s0 = env.store_at(0, lt);
        let s1 = env.store_at(16, lt);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_load_transform_non_splat_fails() {
        let mut env = test_env();
        let base = env.base_at(0);
        let lt0 = env.graph.load_transform(
            LoadTransformation::S128Load32Splat,
            base,
            env.index,
            env.effect,
            env.control,
        );
        let lt1 = env.graph.load_transform(
            LoadTransformation::S128Load32Splat,
            base,
            env.index,
            env.effect,
            env.control,
        );
        let s0 = env.store_at(0, lt0);
        let s1 = env.store_at(16, lt1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    // -------------------------------------------------------------------------
    // Legality Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_non_simd128_load_fails() {
        let mut env = test_env();
        let base0 = env.base_at(0);
        let base1 = env.base_at(16);
        let f0 = env
            .graph
            .protected_load(ValueType::Float64, base0, env.index, env.effect, env.control);
        let f1 = env
            .graph
            .protected_load(ValueType::Float64, base1, env.index, env.effect, env.control);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([f0, f1]).is_none());
    }

    #[test]
    fn test_loads_pack_directly_as_root() {
        let mut env = test_env();
        let l0 = env.load_at(0);
        let l1 = env.load_at(16);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([l0, l1]).expect("load pair is a valid root");
        assert_eq!(tree.pack(root).nodes(), &[l0, l1]);
    }

    #[test]
    fn test_mixed_basic_blocks_fail() {
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, a0, a0);

        let other = env.graph.add_block();
        env.graph.set_current_block(other);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Add, a1, a1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_mixed_operators_fail() {
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, a0, a0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Mul, a1, a1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_unsupported_simd_op_fails() {
        // F32x4Sub passes the opcode gate as a SIMD-128 operation but has no
        // recursion rule, so it falls into the default branch.
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Sub, a0, a0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Sub, a1, a1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_diamond_merge_shares_one_pack() {
        // Both add operands resolve to the same load group.
        let mut env = test_env();
        let a0 = env.load_at(0);
        let a1 = env.load_at(16);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Mul, a0, a0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Mul, a1, a1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        let root = tree.build_tree([s0, s1]).expect("diamond should pack");

        let mul = tree.pack(tree.pack(root).operand(2).unwrap());
        assert_eq!(mul.operand(0), mul.operand(1), "one pack for both operands");
        assert_eq!(tree.pack_count(), 3); // stores, muls, loads
        assert_no_shared_nodes(&tree);
    }

    #[test]
    fn test_partial_overlap_fails() {
        // Operand groups [x, y] and [y, z] overlap on y.
        let mut env = test_env();
        let x = env.load_at(0);
        let y = env.load_at(16);
        let z = env.load_at(32);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, x, y);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Add, y, z);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
        assert!(tree.node_to_pack.is_empty());
    }

    #[test]
    fn test_aliasing_load_fails() {
        // The loads sit on the effect chain behind the stores being packed:
        // widening would reorder them across an in-flight computation.
        let mut env = test_env();
        let q0 = env.load_at(64);
        let q1 = env.load_at(80);
        let placeholder = env.graph.parameter(8);
        let s0 = env.store_at(0, placeholder);
        let s1 = env.store_at(16, placeholder);

        let base32 = env.base_at(32);
        let base48 = env.base_at(48);
        let a0 = env
            .graph
            .protected_load(ValueType::Simd128, base32, env.index, s0, env.control);
        let a1 = env
            .graph
            .protected_load(ValueType::Simd128, base48, env.index, s1, env.control);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, a0, q0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Add, a1, q1);
        env.graph.set_value_input(s0, 2, v0);
        env.graph.set_value_input(s1, 2, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_cross_block_effect_chain_is_ignored() {
        // The loads' effect chain leaves the block; cross-block ordering is
        // already fixed, so the walk stops there and the pack succeeds.
        let mut env = test_env();
        let placeholder = env.graph.parameter(8);
        let prior = env.store_at(64, placeholder);

        let body = env.graph.add_block();
        env.graph.set_current_block(body);
        let base0 = env.base_at(0);
        let base16 = env.base_at(16);
        let a0 = env
            .graph
            .protected_load(ValueType::Simd128, base0, env.index, prior, env.control);
        let a1 = env
            .graph
            .protected_load(ValueType::Simd128, base16, env.index, prior, env.control);
        let v0 = env.graph.simd_binop(Simd128Op::F32x4Add, a0, a0);
        let v1 = env.graph.simd_binop(Simd128Op::F32x4Add, a1, a1);
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_some());
    }

    #[test]
    fn test_recursion_depth_guard() {
        // A 16-deep chain of adds pushes the loads past the depth limit.
        let mut env = test_env();
        let mut v0 = env.load_at(0);
        let mut v1 = env.load_at(16);
        for _ in 0..RECURSION_MAX_DEPTH {
            v0 = env.graph.simd_binop(Simd128Op::F32x4Add, v0, v0);
            v1 = env.graph.simd_binop(Simd128Op::F32x4Add, v1, v1);
        }
        let s0 = env.store_at(0, v0);
        let s1 = env.store_at(16, v1);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([s0, s1]).is_none());
    }

    #[test]
    fn test_plain_load_has_no_leaf_rule() {
        // Plain loads pass the opcode gate but only protected and
        // transforming loads have a leaf handler.
        let mut env = test_env();
        let base0 = env.base_at(0);
        let base16 = env.base_at(16);
        let start = env.graph.start();
        let l0 = env.graph.load(ValueType::Simd128, base0, env.index, start);
        let l1 = env.graph.load(ValueType::Simd128, base16, env.index, start);

        let mut tree = SlpTree::new(&env.graph);
        assert!(tree.build_tree([l0, l1]).is_none());
    }
}
