//! Sea-of-Nodes graph structure with basic-block scheduling.
//!
//! The graph provides:
//! - **Arena-based storage**: Efficient node allocation and traversal
//! - **Block schedule**: Every node is created in the current basic block,
//!   the way a scheduled graph looks after the scheduler has run
//! - **Typed constructors**: One helper per operator family keeps the
//!   value/effect/control segmentation in a single place
//!
//! Late passes such as revectorization run over the scheduled graph, so
//! block identity is part of the node model here rather than a separate
//! side analysis.

use super::arena::{Arena, Id, SecondaryMap};
use super::node::{Inputs, Node, NodeId};
use super::operators::{ControlOp, LoadTransformation, Operator, Simd128Op, ValueType};

// =============================================================================
// Basic Block
// =============================================================================

/// A basic block of the schedule.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    /// Nodes scheduled in this block, in creation order.
    pub nodes: Vec<NodeId>,
}

/// Block identifier.
pub type BlockId = Id<BasicBlock>;

// =============================================================================
// Graph
// =============================================================================

/// A scheduled Sea-of-Nodes graph.
///
/// The graph owns all nodes and the block assignment. Passes read nodes by
/// [`NodeId`]; only graph construction mutates edges.
pub struct Graph {
    /// Arena for node storage.
    nodes: Arena<Node>,
    /// Arena for basic blocks.
    blocks: Arena<BasicBlock>,
    /// Block each node is scheduled in.
    block_of: SecondaryMap<Node, BlockId>,
    /// Block receiving newly created nodes.
    current_block: BlockId,
    /// The start node (control entry).
    start: NodeId,
}

impl Graph {
    /// Create a new graph with an entry block holding the start node.
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Arena::with_capacity(64),
            blocks: Arena::new(),
            block_of: SecondaryMap::new(),
            current_block: BlockId::INVALID,
            start: NodeId::INVALID,
        };
        let entry = graph.add_block();
        graph.set_current_block(entry);
        graph.start = graph.add_node(Operator::Control(ControlOp::Start), Inputs::none());
        graph
    }

    // =========================================================================
    // Node and Block Access
    // =========================================================================

    /// Get a reference to a node.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Get the number of nodes in the graph.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty (start node only).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// The start node.
    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    /// Iterate over all nodes with their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Get a block.
    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    /// Append a new empty basic block.
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.alloc(BasicBlock::default())
    }

    /// Direct newly created nodes into the given block.
    pub fn set_current_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    /// The block currently receiving new nodes.
    #[inline]
    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    // =========================================================================
    // Schedule Queries
    // =========================================================================

    /// Block the node is scheduled in.
    #[inline]
    pub fn block_of(&self, node: NodeId) -> BlockId {
        self.block_of[node]
    }

    /// Check whether two nodes are scheduled in the same basic block.
    #[inline]
    pub fn same_basic_block(&self, a: NodeId, b: NodeId) -> bool {
        self.block_of[a] == self.block_of[b]
    }

    /// Earliest dominator position at which the node may be scheduled.
    ///
    /// Effect-anchored nodes (loads, stores) cannot move out of the block
    /// their effect chain runs through, so their scheduled block is also
    /// their earliest position. Callers use this only as a grouping key.
    #[inline]
    pub fn early_schedule_position(&self, node: NodeId) -> BlockId {
        self.block_of[node]
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node to the graph in the current block.
    pub fn add_node(&mut self, op: Operator, inputs: Inputs) -> NodeId {
        debug_assert!(self.current_block.is_valid());
        let id = self.nodes.alloc(Node::new(op, inputs));
        self.block_of.set(id, self.current_block);
        self.blocks[self.current_block].nodes.push(id);
        id
    }

    /// Replace a value input; used to close loop back-edges after the
    /// target node exists.
    pub fn set_value_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let n = &mut self.nodes[node];
        debug_assert!(index < n.value_input_count());
        n.inputs_mut()[index] = new_input;
    }

    // =========================================================================
    // Constants and Scalar Operations
    // =========================================================================

    /// Create a 64-bit integer constant.
    pub fn int64_constant(&mut self, value: i64) -> NodeId {
        self.add_node(Operator::Int64Constant(value), Inputs::none())
    }

    /// Create a function parameter.
    pub fn parameter(&mut self, index: u16) -> NodeId {
        self.add_node(Operator::Parameter(index), Inputs::none())
    }

    /// Create a 64-bit integer addition.
    pub fn int64_add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Int64Add, Inputs::values(&[lhs, rhs]))
    }

    /// Zero-extend a 32-bit index to 64 bits.
    pub fn change_uint32_to_uint64(&mut self, input: NodeId) -> NodeId {
        self.add_node(Operator::ChangeUint32ToUint64, Inputs::values(&[input]))
    }

    // =========================================================================
    // Memory Operations
    // =========================================================================

    /// Create a plain load.
    pub fn load(&mut self, rep: ValueType, base: NodeId, index: NodeId, effect: NodeId) -> NodeId {
        self.add_node(
            Operator::Load(rep),
            Inputs::values(&[base, index]).with_effect(effect),
        )
    }

    /// Create a trap-handler-protected load.
    pub fn protected_load(
        &mut self,
        rep: ValueType,
        base: NodeId,
        index: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.add_node(
            Operator::ProtectedLoad(rep),
            Inputs::values(&[base, index])
                .with_effect(effect)
                .with_control(control),
        )
    }

    /// Create a load from a managed object (e.g. the memory start pointer
    /// out of the instance).
    pub fn load_from_object(
        &mut self,
        rep: ValueType,
        object: NodeId,
        offset: NodeId,
        effect: NodeId,
    ) -> NodeId {
        self.add_node(
            Operator::LoadFromObject(rep),
            Inputs::values(&[object, offset]).with_effect(effect),
        )
    }

    /// Create a transforming load (splat or zero-extend).
    pub fn load_transform(
        &mut self,
        transformation: LoadTransformation,
        base: NodeId,
        index: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.add_node(
            Operator::LoadTransform(transformation),
            Inputs::values(&[base, index])
                .with_effect(effect)
                .with_control(control),
        )
    }

    /// Create a plain store.
    pub fn store(
        &mut self,
        rep: ValueType,
        base: NodeId,
        index: NodeId,
        value: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.add_node(
            Operator::Store(rep),
            Inputs::values(&[base, index, value])
                .with_effect(effect)
                .with_control(control),
        )
    }

    /// Create a trap-handler-protected store.
    pub fn protected_store(
        &mut self,
        rep: ValueType,
        base: NodeId,
        index: NodeId,
        value: NodeId,
        effect: NodeId,
        control: NodeId,
    ) -> NodeId {
        self.add_node(
            Operator::ProtectedStore(rep),
            Inputs::values(&[base, index, value])
                .with_effect(effect)
                .with_control(control),
        )
    }

    // =========================================================================
    // SSA and Control
    // =========================================================================

    /// Create a phi merging one value per predecessor of `control`.
    pub fn phi(&mut self, rep: ValueType, values: &[NodeId], control: NodeId) -> NodeId {
        self.add_node(Operator::Phi(rep), Inputs::values(values).with_control(control))
    }

    /// Create a loop-exit value renaming.
    pub fn loop_exit_value(&mut self, rep: ValueType, value: NodeId, control: NodeId) -> NodeId {
        self.add_node(
            Operator::LoopExitValue(rep),
            Inputs::values(&[value]).with_control(control),
        )
    }

    /// Create a region (control merge) node.
    pub fn region(&mut self, preds: &[NodeId]) -> NodeId {
        let mut inputs = Inputs::none();
        for &pred in preds {
            inputs = inputs.with_control(pred);
        }
        self.add_node(Operator::Control(ControlOp::Region), inputs)
    }

    /// Create a loop header with an entry edge; the back edge is patched in
    /// once the loop body exists.
    pub fn loop_header(&mut self, entry: NodeId) -> NodeId {
        self.add_node(Operator::Control(ControlOp::Loop), Inputs::none().with_control(entry))
    }

    /// Create a loop exit marker.
    pub fn loop_exit(&mut self, control: NodeId) -> NodeId {
        self.add_node(
            Operator::Control(ControlOp::LoopExit),
            Inputs::none().with_control(control),
        )
    }

    // =========================================================================
    // SIMD Operations
    // =========================================================================

    /// Create a 128-bit SIMD lane operation.
    pub fn simd_binop(&mut self, op: Simd128Op, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Simd128(op), Inputs::values(&[lhs, rhs]))
    }

    /// Extract the 128-bit half at `lane` from a 256-bit vector.
    pub fn extract_f128(&mut self, lane: i32, input: NodeId) -> NodeId {
        self.add_node(Operator::ExtractF128(lane), Inputs::values(&[input]))
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Iterate over all stores of 128-bit SIMD values.
    pub fn simd128_stores(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().filter_map(|(id, node)| {
            (node.op.store_representation() == Some(ValueType::Simd128)).then_some(id)
        })
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.nodes.len())?;
        for (id, node) in self.iter() {
            writeln!(f, "  {:?}: {} {:?}", id, node.op, node.inputs())?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
