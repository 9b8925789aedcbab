//! Sea-of-Nodes Intermediate Representation.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): Typed-index memory allocation
//! - **Operators** (`operators.rs`): Operator definitions and metadata
//! - **Node** (`node.rs`): IR node definitions with segmented inputs
//! - **Graph** (`graph.rs`): Graph structure with basic-block scheduling
//!
//! # Design Principles
//!
//! - **Arena allocation**: O(1) node creation, cache-friendly traversal
//! - **Index identities**: `Id<T>` instead of pointers, safe to store in maps
//! - **Segmented edges**: value, effect, and control inputs kept distinct

pub mod arena;
pub mod graph;
pub mod node;
pub mod operators;

// Re-export commonly used types
pub use arena::{Arena, Id, SecondaryMap};
pub use graph::{BasicBlock, BlockId, Graph};
pub use node::{Inputs, Node, NodeId};
pub use operators::{ControlOp, LoadTransformation, Operator, Simd128Op, ValueType};
