//! IR operator definitions for the Sea-of-Nodes IR.
//!
//! Operators are organized by category:
//! - **Constants**: Fixed values and parameters
//! - **Scalar integer**: Address arithmetic and width changes
//! - **Memory**: Plain, protected, and transforming loads; stores
//! - **SSA**: Phi and loop-exit merges
//! - **SIMD**: 128-bit lane operations and 256-bit lane extraction
//! - **Control**: Start, region, loop, return
//!
//! An `Operator` value carries both the opcode tag and the opcode-dependent
//! parameters (representation, lane index, transformation kind), so derived
//! equality is "same opcode and same operator parameters".

use std::fmt;

// =============================================================================
// Value Representation
// =============================================================================

/// Machine-level representation of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// 32-bit integer.
    Int32 = 0,
    /// 64-bit integer (also pointers and linear-memory addresses).
    Int64 = 1,
    /// 32-bit float.
    Float32 = 2,
    /// 64-bit float.
    Float64 = 3,
    /// 128-bit SIMD vector.
    Simd128 = 4,
    /// 256-bit SIMD vector (produced by revectorization).
    Simd256 = 5,
    /// Control token (no value).
    Control = 6,
}

impl ValueType {
    /// Width of this representation in bytes (0 for control).
    pub const fn bytes(self) -> usize {
        match self {
            ValueType::Int32 | ValueType::Float32 => 4,
            ValueType::Int64 | ValueType::Float64 => 8,
            ValueType::Simd128 => 16,
            ValueType::Simd256 => 32,
            ValueType::Control => 0,
        }
    }
}

// =============================================================================
// SIMD-128 Operations
// =============================================================================

/// 128-bit SIMD lane operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Simd128Op {
    /// f32x4 lane-wise addition.
    F32x4Add = 0,
    /// f32x4 lane-wise subtraction.
    F32x4Sub = 1,
    /// f32x4 lane-wise multiplication.
    F32x4Mul = 2,
    /// f64x2 lane-wise addition.
    F64x2Add = 3,
    /// f64x2 lane-wise multiplication.
    F64x2Mul = 4,
    /// i32x4 lane-wise addition.
    I32x4Add = 5,
    /// i32x4 lane-wise multiplication.
    I32x4Mul = 6,
    /// i64x2 lane-wise addition.
    I64x2Add = 7,
}

impl Simd128Op {
    /// Instruction mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Simd128Op::F32x4Add => "F32x4Add",
            Simd128Op::F32x4Sub => "F32x4Sub",
            Simd128Op::F32x4Mul => "F32x4Mul",
            Simd128Op::F64x2Add => "F64x2Add",
            Simd128Op::F64x2Mul => "F64x2Mul",
            Simd128Op::I32x4Add => "I32x4Add",
            Simd128Op::I32x4Mul => "I32x4Mul",
            Simd128Op::I64x2Add => "I64x2Add",
        }
    }
}

// =============================================================================
// Load Transformations
// =============================================================================

/// Transformation applied while loading into a 128-bit vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoadTransformation {
    /// Load 8 bits and replicate into every lane.
    S128Load8Splat = 0,
    /// Load 16 bits and replicate into every lane.
    S128Load16Splat = 1,
    /// Load 32 bits and replicate into every lane.
    S128Load32Splat = 2,
    /// Load 64 bits and replicate into every lane.
    S128Load64Splat = 3,
    /// Load 32 bits into lane 0, zero the rest.
    S128Load32Zero = 4,
    /// Load 64 bits into lane 0, zero the rest.
    S128Load64Zero = 5,
}

// =============================================================================
// Control Operators
// =============================================================================

/// Control flow operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlOp {
    /// Start node (entry point).
    Start = 0,
    /// Region (control merge).
    Region = 1,
    /// Loop header.
    Loop = 2,
    /// Loop exit marker.
    LoopExit = 3,
    /// Return from function.
    Return = 4,
}

// =============================================================================
// Operator (Unified)
// =============================================================================

/// Unified operator representation.
///
/// Each variant carries the opcode-dependent parameters, so two operators
/// compare equal exactly when both the opcode and its parameters match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Constants
    /// 64-bit integer constant.
    Int64Constant(i64),
    /// Function parameter.
    Parameter(u16),

    // Scalar integer
    /// 64-bit integer addition (address arithmetic).
    Int64Add,
    /// Zero-extend a 32-bit index to 64 bits (memory32 addressing).
    ChangeUint32ToUint64,

    // Memory
    /// Plain load with the given representation.
    Load(ValueType),
    /// Trap-handler-protected load with the given representation.
    ProtectedLoad(ValueType),
    /// Load from a managed object (instance field, memory start pointer).
    LoadFromObject(ValueType),
    /// Load combined with a lane transformation (splat, zero-extend).
    LoadTransform(LoadTransformation),
    /// Plain store of the given representation.
    Store(ValueType),
    /// Trap-handler-protected store of the given representation.
    ProtectedStore(ValueType),

    // SSA
    /// Phi merging one value per predecessor; parameter is the merged
    /// representation.
    Phi(ValueType),
    /// Value renamed on loop exit; parameter is the representation.
    LoopExitValue(ValueType),

    // SIMD
    /// 128-bit SIMD lane operation.
    Simd128(Simd128Op),
    /// Extract the 128-bit half at the given lane from a 256-bit vector.
    ExtractF128(i32),

    // Control
    /// Control operation.
    Control(ControlOp),
}

impl Operator {
    /// Check if this operator is a true constant.
    #[inline]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Operator::Int64Constant(_))
    }

    /// Check if this operator is a phi.
    #[inline]
    pub const fn is_phi(&self) -> bool {
        matches!(self, Operator::Phi(_))
    }

    /// Check if this operator is a 128-bit SIMD operation.
    ///
    /// Covers lane operations and transforming loads; stores and plain loads
    /// of Simd128 values are memory operators, not SIMD operators.
    #[inline]
    pub const fn is_simd128_operation(&self) -> bool {
        matches!(self, Operator::Simd128(_) | Operator::LoadTransform(_))
    }

    /// Check if this operator is a control operation.
    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self, Operator::Control(_))
    }

    /// Representation loaded by a load operator.
    pub const fn load_representation(&self) -> Option<ValueType> {
        match self {
            Operator::Load(rep) | Operator::ProtectedLoad(rep) | Operator::LoadFromObject(rep) => {
                Some(*rep)
            }
            _ => None,
        }
    }

    /// Representation stored by a store operator.
    pub const fn store_representation(&self) -> Option<ValueType> {
        match self {
            Operator::Store(rep) | Operator::ProtectedStore(rep) => Some(*rep),
            _ => None,
        }
    }

    /// Representation merged by a phi.
    pub const fn phi_representation(&self) -> Option<ValueType> {
        match self {
            Operator::Phi(rep) => Some(*rep),
            _ => None,
        }
    }

    /// Representation carried by a loop-exit value.
    pub const fn loop_exit_value_representation(&self) -> Option<ValueType> {
        match self {
            Operator::LoopExitValue(rep) => Some(*rep),
            _ => None,
        }
    }

    /// Transformation of a transforming load.
    pub const fn load_transform_params(&self) -> Option<LoadTransformation> {
        match self {
            Operator::LoadTransform(t) => Some(*t),
            _ => None,
        }
    }

    /// Lane index of a 128-bit extract from a 256-bit vector.
    pub const fn extract_lane_index(&self) -> Option<i32> {
        match self {
            Operator::ExtractF128(lane) => Some(*lane),
            _ => None,
        }
    }

    /// Operator mnemonic for diagnostics.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Operator::Int64Constant(_) => "Int64Constant",
            Operator::Parameter(_) => "Parameter",
            Operator::Int64Add => "Int64Add",
            Operator::ChangeUint32ToUint64 => "ChangeUint32ToUint64",
            Operator::Load(_) => "Load",
            Operator::ProtectedLoad(_) => "ProtectedLoad",
            Operator::LoadFromObject(_) => "LoadFromObject",
            Operator::LoadTransform(_) => "LoadTransform",
            Operator::Store(_) => "Store",
            Operator::ProtectedStore(_) => "ProtectedStore",
            Operator::Phi(_) => "Phi",
            Operator::LoopExitValue(_) => "LoopExitValue",
            Operator::Simd128(op) => op.mnemonic(),
            Operator::ExtractF128(_) => "ExtractF128",
            Operator::Control(ControlOp::Start) => "Start",
            Operator::Control(ControlOp::Region) => "Region",
            Operator::Control(ControlOp::Loop) => "Loop",
            Operator::Control(ControlOp::LoopExit) => "LoopExit",
            Operator::Control(ControlOp::Return) => "Return",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// =============================================================================
// Tests
// =============================================================================
