//! 256-bit SIMD revectorization for a Sea-of-Nodes JIT IR.
//!
//! WebAssembly-to-native translation emits 128-bit SIMD nodes. On CPUs with
//! 256-bit vectors (AVX2) pairs of adjacent 128-bit operations can be fused
//! into single 256-bit operations:
//! - Sea-of-Nodes IR with arena storage and block scheduling (`ir`)
//! - SLP pack discovery seeded from adjacent SIMD stores (`opt::revectorize`)
#![deny(unsafe_op_in_unsafe_fn)]

pub mod ir;
pub mod opt;
