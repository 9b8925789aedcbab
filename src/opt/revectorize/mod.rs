//! Revectorization: fusing pairs of 128-bit SIMD operations into 256-bit
//! operations.
//!
//! WebAssembly SIMD code translated for x86-64 uses 128-bit vectors even on
//! CPUs with 256-bit units. This pass finds pairs of adjacent 128-bit stores
//! and proves, bottom-up through their value dataflow, that both lanes can
//! execute as one 256-bit computation.
//!
//! # Pipeline
//!
//! 1. **Seed collection**: bucket SIMD-128 stores by (scheduled block,
//!    address index), keyed and ordered by static memory offset
//! 2. **Chain reduction**: walk each even-sized chain in offset order,
//!    pairing consecutive stores
//! 3. **Tree building**: grow a [`slp::PackNode`] DAG upward from each pair
//!    (`slp` module)
//!
//! The pass only *plans* the fusion: each pack's `vector_node` slot is
//! filled in later by the 256-bit lowering, which is a separate phase.
//!
//! # Module Structure
//!
//! - `mem`: memory offset decoding and address canonicalization
//! - `slp`: pack representation and the SLP tree builder

/// Trace sink for the pass, in one fixed log target.
macro_rules! trace {
    ($($arg:tt)*) => {
        log::trace!(target: "revec", $($arg)*)
    };
}
pub(crate) use trace;

pub mod mem;
pub mod slp;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::ir::graph::{BlockId, Graph};
use crate::ir::node::NodeId;
use crate::opt::OptimizationPass;

use mem::{is_continuous_access, memory_offset, node_address, SIMD128_BYTES};
pub use slp::{NodeGroup, PackId, PackNode, SlpTree};

// =============================================================================
// SIMD Level
// =============================================================================

/// Target SIMD capability level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SimdLevel {
    /// SSE4.2: 128-bit vectors only.
    Sse42 = 0,
    /// AVX: 256-bit floating-point, integer still 128-bit.
    Avx = 1,
    /// AVX2: full 256-bit integer and float support.
    Avx2 = 2,
    /// AVX-512: 512-bit vectors with masking.
    Avx512 = 3,
}

impl SimdLevel {
    /// Detect the highest SIMD level supported by the current CPU.
    #[cfg(target_arch = "x86_64")]
    pub fn detect() -> Self {
        if is_x86_feature_detected!("avx512f") {
            SimdLevel::Avx512
        } else if is_x86_feature_detected!("avx2") {
            SimdLevel::Avx2
        } else if is_x86_feature_detected!("avx") {
            SimdLevel::Avx
        } else {
            SimdLevel::Sse42
        }
    }

    /// Fallback detection for non-x86 architectures.
    #[cfg(not(target_arch = "x86_64"))]
    pub fn detect() -> Self {
        SimdLevel::Sse42
    }

    /// Whether the level runs full-width 256-bit SIMD. AVX alone lacks the
    /// 256-bit integer operations, so AVX2 is the floor.
    pub const fn supports_simd256(self) -> bool {
        matches!(self, SimdLevel::Avx2 | SimdLevel::Avx512)
    }

    /// Human-readable name for this level.
    pub const fn name(self) -> &'static str {
        match self {
            SimdLevel::Sse42 => "SSE4.2",
            SimdLevel::Avx => "AVX",
            SimdLevel::Avx2 => "AVX2",
            SimdLevel::Avx512 => "AVX-512",
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the revectorization pass.
#[derive(Debug, Clone)]
pub struct RevecConfig {
    /// Target SIMD level gating the pass.
    pub simd_level: SimdLevel,
}

impl Default for RevecConfig {
    /// Probe the CPU the pass will run on.
    fn default() -> Self {
        Self {
            simd_level: SimdLevel::detect(),
        }
    }
}

impl RevecConfig {
    /// Configuration for AVX2 targets.
    pub fn avx2() -> Self {
        Self {
            simd_level: SimdLevel::Avx2,
        }
    }

    /// Configuration for SSE4.2 targets (disables the pass).
    pub fn sse42() -> Self {
        Self {
            simd_level: SimdLevel::Sse42,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from revectorization.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevecStats {
    /// Aligned SIMD-128 stores bucketed as seeds.
    pub stores_collected: usize,
    /// Store chains (distinct (block, address) buckets).
    pub chains_collected: usize,
    /// Successfully built pack trees.
    pub trees_built: usize,
    /// Packs created across all successful trees.
    pub packs_created: usize,
}

impl RevecStats {
    /// Merge statistics from another instance.
    pub fn merge(&mut self, other: &RevecStats) {
        self.stores_collected += other.stores_collected;
        self.chains_collected += other.chains_collected;
        self.trees_built += other.trees_built;
        self.packs_created += other.packs_created;
    }
}

// =============================================================================
// Revectorizer
// =============================================================================

/// Stores of one (block, address) bucket, keyed and ordered by static
/// memory offset. Equal offsets keep the first store inserted.
pub type StoreChain = BTreeMap<i64, NodeId>;

/// The revectorizer driver.
///
/// Owns the SLP tree workspace and the seed buckets for one pass
/// invocation over a scheduled graph.
pub struct Revectorizer<'g> {
    /// The scheduled graph being revectorized.
    graph: &'g Graph,
    /// Pass configuration.
    config: RevecConfig,
    /// SLP tree workspace, reset per seed pair.
    slp: SlpTree<'g>,
    /// Two-level seed buckets: scheduled block, then address index.
    group_of_stores: BTreeMap<BlockId, BTreeMap<NodeId, StoreChain>>,
    /// Accumulated statistics.
    stats: RevecStats,
}

impl<'g> Revectorizer<'g> {
    /// Create a revectorizer probing the current CPU.
    pub fn new(graph: &'g Graph) -> Self {
        Self::with_config(graph, RevecConfig::default())
    }

    /// Create a revectorizer with an explicit configuration.
    pub fn with_config(graph: &'g Graph, config: RevecConfig) -> Self {
        Revectorizer {
            graph,
            config,
            slp: SlpTree::new(graph),
            group_of_stores: BTreeMap::new(),
            stats: RevecStats::default(),
        }
    }

    /// The SLP tree of the most recent successful build.
    pub fn slp_tree(&self) -> &SlpTree<'g> {
        &self.slp
    }

    /// Accumulated statistics.
    pub fn stats(&self) -> &RevecStats {
        &self.stats
    }

    /// Try to revectorize the function's graph.
    ///
    /// Returns true iff at least one SLP tree was built. The graph itself is
    /// untouched; the built pack forest is the plan the 256-bit lowering
    /// consumes.
    pub fn try_revectorize(&mut self, function: &str) -> bool {
        let mut success = false;
        if self.config.simd_level.supports_simd256()
            && self.graph.simd128_stores().next().is_some()
        {
            trace!("TryRevectorize {}", function);
            self.collect_seeds();

            let group_of_stores = std::mem::take(&mut self.group_of_stores);
            self.stats.chains_collected +=
                group_of_stores.values().map(|chains| chains.len()).sum::<usize>();

            for store_chains in group_of_stores.values() {
                self.print_stores(store_chains);
                if self.reduce_store_chains(store_chains) {
                    trace!("Successful revectorize {}", function);
                    success = true;
                }
            }
            trace!("Finish revectorize {}", function);
        }
        success
    }

    /// Bucket every aligned SIMD-128 store by (scheduled block, address).
    fn collect_seeds(&mut self) {
        for node in self.graph.simd128_stores() {
            let dominator = self.graph.early_schedule_position(node);

            let offset = match memory_offset(self.graph, node) {
                Some(offset) if offset % SIMD128_BYTES == 0 => offset,
                _ => continue,
            };
            let address = node_address(self.graph, node);

            let chain = self
                .group_of_stores
                .entry(dominator)
                .or_default()
                .entry(address)
                .or_default();
            if let Entry::Vacant(slot) = chain.entry(offset) {
                slot.insert(node);
                self.stats.stores_collected += 1;
            }
        }
    }

    /// Pair consecutive stores of each even-sized chain and build a tree
    /// per pair.
    fn reduce_store_chains(&mut self, store_chains: &BTreeMap<NodeId, StoreChain>) -> bool {
        trace!("Enter reduce_store_chains");
        let mut changed = false;
        for chain in store_chains.values() {
            if chain.len() >= 2 && chain.len() % 2 == 0 {
                let store_chain: Vec<NodeId> = chain.values().copied().collect();
                for stores_unit in store_chain.chunks_exact(2) {
                    if self.reduce_store_chain([stores_unit[0], stores_unit[1]]) {
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    /// Build one tree from a pair of adjacent stores.
    fn reduce_store_chain(&mut self, stores: NodeGroup) -> bool {
        trace!(
            "Enter reduce_store_chain, root@ ({:?},{:?})",
            stores[0],
            stores[1]
        );
        // Chains are bucketed and offset-sorted already; re-check adjacency
        // so a collector bug cannot seed an illegal pair.
        if !is_continuous_access(self.graph, &stores) {
            return false;
        }

        if self.slp.build_tree(stores).is_none() {
            trace!("Build tree failed!");
            return false;
        }

        self.stats.trees_built += 1;
        self.stats.packs_created += self.slp.pack_count();
        self.slp.print("After build tree");
        true
    }

    /// Trace each bucket's address and member stores.
    fn print_stores(&self, store_chains: &BTreeMap<NodeId, StoreChain>) {
        if !log::log_enabled!(target: "revec", log::Level::Trace) {
            return;
        }
        trace!("Enter print_stores");
        for (address, chain) in store_chains {
            if !chain.is_empty() {
                trace!("address = {:?}:{}", address, self.graph.node(*address).op);
                for node in chain.values() {
                    trace!("{:?}:{}, ", node, self.graph.node(*node).op);
                }
            }
        }
    }
}

// =============================================================================
// Pass
// =============================================================================

/// Revectorization as a graph optimization pass.
pub struct Revectorize {
    /// Configuration.
    config: RevecConfig,
    /// Function label used in trace output.
    function: String,
    /// Accumulated statistics across runs.
    stats: RevecStats,
}

impl Revectorize {
    /// Create the pass probing the current CPU.
    pub fn new() -> Self {
        Self::with_config(RevecConfig::default())
    }

    /// Create the pass with an explicit configuration.
    pub fn with_config(config: RevecConfig) -> Self {
        Revectorize {
            config,
            function: String::new(),
            stats: RevecStats::default(),
        }
    }

    /// Label trace output with the function being compiled.
    pub fn for_function(name: impl Into<String>) -> Self {
        Revectorize {
            function: name.into(),
            ..Self::new()
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RevecConfig {
        &self.config
    }

    /// Get accumulated statistics.
    pub fn stats(&self) -> &RevecStats {
        &self.stats
    }
}

impl Default for Revectorize {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationPass for Revectorize {
    fn name(&self) -> &'static str {
        "revectorize"
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        let mut revectorizer = Revectorizer::with_config(graph, self.config.clone());
        let changed = revectorizer.try_revectorize(&self.function);
        self.stats.merge(revectorizer.stats());
        changed
    }
}

// =============================================================================
// Tests
// =============================================================================
