//! Data Flow Analysis
//!
//! Generic forward GEN/KILL/IN/OUT solver over the basic blocks of a function,
//! and the constant-store problem the optimizer runs on it.
//!
//! # Memory Optimizations
//! - Every set is a `BitVec<u32, Lsb0>` indexed by arena slot instead of a
//!   `HashSet<InstId>`: one bit per instruction, union is a word-wise OR
//! - Predecessor lists come from a `ControlFlowGraph` built once per solve
//!
//! # Data Flow Analysis Algorithms
//! ## Forward solver
//! - **in[B]**: union of out[P] over the predecessors P of B
//! - **out[B]**: gen[B] ∪ (in[B] − kill[B])
//!
//! Starts from in[B] = ∅ and out[B] = gen[B], sweeps the blocks in
//! declaration order and stops after the first sweep that changes no out set.
//! The sets only grow, so the sweep count is bounded by the set width.
//!
//! ## Constant stores
//! The facts are all stores, numbered in block-then-instruction order (`S`).
//! A store of a constant (`store c, A`) carries `c`; any other store is an
//! unknown value for A. A later store to the same target shadows an earlier
//! one, whatever it writes.

use crate::compiler::analysis::control_flow::ControlFlowGraph;
use crate::compiler::error::Result;
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::{BlockId, InstId, InstKind, Value};
use bitvec::prelude::*;
use std::collections::HashMap;

/// Set of instructions, one bit per arena slot.
pub type InstSet = BitVec<u32, Lsb0>;

/// Empty set of the given width.
#[inline]
pub fn empty_set(width: usize) -> InstSet {
    bitvec![u32, Lsb0; 0; width]
}

/// A forward data-flow problem: the per-block transfer function.
pub trait DataFlowProblem {
    /// Width of every set (number of addressable facts).
    fn width(&self) -> usize;

    /// Facts a block creates and that survive to its end.
    fn gen_set(&self, function: &Function, block: BlockId) -> Result<InstSet>;

    /// Facts a block invalidates.
    fn kill_set(&self, function: &Function, block: BlockId) -> Result<InstSet>;
}

/// Per-block sets after convergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMetadata {
    pub gen: InstSet,
    pub kill: InstSet,
    pub in_set: InstSet,
    pub out_set: InstSet,
}

/// Solution of a data-flow problem.
#[derive(Debug, Clone)]
pub struct DataFlowResult {
    /// Indexed by block position
    pub blocks: Vec<BlockMetadata>,
    /// Number of sweeps, the final unchanged one included
    pub iterations: usize,
}

impl DataFlowResult {
    #[inline]
    pub fn block(&self, id: BlockId) -> Option<&BlockMetadata> {
        self.blocks.get(id.index())
    }
}

/// Data flow analyzer.
pub struct DataFlowAnalyzer;

impl DataFlowAnalyzer {
    /// Solve a forward problem to its fixed point.
    ///
    /// # Arguments
    /// * `function` - Function whose blocks are analyzed
    /// * `cfg` - Its control flow graph (supplies the predecessor lists)
    /// * `problem` - Transfer function
    ///
    /// # Returns
    /// `DataFlowResult` - gen, kill, in and out of every block
    pub fn solve<P: DataFlowProblem>(
        function: &Function,
        cfg: &ControlFlowGraph,
        problem: &P,
    ) -> Result<DataFlowResult> {
        let width: usize = problem.width();
        let mut blocks: Vec<BlockMetadata> = Vec::with_capacity(function.blocks().len());

        for bb in function.blocks() {
            let gen: InstSet = problem.gen_set(function, bb.id)?;
            let kill: InstSet = problem.kill_set(function, bb.id)?;
            blocks.push(BlockMetadata {
                out_set: gen.clone(),
                in_set: empty_set(width),
                gen,
                kill,
            });
        }

        let mut iterations: usize = 0usize;
        let mut changed: bool = true;
        while changed {
            changed = false;
            iterations += 1;

            for idx in 0..blocks.len() {
                let mut in_set: InstSet = empty_set(width);
                for pred in cfg.predecessors(BlockId(idx as u32)) {
                    in_set |= &blocks[pred.index()].out_set; // Bitwise OR for union
                }

                let mut out_set: InstSet = in_set.clone();
                for killed in blocks[idx].kill.iter_ones() {
                    out_set.set(killed, false);
                }
                out_set |= &blocks[idx].gen;

                // Any block changing keeps the sweep going
                changed |= out_set != blocks[idx].out_set;
                blocks[idx].in_set = in_set;
                blocks[idx].out_set = out_set;
            }
        }

        log::debug!(
            "@{}: data flow converged after {} sweep(s)",
            function.name,
            iterations
        );
        Ok(DataFlowResult { blocks, iterations })
    }

    /// Build the CFG, collect the stores and solve.
    pub fn constant_stores(function: &Function) -> Result<(ConstantStores, DataFlowResult)> {
        let cfg: ControlFlowGraph = ControlFlowGraph::build(function)?;
        let problem: ConstantStores = ConstantStores::collect(function)?;
        let result: DataFlowResult = Self::solve(function, &cfg, &problem)?;
        Ok((problem, result))
    }
}

/// One member of `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFact {
    pub store: InstId,
    pub target: Value,
    /// Stored constant, `None` when the value is only known at run time
    pub constant: Option<i32>,
    /// Position in `S`
    pub order: usize,
}

/// Reaching stores, constant or not.
///
/// gen[B] holds the stores of B not overwritten later in B.
/// kill[B] holds, for every store `s2` in B, each fact that comes before `s2`
/// in `S` and writes the same target.
#[derive(Debug, Clone)]
pub struct ConstantStores {
    width: usize,
    facts: Vec<StoreFact>,
    by_slot: HashMap<usize, usize>,
}

impl ConstantStores {
    /// Scan the function and number its stores.
    pub fn collect(function: &Function) -> Result<Self> {
        let mut facts: Vec<StoreFact> = Vec::new();
        let mut by_slot: HashMap<usize, usize> = HashMap::new();

        for bb in function.blocks() {
            for &id in bb.instructions() {
                let inst = function.instruction(id)?;
                if let Some(target) = inst.kind.store_target() {
                    by_slot.insert(id.index(), facts.len());
                    facts.push(StoreFact {
                        store: id,
                        target,
                        constant: inst.kind.constant_store().map(|(_, c)| c),
                        order: facts.len(),
                    });
                }
            }
        }

        log::trace!(
            "@{}: {} store(s), {} of a constant",
            function.name,
            facts.len(),
            facts.iter().filter(|f| f.constant.is_some()).count()
        );
        Ok(Self {
            width: function.arena().capacity(),
            facts,
            by_slot,
        })
    }

    /// All facts in `S` order.
    #[inline]
    pub fn facts(&self) -> &[StoreFact] {
        &self.facts
    }

    /// Fact behind a set bit or a store handle.
    #[inline]
    pub fn fact_at(&self, slot: usize) -> Option<&StoreFact> {
        self.by_slot.get(&slot).map(|&i| &self.facts[i])
    }

    #[inline]
    pub fn fact_of(&self, store: InstId) -> Option<&StoreFact> {
        self.fact_at(store.index()).filter(|f| f.store == store)
    }

    /// Facts of a set, in `S` order.
    pub fn facts_in<'a>(&'a self, set: &'a InstSet) -> impl Iterator<Item = &'a StoreFact> + 'a {
        set.iter_ones().filter_map(move |slot| self.fact_at(slot))
    }

    /// Clear every fact of `set` whose target is `target`.
    pub fn remove_target(&self, set: &mut InstSet, target: Value) {
        let doomed: Vec<usize> = self
            .facts_in(set)
            .filter(|f| f.target == target)
            .map(|f| f.store.index())
            .collect();
        for slot in doomed {
            set.set(slot, false);
        }
    }
}

impl DataFlowProblem for ConstantStores {
    fn width(&self) -> usize {
        self.width
    }

    fn gen_set(&self, function: &Function, block: BlockId) -> Result<InstSet> {
        let mut gen: InstSet = empty_set(self.width);
        let bb = match function.block(block) {
            Some(bb) => bb,
            None => return Ok(gen),
        };

        for &id in bb.instructions() {
            let inst = function.instruction(id)?;
            if let InstKind::Store { ptr, .. } = inst.kind {
                // Last store wins
                self.remove_target(&mut gen, ptr);
                if let Some(fact) = self.fact_of(id) {
                    gen.set(fact.store.index(), true);
                }
            }
        }
        Ok(gen)
    }

    fn kill_set(&self, function: &Function, block: BlockId) -> Result<InstSet> {
        let mut kill: InstSet = empty_set(self.width);
        let bb = match function.block(block) {
            Some(bb) => bb,
            None => return Ok(kill),
        };

        for &id in bb.instructions() {
            let inst = function.instruction(id)?;
            let target: Value = match inst.kind.store_target() {
                Some(target) => target,
                None => continue,
            };
            let own: usize = match self.fact_of(id) {
                Some(fact) => fact.order,
                None => continue,
            };
            for earlier in self.facts[..own].iter() {
                if earlier.target == target {
                    kill.set(earlier.store.index(), true);
                }
            }
        }
        Ok(kill)
    }
}
