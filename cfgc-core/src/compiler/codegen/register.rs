//! Register Allocation
//!
//! Greedy, block-local, interval-based assignment of the target's register
//! pool to the values of one basic block.
//!
//! # Memory Optimizations
//! - Candidate sets are `SmallVec<[PhysicalRegister; 6]>`: never more than
//!   the six general-purpose registers, kept inline
//! - `PhysicalRegister` is `#[repr(u8)]`
//!
//! # Allocation Strategy
//! 1. Every value with an interval starts with the whole pool as candidates.
//! 2. **Forced allocation**: the value returned by a block-ending `ret` gets
//!    the return register, which is then removed from the candidates of every
//!    value whose interval overlaps the returned one.
//! 3. **Greedy assignment**, longest interval first: an assigned value is
//!    skipped; an empty candidate set means the value is spilled; otherwise the
//!    first candidate in pool order is taken and removed from the candidates
//!    of every overlapping value.
//!
//! The result table of a block is final; no later block revisits it.

use crate::compiler::codegen::liveness::{BlockLiveness, Interval};
use crate::compiler::error::{CompilerError, Result};
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::{BlockId, InstId, InstKind, Value};
use crate::target::{PhysicalRegister, TargetSpec};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Still-available registers of one value, in pool order.
pub type Candidates = SmallVec<[PhysicalRegister; 6]>;

/// Outcome of allocation for one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allocation {
    /// Value lives in this register for its whole interval
    Register(PhysicalRegister),
    /// No register was left; the value lives in memory
    Spilled,
}

/// Final per-block allocation. A value without an entry is dead (it has no
/// interval in this block).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    entries: HashMap<InstId, Allocation>,
}

impl ResultTable {
    #[inline]
    pub fn get(&self, id: InstId) -> Option<Allocation> {
        self.entries.get(&id).copied()
    }

    #[inline]
    pub fn register(&self, id: InstId) -> Option<PhysicalRegister> {
        match self.entries.get(&id) {
            Some(Allocation::Register(reg)) => Some(*reg),
            _ => None,
        }
    }

    #[inline]
    pub fn is_spilled(&self, id: InstId) -> bool {
        matches!(self.entries.get(&id), Some(Allocation::Spilled))
    }

    /// Number of spilled values.
    pub fn spill_count(&self) -> usize {
        self.entries
            .values()
            .filter(|a| matches!(a, Allocation::Spilled))
            .count()
    }

    /// `true` if some value of the block was given `reg`.
    pub fn uses_register(&self, reg: PhysicalRegister) -> bool {
        self.entries
            .values()
            .any(|a| *a == Allocation::Register(reg))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Liveness and allocation of one block.
#[derive(Debug, Clone)]
pub struct BlockAllocation {
    pub liveness: BlockLiveness,
    pub table: ResultTable,
}

/// Greedy interval register allocator.
pub struct RegisterAllocator<'t> {
    target: &'t TargetSpec,
}

impl<'t> RegisterAllocator<'t> {
    #[inline]
    pub fn new(target: &'t TargetSpec) -> Self {
        Self { target }
    }

    /// Compute liveness and allocate every block of `function`, in block order.
    pub fn allocate_function(&self, function: &Function) -> Result<Vec<BlockAllocation>> {
        function
            .blocks()
            .iter()
            .map(|bb| {
                let liveness: BlockLiveness = BlockLiveness::compute(function, bb.id)?;
                let table: ResultTable = self.allocate_block(function, &liveness)?;
                Ok(BlockAllocation { liveness, table })
            })
            .collect()
    }

    /// Allocate one block.
    ///
    /// # Arguments
    /// * `function` - Function owning the block
    /// * `liveness` - Intervals of the block, as computed by `BlockLiveness::compute`
    ///
    /// # Returns
    /// `ResultTable` - Register or spill marker of every value with an interval
    ///
    /// # Errors
    /// `MissingAllocation` if an interval or candidate lookup misses for a
    /// value that must be present.
    pub fn allocate_block(&self, function: &Function, liveness: &BlockLiveness) -> Result<ResultTable> {
        let block: BlockId = liveness.block;
        let mut candidates: HashMap<InstId, Candidates> = liveness
            .sorted()
            .map(|(id, _)| (id, self.target.registers.iter().copied().collect()))
            .collect();
        let mut table: ResultTable = ResultTable::default();

        if let Some(returned) = self.returned_value(function, block)? {
            if let Some(interval) = liveness.interval(returned) {
                let reg: PhysicalRegister = self.target.return_register;
                table.entries.insert(returned, Allocation::Register(reg));
                Self::retire(&mut candidates, liveness, returned, interval, reg);
                log::trace!("@{}:{}: return value forced into {}", function.name, block, reg);
            }
        }

        for (id, interval) in liveness.sorted() {
            if table.entries.contains_key(&id) {
                continue;
            }
            let available: &Candidates = candidates.get(&id).ok_or_else(|| {
                CompilerError::missing_allocation(
                    "value has an interval but no candidate set",
                    function.location_of(id),
                )
            })?;
            match available.first().copied() {
                None => {
                    log::debug!(
                        "{}: spilled, interval [{}, {}]",
                        function.location_of(id),
                        interval.start,
                        interval.end
                    );
                    table.entries.insert(id, Allocation::Spilled);
                }
                Some(reg) => {
                    table.entries.insert(id, Allocation::Register(reg));
                    Self::retire(&mut candidates, liveness, id, interval, reg);
                }
            }
        }

        Ok(table)
    }

    /// Value returned by the block's terminator, if it is an instruction.
    fn returned_value(&self, function: &Function, block: BlockId) -> Result<Option<InstId>> {
        match function.terminator(block)?.kind {
            InstKind::Ret {
                value: Some(Value::Inst(id)),
            } => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    /// Remove `reg` from the candidates of every value overlapping `owner`.
    fn retire(
        candidates: &mut HashMap<InstId, Candidates>,
        liveness: &BlockLiveness,
        owner: InstId,
        interval: Interval,
        reg: PhysicalRegister,
    ) {
        for other in liveness.overlapping(interval) {
            if other == owner {
                continue;
            }
            if let Some(set) = candidates.get_mut(&other) {
                set.retain(|r| *r != reg);
            }
        }
    }
}
