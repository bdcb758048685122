//! Liveness Intervals
//!
//! Block-local live ranges of the values the register allocator colours.
//!
//! # Algorithm
//! 1. **Indexing**: every instruction of the block gets its 0-based position,
//!    `alloca`s included.
//! 2. **Intervals**: the block is scanned backwards. The first consumer met for
//!    a value (its last use in program order) closes the interval, the
//!    value's own position opens it. Later (earlier in program order)
//!    consumers do not change it. Constants, `alloca`s and values defined in
//!    other blocks never get an interval.
//! 3. **Sorting**: intervals ordered by length, longest first; ties keep the
//!    order in which the backward scan met them.
//!
//! Intervals are closed: `[a, b]` and `[x, y]` overlap iff `a <= y && x <= b`.

use crate::compiler::error::{CompilerError, IrLocation, Result};
use crate::compiler::ir::function::{BasicBlock, Function};
use crate::compiler::ir::instruction::{BlockId, InstId, Value};
use std::collections::HashMap;

/// Closed range of instruction positions inside one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    /// Position of the defining instruction
    pub start: usize,
    /// Position of the last consumer
    pub end: usize,
}

impl Interval {
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "interval [{}, {}] is reversed", start, end);
        Self { start, end }
    }

    /// Number of positions spanned after the definition.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn contains(&self, position: usize) -> bool {
        self.start <= position && position <= self.end
    }

    /// Closed-interval intersection; symmetric and true on containment.
    #[inline]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Position of every instruction of one block.
#[derive(Debug, Clone, Default)]
pub struct IndexTable {
    positions: HashMap<InstId, usize>,
}

impl IndexTable {
    pub fn build(block: &BasicBlock) -> Self {
        let positions: HashMap<InstId, usize> = block
            .instructions()
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos))
            .collect();
        Self { positions }
    }

    #[inline]
    pub fn position(&self, id: InstId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Liveness of one block: positions, intervals and the allocation order.
#[derive(Debug, Clone)]
pub struct BlockLiveness {
    pub block: BlockId,
    pub indices: IndexTable,
    intervals: HashMap<InstId, Interval>,
    /// Values with an interval, longest first
    sorted: Vec<InstId>,
}

impl BlockLiveness {
    /// Index the block and build its intervals.
    ///
    /// # Errors
    /// `UnknownBlock` for a block outside the function, `StaleInstruction` for
    /// a dangling handle, `MissingAllocation` for a value used before its
    /// definition inside the block.
    pub fn compute(function: &Function, block: BlockId) -> Result<Self> {
        let bb: &BasicBlock = function.block(block).ok_or_else(|| {
            CompilerError::unknown_block(block.0, IrLocation::function(function.name.clone()))
        })?;
        let indices: IndexTable = IndexTable::build(bb);
        let mut intervals: HashMap<InstId, Interval> = HashMap::new();
        let mut encounter: Vec<InstId> = Vec::new();

        for (pos, &user) in bb.instructions().iter().enumerate().rev() {
            let inst = function.instruction(user)?;
            for operand in inst.kind.operands() {
                let def: InstId = match operand {
                    Value::Inst(def) => def,
                    _ => continue,
                };
                if intervals.contains_key(&def) {
                    continue;
                }
                let def_pos: usize = match indices.position(def) {
                    Some(def_pos) => def_pos,
                    None => continue,
                };
                if function.instruction(def)?.is_alloca() {
                    continue;
                }
                if def_pos > pos {
                    return Err(CompilerError::missing_allocation(
                        "value is used before its definition",
                        function.location_of(user),
                    ));
                }
                intervals.insert(def, Interval::new(def_pos, pos));
                encounter.push(def);
            }
        }

        // Stable: equal lengths keep the backward-scan encounter order
        let mut sorted: Vec<InstId> = encounter;
        sorted.sort_by(|a, b| intervals[b].len().cmp(&intervals[a].len()));

        log::trace!(
            "@{}:{}: {} interval(s) over {} instruction(s)",
            function.name,
            block,
            sorted.len(),
            indices.len()
        );
        Ok(Self {
            block,
            indices,
            intervals,
            sorted,
        })
    }

    #[inline]
    pub fn interval(&self, id: InstId) -> Option<Interval> {
        self.intervals.get(&id).copied()
    }

    /// `(value, interval)` pairs in allocation order.
    pub fn sorted(&self) -> impl Iterator<Item = (InstId, Interval)> + '_ {
        self.sorted.iter().map(move |id| (*id, self.intervals[id]))
    }

    /// Values whose interval overlaps `interval`, in allocation order.
    pub fn overlapping(&self, interval: Interval) -> impl Iterator<Item = InstId> + '_ {
        self.sorted
            .iter()
            .copied()
            .filter(move |id| self.intervals[id].overlaps(&interval))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}
