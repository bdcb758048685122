//! Stack Frame Layout
//!
//! Frame offsets (relative to `%ebp`) of a function's stack slots:
//! - the `alloca`s of the entry block, from the target's first offset
//!   downwards, one slot each (the offset table)
//! - below them, one home slot per spilled value when the spill policy is
//!   `stack`
//!
//! Offsets are fixed when the layout is built and never change afterwards.

use crate::compiler::codegen::register::BlockAllocation;
use crate::compiler::error::{CompilerError, Result};
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::InstId;
use crate::target::{SpillPolicy, TargetSpec};
use std::collections::HashMap;

/// Frame of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameLayout {
    offsets: HashMap<InstId, i32>,
    homes: HashMap<InstId, i32>,
    size: u32,
}

impl FrameLayout {
    /// Lay out the frame once every block has been allocated.
    pub fn build(
        function: &Function,
        target: &TargetSpec,
        allocations: &[BlockAllocation],
    ) -> Result<Self> {
        let mut cursor: SlotCursor = SlotCursor::new(target)?;
        let mut offsets: HashMap<InstId, i32> = HashMap::new();
        let mut homes: HashMap<InstId, i32> = HashMap::new();
        let mut lowest: Option<i32> = None;

        if let Some(entry) = function.entry_block() {
            for &id in entry.instructions() {
                if function.instruction(id)?.is_alloca() {
                    let slot: i32 = cursor.claim()?;
                    offsets.insert(id, slot);
                    lowest = Some(slot);
                }
            }
        }

        if target.spill_policy == SpillPolicy::Stack {
            for (bb, allocation) in function.blocks().iter().zip(allocations.iter()) {
                for &id in bb.instructions() {
                    if allocation.table.is_spilled(id) {
                        let slot: i32 = cursor.claim()?;
                        homes.insert(id, slot);
                        lowest = Some(slot);
                    }
                }
            }
        }

        let size: u32 = lowest.map(|off| off.unsigned_abs()).unwrap_or(0);
        log::debug!(
            "@{}: frame of {} byte(s), {} slot(s), {} spill home(s)",
            function.name,
            size,
            offsets.len(),
            homes.len()
        );
        Ok(Self {
            offsets,
            homes,
            size,
        })
    }

    /// Offset of an entry-block `alloca`.
    #[inline]
    pub fn offset(&self, id: InstId) -> Option<i32> {
        self.offsets.get(&id).copied()
    }

    /// Home slot of a spilled value.
    #[inline]
    pub fn home(&self, id: InstId) -> Option<i32> {
        self.homes.get(&id).copied()
    }

    /// Bytes reserved below `%ebp`.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.offsets.len() + self.homes.len()
    }
}

/// Hands out slots downwards from the first offset.
struct SlotCursor {
    next: Option<i32>,
    step: i32,
}

impl SlotCursor {
    fn new(target: &TargetSpec) -> Result<Self> {
        let step: i32 = i32::try_from(target.slot_size).map_err(|_| {
            CompilerError::invalid_target(format!("slot size {} is too large", target.slot_size))
        })?;
        Ok(Self {
            next: Some(target.first_stack_offset),
            step,
        })
    }

    fn claim(&mut self) -> Result<i32> {
        let slot: i32 = self.next.ok_or_else(|| {
            CompilerError::invalid_target("stack frame runs past the lowest addressable offset")
        })?;
        self.next = slot.checked_sub(self.step);
        Ok(slot)
    }
}
