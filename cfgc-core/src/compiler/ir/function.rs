//! Functions, Basic Blocks and the Instruction Arena
//!
//! Instructions live in a per-function arena and are addressed by
//! generation-checked `InstId` handles. Blocks only hold ordered lists of
//! handles, so deleting an instruction is a two-step affair: a pass collects
//! the handles it wants gone, then `Function::remove_instructions` compacts
//! the blocks and frees the slots.
//!
//! # Memory Optimizations
//! - Freed slots are reused (with a bumped generation) so the arena, and every
//!   bit set indexed by slot, stays as small as the live instruction count allows
//! - Block ids are `u32`

use crate::compiler::error::{CompilerError, IrLocation, Result};
use crate::compiler::ir::instruction::{BlockId, InstId, InstKind, Instruction, Value};
use smallvec::SmallVec;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    instruction: Option<Instruction>,
}

/// Generation-checked storage for the instructions of one function.
#[derive(Debug, Clone, Default)]
pub struct InstArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl InstArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an instruction and return its handle.
    pub fn insert(&mut self, instruction: Instruction) -> InstId {
        if let Some(index) = self.free.pop() {
            let slot: &mut Slot = &mut self.slots[index as usize];
            slot.instruction = Some(instruction);
            InstId::new(index, slot.generation)
        } else {
            let index: u32 = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                instruction: Some(instruction),
            });
            InstId::new(index, 0)
        }
    }

    #[inline]
    pub fn get(&self, id: InstId) -> Option<&Instruction> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.instruction.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: InstId) -> Option<&mut Instruction> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.instruction.as_mut())
    }

    #[inline]
    pub fn contains(&self, id: InstId) -> bool {
        self.get(id).is_some()
    }

    /// Free the slot; any outstanding handle to it becomes stale.
    pub fn remove(&mut self, id: InstId) -> Option<Instruction> {
        let slot: &mut Slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        let instruction: Instruction = slot.instruction.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        Some(instruction)
    }

    /// Handle of the live instruction in `index`, if any.
    #[inline]
    pub fn id_at(&self, index: usize) -> Option<InstId> {
        self.slots.get(index).and_then(|slot| {
            slot.instruction
                .as_ref()
                .map(|_| InstId::new(index as u32, slot.generation))
        })
    }

    /// Number of slots, live or free. Bit sets over instructions use this width.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live instructions.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Basic block: an ordered list of instruction handles.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Position of the block in its function
    pub id: BlockId,
    /// Source label, if the producer gave one
    pub label: Option<String>,
    instructions: Vec<InstId>,
}

impl BasicBlock {
    #[inline]
    pub fn instructions(&self) -> &[InstId] {
        &self.instructions
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Position of `id` inside this block.
    pub fn position(&self, id: InstId) -> Option<usize> {
        self.instructions.iter().position(|&i| i == id)
    }
}

/// A function: blocks in declaration order, the first one is the entry.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    arena: InstArena,
    blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arena: InstArena::new(),
            blocks: Vec::new(),
        }
    }

    #[inline]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    #[inline]
    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    #[inline]
    pub fn arena(&self) -> &InstArena {
        &self.arena
    }

    /// Instruction behind a handle, or `None` if it was deleted.
    #[inline]
    pub fn inst(&self, id: InstId) -> Option<&Instruction> {
        self.arena.get(id)
    }

    /// Instruction behind a handle; a stale handle is an error.
    pub fn instruction(&self, id: InstId) -> Result<&Instruction> {
        self.arena.get(id).ok_or_else(|| {
            CompilerError::stale_instruction(
                id.index() as u32,
                id.generation(),
                IrLocation::function(self.name.clone()),
            )
        })
    }

    /// Append an empty block and return its id.
    pub fn add_block(&mut self, label: Option<String>) -> BlockId {
        let id: BlockId = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            label,
            instructions: Vec::new(),
        });
        id
    }

    /// Append an instruction to the end of `block`.
    ///
    /// # Panics
    /// Panics if `block` does not belong to this function.
    pub fn append(&mut self, block: BlockId, name: Option<String>, kind: InstKind) -> InstId {
        let id: InstId = self.arena.insert(Instruction { kind, block, name });
        self.blocks[block.index()].instructions.push(id);
        id
    }

    /// Location of an instruction for error reporting.
    pub fn location_of(&self, id: InstId) -> IrLocation {
        match self.arena.get(id) {
            Some(inst) => IrLocation::new(
                Some(self.name.clone()),
                Some(inst.block.0),
                self.blocks
                    .get(inst.block.index())
                    .and_then(|b| b.position(id)),
            ),
            None => IrLocation::function(self.name.clone()),
        }
    }

    /// Terminator of a block; its absence is a construction error.
    pub fn terminator(&self, block: BlockId) -> Result<&Instruction> {
        let location: IrLocation = IrLocation::block(self.name.clone(), block.0);
        let bb: &BasicBlock = self
            .block(block)
            .ok_or_else(|| CompilerError::unknown_block(block.0, location.clone()))?;
        let last: InstId = *bb
            .instructions
            .last()
            .ok_or_else(|| CompilerError::missing_terminator(location.clone()))?;
        let inst: &Instruction = self.instruction(last)?;
        if !inst.kind.is_terminator() {
            return Err(CompilerError::missing_terminator(location));
        }
        Ok(inst)
    }

    /// Successors of a block, derived from its terminator.
    ///
    /// # Errors
    /// Fails if the block has no terminator or names a block outside the function.
    pub fn successors(&self, block: BlockId) -> Result<SmallVec<[BlockId; 2]>> {
        let succs: SmallVec<[BlockId; 2]> = self.terminator(block)?.kind.successors();
        for succ in succs.iter() {
            if succ.index() >= self.blocks.len() {
                return Err(CompilerError::unknown_block(
                    succ.0,
                    IrLocation::block(self.name.clone(), block.0),
                ));
            }
        }
        Ok(succs)
    }

    /// Check the structural contract: every block ends in exactly one
    /// terminator and every branch target exists. The entry block has no
    /// predecessors, since its label also carries the prologue.
    pub fn verify(&self) -> Result<()> {
        for bb in self.blocks.iter() {
            let count: usize = bb.instructions.len();
            for (pos, &id) in bb.instructions.iter().enumerate() {
                let inst: &Instruction = self.instruction(id)?;
                if inst.kind.is_terminator() && pos + 1 != count {
                    return Err(CompilerError::misplaced_terminator(
                        format!("{} is followed by {} more instruction(s)", inst.opcode(), count - pos - 1),
                        IrLocation::new(Some(self.name.clone()), Some(bb.id.0), Some(pos)),
                    ));
                }
            }
            if self.successors(bb.id)?.contains(&BlockId(0)) {
                return Err(CompilerError::entry_branch_target(IrLocation::block(
                    self.name.clone(),
                    bb.id.0,
                )));
            }
        }
        Ok(())
    }

    /// Number of uses of every instruction that is used at least once.
    pub fn use_counts(&self) -> HashMap<InstId, usize> {
        let mut counts: HashMap<InstId, usize> = HashMap::new();
        for bb in self.blocks.iter() {
            for &id in bb.instructions.iter() {
                if let Some(inst) = self.arena.get(id) {
                    for operand in inst.kind.operands() {
                        if let Value::Inst(used) = operand {
                            *counts.entry(used).or_insert(0) += 1;
                        }
                    }
                }
            }
        }
        counts
    }

    /// Instructions that consume `id` as an operand, in block-then-position order.
    pub fn users(&self, id: InstId) -> Vec<InstId> {
        let mut users: Vec<InstId> = Vec::new();
        for bb in self.blocks.iter() {
            for &user in bb.instructions.iter() {
                if let Some(inst) = self.arena.get(user) {
                    if inst.kind.operands().contains(&Value::Inst(id)) {
                        users.push(user);
                    }
                }
            }
        }
        users
    }

    /// Rewrite every operand that refers to `old` into `new`.
    ///
    /// Returns the number of rewritten operands.
    pub fn replace_all_uses(&mut self, old: InstId, new: Value) -> usize {
        let mut replaced: usize = 0;
        for bb in self.blocks.iter() {
            for &user in bb.instructions.iter() {
                if let Some(inst) = self.arena.get_mut(user) {
                    for operand in inst.kind.operands_mut() {
                        if *operand == Value::Inst(old) {
                            *operand = new;
                            replaced += 1;
                        }
                    }
                }
            }
        }
        replaced
    }

    /// Compaction step of the collect-then-apply deletion protocol.
    ///
    /// Removes the instructions from their blocks and frees their slots.
    /// Handles that are already stale are ignored. Returns the number of
    /// instructions actually removed.
    pub fn remove_instructions(&mut self, ids: &[InstId]) -> usize {
        let mut removed: usize = 0;
        for &id in ids.iter() {
            let block: BlockId = match self.arena.get(id) {
                Some(inst) => inst.block,
                None => continue,
            };
            let bb: &mut BasicBlock = &mut self.blocks[block.index()];
            bb.instructions.retain(|&i| i != id);
            self.arena.remove(id);
            removed += 1;
        }
        removed
    }

    /// Number of live instructions in the function.
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}

/// A translation unit: functions in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn verify(&self) -> Result<()> {
        self.functions.iter().try_for_each(Function::verify)
    }
}
