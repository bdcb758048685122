//! Control Flow Analysis
//!
//! Successor and predecessor lists of a function's basic blocks.
//!
//! # Memory Optimizations
//! - `successors` and `predecessors` use `SmallVec<[BlockId; 2]>` (most blocks have ≤2)
//! - Lists are indexed by block position, no hashing
//!
//! # CFG Construction Algorithm
//! 1. **Successors**: read from each block's terminator (validated: the block must
//!    end in a terminator and every target must exist)
//! 2. **Predecessors**: invert the successor edges once, in block order

use crate::compiler::error::Result;
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::BlockId;
use smallvec::SmallVec;

/// Control flow graph of one function.
///
/// # Graph Properties
/// - Directed, may contain cycles
/// - Single entry point (block 0)
/// - Computed once per analysis; the IR is not consulted again for edges
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    successors: Vec<SmallVec<[BlockId; 2]>>,
    predecessors: Vec<SmallVec<[BlockId; 2]>>,
}

impl ControlFlowGraph {
    /// Build the CFG of a function.
    ///
    /// # Errors
    /// `MissingTerminator` if a block does not end in a terminator,
    /// `UnknownBlock` if a branch names a block outside the function.
    ///
    /// # Examples
    /// ```rust,ignore
    /// let cfg = ControlFlowGraph::build(&function)?;
    /// for pred in cfg.predecessors(BlockId(2)) {
    ///     println!("{} -> bb2", pred);
    /// }
    /// ```
    pub fn build(function: &Function) -> Result<Self> {
        let count: usize = function.blocks().len();
        let mut successors: Vec<SmallVec<[BlockId; 2]>> = Vec::with_capacity(count);
        let mut predecessors: Vec<SmallVec<[BlockId; 2]>> = vec![SmallVec::new(); count];

        for bb in function.blocks() {
            successors.push(function.successors(bb.id)?);
        }

        for (from, succs) in successors.iter().enumerate() {
            for succ in succs.iter() {
                let preds: &mut SmallVec<[BlockId; 2]> = &mut predecessors[succ.index()];
                let from: BlockId = BlockId(from as u32);
                // A cond-br with both targets equal is still a single edge
                if !preds.contains(&from) {
                    preds.push(from);
                }
            }
        }

        Ok(Self {
            successors,
            predecessors,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.successors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    #[inline]
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.successors
            .get(block.index())
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    #[inline]
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.predecessors
            .get(block.index())
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    /// Total number of distinct edges.
    pub fn edge_count(&self) -> usize {
        self.predecessors.iter().map(|p| p.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::builder::FunctionBuilder;
    use crate::compiler::ir::instruction::Predicate;

    #[test]
    fn test_diamond_predecessors() {
        let mut b = FunctionBuilder::new("diamond");
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        let join = b.create_block("join");
        b.cond_br(Predicate::Eq, 1, 2, left, right);
        b.switch_to_block(left);
        b.br(join);
        b.switch_to_block(right);
        b.br(join);
        b.switch_to_block(join);
        b.ret(None);
        let func = b.finish().expect("valid function");

        let cfg = ControlFlowGraph::build(&func).expect("cfg");
        assert_eq!(cfg.successors(entry), &[left, right]);
        assert_eq!(cfg.predecessors(join), &[left, right]);
        assert!(cfg.predecessors(entry).is_empty());
        assert_eq!(cfg.edge_count(), 4);
    }
}
