//! IR Builder
//!
//! Programmatic construction of IR functions. The builder keeps an insertion
//! block and appends instructions to it, in the manner of an LLVM `IRBuilder`.
//!
//! ```rust,ignore
//! let mut b = FunctionBuilder::new("main");
//! let entry = b.create_block("entry");
//! let exit = b.create_block("exit");
//! b.switch_to_block(entry);
//! let x = b.alloca("x");
//! b.store(10, x);
//! b.br(exit);
//! b.switch_to_block(exit);
//! let v = b.load(x);
//! b.ret(Some(v.into()));
//! let function = b.finish()?;
//! ```

use crate::compiler::error::Result;
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::{BinaryOp, BlockId, InstId, InstKind, Predicate, Value};

/// Builder for a single function.
pub struct FunctionBuilder {
    function: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            function: Function::new(name),
            current: None,
        }
    }

    /// Append a new block. The first block created is the entry block.
    pub fn create_block(&mut self, label: impl Into<String>) -> BlockId {
        let id: BlockId = self.function.add_block(Some(label.into()));
        if self.current.is_none() {
            self.current = Some(id);
        }
        id
    }

    /// Make `block` the insertion point.
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    /// # Panics
    /// Panics if no block has been created yet.
    fn push(&mut self, name: Option<String>, kind: InstKind) -> InstId {
        let block: BlockId = self
            .current
            .expect("FunctionBuilder: create a block before adding instructions");
        self.function.append(block, name, kind)
    }

    pub fn alloca(&mut self, name: impl Into<String>) -> InstId {
        self.push(Some(name.into()), InstKind::Alloca)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: impl Into<Value>, rhs: impl Into<Value>) -> InstId {
        self.push(
            None,
            InstKind::Binary {
                op,
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
        )
    }

    pub fn add(&mut self, lhs: impl Into<Value>, rhs: impl Into<Value>) -> InstId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: impl Into<Value>, rhs: impl Into<Value>) -> InstId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: impl Into<Value>, rhs: impl Into<Value>) -> InstId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: impl Into<Value>, rhs: impl Into<Value>) -> InstId {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn load(&mut self, ptr: impl Into<Value>) -> InstId {
        self.push(None, InstKind::Load { ptr: ptr.into() })
    }

    pub fn store(&mut self, value: impl Into<Value>, ptr: impl Into<Value>) -> InstId {
        self.push(
            None,
            InstKind::Store {
                value: value.into(),
                ptr: ptr.into(),
            },
        )
    }

    pub fn br(&mut self, target: BlockId) -> InstId {
        self.push(None, InstKind::Br { target })
    }

    pub fn cond_br(
        &mut self,
        predicate: Predicate,
        lhs: impl Into<Value>,
        rhs: impl Into<Value>,
        then_target: BlockId,
        else_target: BlockId,
    ) -> InstId {
        self.push(
            None,
            InstKind::CondBr {
                predicate,
                lhs: lhs.into(),
                rhs: rhs.into(),
                then_target,
                else_target,
            },
        )
    }

    pub fn ret(&mut self, value: Option<Value>) -> InstId {
        self.push(None, InstKind::Ret { value })
    }

    /// Verify and return the function.
    pub fn finish(self) -> Result<Function> {
        self.function.verify()?;
        Ok(self.function)
    }

    /// Return the function without verification.
    pub fn finish_unchecked(self) -> Function {
        self.function
    }
}
