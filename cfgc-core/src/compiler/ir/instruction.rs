//! Intermediate Representation (IR) Instructions
//!
//! This module defines the instruction set of the basic-block IR consumed by
//! the optimizer and the back-end.
//!
//! # Memory Optimizations
//! - `BinaryOp`, `Predicate` and `Opcode` use `#[repr(u8)]`
//! - Operand and successor lists are returned as `SmallVec` (at most two entries inline)
//! - Instruction and block handles are `u32` based instead of `usize`
//!
//! # IR Design
//! Instruction payloads are a tagged sum type: each opcode carries exactly the
//! operand shape it needs, so every pass matches exhaustively on `InstKind`
//! and the compiler proves that no opcode is forgotten.

use crate::target::PhysicalRegister;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::fmt;

/// Handle of an instruction inside a function's arena.
///
/// Two handles are equal only if they name the same slot *and* the same
/// generation, so a handle kept across a deletion never aliases the
/// instruction that later reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId {
    index: u32,
    generation: u32,
}

impl InstId {
    #[inline]
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Dense arena slot index; stable for the lifetime of the instruction.
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Handle of a basic block; the block's position in its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// An operand.
///
/// Constants and stack slots are plain data; instruction operands compare
/// by handle identity, never structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// Result of another instruction
    Inst(InstId),
    /// 32-bit integer constant
    Const(i32),
    /// Fixed frame slot, relative to the frame pointer
    StackSlot(i32),
    /// Pre-coloured physical register
    Register(PhysicalRegister),
}

impl Value {
    #[inline]
    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_const(&self) -> Option<i32> {
        match self {
            Value::Const(c) => Some(*c),
            _ => None,
        }
    }

    #[inline]
    pub fn is_const(&self) -> bool {
        matches!(self, Value::Const(_))
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

impl From<i32> for Value {
    fn from(c: i32) -> Self {
        Value::Const(c)
    }
}

/// Integer arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
}

impl BinaryOp {
    /// Evaluate on 32-bit two's complement integers.
    ///
    /// Addition, subtraction and multiplication wrap. Division returns `None`
    /// for a zero divisor and for `i32::MIN / -1`.
    #[inline]
    pub fn evaluate(self, lhs: i32, rhs: i32) -> Option<i32> {
        match self {
            BinaryOp::Add => Some(lhs.wrapping_add(rhs)),
            BinaryOp::Sub => Some(lhs.wrapping_sub(rhs)),
            BinaryOp::Mul => Some(lhs.wrapping_mul(rhs)),
            BinaryOp::Div => lhs.checked_div(rhs),
        }
    }

    pub fn opcode(self) -> Opcode {
        match self {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
        }
    }
}

/// Integer comparison predicate of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Predicate {
    Eq = 0,
    Ne = 1,
    Slt = 2,
    Sle = 3,
    Sgt = 4,
    Sge = 5,
    Ult = 6,
    Ule = 7,
    Ugt = 8,
    Uge = 9,
}

impl Predicate {
    pub fn name(self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Slt => "slt",
            Predicate::Sle => "sle",
            Predicate::Sgt => "sgt",
            Predicate::Sge => "sge",
            Predicate::Ult => "ult",
            Predicate::Ule => "ule",
            Predicate::Ugt => "ugt",
            Predicate::Uge => "uge",
        }
    }
}

/// Flat opcode of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Load = 4,
    Store = 5,
    Br = 6,
    CondBr = 7,
    Ret = 8,
    Alloca = 9,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Br => "br",
            Opcode::CondBr => "condbr",
            Opcode::Ret => "ret",
            Opcode::Alloca => "alloca",
        }
    }

    #[inline]
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Instruction payload, one variant per operand shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Reserve one stack slot; the result is its address
    Alloca,
    /// `lhs op rhs`
    Binary { op: BinaryOp, lhs: Value, rhs: Value },
    /// `*ptr`
    Load { ptr: Value },
    /// `*ptr = value`
    Store { value: Value, ptr: Value },
    /// Unconditional branch
    Br { target: BlockId },
    /// Compare `lhs` with `rhs` and branch on the predicate
    CondBr {
        predicate: Predicate,
        lhs: Value,
        rhs: Value,
        then_target: BlockId,
        else_target: BlockId,
    },
    /// Return, optionally with a value
    Ret { value: Option<Value> },
}

impl InstKind {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstKind::Alloca => Opcode::Alloca,
            InstKind::Binary { op, .. } => op.opcode(),
            InstKind::Load { .. } => Opcode::Load,
            InstKind::Store { .. } => Opcode::Store,
            InstKind::Br { .. } => Opcode::Br,
            InstKind::CondBr { .. } => Opcode::CondBr,
            InstKind::Ret { .. } => Opcode::Ret,
        }
    }

    #[inline]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. }
        )
    }

    /// `true` if the instruction defines a value other instructions may use.
    #[inline]
    pub fn produces_value(&self) -> bool {
        matches!(
            self,
            InstKind::Alloca | InstKind::Binary { .. } | InstKind::Load { .. }
        )
    }

    /// Operands in positional order.
    pub fn operands(&self) -> SmallVec<[Value; 2]> {
        match self {
            InstKind::Alloca | InstKind::Br { .. } | InstKind::Ret { value: None } => {
                SmallVec::new()
            }
            InstKind::Binary { lhs, rhs, .. } | InstKind::CondBr { lhs, rhs, .. } => {
                smallvec![*lhs, *rhs]
            }
            InstKind::Load { ptr } => smallvec![*ptr],
            InstKind::Store { value, ptr } => smallvec![*value, *ptr],
            InstKind::Ret { value: Some(value) } => smallvec![*value],
        }
    }

    /// Mutable operands in positional order.
    pub fn operands_mut(&mut self) -> SmallVec<[&mut Value; 2]> {
        match self {
            InstKind::Alloca | InstKind::Br { .. } | InstKind::Ret { value: None } => {
                SmallVec::new()
            }
            InstKind::Binary { lhs, rhs, .. } | InstKind::CondBr { lhs, rhs, .. } => {
                smallvec![lhs, rhs]
            }
            InstKind::Load { ptr } => smallvec![ptr],
            InstKind::Store { value, ptr } => smallvec![value, ptr],
            InstKind::Ret { value: Some(value) } => smallvec![value],
        }
    }

    /// Successor blocks named by a terminator; empty for everything else.
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            InstKind::Br { target } => smallvec![*target],
            InstKind::CondBr {
                then_target,
                else_target,
                ..
            } => smallvec![*then_target, *else_target],
            _ => SmallVec::new(),
        }
    }

    /// `(target, constant)` if this is a store of a compile-time constant.
    #[inline]
    pub fn constant_store(&self) -> Option<(Value, i32)> {
        match self {
            InstKind::Store {
                value: Value::Const(c),
                ptr,
            } => Some((*ptr, *c)),
            _ => None,
        }
    }

    /// Storage location written by a store, of any value.
    #[inline]
    pub fn store_target(&self) -> Option<Value> {
        match self {
            InstKind::Store { ptr, .. } => Some(*ptr),
            _ => None,
        }
    }
}

/// An instruction placed in a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Opcode and operands
    pub kind: InstKind,
    /// Block the instruction lives in
    pub block: BlockId,
    /// Optional source name, used by the printer and the JSON format
    pub name: Option<String>,
}

impl Instruction {
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }

    #[inline]
    pub fn is_alloca(&self) -> bool {
        matches!(self.kind, InstKind::Alloca)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_wraps_and_checks_division() {
        assert_eq!(BinaryOp::Add.evaluate(2, 3), Some(5));
        assert_eq!(BinaryOp::Add.evaluate(i32::MAX, 1), Some(i32::MIN));
        assert_eq!(BinaryOp::Div.evaluate(7, 2), Some(3));
        assert_eq!(BinaryOp::Div.evaluate(-7, 2), Some(-3));
        assert_eq!(BinaryOp::Div.evaluate(4, 0), None);
        assert_eq!(BinaryOp::Div.evaluate(i32::MIN, -1), None);
    }

    #[test]
    fn test_constant_store_shape() {
        let store = InstKind::Store {
            value: Value::Const(5),
            ptr: Value::StackSlot(-4),
        };
        assert_eq!(store.constant_store(), Some((Value::StackSlot(-4), 5)));

        let copy = InstKind::Store {
            value: Value::Register(PhysicalRegister::Ecx),
            ptr: Value::StackSlot(-4),
        };
        assert_eq!(copy.constant_store(), None);
        assert_eq!(copy.store_target(), Some(Value::StackSlot(-4)));
    }

    #[test]
    fn test_successors_of_terminators() {
        let br = InstKind::CondBr {
            predicate: Predicate::Slt,
            lhs: Value::Const(1),
            rhs: Value::Const(2),
            then_target: BlockId(1),
            else_target: BlockId(2),
        };
        assert_eq!(br.successors().as_slice(), &[BlockId(1), BlockId(2)]);
        assert!(InstKind::Ret { value: None }.successors().is_empty());
        assert!(InstKind::Alloca.operands().is_empty());
    }
}
