//! AT&T operand syntax and mnemonic tables for 32-bit x86.

use crate::compiler::ir::instruction::{BinaryOp, Predicate};
use crate::target::PhysicalRegister;
use std::fmt;

/// Where an operand lives at the point of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// `$c`
    Immediate(i32),
    /// `%reg`
    Register(PhysicalRegister),
    /// `off(%ebp)`
    Frame(i32),
    /// `(%reg)`
    Indirect(PhysicalRegister),
    /// Address of a frame slot; needs `leal` before it can be used as a value
    FrameAddress(i32),
}

impl Location {
    #[inline]
    pub fn is_memory(&self) -> bool {
        matches!(self, Location::Frame(_) | Location::Indirect(_))
    }

    /// Register read or written when the operand is accessed.
    #[inline]
    pub fn register(&self) -> Option<PhysicalRegister> {
        match self {
            Location::Register(reg) | Location::Indirect(reg) => Some(*reg),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Immediate(c) => write!(f, "${}", c),
            Location::Register(reg) => write!(f, "{}", reg),
            Location::Frame(off) | Location::FrameAddress(off) => write!(f, "{}(%ebp)", off),
            Location::Indirect(reg) => write!(f, "({})", reg),
        }
    }
}

/// Two-operand mnemonic of an arithmetic operator; `div` goes through `idivl`.
#[inline]
pub fn arithmetic_mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "addl",
        BinaryOp::Sub => "subl",
        BinaryOp::Mul => "imull",
        BinaryOp::Div => "idivl",
    }
}

/// Conditional jump taken when `lhs <pred> rhs` after `cmpl rhs, lhs`.
///
/// Only the equality and signed predicates have a lowering.
#[inline]
pub fn jump_mnemonic(predicate: Predicate) -> Option<&'static str> {
    match predicate {
        Predicate::Eq => Some("je"),
        Predicate::Ne => Some("jne"),
        Predicate::Slt => Some("jl"),
        Predicate::Sle => Some("jle"),
        Predicate::Sgt => Some("jg"),
        Predicate::Sge => Some("jge"),
        Predicate::Ult | Predicate::Ule | Predicate::Ugt | Predicate::Uge => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_rendering() {
        assert_eq!(Location::Immediate(-3).to_string(), "$-3");
        assert_eq!(Location::Register(PhysicalRegister::Ecx).to_string(), "%ecx");
        assert_eq!(Location::Frame(-8).to_string(), "-8(%ebp)");
        assert_eq!(Location::Indirect(PhysicalRegister::Ebx).to_string(), "(%ebx)");
    }

    #[test]
    fn test_unsigned_predicates_have_no_jump() {
        assert_eq!(jump_mnemonic(Predicate::Sle), Some("jle"));
        assert_eq!(jump_mnemonic(Predicate::Ult), None);
    }
}
