//! Enhanced Error Handling
//!
//! This module provides the error types for the compiler using `thiserror`.
//! Every variant carries the IR location it was raised at and a suggestion for
//! the producer of the IR.
//!
//! # Error Categories
//! - **Structural errors**: missing terminators, dangling branch targets, stale handles
//! - **Folding errors**: constant division by zero, signed division overflow
//! - **Allocation errors**: interval / register table misses (internal consistency)
//! - **Emission errors**: unresolvable operands, spilled values under the `error` policy
//! - **Input errors**: malformed IR descriptions and target specifications
//!
//! All of these are fatal for the function being processed; the pipeline never
//! emits partial output for a function that failed.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the compiler.
pub type Result<T> = std::result::Result<T, CompilerError>;

/// Position inside the IR for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrLocation {
    pub function: Option<String>,
    pub block: Option<u32>,
    pub instruction: Option<usize>,
}

impl IrLocation {
    pub fn new(function: Option<String>, block: Option<u32>, instruction: Option<usize>) -> Self {
        Self {
            function,
            block,
            instruction,
        }
    }

    /// Location naming a whole function.
    pub fn function(name: impl Into<String>) -> Self {
        Self::new(Some(name.into()), None, None)
    }

    /// Location naming a block of a function.
    pub fn block(name: impl Into<String>, block: u32) -> Self {
        Self::new(Some(name.into()), Some(block), None)
    }

    pub fn format(&self) -> String {
        let mut result = String::new();
        match &self.function {
            Some(name) => result.push_str(&format!("@{}", name)),
            None => result.push_str("<module>"),
        }
        if let Some(block) = self.block {
            result.push_str(&format!(":bb{}", block));
        }
        if let Some(inst) = self.instruction {
            result.push_str(&format!(":#{}", inst));
        }
        result
    }
}

impl fmt::Display for IrLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Compiler error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilerError {
    /// A basic block does not end in a branch or return.
    #[error("Missing terminator at {location}: {message}\nSuggestion: {suggestion}")]
    MissingTerminator {
        message: String,
        location: IrLocation,
        suggestion: String,
    },

    /// A branch or return appears before the end of its block.
    #[error("Misplaced terminator at {location}: {message}\nSuggestion: {suggestion}")]
    MisplacedTerminator {
        message: String,
        location: IrLocation,
        suggestion: String,
    },

    /// A branch names a block that is not part of the function.
    #[error("Unknown block at {location}: bb{target} does not exist\nSuggestion: {suggestion}")]
    UnknownBlock {
        target: u32,
        location: IrLocation,
        suggestion: String,
    },

    /// A branch jumps back to the entry block, which must have no predecessors.
    #[error("Branch to entry block at {location}: bb0 cannot be a branch target\nSuggestion: {suggestion}")]
    EntryBranchTarget {
        location: IrLocation,
        suggestion: String,
    },

    /// An instruction handle outlived the instruction it referred to.
    #[error("Stale instruction handle at {location}: slot {index} generation {generation}\nSuggestion: {suggestion}")]
    StaleInstruction {
        index: u32,
        generation: u32,
        location: IrLocation,
        suggestion: String,
    },

    /// Constant folding met a division by a constant zero.
    #[error("Division by zero at {location}: {message}\nSuggestion: {suggestion}")]
    DivisionByZero {
        message: String,
        location: IrLocation,
        suggestion: String,
    },

    /// Constant folding met a signed division that overflows (`i32::MIN / -1`).
    #[error("Arithmetic overflow at {location}: {message}\nSuggestion: {suggestion}")]
    ArithmeticOverflow {
        message: String,
        location: IrLocation,
        suggestion: String,
    },

    /// An instruction expected in an allocation table is missing.
    #[error("Allocation table miss at {location}: {message}\nSuggestion: {suggestion}")]
    MissingAllocation {
        message: String,
        location: IrLocation,
        suggestion: String,
    },

    /// An operand has neither a register, a memory location nor an immediate form.
    #[error("Unresolved operand at {location}: {operand}\nSuggestion: {suggestion}")]
    UnresolvedOperand {
        operand: String,
        location: IrLocation,
        suggestion: String,
    },

    /// A spilled value reached emission while the spill policy forbids it.
    #[error("Spilled value at {location}: {message}\nSuggestion: {suggestion}")]
    SpilledValue {
        message: String,
        location: IrLocation,
        suggestion: String,
    },

    /// The target specification was rejected.
    #[error("Invalid target: {message}\nSuggestion: {suggestion}")]
    InvalidTarget { message: String, suggestion: String },

    /// The IR description could not be turned into a module.
    #[error("IR parse error at {location}: {message}\nSuggestion: {suggestion}")]
    Parse {
        message: String,
        location: IrLocation,
        suggestion: String,
    },
}

impl CompilerError {
    /// Create a missing-terminator error for a block.
    #[cold]
    pub fn missing_terminator(location: IrLocation) -> Self {
        Self::MissingTerminator {
            message: "block does not end in br, cond-br or ret".to_string(),
            location,
            suggestion: "Every basic block must end in exactly one control transfer.".to_string(),
        }
    }

    /// Create a misplaced-terminator error.
    #[cold]
    pub fn misplaced_terminator(message: impl Into<String>, location: IrLocation) -> Self {
        Self::MisplacedTerminator {
            message: message.into(),
            location,
            suggestion: "Split the block after the terminator or remove the trailing instructions."
                .to_string(),
        }
    }

    /// Create an unknown-block error for a dangling branch target.
    #[cold]
    pub fn unknown_block(target: u32, location: IrLocation) -> Self {
        Self::UnknownBlock {
            target,
            location,
            suggestion: "Branch targets must name blocks of the same function.".to_string(),
        }
    }

    /// Create an error for a branch into the entry block.
    #[cold]
    pub fn entry_branch_target(location: IrLocation) -> Self {
        Self::EntryBranchTarget {
            location,
            suggestion: "Move the loop into a block of its own and branch there from the entry block."
                .to_string(),
        }
    }

    /// Create a stale-handle error.
    #[cold]
    pub fn stale_instruction(index: u32, generation: u32, location: IrLocation) -> Self {
        Self::StaleInstruction {
            index,
            generation,
            location,
            suggestion: "The instruction was deleted; refresh handles after compaction.".to_string(),
        }
    }

    /// Create a division-by-zero error.
    #[cold]
    pub fn division_by_zero(message: impl Into<String>, location: IrLocation) -> Self {
        Self::DivisionByZero {
            message: message.into(),
            location,
            suggestion: "The program divides by a constant zero; fix the input program.".to_string(),
        }
    }

    /// Create an arithmetic-overflow error.
    #[cold]
    pub fn arithmetic_overflow(message: impl Into<String>, location: IrLocation) -> Self {
        Self::ArithmeticOverflow {
            message: message.into(),
            location,
            suggestion: "Signed division of i32::MIN by -1 has no representable result.".to_string(),
        }
    }

    /// Create an allocation-table miss.
    #[cold]
    pub fn missing_allocation(message: impl Into<String>, location: IrLocation) -> Self {
        Self::MissingAllocation {
            message: message.into(),
            location,
            suggestion: "This indicates a bug in interval construction; please report it."
                .to_string(),
        }
    }

    /// Create an unresolved-operand error.
    #[cold]
    pub fn unresolved_operand(operand: impl Into<String>, location: IrLocation) -> Self {
        Self::UnresolvedOperand {
            operand: operand.into(),
            location,
            suggestion: "Values that cross block boundaries must be passed through memory (alloca + load/store)."
                .to_string(),
        }
    }

    /// Create a spilled-value error.
    #[cold]
    pub fn spilled_value(message: impl Into<String>, location: IrLocation) -> Self {
        Self::SpilledValue {
            message: message.into(),
            location,
            suggestion: "Enlarge the register pool or select the `stack` spill policy.".to_string(),
        }
    }

    /// Create an invalid-target error.
    #[cold]
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            message: message.into(),
            suggestion: "Check the target specification file.".to_string(),
        }
    }

    /// Create a parse error.
    #[cold]
    pub fn parse(message: impl Into<String>, location: IrLocation) -> Self {
        Self::Parse {
            message: message.into(),
            location,
            suggestion: "Check the IR description against the documented JSON layout.".to_string(),
        }
    }
}

impl From<serde_json::Error> for CompilerError {
    #[cold] // Error paths are cold
    fn from(err: serde_json::Error) -> Self {
        CompilerError::Parse {
            message: format!("JSON error: {}", err),
            location: IrLocation::default(),
            suggestion: "The input must be a JSON module description.".to_string(),
        }
    }
}
