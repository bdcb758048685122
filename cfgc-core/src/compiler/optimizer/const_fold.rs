//! Constant folding.
//!
//! Evaluates arithmetic whose operands are all constants, block by block.
//! A folded instruction's uses are rewritten in place, so a chain such as
//! `mul (add 2, 3), 4` folds completely in one scan; the folded instructions
//! themselves are deleted after the scan.

use crate::compiler::error::{CompilerError, Result};
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::{BinaryOp, InstId, InstKind, Value};

/// Constant folding pass.
pub struct ConstantFolding;

impl ConstantFolding {
    /// Fold every constant arithmetic instruction of `function`.
    ///
    /// # Errors
    /// `DivisionByZero` for a constant zero divisor, `ArithmeticOverflow`
    /// for `i32::MIN / -1`.
    ///
    /// # Returns
    /// `usize` - Number of folded instructions
    pub fn run(function: &mut Function) -> Result<usize> {
        let mut folded: Vec<InstId> = Vec::new();

        for block_idx in 0..function.blocks().len() {
            let ids: Vec<InstId> = function.blocks()[block_idx].instructions().to_vec();
            for id in ids {
                let (op, lhs, rhs): (BinaryOp, i32, i32) = match function.instruction(id)?.kind {
                    InstKind::Binary {
                        op,
                        lhs: Value::Const(lhs),
                        rhs: Value::Const(rhs),
                    } => (op, lhs, rhs),
                    _ => continue,
                };
                let value: i32 = Self::evaluate(function, id, op, lhs, rhs)?;
                log::trace!(
                    "{}: {} {}, {} folds to {}",
                    function.location_of(id),
                    op.opcode(),
                    lhs,
                    rhs,
                    value
                );
                function.replace_all_uses(id, Value::Const(value));
                folded.push(id);
            }
        }

        function.remove_instructions(&folded);
        if !folded.is_empty() {
            log::debug!("@{}: folded {} instruction(s)", function.name, folded.len());
        }
        Ok(folded.len())
    }

    fn evaluate(function: &Function, id: InstId, op: BinaryOp, lhs: i32, rhs: i32) -> Result<i32> {
        match op.evaluate(lhs, rhs) {
            Some(value) => Ok(value),
            None if rhs == 0 => Err(CompilerError::division_by_zero(
                format!("div {}, 0", lhs),
                function.location_of(id),
            )),
            None => Err(CompilerError::arithmetic_overflow(
                format!("div {}, {}", lhs, rhs),
                function.location_of(id),
            )),
        }
    }
}
