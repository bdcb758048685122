//! Dead code elimination.
//!
//! Removes, until nothing more goes:
//! - arithmetic and loads whose result is never used
//! - stores into an `alloca` that is only ever written (never loaded, never escapes)
//! - `alloca`s with no remaining uses

use crate::compiler::error::Result;
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::{InstId, InstKind, Value};
use std::collections::HashMap;

/// Dead code elimination pass.
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    /// # Returns
    /// `usize` - Number of removed instructions
    pub fn run(function: &mut Function) -> Result<usize> {
        let mut removed: usize = 0usize;

        loop {
            let uses: HashMap<InstId, usize> = function.use_counts();
            let mut dead: Vec<InstId> = Vec::new();

            for bb in function.blocks() {
                for &id in bb.instructions() {
                    match function.instruction(id)?.kind {
                        InstKind::Binary { .. } | InstKind::Load { .. } => {
                            if !uses.contains_key(&id) {
                                dead.push(id);
                            }
                        }
                        InstKind::Alloca => {
                            if !uses.contains_key(&id) {
                                dead.push(id);
                            } else if let Some(stores) = Self::write_only_stores(function, id) {
                                dead.extend(stores);
                            }
                        }
                        _ => {}
                    }
                }
            }

            if dead.is_empty() {
                break;
            }
            dead.sort();
            dead.dedup();
            removed += function.remove_instructions(&dead);
        }

        if removed > 0 {
            log::debug!("@{}: removed {} dead instruction(s)", function.name, removed);
        }
        Ok(removed)
    }

    /// The stores into `slot` if every use of it is as a store destination.
    fn write_only_stores(function: &Function, slot: InstId) -> Option<Vec<InstId>> {
        let users: Vec<InstId> = function.users(slot);
        let write_only: bool = users.iter().all(|&user| {
            matches!(
                function.inst(user).map(|inst| &inst.kind),
                Some(InstKind::Store { value, ptr })
                    if *ptr == Value::Inst(slot) && *value != Value::Inst(slot)
            )
        });
        if write_only {
            Some(users)
        } else {
            None
        }
    }
}
