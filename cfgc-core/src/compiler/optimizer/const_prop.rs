//! Constant-store propagation.
//!
//! Replaces a load by a constant when every store reaching it through memory
//! writes that same constant.
//!
//! # Algorithm
//! For each block B, starting from `R = in[B]`:
//! - a store to A drops the entries of R that target A and enters R, whether
//!   it writes a constant or an unknown value
//! - a load from A becomes `c` when R holds at least one entry for A and all of
//!   them store `c`; an unknown entry or a disagreement leaves the load alone
//!
//! Rewrites are collected during the scan and applied afterwards.

use crate::compiler::analysis::data_flow::{ConstantStores, DataFlowAnalyzer, DataFlowResult, InstSet};
use crate::compiler::error::Result;
use crate::compiler::ir::function::Function;
use crate::compiler::ir::instruction::{InstId, InstKind, Value};

/// Constant-store propagation pass.
pub struct ConstantPropagation;

impl ConstantPropagation {
    /// Run the pass once over every block of `function`.
    ///
    /// Data-flow sets are computed fresh on entry.
    ///
    /// # Returns
    /// `usize` - Number of loads replaced by a constant
    pub fn run(function: &mut Function) -> Result<usize> {
        let (stores, flow): (ConstantStores, DataFlowResult) =
            DataFlowAnalyzer::constant_stores(function)?;
        let mut rewrites: Vec<(InstId, i32)> = Vec::new();

        for bb in function.blocks() {
            let mut reaching: InstSet = flow.blocks[bb.id.index()].in_set.clone();
            for &id in bb.instructions() {
                let inst = function.instruction(id)?;
                match inst.kind {
                    InstKind::Store { ptr, .. } => {
                        stores.remove_target(&mut reaching, ptr);
                        reaching.set(id.index(), true);
                    }
                    InstKind::Load { ptr } => {
                        if let Some(constant) = Self::agreed_constant(&stores, &reaching, ptr) {
                            log::trace!(
                                "{}: load from {:?} is constant {}",
                                function.location_of(id),
                                ptr,
                                constant
                            );
                            rewrites.push((id, constant));
                        }
                    }
                    _ => {}
                }
            }
        }

        let loads: Vec<InstId> = rewrites.iter().map(|&(id, _)| id).collect();
        for (load, constant) in rewrites {
            function.replace_all_uses(load, Value::Const(constant));
        }
        function.remove_instructions(&loads);

        if !loads.is_empty() {
            log::debug!("@{}: propagated {} load(s)", function.name, loads.len());
        }
        Ok(loads.len())
    }

    /// Constant that every reaching store to `target` agrees on.
    fn agreed_constant(stores: &ConstantStores, reaching: &InstSet, target: Value) -> Option<i32> {
        let mut agreed: Option<i32> = None;
        for fact in stores.facts_in(reaching).filter(|f| f.target == target) {
            let constant: i32 = fact.constant?;
            match agreed {
                None => agreed = Some(constant),
                Some(c) if c == constant => {}
                Some(_) => return None,
            }
        }
        agreed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::builder::FunctionBuilder;
    use crate::compiler::ir::instruction::Predicate;

    #[test]
    fn test_unknown_value_store_blocks_propagation() {
        let mut b = FunctionBuilder::new("f");
        b.create_block("entry");
        let a = b.alloca("a");
        let other = b.alloca("other");
        b.store(5, a);
        let v = b.load(other);
        b.store(v, a);
        let l = b.load(a);
        b.ret(Some(l.into()));
        let mut func = b.finish().expect("valid");

        assert_eq!(ConstantPropagation::run(&mut func).expect("runs"), 0);
        assert!(func.inst(l).is_some());
    }

    #[test]
    fn test_disagreeing_branches_leave_load() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.create_block("entry");
        let left = b.create_block("left");
        let right = b.create_block("right");
        let join = b.create_block("join");
        b.switch_to_block(entry);
        let a = b.alloca("a");
        b.cond_br(Predicate::Slt, 1, 2, left, right);
        b.switch_to_block(left);
        b.store(1, a);
        b.br(join);
        b.switch_to_block(right);
        b.store(2, a);
        b.br(join);
        b.switch_to_block(join);
        let l = b.load(a);
        b.ret(Some(l.into()));
        let mut func = b.finish().expect("valid");

        assert_eq!(ConstantPropagation::run(&mut func).expect("runs"), 0);
        assert!(func.inst(l).is_some());
    }
}
