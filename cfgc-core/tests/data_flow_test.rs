//! Tests for the constant-store data-flow engine

use cfgc_core::compiler::analysis::data_flow::empty_set;
use cfgc_core::compiler::analysis::{
    ConstantStores, ControlFlowGraph, DataFlowAnalyzer, DataFlowResult, InstSet,
};
use cfgc_core::compiler::error::CompilerError;
use cfgc_core::compiler::ir::{BlockId, Function, FunctionBuilder, InstId, InstKind, Predicate};

/// entry: a = 1; br loop
/// loop:  a = 2; b = 7; cond-br loop, exit
/// exit:  ret
fn looping_function() -> Function {
    let mut b = FunctionBuilder::new("looping");
    let entry = b.create_block("entry");
    let body = b.create_block("loop");
    let exit = b.create_block("exit");

    b.switch_to_block(entry);
    let a = b.alloca("a");
    let bb = b.alloca("b");
    b.store(1, a);
    b.br(body);

    b.switch_to_block(body);
    let v = b.load(a);
    b.store(2, a);
    b.store(7, bb);
    b.cond_br(Predicate::Slt, v, 10, body, exit);

    b.switch_to_block(exit);
    b.ret(None);
    b.finish().expect("valid function")
}

fn is_subset(small: &InstSet, big: &InstSet) -> bool {
    small.iter_ones().all(|bit| big[bit])
}

#[test]
fn test_solver_terminates_on_loops() {
    let func = looping_function();
    let (_, result) = DataFlowAnalyzer::constant_stores(&func).expect("solves");
    assert!(result.iterations >= 2);
    assert_eq!(result.blocks.len(), 3);
}

#[test]
fn test_fixed_point_is_idempotent() {
    let func = looping_function();
    let cfg = ControlFlowGraph::build(&func).expect("cfg");
    let (_, result) = DataFlowAnalyzer::constant_stores(&func).expect("solves");

    for (idx, meta) in result.blocks.iter().enumerate() {
        let mut in_set: InstSet = empty_set(meta.in_set.len());
        for pred in cfg.predecessors(BlockId(idx as u32)) {
            in_set |= &result.blocks[pred.index()].out_set;
        }
        let mut out_set = in_set.clone();
        for killed in meta.kill.iter_ones() {
            out_set.set(killed, false);
        }
        out_set |= &meta.gen;

        assert_eq!(in_set, meta.in_set, "in of bb{} moved after convergence", idx);
        assert_eq!(out_set, meta.out_set, "out of bb{} moved after convergence", idx);
    }

    let (_, again) = DataFlowAnalyzer::constant_stores(&func).expect("solves again");
    assert_eq!(result.blocks, again.blocks);
}

#[test]
fn test_gen_is_subset_of_out() {
    let func = looping_function();
    let (_, result) = DataFlowAnalyzer::constant_stores(&func).expect("solves");
    for meta in result.blocks.iter() {
        assert!(is_subset(&meta.gen, &meta.out_set));
    }
}

#[test]
fn test_shadowing_in_gen() {
    let mut b = FunctionBuilder::new("shadow");
    b.create_block("entry");
    let a = b.alloca("a");
    let bb = b.alloca("b");
    b.store(1, a);
    b.store(2, bb);
    b.store(3, a);
    b.ret(None);
    let func = b.finish().expect("valid function");

    let (stores, result): (ConstantStores, DataFlowResult) =
        DataFlowAnalyzer::constant_stores(&func).expect("solves");
    let mut gen: Vec<(InstId, Option<i32>)> = stores
        .facts_in(&result.blocks[0].gen)
        .map(|f| (f.target.as_inst().expect("alloca target"), f.constant))
        .collect();
    gen.sort_by_key(|&(_, c)| c);
    assert_eq!(gen, vec![(bb, Some(2)), (a, Some(3))]);
}

#[test]
fn test_loop_header_sees_both_stores() {
    let func = looping_function();
    let (stores, result) = DataFlowAnalyzer::constant_stores(&func).expect("solves");
    let constants: Vec<Option<i32>> = stores
        .facts_in(&result.blocks[1].in_set)
        .filter(|f| f.constant != Some(7))
        .map(|f| f.constant)
        .collect();
    assert_eq!(constants, vec![Some(1), Some(2)]);
}

#[test]
fn test_missing_terminator_is_fatal() {
    let mut b = FunctionBuilder::new("broken");
    b.create_block("entry");
    let a = b.alloca("a");
    b.store(1, a);
    let func = b.finish_unchecked();

    assert!(matches!(
        DataFlowAnalyzer::constant_stores(&func),
        Err(CompilerError::MissingTerminator { .. })
    ));
}

#[test]
fn test_dangling_target_is_fatal() {
    let mut b = FunctionBuilder::new("dangling");
    b.create_block("entry");
    b.br(BlockId(9));
    let func = b.finish_unchecked();

    assert!(matches!(
        ControlFlowGraph::build(&func),
        Err(CompilerError::UnknownBlock { target: 9, .. })
    ));
}

#[test]
fn test_non_constant_store_shadows_reaching_constants() {
    let mut b = FunctionBuilder::new("overwrite");
    let entry = b.create_block("entry");
    let next = b.create_block("next");
    b.switch_to_block(entry);
    let a = b.alloca("a");
    let other = b.alloca("other");
    b.store(5, a);
    let v = b.load(other);
    let unknown = b.store(v, a);
    b.br(next);
    b.switch_to_block(next);
    b.ret(None);
    let func = b.finish().expect("valid function");

    let (stores, result) = DataFlowAnalyzer::constant_stores(&func).expect("solves");
    let reaching: Vec<(InstId, Option<i32>)> = stores
        .facts_in(&result.blocks[1].in_set)
        .map(|f| (f.store, f.constant))
        .collect();
    assert_eq!(reaching, vec![(unknown, None)]);
    assert!(matches!(
        func.instruction(v).expect("live").kind,
        InstKind::Load { .. }
    ));
}

/// entry: i = 0; br head
/// head:  v = load i; cond-br v < 10, body, exit
/// body:  store (load i) + 1, i; br head
#[test]
fn test_unknown_store_reaches_loop_header() {
    let mut b = FunctionBuilder::new("count");
    let entry = b.create_block("entry");
    let head = b.create_block("head");
    let body = b.create_block("body");
    let exit = b.create_block("exit");

    b.switch_to_block(entry);
    let i = b.alloca("i");
    let init = b.store(0, i);
    b.br(head);

    b.switch_to_block(head);
    let v = b.load(i);
    b.cond_br(Predicate::Slt, v, 10, body, exit);

    b.switch_to_block(body);
    let w = b.load(i);
    let next = b.add(w, 1);
    let step = b.store(next, i);
    b.br(head);

    b.switch_to_block(exit);
    b.ret(None);
    let func = b.finish().expect("valid function");

    let (stores, result) = DataFlowAnalyzer::constant_stores(&func).expect("solves");
    let at_head: Vec<(InstId, Option<i32>)> = stores
        .facts_in(&result.blocks[head.index()].in_set)
        .map(|f| (f.store, f.constant))
        .collect();
    assert_eq!(at_head, vec![(init, Some(0)), (step, None)]);
    assert!(result.blocks[body.index()].kill[init.index()]);
}
