//! Tests for constant propagation, folding and the optimizer fixed point

use cfgc_core::compiler::error::CompilerError;
use cfgc_core::compiler::ir::{Function, FunctionBuilder, InstKind, Module, Opcode, Predicate, Value};
use cfgc_core::compiler::optimizer::{
    ConstantFolding, ConstantPropagation, OptimizationLevel, Optimizer,
};
use cfgc_core::compiler::pipeline::Pipeline;
use cfgc_core::target::TargetSpec;

const STORE_THEN_LOAD: &str = r#"{ "functions": [ { "name": "main", "blocks": [
    { "label": "entry", "instructions": [
        { "op": "alloca", "name": "x" },
        { "op": "store", "value": 10, "ptr": "x" },
        { "op": "br", "target": "bb2" } ] },
    { "label": "bb2", "instructions": [
        { "op": "load", "name": "v", "ptr": "x" },
        { "op": "ret", "value": "v" } ] } ] } ] }"#;

/// i = 0; while (i < 10) i = i + 1; return i
const COUNTING_LOOP: &str = r#"{ "functions": [ { "name": "count", "blocks": [
    { "label": "entry", "instructions": [
        { "op": "alloca", "name": "i" },
        { "op": "store", "value": 0, "ptr": "i" },
        { "op": "br", "target": "head" } ] },
    { "label": "head", "instructions": [
        { "op": "load", "name": "v", "ptr": "i" },
        { "op": "condbr", "predicate": "slt", "lhs": "v", "rhs": 10,
          "then": "body", "else": "exit" } ] },
    { "label": "body", "instructions": [
        { "op": "load", "name": "w", "ptr": "i" },
        { "op": "add", "name": "n", "lhs": "w", "rhs": 1 },
        { "op": "store", "value": "n", "ptr": "i" },
        { "op": "br", "target": "head" } ] },
    { "label": "exit", "instructions": [
        { "op": "load", "name": "r", "ptr": "i" },
        { "op": "ret", "value": "r" } ] } ] } ] }"#;

fn opcodes(function: &Function) -> Vec<Vec<Opcode>> {
    function
        .blocks()
        .iter()
        .map(|bb| {
            bb.instructions()
                .iter()
                .map(|&id| function.instruction(id).expect("live").opcode())
                .collect()
        })
        .collect()
}

fn returned(function: &Function) -> Option<Value> {
    let last = function.blocks().last()?;
    let id = *last.instructions().last()?;
    match function.instruction(id).ok()?.kind {
        InstKind::Ret { value } => value,
        _ => None,
    }
}

#[test]
fn test_propagation_across_blocks() {
    let mut b = FunctionBuilder::new("f");
    let entry = b.create_block("entry");
    let next = b.create_block("next");
    b.switch_to_block(entry);
    let a = b.alloca("a");
    b.store(5, a);
    b.br(next);
    b.switch_to_block(next);
    let l = b.load(a);
    b.ret(Some(l.into()));
    let mut func = b.finish().expect("valid function");

    assert_eq!(ConstantPropagation::run(&mut func).expect("runs"), 1);
    assert!(func.inst(l).is_none());
    assert_eq!(returned(&func), Some(Value::Const(5)));
}

#[test]
fn test_agreeing_branches_propagate() {
    let mut b = FunctionBuilder::new("f");
    let entry = b.create_block("entry");
    let left = b.create_block("left");
    let right = b.create_block("right");
    let join = b.create_block("join");
    b.switch_to_block(entry);
    let a = b.alloca("a");
    let c = b.alloca("c");
    let cond = b.load(c);
    b.cond_br(Predicate::Eq, cond, 0, left, right);
    b.switch_to_block(left);
    b.store(4, a);
    b.br(join);
    b.switch_to_block(right);
    b.store(4, a);
    b.br(join);
    b.switch_to_block(join);
    let l = b.load(a);
    b.ret(Some(l.into()));
    let mut func = b.finish().expect("valid function");

    assert_eq!(ConstantPropagation::run(&mut func).expect("runs"), 1);
    assert_eq!(returned(&func), Some(Value::Const(4)));
}

#[test]
fn test_fold_simple_add() {
    let mut b = FunctionBuilder::new("f");
    b.create_block("entry");
    let sum = b.add(2, 3);
    b.ret(Some(sum.into()));
    let mut func = b.finish().expect("valid function");

    assert_eq!(ConstantFolding::run(&mut func).expect("folds"), 1);
    assert_eq!(returned(&func), Some(Value::Const(5)));
    assert_eq!(func.instruction_count(), 1);
}

#[test]
fn test_fold_wraps_on_overflow() {
    let mut b = FunctionBuilder::new("f");
    b.create_block("entry");
    let product = b.mul(i32::MAX, 2);
    b.ret(Some(product.into()));
    let mut func = b.finish().expect("valid function");

    ConstantFolding::run(&mut func).expect("folds");
    assert_eq!(returned(&func), Some(Value::Const(-2)));
}

#[test]
fn test_fold_division_by_zero_is_fatal() {
    let mut b = FunctionBuilder::new("f");
    b.create_block("entry");
    let q = b.div(4, 0);
    b.ret(Some(q.into()));
    let mut func = b.finish().expect("valid function");

    assert!(matches!(
        ConstantFolding::run(&mut func),
        Err(CompilerError::DivisionByZero { .. })
    ));
}

#[test]
fn test_store_then_load_end_to_end() {
    let mut module = Module::from_json(STORE_THEN_LOAD).expect("parses");
    let stats = Optimizer::default().optimize(&mut module).expect("optimizes");

    let main = module.function("main").expect("main exists");
    assert_eq!(opcodes(main), vec![vec![Opcode::Br], vec![Opcode::Ret]]);
    assert_eq!(returned(main), Some(Value::Const(10)));
    assert_eq!(stats.loads_propagated, 1);
    assert_eq!(stats.dead_removed, 2);
}

#[test]
fn test_basic_level_keeps_memory_traffic() {
    let mut module = Module::from_json(STORE_THEN_LOAD).expect("parses");
    Optimizer::new(OptimizationLevel::Basic)
        .optimize(&mut module)
        .expect("optimizes");

    let main = module.function("main").expect("main exists");
    assert_eq!(
        opcodes(main),
        vec![vec![Opcode::Alloca, Opcode::Store, Opcode::Br], vec![Opcode::Ret]]
    );
    assert_eq!(returned(main), Some(Value::Const(10)));
}

#[test]
fn test_level_none_changes_nothing() {
    let mut module = Module::from_json(STORE_THEN_LOAD).expect("parses");
    let stats = Optimizer::new(OptimizationLevel::None)
        .optimize(&mut module)
        .expect("optimizes");
    assert_eq!(stats.changes(), 0);
    assert_eq!(module.functions[0].instruction_count(), 5);
}

/// Folding in one round exposes a new constant store to the next round.
#[test]
fn test_rounds_iterate_to_fixed_point() {
    let mut b = FunctionBuilder::new("f");
    let entry = b.create_block("entry");
    let next = b.create_block("next");
    b.switch_to_block(entry);
    let a = b.alloca("a");
    let bslot = b.alloca("b");
    b.store(2, a);
    let l = b.load(a);
    let s = b.add(l, 3);
    b.store(s, bslot);
    b.br(next);
    b.switch_to_block(next);
    let m = b.load(bslot);
    b.ret(Some(m.into()));
    let mut func = b.finish().expect("valid function");

    let stats = Optimizer::default()
        .optimize_function(&mut func)
        .expect("optimizes");
    assert_eq!(stats.rounds, 3);
    assert_eq!(stats.loads_propagated, 2);
    assert_eq!(stats.instructions_folded, 1);
    assert_eq!(stats.dead_removed, 4);
    assert_eq!(opcodes(&func), vec![vec![Opcode::Br], vec![Opcode::Ret]]);
    assert_eq!(returned(&func), Some(Value::Const(5)));

    let again = Optimizer::default()
        .optimize_function(&mut func)
        .expect("optimizes");
    assert_eq!(again.rounds, 1);
    assert_eq!(again.changes(), 0);
}

#[test]
fn test_division_by_zero_surfaces_through_optimizer() {
    let text = r#"{ "functions": [ { "name": "f", "blocks": [
        { "label": "entry", "instructions": [
            { "op": "div", "name": "q", "lhs": 4, "rhs": 0 },
            { "op": "ret", "value": "q" } ] } ] } ] }"#;
    let mut module = Module::from_json(text).expect("parses");
    assert!(matches!(
        Optimizer::default().optimize(&mut module),
        Err(CompilerError::DivisionByZero { .. })
    ));
}

#[test]
fn test_loop_counter_is_not_propagated() {
    let mut module = Module::from_json(COUNTING_LOOP).expect("parses");
    let stats = Optimizer::default().optimize(&mut module).expect("optimizes");

    let count = module.function("count").expect("count exists");
    assert_eq!(stats.loads_propagated, 0);
    assert_eq!(
        opcodes(count),
        vec![
            vec![Opcode::Alloca, Opcode::Store, Opcode::Br],
            vec![Opcode::Load, Opcode::CondBr],
            vec![Opcode::Load, Opcode::Add, Opcode::Store, Opcode::Br],
            vec![Opcode::Load, Opcode::Ret],
        ]
    );
    assert!(matches!(returned(count), Some(Value::Inst(_))));
}

#[test]
fn test_loop_header_reads_memory_after_compile() {
    let mut module = Module::from_json(COUNTING_LOOP).expect("parses");
    let (asm, stats) =
        Pipeline::compile(&mut module, &Optimizer::default(), &TargetSpec::default())
            .expect("compiles");

    let lines: Vec<&str> = asm.lines().collect();
    let header = [".L0:", "\tmovl -4(%ebp), %eax", "\tcmpl $10, %eax", "\tjl .L1", "\tjmp .L2"];
    assert!(lines.windows(header.len()).any(|w| w == header), "{}", asm);
    assert_eq!(stats.optimization.loads_propagated, 0);
}

#[test]
fn test_one_sided_unknown_store_blocks_propagation() {
    let mut b = FunctionBuilder::new("f");
    let entry = b.create_block("entry");
    let left = b.create_block("left");
    let right = b.create_block("right");
    let join = b.create_block("join");
    b.switch_to_block(entry);
    let a = b.alloca("a");
    let input = b.alloca("input");
    let cond = b.load(input);
    b.cond_br(Predicate::Eq, cond, 0, left, right);
    b.switch_to_block(left);
    b.store(4, a);
    b.br(join);
    b.switch_to_block(right);
    let v = b.load(input);
    b.store(v, a);
    b.br(join);
    b.switch_to_block(join);
    let l = b.load(a);
    b.ret(Some(l.into()));
    let mut func = b.finish().expect("valid function");

    assert_eq!(ConstantPropagation::run(&mut func).expect("runs"), 0);
    assert!(func.inst(l).is_some());

    let stats = Optimizer::default()
        .optimize_function(&mut func)
        .expect("optimizes");
    assert_eq!(stats.loads_propagated, 0);
    assert!(func.inst(l).is_some());
    assert_eq!(returned(&func), Some(Value::Inst(l)));
}
