//! Unit tests for x86 code generation

use cfgc_core::compiler::codegen::CodeGenerator;
use cfgc_core::compiler::error::CompilerError;
use cfgc_core::compiler::ir::{Function, FunctionBuilder, Module, Predicate, Value};
use cfgc_core::compiler::optimizer::Optimizer;
use cfgc_core::target::{PhysicalRegister, SpillPolicy, TargetSpec};

fn generate(function: &Function, target: TargetSpec) -> Result<String, CompilerError> {
    let mut codegen = CodeGenerator::new(target)?;
    codegen.generate_function(function)
}

fn lines(asm: &str) -> Vec<&str> {
    asm.lines().collect()
}

/// `lines` contains `expected` as a contiguous run.
fn contains_run(asm: &str, expected: &[&str]) -> bool {
    let lines: Vec<&str> = lines(asm);
    lines.windows(expected.len()).any(|w| w == expected)
}

/// x = alloca; store 1, x; a, b, c = load x; t = a + b; u = t + c; store u, x; ret
fn pressure() -> Function {
    let mut b = FunctionBuilder::new("pressure");
    b.create_block("entry");
    let x = b.alloca("x");
    b.store(1, x);
    let va = b.load(x);
    let vb = b.load(x);
    let vc = b.load(x);
    let t = b.add(va, vb);
    let u = b.add(t, vc);
    b.store(u, x);
    b.ret(None);
    b.finish().expect("valid function")
}

/// entry: x = alloca; store 3, x; a = load x; cond-br a, 5
fn compare(predicate: Predicate, constant_first: bool) -> Function {
    let mut b = FunctionBuilder::new("main");
    let entry = b.create_block("entry");
    let then_block = b.create_block("then");
    let else_block = b.create_block("else");
    b.switch_to_block(entry);
    let x = b.alloca("x");
    b.store(3, x);
    let a = b.load(x);
    if constant_first {
        b.cond_br(predicate, 5, a, then_block, else_block);
    } else {
        b.cond_br(predicate, a, 5, then_block, else_block);
    }
    b.switch_to_block(then_block);
    b.ret(Some(Value::Const(1)));
    b.switch_to_block(else_block);
    b.ret(Some(Value::Const(0)));
    b.finish().expect("valid function")
}

#[test]
fn test_store_then_load_compiles_to_constant_return() {
    let mut module = Module::from_json(
        r#"{ "functions": [ { "name": "main", "blocks": [
            { "label": "entry", "instructions": [
                { "op": "alloca", "name": "x" },
                { "op": "store", "value": 10, "ptr": "x" },
                { "op": "br", "target": "bb2" } ] },
            { "label": "bb2", "instructions": [
                { "op": "load", "name": "v", "ptr": "x" },
                { "op": "ret", "value": "v" } ] } ] } ] }"#,
    )
    .expect("parses");
    Optimizer::default().optimize(&mut module).expect("optimizes");

    let mut codegen = CodeGenerator::new(TargetSpec::default()).expect("valid target");
    let asm = codegen.generate_module(&module).expect("emits");
    assert_eq!(
        lines(&asm),
        vec![
            "\t.text",
            "\t.globl main",
            "\t.type main, @function",
            "main:",
            "\tpushl %ebp",
            "\tmovl %esp, %ebp",
            "\tjmp .L0",
            ".L0:",
            "\tmovl $10, %eax",
            "\tleave",
            "\tret",
        ]
    );
    assert_eq!(codegen.stats().frame_bytes, 0);
}

#[test]
fn test_subtraction_keeps_operand_order() {
    let mut b = FunctionBuilder::new("main");
    b.create_block("entry");
    let x = b.alloca("x");
    b.store(7, x);
    let a = b.load(x);
    let c = b.load(x);
    let d = b.sub(a, c);
    b.ret(Some(d.into()));
    let func = b.finish().expect("valid function");

    let asm = generate(&func, TargetSpec::default()).expect("emits");
    assert_eq!(
        lines(&asm),
        vec![
            "\t.globl main",
            "\t.type main, @function",
            "main:",
            "\tpushl %ebp",
            "\tmovl %esp, %ebp",
            "\tsubl $4, %esp",
            "\tpushl %ebx",
            "\tmovl $7, -4(%ebp)",
            "\tmovl -4(%ebp), %ebx",
            "\tmovl -4(%ebp), %ecx",
            "\tmovl %ebx, %eax",
            "\tsubl %ecx, %eax",
            "\tpopl %ebx",
            "\tleave",
            "\tret",
        ]
    );
}

#[test]
fn test_division_goes_through_eax_edx() {
    let mut b = FunctionBuilder::new("main");
    b.create_block("entry");
    let x = b.alloca("x");
    b.store(9, x);
    let a = b.load(x);
    let q = b.div(a, 2);
    b.ret(Some(q.into()));
    let func = b.finish().expect("valid function");

    let asm = generate(&func, TargetSpec::default()).expect("emits");
    assert!(contains_run(
        &asm,
        &[
            "\tmovl -4(%ebp), %ebx",
            "\tpushl %edx",
            "\tpushl %ecx",
            "\tmovl $2, %ecx",
            "\tmovl %ebx, %eax",
            "\tcltd",
            "\tidivl %ecx",
            "\tpopl %ecx",
            "\tpopl %edx",
            "\tpopl %ebx",
            "\tleave",
        ]
    ));
}

#[test]
fn test_conditional_branch_lowering() {
    let asm = generate(&compare(Predicate::Slt, false), TargetSpec::default()).expect("emits");
    assert!(contains_run(
        &asm,
        &[
            "\tmovl -4(%ebp), %eax",
            "\tcmpl $5, %eax",
            "\tjl .L0",
            "\tjmp .L1",
            ".L0:",
            "\tmovl $1, %eax",
        ]
    ));
    assert!(contains_run(&asm, &[".L1:", "\tmovl $0, %eax", "\tleave", "\tret"]));
}

#[test]
fn test_immediate_left_operand_is_staged() {
    let asm = generate(&compare(Predicate::Sgt, true), TargetSpec::default()).expect("emits");
    assert!(contains_run(
        &asm,
        &[
            "\tpushl %ebx",
            "\tmovl $5, %ebx",
            "\tcmpl %eax, %ebx",
            "\tpopl %ebx",
            "\tjg .L0",
            "\tjmp .L1",
        ]
    ));
}

#[test]
fn test_unsigned_predicate_skips_comparison() {
    let asm = generate(&compare(Predicate::Ult, false), TargetSpec::default()).expect("emits");
    assert!(!asm.contains("cmpl"));
    assert!(contains_run(&asm, &["\tmovl -4(%ebp), %eax", "\tjmp .L1", ".L0:"]));
}

#[test]
fn test_spills_rejected_under_error_policy() {
    let target = TargetSpec::default()
        .with_registers(vec![PhysicalRegister::Eax])
        .with_spill_policy(SpillPolicy::Error);
    assert!(matches!(
        generate(&pressure(), target),
        Err(CompilerError::SpilledValue { .. })
    ));
}

#[test]
fn test_spills_homed_on_stack() {
    let target = TargetSpec::default().with_registers(vec![PhysicalRegister::Eax]);
    let mut codegen = CodeGenerator::new(target).expect("valid target");
    let asm = codegen.generate_function(&pressure()).expect("emits");

    assert!(contains_run(&asm, &["\tmovl %esp, %ebp", "\tsubl $16, %esp", "\tmovl $1, -4(%ebp)"]));
    // b goes to its home through a scratch register
    assert!(contains_run(
        &asm,
        &[
            "\tpushl %eax",
            "\tmovl -4(%ebp), %eax",
            "\tmovl %eax, -8(%ebp)",
            "\tpopl %eax",
        ]
    ));
    // t = a + b, result spilled to its home
    assert!(contains_run(
        &asm,
        &[
            "\tpushl %ebx",
            "\tmovl %eax, %ebx",
            "\taddl -8(%ebp), %ebx",
            "\tmovl %ebx, -16(%ebp)",
            "\tpopl %ebx",
        ]
    ));
    assert!(contains_run(
        &asm,
        &["\tmovl -16(%ebp), %eax", "\taddl -12(%ebp), %eax", "\tmovl %eax, -4(%ebp)"]
    ));
    assert_eq!(codegen.stats().spilled, 3);
    assert_eq!(codegen.stats().frame_bytes, 16);
}

#[test]
fn test_cross_block_value_is_unresolved() {
    let mut b = FunctionBuilder::new("cross");
    let entry = b.create_block("entry");
    let next = b.create_block("next");
    b.switch_to_block(entry);
    let x = b.alloca("x");
    let v = b.load(x);
    b.br(next);
    b.switch_to_block(next);
    b.ret(Some(v.into()));
    let func = b.finish().expect("valid function");

    assert!(matches!(
        generate(&func, TargetSpec::default()),
        Err(CompilerError::UnresolvedOperand { .. })
    ));
}

#[test]
fn test_returning_an_alloca_takes_its_address() {
    let mut b = FunctionBuilder::new("addr");
    b.create_block("entry");
    let x = b.alloca("x");
    b.ret(Some(x.into()));
    let func = b.finish().expect("valid function");

    let asm = generate(&func, TargetSpec::default()).expect("emits");
    assert!(contains_run(&asm, &["\tsubl $4, %esp", "\tleal -4(%ebp), %eax", "\tleave"]));
}

#[test]
fn test_invalid_target_is_rejected() {
    let target = TargetSpec::default().with_registers(Vec::new());
    assert!(matches!(
        CodeGenerator::new(target),
        Err(CompilerError::InvalidTarget { .. })
    ));
}

#[test]
fn test_synthetic_labels_continue_across_functions() {
    let mut module = Module::new();
    for name in ["first", "second"] {
        let mut b = FunctionBuilder::new(name);
        let entry = b.create_block("entry");
        let exit = b.create_block("exit");
        b.switch_to_block(entry);
        b.br(exit);
        b.switch_to_block(exit);
        b.ret(None);
        module.push(b.finish().expect("valid function"));
    }

    let mut codegen = CodeGenerator::new(TargetSpec::default()).expect("valid target");
    let asm = codegen.generate_module(&module).expect("emits");
    assert!(contains_run(&asm, &["first:", "\tpushl %ebp", "\tmovl %esp, %ebp", "\tjmp .L0", ".L0:"]));
    assert!(contains_run(&asm, &["second:", "\tpushl %ebp", "\tmovl %esp, %ebp", "\tjmp .L1", ".L1:"]));
    assert_eq!(codegen.stats().functions, 2);
    assert_eq!(codegen.stats().blocks, 4);
}
