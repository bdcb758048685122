//! Textual IR dump.
//!
//! An LLVM-flavoured listing used by `--emit ir` and by debug logging:
//!
//! ```text
//! define @main {
//! entry:
//!   %x = alloca
//!   store 10, %x
//!   br label %exit
//! exit:
//!   %t0 = load %x
//!   ret %t0
//! }
//! ```

use crate::compiler::ir::format::NameTable;
use crate::compiler::ir::function::{Function, Module};
use crate::compiler::ir::instruction::{InstKind, Value};
use std::fmt;

struct Operand<'a>(&'a NameTable, &'a Value);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Value::Const(c) => write!(f, "{}", c),
            Value::StackSlot(off) => write!(f, "slot({})", off),
            Value::Register(reg) => write!(f, "reg({})", reg.name()),
            Value::Inst(id) => match self.0.value_name(*id) {
                Some(name) => write!(f, "%{}", name),
                None => write!(f, "%<stale:{}>", id.index()),
            },
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: NameTable = NameTable::for_function(self);
        writeln!(f, "define @{} {{", self.name)?;
        for bb in self.blocks() {
            writeln!(f, "{}:", names.label(bb.id))?;
            for &id in bb.instructions() {
                let inst = match self.inst(id) {
                    Some(inst) => inst,
                    None => continue,
                };
                let op = |v: &Value| Operand(&names, v).to_string();
                f.write_str("  ")?;
                if let Some(name) = names.value_name(id) {
                    write!(f, "%{} = ", name)?;
                }
                match &inst.kind {
                    InstKind::Alloca => f.write_str("alloca")?,
                    InstKind::Binary { op: bin, lhs, rhs } => {
                        write!(f, "{} {}, {}", bin.opcode(), op(lhs), op(rhs))?
                    }
                    InstKind::Load { ptr } => write!(f, "load {}", op(ptr))?,
                    InstKind::Store { value, ptr } => {
                        write!(f, "store {}, {}", op(value), op(ptr))?
                    }
                    InstKind::Br { target } => write!(f, "br label %{}", names.label(*target))?,
                    InstKind::CondBr {
                        predicate,
                        lhs,
                        rhs,
                        then_target,
                        else_target,
                    } => write!(
                        f,
                        "br {} {}, {}, label %{}, label %{}",
                        predicate.name(),
                        op(lhs),
                        op(rhs),
                        names.label(*then_target),
                        names.label(*else_target)
                    )?,
                    InstKind::Ret { value: Some(v) } => write!(f, "ret {}", op(v))?,
                    InstKind::Ret { value: None } => f.write_str("ret void")?,
                }
                f.write_str("\n")?;
            }
        }
        f.write_str("}\n")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
