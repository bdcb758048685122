//! IR Interchange Format
//!
//! JSON description of a module, used to hand IR from an external front-end
//! to the compiler and to write optimized IR back out.
//!
//! ```json
//! { "functions": [ { "name": "main", "blocks": [
//!     { "label": "entry", "instructions": [
//!         { "op": "alloca", "name": "x" },
//!         { "op": "store", "value": 10, "ptr": "x" },
//!         { "op": "br", "target": "exit" } ] },
//!     { "label": "exit", "instructions": [
//!         { "op": "load", "name": "v", "ptr": "x" },
//!         { "op": "ret", "value": "v" } ] } ] } ] }
//! ```
//!
//! Operands are integers (constants), strings (names of earlier
//! instructions, with or without a leading `%`), `{"slot": -8}` (frame
//! slots) or `{"reg": "eax"}` (physical registers). Definitions must precede
//! their uses in document order; block labels may be referenced before the
//! block appears.

use crate::compiler::error::{CompilerError, IrLocation, Result};
use crate::compiler::ir::function::{Function, Module};
use crate::compiler::ir::instruction::{BinaryOp, BlockId, InstId, InstKind, Predicate, Value};
use crate::target::PhysicalRegister;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Serialized module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDesc {
    pub functions: Vec<FunctionDesc>,
}

/// Serialized function; the first block is the entry block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDesc {
    pub name: String,
    pub blocks: Vec<BlockDesc>,
}

/// Serialized basic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDesc {
    pub label: String,
    pub instructions: Vec<InstDesc>,
}

/// Serialized operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperandDesc {
    Const(i32),
    Name(String),
    Slot { slot: i32 },
    Reg { reg: PhysicalRegister },
}

/// Serialized instruction, tagged by opcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum InstDesc {
    Alloca {
        name: String,
    },
    Add {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        lhs: OperandDesc,
        rhs: OperandDesc,
    },
    Sub {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        lhs: OperandDesc,
        rhs: OperandDesc,
    },
    Mul {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        lhs: OperandDesc,
        rhs: OperandDesc,
    },
    Div {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        lhs: OperandDesc,
        rhs: OperandDesc,
    },
    Load {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        ptr: OperandDesc,
    },
    Store {
        value: OperandDesc,
        ptr: OperandDesc,
    },
    Br {
        target: String,
    },
    CondBr {
        predicate: Predicate,
        lhs: OperandDesc,
        rhs: OperandDesc,
        then: String,
        #[serde(rename = "else")]
        otherwise: String,
    },
    Ret {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<OperandDesc>,
    },
}

impl Module {
    /// Parse and verify a module from its JSON description.
    pub fn from_json(text: &str) -> Result<Module> {
        let desc: ModuleDesc = serde_json::from_str(text)?;
        desc.into_module()
    }

    /// JSON description of the module.
    pub fn to_json(&self) -> Result<String> {
        let desc: ModuleDesc = self.to_desc()?;
        Ok(serde_json::to_string_pretty(&desc)?)
    }

    pub fn to_desc(&self) -> Result<ModuleDesc> {
        let functions: Vec<FunctionDesc> = self
            .functions
            .iter()
            .map(FunctionDesc::from_function)
            .collect::<Result<_>>()?;
        Ok(ModuleDesc { functions })
    }
}

impl ModuleDesc {
    pub fn into_module(self) -> Result<Module> {
        let mut module: Module = Module::new();
        let mut seen: HashSet<String> = HashSet::new();
        for func in self.functions {
            if !seen.insert(func.name.clone()) {
                return Err(CompilerError::parse(
                    format!("function `{}` is defined twice", func.name),
                    IrLocation::default(),
                ));
            }
            module.push(func.into_function()?);
        }
        Ok(module)
    }
}

/// Strip the optional `%` sigil from a value name.
#[inline]
fn bare(name: &str) -> &str {
    name.strip_prefix('%').unwrap_or(name)
}

impl FunctionDesc {
    pub fn into_function(self) -> Result<Function> {
        let mut function: Function = Function::new(self.name.clone());
        let mut labels: HashMap<String, BlockId> = HashMap::new();

        for block in self.blocks.iter() {
            let id: BlockId = function.add_block(Some(block.label.clone()));
            if labels.insert(block.label.clone(), id).is_some() {
                return Err(CompilerError::parse(
                    format!("label `{}` is defined twice", block.label),
                    IrLocation::function(self.name.clone()),
                ));
            }
        }

        let mut names: HashMap<String, InstId> = HashMap::new();
        for (block_idx, block) in self.blocks.into_iter().enumerate() {
            let id: BlockId = BlockId(block_idx as u32);
            for (pos, desc) in block.instructions.into_iter().enumerate() {
                let location: IrLocation =
                    IrLocation::new(Some(self.name.clone()), Some(id.0), Some(pos));
                let resolver = Resolver {
                    names: &names,
                    labels: &labels,
                    location: &location,
                };
                let (name, kind): (Option<String>, InstKind) = resolver.lower(desc)?;
                let name: Option<String> = name.map(|n| bare(&n).to_string());
                if let Some(n) = &name {
                    if names.contains_key(n) {
                        return Err(CompilerError::parse(
                            format!("value `%{}` is defined twice", n),
                            location,
                        ));
                    }
                }
                let inst: InstId = function.append(id, name.clone(), kind);
                if let Some(n) = name {
                    names.insert(n, inst);
                }
            }
        }

        function.verify()?;
        Ok(function)
    }

    pub fn from_function(function: &Function) -> Result<FunctionDesc> {
        let table: NameTable = NameTable::for_function(function);
        let mut blocks: Vec<BlockDesc> = Vec::with_capacity(function.blocks().len());

        for bb in function.blocks() {
            let mut instructions: Vec<InstDesc> = Vec::with_capacity(bb.len());
            for &id in bb.instructions() {
                let inst = function.instruction(id)?;
                let operand = |v: &Value| table.operand_desc(v);
                let name: Option<String> = table.value_name(id).map(str::to_string);
                let desc: InstDesc = match &inst.kind {
                    InstKind::Alloca => InstDesc::Alloca {
                        name: name.unwrap_or_default(),
                    },
                    InstKind::Binary { op, lhs, rhs } => {
                        let (lhs, rhs) = (operand(lhs), operand(rhs));
                        match op {
                            BinaryOp::Add => InstDesc::Add { name, lhs, rhs },
                            BinaryOp::Sub => InstDesc::Sub { name, lhs, rhs },
                            BinaryOp::Mul => InstDesc::Mul { name, lhs, rhs },
                            BinaryOp::Div => InstDesc::Div { name, lhs, rhs },
                        }
                    }
                    InstKind::Load { ptr } => InstDesc::Load {
                        name,
                        ptr: operand(ptr),
                    },
                    InstKind::Store { value, ptr } => InstDesc::Store {
                        value: operand(value),
                        ptr: operand(ptr),
                    },
                    InstKind::Br { target } => InstDesc::Br {
                        target: table.label(*target).to_string(),
                    },
                    InstKind::CondBr {
                        predicate,
                        lhs,
                        rhs,
                        then_target,
                        else_target,
                    } => InstDesc::CondBr {
                        predicate: *predicate,
                        lhs: operand(lhs),
                        rhs: operand(rhs),
                        then: table.label(*then_target).to_string(),
                        otherwise: table.label(*else_target).to_string(),
                    },
                    InstKind::Ret { value } => InstDesc::Ret {
                        value: value.as_ref().map(operand),
                    },
                };
                instructions.push(desc);
            }
            blocks.push(BlockDesc {
                label: table.label(bb.id).to_string(),
                instructions,
            });
        }

        Ok(FunctionDesc {
            name: function.name.clone(),
            blocks,
        })
    }
}

struct Resolver<'a> {
    names: &'a HashMap<String, InstId>,
    labels: &'a HashMap<String, BlockId>,
    location: &'a IrLocation,
}

impl Resolver<'_> {
    fn value(&self, operand: OperandDesc) -> Result<Value> {
        match operand {
            OperandDesc::Const(c) => Ok(Value::Const(c)),
            OperandDesc::Slot { slot } => Ok(Value::StackSlot(slot)),
            OperandDesc::Reg { reg } => Ok(Value::Register(reg)),
            OperandDesc::Name(name) => self
                .names
                .get(bare(&name))
                .map(|&id| Value::Inst(id))
                .ok_or_else(|| {
                    CompilerError::parse(
                        format!("use of undefined value `%{}`", bare(&name)),
                        self.location.clone(),
                    )
                }),
        }
    }

    fn block(&self, label: &str) -> Result<BlockId> {
        self.labels.get(label).copied().ok_or_else(|| {
            CompilerError::parse(
                format!("branch to undefined label `{}`", label),
                self.location.clone(),
            )
        })
    }

    fn binary(
        &self,
        op: BinaryOp,
        name: Option<String>,
        lhs: OperandDesc,
        rhs: OperandDesc,
    ) -> Result<(Option<String>, InstKind)> {
        Ok((
            name,
            InstKind::Binary {
                op,
                lhs: self.value(lhs)?,
                rhs: self.value(rhs)?,
            },
        ))
    }

    fn lower(&self, desc: InstDesc) -> Result<(Option<String>, InstKind)> {
        match desc {
            InstDesc::Alloca { name } => Ok((Some(name), InstKind::Alloca)),
            InstDesc::Add { name, lhs, rhs } => self.binary(BinaryOp::Add, name, lhs, rhs),
            InstDesc::Sub { name, lhs, rhs } => self.binary(BinaryOp::Sub, name, lhs, rhs),
            InstDesc::Mul { name, lhs, rhs } => self.binary(BinaryOp::Mul, name, lhs, rhs),
            InstDesc::Div { name, lhs, rhs } => self.binary(BinaryOp::Div, name, lhs, rhs),
            InstDesc::Load { name, ptr } => Ok((
                name,
                InstKind::Load {
                    ptr: self.value(ptr)?,
                },
            )),
            InstDesc::Store { value, ptr } => Ok((
                None,
                InstKind::Store {
                    value: self.value(value)?,
                    ptr: self.value(ptr)?,
                },
            )),
            InstDesc::Br { target } => Ok((
                None,
                InstKind::Br {
                    target: self.block(&target)?,
                },
            )),
            InstDesc::CondBr {
                predicate,
                lhs,
                rhs,
                then,
                otherwise,
            } => Ok((
                None,
                InstKind::CondBr {
                    predicate,
                    lhs: self.value(lhs)?,
                    rhs: self.value(rhs)?,
                    then_target: self.block(&then)?,
                    else_target: self.block(&otherwise)?,
                },
            )),
            InstDesc::Ret { value } => Ok((
                None,
                InstKind::Ret {
                    value: value.map(|v| self.value(v)).transpose()?,
                },
            )),
        }
    }
}

/// Unique printable names for the values and blocks of one function.
///
/// Source names are kept when they are unique; everything else gets a
/// synthetic `t<n>` (values) or `bb<n>` (blocks) name.
pub(crate) struct NameTable {
    values: HashMap<InstId, String>,
    labels: Vec<String>,
}

impl NameTable {
    pub(crate) fn for_function(function: &Function) -> Self {
        let mut taken: HashSet<String> = HashSet::new();
        let mut values: HashMap<InstId, String> = HashMap::new();
        let mut counter: usize = 0;

        for bb in function.blocks() {
            for &id in bb.instructions() {
                let inst = match function.inst(id) {
                    Some(inst) if inst.kind.produces_value() => inst,
                    _ => continue,
                };
                let name: String = match &inst.name {
                    Some(n) if !taken.contains(n) => n.clone(),
                    _ => loop {
                        let candidate: String = format!("t{}", counter);
                        counter += 1;
                        if !taken.contains(&candidate) {
                            break candidate;
                        }
                    },
                };
                taken.insert(name.clone());
                values.insert(id, name);
            }
        }

        let mut used_labels: HashSet<String> = HashSet::new();
        let labels: Vec<String> = function
            .blocks()
            .iter()
            .map(|bb| {
                let mut label: String = bb.label.clone().unwrap_or_else(|| bb.id.to_string());
                if !used_labels.insert(label.clone()) {
                    label = format!("{}.{}", label, bb.id.0);
                    used_labels.insert(label.clone());
                }
                label
            })
            .collect();

        Self { values, labels }
    }

    pub(crate) fn value_name(&self, id: InstId) -> Option<&str> {
        self.values.get(&id).map(String::as_str)
    }

    pub(crate) fn label(&self, block: BlockId) -> &str {
        self.labels
            .get(block.index())
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    fn operand_desc(&self, value: &Value) -> OperandDesc {
        match value {
            Value::Const(c) => OperandDesc::Const(*c),
            Value::StackSlot(slot) => OperandDesc::Slot { slot: *slot },
            Value::Register(reg) => OperandDesc::Reg { reg: *reg },
            Value::Inst(id) => OperandDesc::Name(
                self.value_name(*id)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("<stale:{}>", id.index())),
            ),
        }
    }
}
