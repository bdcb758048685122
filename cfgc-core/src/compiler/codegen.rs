//! x86 Code Generation
//!
//! Lowers optimized IR to 32-bit x86 assembly (AT&T syntax, GNU as).
//!
//! # Per-function Pipeline
//! 1. **Labels**: the entry block is labelled with the function name, every
//!    other block with a synthetic `.L<n>`, numbered across the module
//! 2. **Allocation**: liveness and register allocation of every block
//!    (`register.rs`, `liveness.rs`)
//! 3. **Frame**: offsets of the entry-block `alloca`s and spill homes (`memory.rs`)
//! 4. **Emission**: directives, prologue, then every non-`alloca`
//!    instruction of every block, into a buffer
//!
//! Nothing is returned for a module unless every function in it was emitted.
//!
//! # Operand Resolution
//! - constant: immediate `$c`
//! - value with a register: `%reg`
//! - spilled value: its home slot `off(%ebp)` (`stack` spill policy only)
//! - entry-block `alloca`: its slot `off(%ebp)`
//! - anything else (e.g. a value defined in another block): fatal
//!
//! Registers needed only for the duration of one instruction (a scratch
//! destination for a spilled result, staging for memory-to-memory moves, the
//! `%eax`/`%edx` pair of a division) are saved with `pushl` before it and
//! restored with `popl` after it.

pub mod asm;
pub mod liveness;
pub mod memory;
pub mod register;

use crate::compiler::codegen::asm::{arithmetic_mnemonic, jump_mnemonic, Location};
use crate::compiler::codegen::memory::FrameLayout;
use crate::compiler::codegen::register::{Allocation, BlockAllocation, RegisterAllocator, ResultTable};
use crate::compiler::error::{CompilerError, IrLocation, Result};
use crate::compiler::ir::function::{Function, Module};
use crate::compiler::ir::instruction::{BinaryOp, BlockId, InstId, InstKind, Predicate, Value};
use crate::target::{validate_target, PhysicalRegister, SpillPolicy, TargetSpec};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Unique assembly label of every block of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Label the blocks of `function`, drawing synthetic numbers from `counter`.
    pub fn assign(function: &Function, counter: &mut usize) -> Self {
        let labels: Vec<String> = function
            .blocks()
            .iter()
            .map(|bb| {
                if bb.id.index() == 0 {
                    function.name.clone()
                } else {
                    let label: String = format!(".L{}", *counter);
                    *counter += 1;
                    label
                }
            })
            .collect();
        Self { labels }
    }

    #[inline]
    pub fn label(&self, block: BlockId) -> Option<&str> {
        self.labels.get(block.index()).map(String::as_str)
    }
}

/// Counters of one code generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodegenStats {
    pub functions: usize,
    pub blocks: usize,
    /// Values that did not get a register
    pub spilled: usize,
    /// Sum of all frame sizes, in bytes
    pub frame_bytes: u64,
}

/// Assembly generator for a module.
pub struct CodeGenerator {
    target: TargetSpec,
    label_counter: usize,
    stats: CodegenStats,
}

impl CodeGenerator {
    /// # Errors
    /// `InvalidTarget` if the target fails validation.
    pub fn new(target: TargetSpec) -> Result<Self> {
        validate_target(&target)?;
        Ok(Self {
            target,
            label_counter: 0usize,
            stats: CodegenStats::default(),
        })
    }

    #[inline]
    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    #[inline]
    pub fn stats(&self) -> CodegenStats {
        self.stats
    }

    /// Emit every function of `module`, in declaration order.
    ///
    /// # Returns
    /// `String` - The whole assembly file; nothing if any function fails
    pub fn generate_module(&mut self, module: &Module) -> Result<String> {
        let mut code: String = String::from("\t.text\n");
        for function in module.functions.iter() {
            code.push_str(&self.generate_function(function)?);
        }
        Ok(code)
    }

    /// Allocate and emit one function.
    pub fn generate_function(&mut self, function: &Function) -> Result<String> {
        if function.blocks().is_empty() {
            return Err(CompilerError::missing_terminator(IrLocation::function(
                function.name.clone(),
            )));
        }

        let labels: LabelTable = LabelTable::assign(function, &mut self.label_counter);
        let allocations: Vec<BlockAllocation> =
            RegisterAllocator::new(&self.target).allocate_function(function)?;
        let frame: FrameLayout = FrameLayout::build(function, &self.target, &allocations)?;
        let saved: Vec<PhysicalRegister> = self
            .target
            .callee_saved
            .iter()
            .copied()
            .filter(|reg| allocations.iter().any(|a| a.table.uses_register(*reg)))
            .collect();

        let mut emitter = FunctionEmitter {
            function,
            target: &self.target,
            frame: &frame,
            labels: &labels,
            saved: &saved,
            out: String::new(),
        };
        emitter.emit(&allocations)?;

        let spilled: usize = allocations.iter().map(|a| a.table.spill_count()).sum();
        self.stats.functions += 1;
        self.stats.blocks += allocations.len();
        self.stats.spilled += spilled;
        self.stats.frame_bytes += u64::from(frame.size());
        log::debug!(
            "@{}: emitted, {} spilled value(s), {} callee-saved register(s)",
            function.name,
            spilled,
            saved.len()
        );
        Ok(emitter.out)
    }
}

/// Append one indented instruction line.
#[inline]
fn line(out: &mut String, text: &str) {
    out.push('\t');
    out.push_str(text);
    out.push('\n');
}

/// Registers saved around a single instruction.
struct Scratch {
    busy: SmallVec<[PhysicalRegister; 6]>,
    pushed: SmallVec<[PhysicalRegister; 6]>,
}

impl Scratch {
    fn new() -> Self {
        Self {
            busy: SmallVec::new(),
            pushed: SmallVec::new(),
        }
    }

    /// Keep the register behind `location` out of scratch use.
    fn reserve(&mut self, location: Location) {
        if let Some(reg) = location.register() {
            self.reserve_register(reg);
        }
    }

    fn reserve_register(&mut self, reg: PhysicalRegister) {
        if !self.busy.contains(&reg) {
            self.busy.push(reg);
        }
    }

    fn save(&mut self, reg: PhysicalRegister, out: &mut String) {
        line(out, &format!("pushl {}", reg));
        self.pushed.push(reg);
        self.reserve_register(reg);
    }

    /// Save and hand out the first register nobody in this instruction uses.
    fn acquire(&mut self, out: &mut String, location: &IrLocation) -> Result<PhysicalRegister> {
        let reg: PhysicalRegister = PhysicalRegister::ALL
            .iter()
            .copied()
            .find(|reg| !self.busy.contains(reg))
            .ok_or_else(|| {
                CompilerError::unresolved_operand("no scratch register left", location.clone())
            })?;
        self.save(reg, out);
        Ok(reg)
    }

    fn restore(self, out: &mut String) {
        for reg in self.pushed.iter().rev() {
            line(out, &format!("popl {}", reg));
        }
    }
}

/// Destination of a value-producing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dest {
    /// No interval: nothing reads the value in this block
    Dead,
    Register(PhysicalRegister),
    /// Spilled: offset of the home slot
    Home(i32),
}

struct FunctionEmitter<'a> {
    function: &'a Function,
    target: &'a TargetSpec,
    frame: &'a FrameLayout,
    labels: &'a LabelTable,
    saved: &'a [PhysicalRegister],
    out: String,
}

impl FunctionEmitter<'_> {
    fn emit(&mut self, allocations: &[BlockAllocation]) -> Result<()> {
        let function: &Function = self.function;
        let name: &str = &function.name;
        self.out.push_str(&format!("\t.globl {}\n\t.type {}, @function\n", name, name));

        for (bb, allocation) in function.blocks().iter().zip(allocations.iter()) {
            let label: String = self.label(bb.id, bb.id)?.to_string();
            self.out.push_str(&label);
            self.out.push_str(":\n");
            if bb.id.index() == 0 {
                self.prologue();
            }
            for &id in bb.instructions() {
                self.instruction(id, &allocation.table)?;
            }
        }
        Ok(())
    }

    fn prologue(&mut self) {
        line(&mut self.out, "pushl %ebp");
        line(&mut self.out, "movl %esp, %ebp");
        if self.frame.size() > 0 {
            line(&mut self.out, &format!("subl ${}, %esp", self.frame.size()));
        }
        for reg in self.saved.iter() {
            line(&mut self.out, &format!("pushl {}", reg));
        }
    }

    fn label(&self, block: BlockId, from: BlockId) -> Result<&str> {
        self.labels.label(block).ok_or_else(|| {
            CompilerError::unknown_block(block.0, IrLocation::block(self.function.name.clone(), from.0))
        })
    }

    fn instruction(&mut self, id: InstId, table: &ResultTable) -> Result<()> {
        let function: &Function = self.function;
        let inst = function.instruction(id)?;
        let block: BlockId = inst.block;
        match inst.kind {
            InstKind::Alloca => Ok(()),
            InstKind::Binary {
                op: BinaryOp::Div,
                lhs,
                rhs,
            } => self.divide(id, lhs, rhs, table),
            InstKind::Binary { op, lhs, rhs } => self.arithmetic(id, op, lhs, rhs, table),
            InstKind::Load { ptr } => self.load(id, ptr, table),
            InstKind::Store { value, ptr } => self.store(id, value, ptr, table),
            InstKind::Br { target } => {
                let text: String = format!("jmp {}", self.label(target, block)?);
                line(&mut self.out, &text);
                Ok(())
            }
            InstKind::CondBr {
                predicate,
                lhs,
                rhs,
                then_target,
                else_target,
            } => self.branch(id, predicate, lhs, rhs, then_target, else_target, table),
            InstKind::Ret { value } => self.ret(id, value, table),
        }
    }

    /// Home slot of a spilled value, subject to the spill policy.
    fn spill_home(&self, id: InstId, at: InstId) -> Result<i32> {
        match self.target.spill_policy {
            SpillPolicy::Error => Err(CompilerError::spilled_value(
                "value was spilled and the spill policy forbids memory homes",
                self.function.location_of(at),
            )),
            SpillPolicy::Stack => self.frame.home(id).ok_or_else(|| {
                CompilerError::missing_allocation(
                    "spilled value has no home slot",
                    self.function.location_of(id),
                )
            }),
        }
    }

    fn destination(&self, id: InstId, table: &ResultTable) -> Result<Dest> {
        match table.get(id) {
            None => Ok(Dest::Dead),
            Some(Allocation::Register(reg)) => Ok(Dest::Register(reg)),
            Some(Allocation::Spilled) => self.spill_home(id, id).map(Dest::Home),
        }
    }

    /// Location of a value operand of instruction `at`.
    fn operand(&self, value: Value, at: InstId, table: &ResultTable) -> Result<Location> {
        match value {
            Value::Const(c) => Ok(Location::Immediate(c)),
            Value::StackSlot(off) => Ok(Location::Frame(off)),
            Value::Register(reg) => Ok(Location::Register(reg)),
            Value::Inst(id) => match table.get(id) {
                Some(Allocation::Register(reg)) => Ok(Location::Register(reg)),
                Some(Allocation::Spilled) => Ok(Location::Frame(self.spill_home(id, at)?)),
                None => match self.frame.offset(id) {
                    Some(off) => Ok(Location::FrameAddress(off)),
                    None => Err(CompilerError::unresolved_operand(
                        format!(
                            "value defined at {} has no register, stack slot or constant form",
                            self.function.location_of(id)
                        ),
                        self.function.location_of(at),
                    )),
                },
            },
        }
    }

    /// Memory location a `load` reads or a `store` writes.
    fn address(
        &mut self,
        ptr: Value,
        at: InstId,
        table: &ResultTable,
        scratch: &mut Scratch,
    ) -> Result<Location> {
        let location: Location = match self.operand(ptr, at, table)? {
            Location::FrameAddress(off) => Location::Frame(off),
            Location::Frame(off) if matches!(ptr, Value::StackSlot(_)) => Location::Frame(off),
            Location::Register(reg) => Location::Indirect(reg),
            Location::Frame(home) => {
                // Pointer spilled to its home slot
                let reg: PhysicalRegister = scratch.acquire(&mut self.out, &self.function.location_of(at))?;
                line(&mut self.out, &format!("movl {}(%ebp), {}", home, reg));
                Location::Indirect(reg)
            }
            other => {
                return Err(CompilerError::unresolved_operand(
                    format!("{} is not an address", other),
                    self.function.location_of(at),
                ))
            }
        };
        scratch.reserve(location);
        Ok(location)
    }

    /// Make a value location usable as an instruction source.
    fn source(&mut self, location: Location, at: InstId, scratch: &mut Scratch) -> Result<Location> {
        match location {
            Location::FrameAddress(off) => {
                let reg: PhysicalRegister = scratch.acquire(&mut self.out, &self.function.location_of(at))?;
                line(&mut self.out, &format!("leal {}(%ebp), {}", off, reg));
                Ok(Location::Register(reg))
            }
            other => Ok(other),
        }
    }

    /// Move, staging memory-to-memory through a scratch register.
    fn mov(&mut self, src: Location, dst: Location, at: InstId, scratch: &mut Scratch) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        if src.is_memory() && dst.is_memory() {
            let reg: PhysicalRegister = scratch.acquire(&mut self.out, &self.function.location_of(at))?;
            line(&mut self.out, &format!("movl {}, {}", src, reg));
            line(&mut self.out, &format!("movl {}, {}", reg, dst));
        } else {
            line(&mut self.out, &format!("movl {}, {}", src, dst));
        }
        Ok(())
    }

    /// add / sub / mul: `movl lhs, dst` then `op rhs, dst`.
    fn arithmetic(
        &mut self,
        id: InstId,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        table: &ResultTable,
    ) -> Result<()> {
        let dest: Dest = self.destination(id, table)?;
        if dest == Dest::Dead {
            log::trace!("{}: result unused, not emitted", self.function.location_of(id));
            return Ok(());
        }

        let mut scratch: Scratch = Scratch::new();
        let lhs: Location = self.operand(lhs, id, table)?;
        let rhs: Location = self.operand(rhs, id, table)?;
        scratch.reserve(lhs);
        scratch.reserve(rhs);
        if let Dest::Register(reg) = dest {
            scratch.reserve_register(reg);
        }

        let dst: PhysicalRegister = match dest {
            Dest::Register(reg) => reg,
            _ => scratch.acquire(&mut self.out, &self.function.location_of(id))?,
        };
        let lhs: Location = self.source(lhs, id, &mut scratch)?;
        let mut rhs: Location = self.source(rhs, id, &mut scratch)?;
        if rhs == Location::Register(dst) && lhs != rhs {
            let reg: PhysicalRegister = scratch.acquire(&mut self.out, &self.function.location_of(id))?;
            line(&mut self.out, &format!("movl {}, {}", rhs, reg));
            rhs = Location::Register(reg);
        }

        self.mov(lhs, Location::Register(dst), id, &mut scratch)?;
        line(
            &mut self.out,
            &format!("{} {}, {}", arithmetic_mnemonic(op), rhs, dst),
        );
        if let Dest::Home(home) = dest {
            line(&mut self.out, &format!("movl {}, {}(%ebp)", dst, home));
        }
        scratch.restore(&mut self.out);
        Ok(())
    }

    /// div: `%edx:%eax / divisor` with `cltd; idivl`, quotient from `%eax`.
    fn divide(&mut self, id: InstId, lhs: Value, rhs: Value, table: &ResultTable) -> Result<()> {
        let dest: Dest = self.destination(id, table)?;
        let dst: Location = match dest {
            Dest::Dead => {
                log::trace!("{}: result unused, not emitted", self.function.location_of(id));
                return Ok(());
            }
            Dest::Register(reg) => Location::Register(reg),
            Dest::Home(home) => Location::Frame(home),
        };

        let mut scratch: Scratch = Scratch::new();
        let dividend: Location = self.operand(lhs, id, table)?;
        let divisor: Location = self.operand(rhs, id, table)?;
        scratch.reserve(dividend);
        scratch.reserve(divisor);
        scratch.reserve(dst);
        for reg in [PhysicalRegister::Eax, PhysicalRegister::Edx] {
            if dst == Location::Register(reg) {
                scratch.reserve_register(reg);
            } else {
                scratch.save(reg, &mut self.out);
            }
        }

        let dividend: Location = self.source(dividend, id, &mut scratch)?;
        let mut divisor: Location = self.source(divisor, id, &mut scratch)?;
        let clobbered: bool = matches!(
            divisor.register(),
            Some(PhysicalRegister::Eax) | Some(PhysicalRegister::Edx)
        );
        if matches!(divisor, Location::Immediate(_)) || clobbered {
            let reg: PhysicalRegister = scratch.acquire(&mut self.out, &self.function.location_of(id))?;
            line(&mut self.out, &format!("movl {}, {}", divisor, reg));
            divisor = Location::Register(reg);
        }

        let eax: Location = Location::Register(PhysicalRegister::Eax);
        if dividend != eax {
            line(&mut self.out, &format!("movl {}, %eax", dividend));
        }
        line(&mut self.out, "cltd");
        line(&mut self.out, &format!("idivl {}", divisor));
        if dst != eax {
            line(&mut self.out, &format!("movl %eax, {}", dst));
        }
        scratch.restore(&mut self.out);
        Ok(())
    }

    fn load(&mut self, id: InstId, ptr: Value, table: &ResultTable) -> Result<()> {
        let dst: Location = match self.destination(id, table)? {
            Dest::Dead => {
                log::trace!("{}: loaded value unused, not emitted", self.function.location_of(id));
                return Ok(());
            }
            Dest::Register(reg) => Location::Register(reg),
            Dest::Home(home) => Location::Frame(home),
        };

        let mut scratch: Scratch = Scratch::new();
        scratch.reserve(dst);
        let src: Location = self.address(ptr, id, table, &mut scratch)?;
        self.mov(src, dst, id, &mut scratch)?;
        scratch.restore(&mut self.out);
        Ok(())
    }

    fn store(&mut self, id: InstId, value: Value, ptr: Value, table: &ResultTable) -> Result<()> {
        let mut scratch: Scratch = Scratch::new();
        let src: Location = self.operand(value, id, table)?;
        scratch.reserve(src);
        let dst: Location = self.address(ptr, id, table, &mut scratch)?;
        let src: Location = self.source(src, id, &mut scratch)?;
        self.mov(src, dst, id, &mut scratch)?;
        scratch.restore(&mut self.out);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn branch(
        &mut self,
        id: InstId,
        predicate: Predicate,
        lhs: Value,
        rhs: Value,
        then_target: BlockId,
        else_target: BlockId,
        table: &ResultTable,
    ) -> Result<()> {
        let block: BlockId = self.function.instruction(id)?.block;
        let then_label: String = self.label(then_target, block)?.to_string();
        let else_label: String = self.label(else_target, block)?.to_string();

        match jump_mnemonic(predicate) {
            None => {
                log::warn!(
                    "{}: predicate `{}` has no lowering, comparison skipped",
                    self.function.location_of(id),
                    predicate.name()
                );
            }
            Some(jump) => {
                let mut scratch: Scratch = Scratch::new();
                let lhs: Location = self.operand(lhs, id, table)?;
                let rhs: Location = self.operand(rhs, id, table)?;
                scratch.reserve(lhs);
                scratch.reserve(rhs);
                let mut lhs: Location = self.source(lhs, id, &mut scratch)?;
                let rhs: Location = self.source(rhs, id, &mut scratch)?;
                if matches!(lhs, Location::Immediate(_)) || (lhs.is_memory() && rhs.is_memory()) {
                    let reg: PhysicalRegister = scratch.acquire(&mut self.out, &self.function.location_of(id))?;
                    line(&mut self.out, &format!("movl {}, {}", lhs, reg));
                    lhs = Location::Register(reg);
                }
                line(&mut self.out, &format!("cmpl {}, {}", rhs, lhs));
                // popl leaves the flags alone
                scratch.restore(&mut self.out);
                line(&mut self.out, &format!("{} {}", jump, then_label));
            }
        }
        line(&mut self.out, &format!("jmp {}", else_label));
        Ok(())
    }

    fn ret(&mut self, id: InstId, value: Option<Value>, table: &ResultTable) -> Result<()> {
        let ret: PhysicalRegister = self.target.return_register;
        if let Some(value) = value {
            match self.operand(value, id, table)? {
                Location::Register(reg) if reg == ret => {}
                Location::FrameAddress(off) => {
                    line(&mut self.out, &format!("leal {}(%ebp), {}", off, ret))
                }
                other => line(&mut self.out, &format!("movl {}, {}", other, ret)),
            }
        }
        for reg in self.saved.iter().rev() {
            line(&mut self.out, &format!("popl {}", reg));
        }
        line(&mut self.out, "leave");
        line(&mut self.out, "ret");
        Ok(())
    }
}
