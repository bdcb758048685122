//! Basic-block IR: instructions, functions, builder and interchange formats.

pub mod builder;
pub mod display;
pub mod format;
pub mod function;
pub mod instruction;

pub use builder::FunctionBuilder;
pub use format::{BlockDesc, FunctionDesc, InstDesc, ModuleDesc, OperandDesc};
pub use function::{BasicBlock, Function, InstArena, Module};
pub use instruction::{BinaryOp, BlockId, InstId, InstKind, Instruction, Opcode, Predicate, Value};
