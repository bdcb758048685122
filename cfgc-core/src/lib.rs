//! cfgc core library
//!
//! Data-flow optimizer and x86 back-end for a basic-block IR.
//!
//! - [`compiler::ir`]: instructions, functions, builder, JSON interchange
//! - [`compiler::analysis`]: control flow graph and the GEN/KILL/IN/OUT solver
//! - [`compiler::optimizer`]: constant propagation, folding, dead code elimination
//! - [`compiler::codegen`]: liveness, register allocation, assembly emission
//! - [`compiler::pipeline`]: the whole run, optimize then emit
//! - [`target`]: register pool, frame geometry and spill policy

pub mod compiler;
pub mod target;
