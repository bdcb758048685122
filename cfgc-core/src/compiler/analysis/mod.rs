//! Program analyses the optimizer runs on: the control flow graph and the
//! data-flow solver.

pub mod control_flow;
pub mod data_flow;

pub use control_flow::ControlFlowGraph;
pub use data_flow::{
    BlockMetadata, ConstantStores, DataFlowAnalyzer, DataFlowProblem, DataFlowResult, InstSet,
    StoreFact,
};
