pub mod analysis;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod optimizer;
pub mod pipeline;
