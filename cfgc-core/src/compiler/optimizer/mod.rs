//! IR Optimizations
//!
//! Optimization passes over the basic-block IR and the driver that iterates
//! them to a fixed point.
//!
//! # Optimization Passes
//!
//! - **Constant Propagation**: Replace loads by the constant every reaching store agrees on
//! - **Constant Folding**: Evaluate arithmetic on constants at compile time
//! - **Dead Code Elimination**: Remove unused values, write-only stack slots and their stores
//!
//! # Optimization Levels
//!
//! - **None**: No optimizations
//! - **Basic**: Constant propagation and constant folding
//! - **Aggressive**: Basic plus dead code elimination
//!
//! # Fixed Point
//!
//! One round runs propagation over every block, then folding over every
//! block, then (if enabled) dead code elimination. Data-flow sets are
//! recomputed at the start of every round. Rounds repeat until one of them
//! changes nothing.
//!
//! ```rust,no_run
//! use cfgc_core::compiler::optimizer::{Optimizer, OptimizationLevel};
//! # fn run(module: &mut cfgc_core::compiler::ir::Module) -> cfgc_core::compiler::error::Result<()> {
//! let optimizer = Optimizer::new(OptimizationLevel::Aggressive);
//! let stats = optimizer.optimize(module)?;
//! println!("{} load(s) propagated", stats.loads_propagated);
//! # Ok(())
//! # }
//! ```

pub mod const_fold;
pub mod const_prop;
pub mod dead_code;

pub use const_fold::ConstantFolding;
pub use const_prop::ConstantPropagation;
pub use dead_code::DeadCodeElimination;

use crate::compiler::error::Result;
use crate::compiler::ir::function::{Function, Module};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum OptimizationLevel {
    /// No optimizations
    None = 0,
    /// Constant propagation and folding
    Basic = 1,
    /// Basic plus dead code elimination
    #[default]
    Aggressive = 2,
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OptimizationLevel::None => "none",
            OptimizationLevel::Basic => "basic",
            OptimizationLevel::Aggressive => "aggressive",
        })
    }
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(OptimizationLevel::None),
            "basic" | "1" => Ok(OptimizationLevel::Basic),
            "aggressive" | "2" => Ok(OptimizationLevel::Aggressive),
            other => Err(format!("unknown optimization level `{}`", other)),
        }
    }
}

/// Counters of one optimizer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationStats {
    /// Rounds executed, the final unchanged one included
    pub rounds: usize,
    /// Loads replaced by constants
    pub loads_propagated: usize,
    /// Arithmetic instructions folded
    pub instructions_folded: usize,
    /// Instructions removed as dead
    pub dead_removed: usize,
}

impl OptimizationStats {
    /// Total number of IR changes.
    #[inline]
    pub fn changes(&self) -> usize {
        self.loads_propagated + self.instructions_folded + self.dead_removed
    }

    pub fn merge(&mut self, other: &OptimizationStats) {
        self.rounds += other.rounds;
        self.loads_propagated += other.loads_propagated;
        self.instructions_folded += other.instructions_folded;
        self.dead_removed += other.dead_removed;
    }
}

/// Optimizer for IR modules.
#[derive(Debug, Clone)]
pub struct Optimizer {
    /// Optimization level
    level: OptimizationLevel,
    /// Enable constant-store propagation
    constant_propagation: bool,
    /// Enable constant folding
    constant_folding: bool,
    /// Enable dead code elimination
    dead_code_elimination: bool,
}

impl Optimizer {
    /// Create a new optimizer with specified level.
    pub fn new(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::None => Self {
                level,
                constant_propagation: false,
                constant_folding: false,
                dead_code_elimination: false,
            },
            OptimizationLevel::Basic => Self {
                level,
                constant_propagation: true,
                constant_folding: true,
                dead_code_elimination: false,
            },
            OptimizationLevel::Aggressive => Self {
                level,
                constant_propagation: true,
                constant_folding: true,
                dead_code_elimination: true,
            },
        }
    }

    #[inline]
    pub fn level(&self) -> OptimizationLevel {
        self.level
    }

    /// Optimize every function of a module, in declaration order.
    ///
    /// # Errors
    /// The first fatal pass error (e.g. constant division by zero) aborts the run.
    pub fn optimize(&self, module: &mut Module) -> Result<OptimizationStats> {
        let mut stats: OptimizationStats = OptimizationStats::default();
        for function in module.functions.iter_mut() {
            let function_stats: OptimizationStats = self.optimize_function(function)?;
            stats.merge(&function_stats);
        }
        Ok(stats)
    }

    /// Optimize one function to a fixed point.
    ///
    /// # Algorithm
    /// Each round applies, in order:
    /// 1. Constant propagation (fresh data-flow sets)
    /// 2. Constant folding
    /// 3. Dead code elimination (if enabled)
    ///
    /// and the driver stops after the first round with no change.
    pub fn optimize_function(&self, function: &mut Function) -> Result<OptimizationStats> {
        let mut stats: OptimizationStats = OptimizationStats::default();
        if self.level == OptimizationLevel::None {
            return Ok(stats);
        }

        loop {
            stats.rounds += 1;
            let before: usize = stats.changes();

            if self.constant_propagation {
                stats.loads_propagated += ConstantPropagation::run(function)?;
            }
            if self.constant_folding {
                stats.instructions_folded += ConstantFolding::run(function)?;
            }
            if self.dead_code_elimination {
                stats.dead_removed += DeadCodeElimination::run(function)?;
            }

            if stats.changes() == before {
                break;
            }
        }

        log::debug!(
            "@{}: optimized in {} round(s): {} propagated, {} folded, {} removed",
            function.name,
            stats.rounds,
            stats.loads_propagated,
            stats.instructions_folded,
            stats.dead_removed
        );
        Ok(stats)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(OptimizationLevel::default())
    }
}
