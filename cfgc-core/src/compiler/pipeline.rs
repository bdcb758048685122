//! Complete Compilation Pipeline
//!
//! Orchestrates the compilation of an IR module: verification, the optimizer
//! fixed point, and x86 emission.
//!
//! # Pipeline Stages
//! 1. **Verification**: every block ends in one terminator, every target exists
//! 2. **Optimization**: constant propagation / folding / dead code elimination
//!    iterated to a fixed point
//! 3. **Code Generation**: liveness, register allocation and emission into
//!    one buffer
//!
//! `compile` runs stages 2 and 3 per function: one function is optimized,
//! allocated and emitted before the next one starts.
//!
//! A failing stage aborts the run; no assembly is produced for a module that
//! did not compile completely.

use crate::compiler::codegen::{CodeGenerator, CodegenStats};
use crate::compiler::error::Result;
use crate::compiler::ir::function::{Function, Module};
use crate::compiler::optimizer::{OptimizationStats, Optimizer};
use crate::target::TargetSpec;
use serde::{Deserialize, Serialize};

/// Compilation pipeline orchestrator.
pub struct Pipeline;

/// Statistics collected during pipeline execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub functions: usize,
    pub blocks: usize,
    pub instructions_before: usize,
    pub instructions_after: usize,
    pub spilled_values: usize,
    pub optimization: OptimizationStats,
}

impl PipelineStats {
    fn count(module: &Module) -> (usize, usize, usize) {
        let functions: usize = module.functions.len();
        let blocks: usize = module.functions.iter().map(|f| f.blocks().len()).sum();
        let instructions: usize = module.functions.iter().map(|f| f.instruction_count()).sum();
        (functions, blocks, instructions)
    }
}

impl Pipeline {
    /// Verify and optimize a module in place.
    ///
    /// # Arguments
    /// * `module` - Module to optimize (modified in place)
    /// * `optimizer` - Configured optimizer (selects the passes)
    ///
    /// # Returns
    /// `PipelineStats` - Counters of the run; `spilled_values` stays 0
    pub fn optimize(module: &mut Module, optimizer: &Optimizer) -> Result<PipelineStats> {
        log::info!("Starting optimization pipeline...");

        log::info!("Step 1: Verifying {} function(s)...", module.functions.len());
        module.verify()?;
        let (functions, blocks, instructions_before) = PipelineStats::count(module);

        log::info!("Step 2: Optimizing (level {})...", optimizer.level());
        let optimization: OptimizationStats = optimizer.optimize(module)?;
        let (_, _, instructions_after) = PipelineStats::count(module);
        log::info!(
            "Optimization finished: {} round(s), {} load(s) propagated, {} instruction(s) folded, {} removed",
            optimization.rounds,
            optimization.loads_propagated,
            optimization.instructions_folded,
            optimization.dead_removed
        );

        Ok(PipelineStats {
            functions,
            blocks,
            instructions_before,
            instructions_after,
            spilled_values: 0,
            optimization,
        })
    }

    /// Optimize a module and lower it to assembly.
    ///
    /// # Returns
    /// `(String, PipelineStats)` - The assembly text and the run's counters
    ///
    /// # Errors
    /// Any verification, optimization or code generation error. Nothing is
    /// emitted for a module that fails.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use cfgc_core::compiler::ir::Module;
    /// use cfgc_core::compiler::optimizer::Optimizer;
    /// use cfgc_core::compiler::pipeline::Pipeline;
    /// use cfgc_core::target::TargetSpec;
    /// # fn run(text: &str) -> cfgc_core::compiler::error::Result<()> {
    /// let mut module = Module::from_json(text)?;
    /// let (asm, _stats) = Pipeline::compile(&mut module, &Optimizer::default(), &TargetSpec::default())?;
    /// print!("{}", asm);
    /// # Ok(())
    /// # }
    /// ```
    pub fn compile(
        module: &mut Module,
        optimizer: &Optimizer,
        target: &TargetSpec,
    ) -> Result<(String, PipelineStats)> {
        log::info!("Starting compilation pipeline...");

        log::info!("Step 1: Verifying {} function(s)...", module.functions.len());
        module.verify()?;
        let (functions, blocks, instructions_before) = PipelineStats::count(module);
        let mut codegen: CodeGenerator = CodeGenerator::new(target.clone())?;

        log::info!(
            "Step 2: Optimizing (level {}) and generating x86 assembly...",
            optimizer.level()
        );
        let mut asm: String = String::from("\t.text\n");
        let mut optimization: OptimizationStats = OptimizationStats::default();
        for function in module.functions.iter_mut() {
            let function_stats: OptimizationStats =
                Self::compile_function(function, optimizer, &mut codegen, &mut asm)?;
            optimization.merge(&function_stats);
        }

        let (_, _, instructions_after) = PipelineStats::count(module);
        let codegen_stats: CodegenStats = codegen.stats();
        log::info!(
            "Compilation finished: {} function(s), {} byte(s) of frame, {} spilled value(s)",
            codegen_stats.functions,
            codegen_stats.frame_bytes,
            codegen_stats.spilled
        );
        Ok((
            asm,
            PipelineStats {
                functions,
                blocks,
                instructions_before,
                instructions_after,
                spilled_values: codegen_stats.spilled,
                optimization,
            },
        ))
    }

    /// Optimize one function, then allocate and emit it onto `asm`.
    fn compile_function(
        function: &mut Function,
        optimizer: &Optimizer,
        codegen: &mut CodeGenerator,
        asm: &mut String,
    ) -> Result<OptimizationStats> {
        let stats: OptimizationStats = optimizer.optimize_function(function)?;
        log::debug!(
            "@{}: {} round(s), {} change(s)",
            function.name,
            stats.rounds,
            stats.changes()
        );
        asm.push_str(&codegen.generate_function(function)?);
        Ok(stats)
    }
}
