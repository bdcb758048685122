// CLI command handlers
use anyhow::{Context, Result};
use cfgc_core::compiler::ir::Module;
use cfgc_core::compiler::optimizer::{OptimizationLevel, Optimizer};
use cfgc_core::compiler::pipeline::{Pipeline, PipelineStats};
use cfgc_core::target::TargetSpec;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Emit {
    /// x86 assembly (AT&T syntax)
    Asm,
    /// Optimized IR, textual dump
    Ir,
    /// Optimized IR, JSON module description
    Json,
}

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub input: PathBuf,
    pub emit: Emit,
    pub level: OptimizationLevel,
    pub target: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub stats: bool,
}

pub fn load_module(path: &Path) -> Result<Module> {
    let text: String = fs::read_to_string(path)
        .with_context(|| format!("Failed to read IR file: {}", path.display()))?;
    Module::from_json(&text).with_context(|| format!("Failed to load IR module: {}", path.display()))
}

pub fn load_target(path: Option<&Path>) -> Result<TargetSpec> {
    match path {
        None => Ok(TargetSpec::default()),
        Some(path) => {
            let text: String = fs::read_to_string(path)
                .with_context(|| format!("Failed to read target file: {}", path.display()))?;
            TargetSpec::from_json(&text)
                .with_context(|| format!("Invalid target specification: {}", path.display()))
        }
    }
}

pub fn compile_file(options: &CompileOptions) -> Result<()> {
    let mut module: Module = load_module(&options.input)?;
    let target: TargetSpec = load_target(options.target.as_deref())?;
    let optimizer: Optimizer = Optimizer::new(options.level);
    log::info!(
        "Compiling {} ({} function(s))",
        options.input.display(),
        module.functions.len()
    );

    let (output, stats): (String, PipelineStats) = match options.emit {
        Emit::Asm => Pipeline::compile(&mut module, &optimizer, &target)
            .context("Compilation failed")?,
        Emit::Ir => {
            let stats = Pipeline::optimize(&mut module, &optimizer).context("Optimization failed")?;
            (module.to_string(), stats)
        }
        Emit::Json => {
            let stats = Pipeline::optimize(&mut module, &optimizer).context("Optimization failed")?;
            let mut json: String = module.to_json().context("Failed to serialize IR module")?;
            json.push('\n');
            (json, stats)
        }
    };

    match &options.output {
        Some(path) => fs::write(path, &output)
            .with_context(|| format!("Failed to write output: {}", path.display()))?,
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }

    if options.stats {
        let report: String =
            serde_json::to_string_pretty(&stats).context("Failed to serialize statistics")?;
        eprintln!("{}", report);
    }
    Ok(())
}
