// CLI application
use clap::Parser;
use cfgc_core::compiler::optimizer::OptimizationLevel;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

use commands::{compile_file, CompileOptions, Emit};

#[derive(Parser)]
#[command(name = "cfgc")]
#[command(about = "Data-flow optimizer and x86 back-end for a basic-block IR")]
#[command(version)]
struct Cli {
    /// Path to the JSON IR module
    input: PathBuf,

    /// What to print: assembly, the optimized IR as text, or as JSON
    #[arg(long, value_enum, default_value_t = Emit::Asm)]
    emit: Emit,

    /// Optimization level (none, basic, aggressive)
    #[arg(short = 'O', long = "opt-level", default_value_t = OptimizationLevel::Aggressive)]
    opt_level: OptimizationLevel,

    /// Path to a JSON target specification (default: x86, eax/ebx/ecx/edx)
    #[arg(long)]
    target: Option<PathBuf>,

    /// Write the output to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print pipeline statistics to stderr
    #[arg(long)]
    stats: bool,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli: Cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version also land here, on stdout
            let code: u8 = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    let options: CompileOptions = CompileOptions {
        input: cli.input,
        emit: cli.emit,
        level: cli.opt_level,
        target: cli.target,
        output: cli.output,
        stats: cli.stats,
    };

    let pb = create_progress_bar("Compiling IR module...");
    let result = compile_file(&options);
    pb.finish_and_clear();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style: ProgressStyle = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}
