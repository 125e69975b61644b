//! pyhdlc — PyHDL to SystemVerilog compiler driver
//!
//! Discovers `.phd` inputs, runs the compile pipeline per file, writes one
//! `.sv` unit per emitted module, and renders the diagnostic stream.
//! Exit codes: 0 success, 1 any module failed to compile, 2 usage or I/O
//! error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use pyhdl_mir::{compile_source, CompileResult, Severity};

/// PyHDL to SystemVerilog transpiler
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input `.phd` file, or a directory compiled one level deep
    input: PathBuf,

    /// Output directory for emitted SystemVerilog
    #[arg(short, long, default_value = "../hdl")]
    output: PathBuf,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also dump the elaborated MIR as JSON into the output directory
    #[arg(long)]
    dump_mir: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match run(&cli) {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(1),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let inputs = discover_inputs(&cli.input)?;
    if inputs.is_empty() {
        warn!("no `.phd` files found in {}", cli.input.display());
        return Ok(false);
    }

    fs::create_dir_all(&cli.output)
        .with_context(|| format!("failed to create output directory {}", cli.output.display()))?;

    let mut any_failed = false;
    for input in inputs {
        info!(file = %input.display(), "compiling");
        let source = fs::read_to_string(&input)
            .with_context(|| format!("failed to read {}", input.display()))?;

        let result = compile_source(&source);
        render_diagnostics(&result);
        any_failed |= result.failed;

        for module in &result.mir.modules {
            info!(
                module = %module.name,
                ports = module.ports.len(),
                signals = module.signals.len(),
                instances = module.instances.len(),
                "elaborated"
            );
        }

        for (name, text) in pyhdl_codegen::generate_modules(&result.mir) {
            let path = cli.output.join(format!("{}.sv", name));
            fs::write(&path, text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "emitted");
        }

        if cli.dump_mir {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "design".to_string());
            let path = cli.output.join(format!("{}.mir.json", stem));
            let json =
                serde_json::to_string_pretty(&result.mir).context("failed to serialize MIR")?;
            fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
    }

    Ok(any_failed)
}

/// A file input is compiled as-is; a directory yields each `.phd` file
/// directly inside it, in name order
fn discover_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(input)
            .with_context(|| format!("failed to read directory {}", input.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().map(|e| e == "phd").unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    } else if input.is_file() {
        Ok(vec![input.to_path_buf()])
    } else {
        anyhow::bail!("input {} is neither a file nor a directory", input.display());
    }
}

fn render_diagnostics(result: &CompileResult) {
    for diagnostic in &result.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!("{}", diagnostic),
            Severity::Warning => warn!("{}", diagnostic),
        }
    }
}
