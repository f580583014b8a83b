use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use trc::desc::{self, ProgramDesc};
use trc::pipeline::{run_verification, Provenance};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Diagnostics and a one-line summary (default).
    Diagnostics,
    /// The buffer table of a successful analysis.
    Buffers,
    /// Per-value storage descriptors of a successful analysis.
    Storage,
}

#[derive(Parser, Debug)]
#[command(
    name = "trc",
    version,
    about = "Trellis Compiler Core — verifies storage and layout assignments for Trellis dataflow programs"
)]
struct Cli {
    /// Input program description (JSON)
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Diagnostics)]
    emit: EmitStage,

    /// Print provenance and verification phases
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("trc: error: {}: {}", cli.source.display(), e);
            return ExitCode::from(2);
        }
    };
    let provenance = Provenance::of_source(&source);
    if cli.verbose {
        eprintln!("trc: source = {}", cli.source.display());
        eprintln!("trc: sha256 = {}", provenance.source_hash);
        eprintln!("trc: version = {}", provenance.compiler_version);
    }

    let description: ProgramDesc = match serde_json::from_str(&source) {
        Ok(description) => description,
        Err(e) => {
            eprintln!("trc: error: invalid program description: {e}");
            return ExitCode::from(2);
        }
    };
    let mut program = match desc::build(&description) {
        Ok(program) => program,
        Err(diagnostics) => {
            for diagnostic in &diagnostics {
                eprintln!("{diagnostic}");
            }
            return ExitCode::from(2);
        }
    };

    let outcome = run_verification(&mut program);
    for diagnostic in &outcome.diagnostics {
        eprintln!("{diagnostic}");
    }
    let Some(analysis) = outcome.analysis else {
        return ExitCode::from(1);
    };

    match cli.emit {
        EmitStage::Diagnostics => {
            println!(
                "ok: {} buffers, {} values",
                analysis.buffers().len(),
                program.num_values()
            );
        }
        EmitStage::Buffers => {
            for (name, buffer) in analysis.buffers() {
                let rank = match buffer.rank() {
                    Some(rank) => rank.to_string(),
                    None => "?".to_string(),
                };
                println!(
                    "{name}: {} rank={rank} loop_nest=[{}]{}",
                    buffer.element_type(),
                    buffer.loop_nest().join(", "),
                    if buffer.is_external() { " external" } else { "" }
                );
            }
        }
        EmitStage::Storage => {
            for value in program.value_ids() {
                println!("v{}: {}", value.index(), analysis.get_storage(value));
            }
        }
    }
    ExitCode::SUCCESS
}
