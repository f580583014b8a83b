// pipeline.rs — Analysis orchestration
//
// Bundles the collaborator analyses a storage verification needs, runs the
// default-attribute passes and the verification itself, and carries the
// provenance fingerprint of the input description.
//
// Preconditions: the program was built by `desc::build` or `ProgramBuilder`.
// Postconditions: `run_verification` returns the populated analysis, or no
//                 analysis plus the diagnostics explaining why.
// Failure modes: loop fusion conflicts, any storage verification failure.
// Side effects: `run_verification` assigns default loop-nest and storage
//               annotations to the program.

use sha2::{Digest, Sha256};

use crate::default_attrs::{assign_default_loop_nests, assign_default_storage};
use crate::diag::Diagnostic;
use crate::ir::Program;
use crate::iteration_space::IterationSpaceAnalysis;
use crate::loop_fusion::LoopFusionAnalysis;
use crate::sequence::SequenceAnalysis;
use crate::storage::{verify_storages, AnalysisContext, StorageAnalysis};

// ── Collaborator analyses ───────────────────────────────────────────────────

/// The analyses consumed by the storage analysis, built once per program.
pub struct Analyses {
    pub fusion: LoopFusionAnalysis,
    pub spaces: IterationSpaceAnalysis,
    pub sequence: SequenceAnalysis,
}

impl Analyses {
    pub fn build(program: &Program) -> Result<Self, Vec<Diagnostic>> {
        let fusion = LoopFusionAnalysis::new(program)?;
        let spaces = IterationSpaceAnalysis::new(program);
        let sequence = SequenceAnalysis::new(program);
        Ok(Self {
            fusion,
            spaces,
            sequence,
        })
    }

    pub fn ctx<'a>(&'a self, program: &'a Program) -> AnalysisContext<'a> {
        AnalysisContext {
            program,
            fusion: &self.fusion,
            spaces: &self.spaces,
            sequence: &self.sequence,
        }
    }
}

// ── Verification entry point ────────────────────────────────────────────────

/// Result of a full verification run.
pub struct VerifyOutcome {
    /// The populated storage analysis, absent when verification failed.
    pub analysis: Option<StorageAnalysis>,
    pub diagnostics: Vec<Diagnostic>,
}

impl VerifyOutcome {
    pub fn is_success(&self) -> bool {
        self.analysis.is_some()
    }
}

/// Assigns default lowering attributes, builds the collaborator analyses and
/// runs the full storage verification.
pub fn run_verification(program: &mut Program) -> VerifyOutcome {
    assign_default_loop_nests(program);
    assign_default_storage(program);

    let analyses = match Analyses::build(program) {
        Ok(analyses) => analyses,
        Err(diagnostics) => {
            return VerifyOutcome {
                analysis: None,
                diagnostics,
            }
        }
    };
    match verify_storages(&analyses.ctx(program)) {
        Ok(analysis) => VerifyOutcome {
            analysis: Some(analysis),
            diagnostics: Vec::new(),
        },
        Err(diagnostics) => VerifyOutcome {
            analysis: None,
            diagnostics,
        },
    }
}

// ── Provenance ──────────────────────────────────────────────────────────────

/// Provenance metadata for reports and cache-key use.
///
/// `source_hash`: SHA-256 of the raw program description text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: String,
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn of_source(source: &str) -> Self {
        use std::fmt::Write;
        let digest = Sha256::digest(source.as_bytes());
        let source_hash = digest.iter().fold(String::with_capacity(64), |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        });
        Self {
            source_hash,
            compiler_version: env!("CARGO_PKG_VERSION"),
        }
    }
}
