// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the network must be loaded before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; a controller
//                certificate with a failed obligation (E0400).
// Side effects: calls on_pass_complete callback after each pass for immediate
//               display; logs per-pass timing through `tracing`.

use std::time::{Duration, Instant};

use tracing::info;

use crate::channel::ChannelMap;
use crate::codegen::{CodegenOptions, GeneratedCode};
use crate::controller::ControllerCert;
use crate::ctl::ControlProgram;
use crate::diag::{codes, has_errors, Diagnostic, NodeRef};
use crate::hls::HlsResult;
use crate::network::Network;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::settings::{Settings, Target};

// ── Artifact storage ───────────────────────────────────────────────────────

/// Output of the emit pass, one variant per target.
#[derive(Debug)]
pub enum Generated {
    C(GeneratedCode),
    Hls(HlsResult),
}

/// Provenance metadata for reproducible builds.
///
/// `source_hash`: SHA-256 of the raw network JSON text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub network: Network,
    pub settings: Settings,
    pub channels: Option<ChannelMap>,
    pub programs: Option<Vec<ControlProgram>>,
    pub certs: Option<Vec<(String, ControllerCert)>>,
    pub generated: Option<Generated>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(network: Network, settings: Settings) -> Self {
        Self {
            network,
            settings,
            channels: None,
            programs: None,
            certs: None,
            generated: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

/// Per-pass post-processing: callback, accumulate, timing, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    info!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    codegen_options: &CodegenOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Validate => state.network.validate(),
            PassId::Allocate => {
                let result = crate::channel::allocate(&state.network, &state.settings);
                state.channels = Some(result.channels);
                result.diagnostics
            }
            PassId::Synthesize => {
                let mut diags = Vec::new();
                let mut programs = Vec::with_capacity(state.network.instances.len());
                for inst in &state.network.instances {
                    let policy = crate::liveness::policy_for(&inst.machine, &state.settings);
                    let result = crate::controller::synthesize(&inst.name, &inst.machine, policy);
                    diags.extend(result.diagnostics);
                    programs.push(result.program);
                }
                state.programs = Some(programs);
                diags
            }
            PassId::Verify => run_verify(state)?,
            PassId::Emit => run_emit(state, codegen_options)?,
        };
        finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
    }
    Ok(())
}

fn run_verify(state: &mut CompilationState) -> Result<Vec<Diagnostic>, PipelineError> {
    let programs = state.programs.as_ref().ok_or(PipelineError {
        failing_pass: PassId::Verify,
    })?;
    let mut diags = Vec::new();
    let mut certs = Vec::with_capacity(programs.len());
    for program in programs {
        let Some(inst) = state.network.instance(&program.name) else {
            continue;
        };
        let cert = crate::controller::verify_controller(program, &inst.machine);
        if !cert.all_pass() {
            let failed: Vec<_> = cert
                .obligations()
                .iter()
                .filter(|(_, ok)| !ok)
                .map(|(name, _)| *name)
                .collect();
            diags.push(Diagnostic::error(
                codes::E0400,
                NodeRef::Instance(program.name.clone()),
                format!("controller verification failed: {}", failed.join(", ")),
            ));
        }
        certs.push((program.name.clone(), cert));
    }
    state.certs = Some(certs);
    Ok(diags)
}

fn run_emit(
    state: &mut CompilationState,
    codegen_options: &CodegenOptions,
) -> Result<Vec<Diagnostic>, PipelineError> {
    let missing = PipelineError {
        failing_pass: PassId::Emit,
    };
    let (Some(channels), Some(programs)) = (&state.channels, &state.programs) else {
        return Err(missing);
    };
    let (generated, diags) = match state.settings.target {
        Target::C => {
            let options = CodegenOptions {
                traces: state.settings.enable_traces,
                ..codegen_options.clone()
            };
            let result = crate::codegen::codegen(&state.network, channels, programs, &options);
            (Generated::C(result.generated), result.diagnostics)
        }
        Target::Hls => {
            let mut result =
                crate::hls::codegen_hls(&state.network, channels, programs, codegen_options);
            let diags = std::mem::take(&mut result.diagnostics);
            (Generated::Hls(result), diags)
        }
    };
    state.generated = Some(generated);
    Ok(diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_hash_is_stable_hex() {
        let p = compute_provenance("");
        assert_eq!(
            p.source_hash_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(p.compiler_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn empty_network_stops_at_allocate_without_error() {
        let net = crate::network::parse_network(
            r#"{"name":"n","instances":[],"connections":[]}"#,
            std::path::Path::new("n.json"),
        )
        .unwrap();
        let mut state = CompilationState::new(net, Settings::default());
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::Allocate, &CodegenOptions::default(), |p, _| {
            seen.push(p)
        })
        .unwrap();
        assert_eq!(seen, vec![PassId::Validate, PassId::Allocate]);
        assert!(state.channels.is_some());
        assert!(state.programs.is_none());
    }
}
