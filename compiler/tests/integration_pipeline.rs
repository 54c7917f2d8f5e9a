// Integration tests for the pass runner and the `amc` driver.
//
// Library-level tests run the pipeline on fixtures under `tests/fixtures/`;
// driver tests spawn the built binary and check exit status and output.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;

use amc::codegen::CodegenOptions;
use amc::diag::codes;
use amc::pass::PassId;
use amc::pipeline::{run_pipeline, CompilationState, Generated};
use amc::settings::{CapacityPolicy, Settings, Target};

fn amc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_amc"))
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn compile(name: &str, settings: Settings, terminal: PassId) -> (CompilationState, Vec<PassId>) {
    let (_, network) = amc::network::load_network(&fixture(name)).unwrap();
    let mut state = CompilationState::new(network, settings);
    let mut ran = Vec::new();
    let _ = run_pipeline(&mut state, terminal, &CodegenOptions::default(), |p, _| {
        ran.push(p)
    });
    (state, ran)
}

// ── Library pipeline ────────────────────────────────────────────────────────

#[test]
fn c_target_compiles_pipe() {
    let (state, ran) = compile("pipe.json", Settings::default(), PassId::Emit);
    assert!(!state.has_error, "{:?}", state.diagnostics);
    assert_eq!(ran.len(), 5);
    let Some(Generated::C(code)) = &state.generated else {
        panic!("expected C output");
    };
    let src = &code.source;
    assert!(src.contains("DECLARE_FIFO(int32_t, SIZE_0, 0, READERS_0);"));
    assert!(src.contains("#define SIZE_1 8"));
    assert!(src.contains("fifo_0_buffer[(gen_index_out + 0) % SIZE_0] = gen_n;"));
    assert!(src.contains("gen_n = (gen_n + 1);"));
    assert!(src.contains("fifo_1_buffer[(copy_index_out + 0) % SIZE_1] = (copy_x * 2);"));
    assert!(src.contains("emit(fifo_1_buffer[(sink_index_in + 0) % SIZE_1]);"));
    // Persistent scope runs once, from the initializer.
    assert!(src.contains("void gen_initialize(void) {\n    gen_init_scope0();\n    gen_program_counter = 0;\n}"));
    assert!(src.contains("void pipe_initialize(void) {\n    gen_initialize();\n    copy_initialize();\n    sink_initialize();\n}"));
}

#[test]
fn traces_log_tokens_per_port() {
    let settings = Settings {
        enable_traces: true,
        ..Settings::default()
    };
    let (state, _) = compile("pipe.json", settings, PassId::Emit);
    assert!(!state.has_error, "{:?}", state.diagnostics);
    let Some(Generated::C(code)) = &state.generated else {
        panic!("expected C output");
    };
    let src = &code.source;
    assert!(src.contains("#include <stdio.h>"));
    assert!(src.contains("static FILE *copy_trace_in;"));
    assert!(src.contains("copy_trace_in = fopen(\"traces/copy_in.txt\", \"a\");"));
    assert!(src.contains(
        "fprintf(copy_trace_out, \"%lld\\n\", (long long)fifo_1_buffer[(copy_index_out + k) % SIZE_1]);"
    ));
    assert!(src.contains("fclose(copy_trace_in);"));

    let (plain, _) = compile("pipe.json", Settings::default(), PassId::Emit);
    let Some(Generated::C(code)) = &plain.generated else {
        panic!("expected C output");
    };
    assert!(!code.source.contains("fopen"));
}

#[test]
fn hls_target_compiles_pipe() {
    let settings = Settings {
        target: Target::Hls,
        ..Settings::default()
    };
    let (state, _) = compile("pipe.json", settings, PassId::Emit);
    assert!(!state.has_error, "{:?}", state.diagnostics);
    let Some(Generated::Hls(hls)) = &state.generated else {
        panic!("expected HLS output");
    };
    assert!(hls.fanouts.is_empty());
    assert!(hls.source.contains("class class_copy {"));
    assert!(hls.source.contains("if (pinAvailIn(in, io) >= 1) {"));
    assert!(hls.header.contains("localparam FIFO_1_DEPTH = 8;"));

    // Every port macro a controller expands comes from the globals header.
    let used = pin_calls(&hls.source);
    for name in ["pinAvailIn", "pinAvailOut", "pinConsume", "pinPeekFront", "pinWrite"] {
        assert!(used.contains(name), "{} not exercised by pipe.json", name);
    }
    for name in &used {
        assert!(
            hls.globals.contains(&format!("#define {}(", name)),
            "{} is used but not defined:\n{}",
            name,
            hls.globals
        );
    }
}

/// Identifiers of the form `pinXxx(` appearing in `text`.
fn pin_calls(text: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for (at, _) in text.match_indices("pin") {
        if text[..at].ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        let tail = &text[at..];
        let len = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        let name = &tail[..len];
        if name.len() > 3 && name.as_bytes()[3].is_ascii_uppercase() && tail[len..].starts_with('(') {
            found.insert(name.to_string());
        }
    }
    found
}

#[test]
fn channels_stage_skips_synthesis() {
    let (state, ran) = compile("pipe.json", Settings::default(), PassId::Allocate);
    assert_eq!(ran, vec![PassId::Validate, PassId::Allocate]);
    assert!(state.programs.is_none());
    assert_eq!(state.channels.map(|c| c.channels.len()), Some(2));
}

#[test]
fn every_controller_is_certified() {
    let (state, _) = compile("pipe.json", Settings::default(), PassId::Verify);
    let certs = state.certs.unwrap();
    assert_eq!(certs.len(), 3);
    for (name, cert) in &certs {
        use amc::pass::StageCert;
        assert!(cert.all_pass(), "{}: {:?}", name, cert.obligations());
    }
}

#[test]
fn strict_capacity_mismatch_stops_at_allocate() {
    let (state, ran) = compile("capacity_mismatch.json", Settings::default(), PassId::Emit);
    assert!(state.has_error);
    assert_eq!(ran.last(), Some(&PassId::Allocate));
    assert!(state
        .diagnostics
        .iter()
        .any(|d| d.code == Some(codes::E0200)));
}

#[test]
fn max_policy_accepts_mismatch_with_warning() {
    let settings = Settings {
        capacity_policy: CapacityPolicy::Max,
        ..Settings::default()
    };
    let (state, _) = compile("capacity_mismatch.json", settings, PassId::Emit);
    assert!(!state.has_error, "{:?}", state.diagnostics);
    assert!(state
        .diagnostics
        .iter()
        .any(|d| d.code == Some(codes::W0200)));
}

#[test]
fn port_name_shared_by_input_and_output_stops_at_validate() {
    let (state, ran) = compile("shared_port_name.json", Settings::default(), PassId::Emit);
    assert!(state.has_error);
    assert_eq!(ran, vec![PassId::Validate]);
    assert!(state.generated.is_none());
    assert!(state
        .diagnostics
        .iter()
        .any(|d| d.code == Some(codes::E0102)));
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[test]
fn emit_channels_prints_allocation() {
    let output = Command::new(amc_binary())
        .arg("--emit")
        .arg("channels")
        .arg(fixture("pipe.json"))
        .output()
        .expect("failed to run amc");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "fifo_0 gen.out capacity=8 type=int32_t\n  r0 -> copy.in (connection #0)\n\
         fifo_1 copy.out capacity=8 type=int32_t\n  r0 -> sink.in (connection #1)\n"
    );
}

#[test]
fn capacity_mismatch_fails_with_code() {
    let output = Command::new(amc_binary())
        .arg(fixture("capacity_mismatch.json"))
        .output()
        .expect("failed to run amc");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("E0200"));
}

#[test]
fn missing_input_is_a_load_error() {
    let output = Command::new(amc_binary())
        .arg(fixture("does_not_exist.json"))
        .output()
        .expect("failed to run amc");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn dot_respects_instance_filter() {
    let output = Command::new(amc_binary())
        .args(["--emit", "dot", "--instance", "copy"])
        .arg(fixture("pipe.json"))
        .output()
        .expect("failed to run amc");
    assert!(output.status.success());
    let dot = String::from_utf8_lossy(&output.stdout);
    assert!(dot.contains("subgraph cluster_copy {"));
    assert!(!dot.contains("cluster_gen"));
    assert!(dot.contains("copy_i1 [shape=diamond, label=\"space(out, 1)\"];"));
}

#[test]
fn hls_output_writes_globals_and_verilog_headers() {
    let dir = std::env::temp_dir().join(format!("amc_hls_out_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cpp = dir.join("pipe.cpp");
    let output = Command::new(amc_binary())
        .args(["--emit", "hls", "-o"])
        .arg(&cpp)
        .arg(fixture("pipe.json"))
        .output()
        .expect("failed to run amc");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let source = std::fs::read_to_string(&cpp).unwrap();
    let globals = std::fs::read_to_string(dir.join("amc_hls.h")).unwrap();
    let header = std::fs::read_to_string(dir.join("pipe.vh")).unwrap();
    assert!(source.contains("#include \"amc_hls.h\""));
    assert!(globals.contains("#define pinPeekFront(NAME)"));
    assert!(header.contains("localparam FIFO_0_DEPTH = 8;"));
    let _ = std::fs::remove_dir_all(&dir);
}
