use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use amc::codegen::CodegenOptions;
use amc::hls::GLOBALS_HEADER;
use amc::pass::PassId;
use amc::pipeline::{compute_provenance, run_pipeline, CompilationState, Generated};
use amc::settings::{CapacityPolicy, Settings, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    C,
    Hls,
    Ctl,
    Dot,
    Channels,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    Strict,
    Max,
}

#[derive(Parser, Debug)]
#[command(
    name = "amc",
    version,
    about = "Actor Machine Compiler — flattens actor machine networks into resumable C or HLS controllers"
)]
struct Cli {
    /// Input network (JSON)
    input: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::C)]
    emit: EmitStage,

    /// Output file path (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Restrict ctl/dot output to one instance
    #[arg(long)]
    instance: Option<String>,

    /// Ignore liveness tables and initialize scopes by dependency
    #[arg(long)]
    no_scope_liveness: bool,

    /// Capacity of connections that declare none
    #[arg(long, default_value_t = 4096)]
    buffer_depth: u32,

    /// How disagreeing capacities on one source pin are resolved
    #[arg(long, value_enum, default_value_t = PolicyArg::Strict)]
    capacity_policy: PolicyArg,

    /// Generated C logs every consumed and produced token under traces/
    #[arg(long)]
    traces: bool,

    /// Log compiler passes and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // ── Load network ──
    let (text, network) = match amc::network::load_network(&cli.input) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("amc: error: {}", e);
            std::process::exit(2);
        }
    };
    debug!(
        input = %cli.input.display(),
        instances = network.instances.len(),
        connections = network.connections.len(),
        "loaded network"
    );

    if let Some(name) = &cli.instance {
        if network.instance(name).is_none() {
            eprintln!("amc: error: no instance named '{}'", name);
            std::process::exit(2);
        }
    }

    let settings = Settings {
        scope_liveness: !cli.no_scope_liveness,
        default_buffer_depth: cli.buffer_depth,
        capacity_policy: match cli.capacity_policy {
            PolicyArg::Strict => CapacityPolicy::Strict,
            PolicyArg::Max => CapacityPolicy::Max,
        },
        target: if cli.emit == EmitStage::Hls {
            Target::Hls
        } else {
            Target::C
        },
        enable_traces: cli.traces,
    };

    let terminal = match cli.emit {
        EmitStage::Channels => PassId::Allocate,
        EmitStage::Ctl | EmitStage::Dot => PassId::Verify,
        EmitStage::C | EmitStage::Hls => PassId::Emit,
    };

    // ── Run passes ──
    let provenance = compute_provenance(&text);
    let options = CodegenOptions {
        provenance: Some(provenance.source_hash_hex()),
        ..CodegenOptions::default()
    };
    let mut state = CompilationState::new(network, settings);
    state.provenance = Some(provenance);

    let result = run_pipeline(&mut state, terminal, &options, |_, diags| {
        for d in diags {
            eprintln!("amc: {}", d);
        }
    });
    if let Err(e) = result {
        eprintln!("amc: compilation failed in {:?}", e.failing_pass);
        std::process::exit(1);
    }

    // ── Output ──
    let instance = cli.instance.as_deref();
    let programs = state.programs.as_deref().unwrap_or(&[]);
    let text = match (cli.emit, &state.generated) {
        (EmitStage::Channels, _) => state
            .channels
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_default(),
        (EmitStage::Ctl, _) => programs
            .iter()
            .filter(|p| instance.map_or(true, |name| p.name == name))
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
        (EmitStage::Dot, _) => amc::dot::emit_dot(programs, instance),
        (_, Some(Generated::C(code))) => code.source.clone(),
        (_, Some(Generated::Hls(hls))) => match &cli.output {
            Some(path) => {
                write_or_exit(Some(&path.with_extension("vh")), &hls.header);
                write_or_exit(Some(&path.with_file_name(GLOBALS_HEADER)), &hls.globals);
                hls.source.clone()
            }
            None => format!(
                "// ---- network header (.vh) ----\n{}\n// ---- {} ----\n{}\n// ---- controllers (.cpp) ----\n{}",
                hls.header, GLOBALS_HEADER, hls.globals, hls.source
            ),
        },
        (_, None) => {
            eprintln!("amc: error: no output produced");
            std::process::exit(1);
        }
    };
    write_or_exit(cli.output.as_deref(), &text);
}

fn write_or_exit(path: Option<&Path>, text: &str) {
    let result = match path {
        Some(p) => std::fs::write(p, text),
        None => std::io::stdout().write_all(text.as_bytes()),
    };
    if let Err(e) = result {
        match path {
            Some(p) => eprintln!("amc: error: {}: {}", p.display(), e),
            None => eprintln!("amc: error: stdout: {}", e),
        }
        std::process::exit(2);
    }
}
