// hls.rs — HLS code generation
//
// Emits a synthesizable C++ controller class per instance plus a Verilog
// parameter header for the network. Hardware FIFOs are point-to-point
// streams, so every multi-reader channel is split by a generated fan-out
// actor (see `channel::fanout_plan`), and a stream can only be observed at
// its head.
//
// Controllers reach their streams only through the `pin*` macros of the
// globals header (`amc_hls.h`), generated alongside. An input port keeps the
// token it has already pulled off its stream in `<port>_head`, so a peek does
// not consume and availability counts the held token.
//
// Preconditions: allocation and synthesis completed without errors.
// Postconditions: returns `HlsResult` with the C++ source, the globals header
//                 and the Verilog header.
// Failure modes: E0300 for a peek or write at a nonzero offset, E0100 for
//                malformed case statements.
// Side effects: none.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::am::{ActorMachine, Condition};
use crate::channel::{fanout_plan, ChannelMap, Fanout, PortBinding};
use crate::codegen::{emit_sum_type, CodegenOptions};
use crate::condition::{BlockReason, CondTest};
use crate::ctl::{ControlProgram, Op};
use crate::diag::{codes, Diagnostic, NodeRef};
use crate::emit::Emitter;
use crate::expr::{emit_stmts, translate, ExprTranslator};
use crate::id::{ScopeId, TransitionId};
use crate::network::Network;

/// File name the controllers include for their port macros.
pub const GLOBALS_HEADER: &str = "amc_hls.h";

#[derive(Debug)]
pub struct HlsResult {
    /// C++ controllers and fan-out actors.
    pub source: String,
    /// Port-access macros, written as `GLOBALS_HEADER` next to `source`.
    pub globals: String,
    /// Verilog `localparam`s for channel depths and reader counts.
    pub header: String,
    pub fanouts: Vec<Fanout>,
    pub diagnostics: Vec<Diagnostic>,
}

#[instrument(skip_all, fields(network = %network.name, instances = programs.len()))]
pub fn codegen_hls(
    network: &Network,
    channels: &ChannelMap,
    programs: &[ControlProgram],
    options: &CodegenOptions,
) -> HlsResult {
    let fanouts = fanout_plan(channels);
    let mut diagnostics = Vec::new();

    let header = emit_header(network, channels, &fanouts, options);
    let globals = emit_globals(network, options);

    let mut out = Emitter::new();
    banner(&mut out, "//", network, options);
    out.line("#include <stdint.h>");
    out.line("#include <hls_stream.h>");
    out.line(format!("#include \"{}\"", GLOBALS_HEADER));
    out.blank();
    out.line("enum { REASON_NONE = 0, REASON_STARVED, REASON_FULL };");
    out.blank();
    out.line("struct StateReturn {");
    out.line("    int num_firings;");
    out.line("    int reason;");
    out.line("};");
    out.blank();

    let mut seen = BTreeSet::new();
    for inst in &network.instances {
        for st in &inst.machine.sum_types {
            if seen.insert(st.name.as_str()) {
                emit_sum_type(&mut out, st);
            }
        }
    }

    for f in &fanouts {
        emit_fanout(&mut out, f);
    }

    for program in programs {
        let Some(inst) = network.instance(&program.name) else {
            diagnostics.push(Diagnostic::error(
                codes::E0100,
                NodeRef::Instance(program.name.clone()),
                "control program has no matching network instance",
            ));
            continue;
        };
        let mut ctx = InstanceCtx {
            program,
            am: &inst.machine,
            channels,
            out: &mut out,
            diagnostics: &mut diagnostics,
        };
        ctx.emit();
    }

    HlsResult {
        source: out.finish(),
        globals,
        header,
        fanouts,
        diagnostics,
    }
}

fn banner(out: &mut Emitter, comment: &str, network: &Network, options: &CodegenOptions) {
    out.line(format!(
        "{} Generated by amc {} (actor machine compiler). Do not edit.",
        comment,
        env!("CARGO_PKG_VERSION")
    ));
    out.line(format!("{} network: {}", comment, network.name));
    if let Some(hash) = &options.provenance {
        out.line(format!("{} source sha256: {}", comment, hash));
    }
    out.blank();
}

// ── Globals header ──────────────────────────────────────────────────────────

/// Every macro a controller body may expand. Each takes the arity the
/// controller emits; `io` is the `IO_<instance>` reference in scope.
const PIN_MACROS: &[&str] = &[
    "#define pinAvailIn(NAME, IO) (IO.NAME##_count + (this->NAME##_held ? 1 : 0))",
    "#define pinAvailOut(NAME, IO) (IO.NAME##_size - IO.NAME##_count)",
    "#define pinPeekFront(NAME) \\",
    "    (this->NAME##_held ? this->NAME##_head \\",
    "        : (io.NAME##_count--, this->NAME##_held = true, this->NAME##_head = NAME.read()))",
    "#define pinConsume(NAME, N) \\",
    "    do { \\",
    "        int pending_ = (N); \\",
    "        if (this->NAME##_held) { this->NAME##_held = false; pending_--; } \\",
    "        for (; pending_ > 0; pending_--) { NAME.read(); io.NAME##_count--; } \\",
    "    } while (0)",
    "#define pinWrite(NAME, VALUE) NAME.write(VALUE)",
];

fn emit_globals(network: &Network, options: &CodegenOptions) -> String {
    let mut out = Emitter::new();
    banner(&mut out, "//", network, options);
    out.line("#ifndef AMC_HLS_H");
    out.line("#define AMC_HLS_H");
    out.blank();
    out.line("// <port>_count: tokens left in an input stream, or tokens written to");
    out.line("// an output stream this quantum. <port>_size: output stream depth.");
    for m in PIN_MACROS {
        out.line(*m);
    }
    out.blank();
    out.line("#endif");
    out.finish()
}

// ── Verilog header ──────────────────────────────────────────────────────────

fn emit_header(
    network: &Network,
    channels: &ChannelMap,
    fanouts: &[Fanout],
    options: &CodegenOptions,
) -> String {
    let mut out = Emitter::new();
    banner(&mut out, "//", network, options);
    for ch in &channels.channels {
        out.line(format!("// {}: {}", ch.id, ch.source));
        out.line(format!("localparam FIFO_{}_DEPTH = {};", ch.id.0, ch.capacity));
        out.line(format!(
            "localparam FIFO_{}_READERS = {};",
            ch.id.0,
            ch.readers.len()
        ));
    }
    if !fanouts.is_empty() {
        out.blank();
    }
    for f in fanouts {
        let outs: Vec<String> = f.outputs.iter().map(|o| o.to_string()).collect();
        out.line(format!(
            "// fan-out {} ({}) -> {}",
            f.name,
            f.channel,
            outs.join(", ")
        ));
    }
    out.finish()
}

// ── Fan-out actor ───────────────────────────────────────────────────────────

fn emit_fanout(out: &mut Emitter, f: &Fanout) {
    let mut params = vec![format!("hls::stream<{}> &in", f.token_type)];
    params.extend((0..f.outputs.len()).map(|i| format!("hls::stream<{}> &out_{}", f.token_type, i)));
    out.line(format!("// {} -> {}", f.channel, f.name));
    out.open(format!("void {}({}) {{", f.name, params.join(", ")));
    out.line("#pragma HLS INLINE off");
    let mut ready = vec!["!in.empty()".to_string()];
    ready.extend((0..f.outputs.len()).map(|i| format!("!out_{}.full()", i)));
    out.open(format!("if ({}) {{", ready.join(" && ")));
    out.line(format!("{} token = in.read();", f.token_type));
    for i in 0..f.outputs.len() {
        out.line(format!("out_{}.write(token);", i));
    }
    out.close("}");
    out.close("}");
    out.blank();
}

// ── Instance controller ─────────────────────────────────────────────────────

struct HlsTranslator<'a> {
    ports: &'a BTreeMap<String, PortBinding>,
    /// (port, offset) of every access a stream cannot express.
    unsupported: RefCell<Vec<(String, u32)>>,
}

impl ExprTranslator for HlsTranslator<'_> {
    fn var(&self, name: &str) -> String {
        format!("this->{}", name)
    }

    fn peek(&self, port: &str, offset: u32) -> String {
        if offset > 0 {
            self.unsupported.borrow_mut().push((port.to_string(), offset));
        }
        format!("pinPeekFront({})", port)
    }

    fn write(&self, port: &str, offset: u32, value: &str) -> String {
        if offset > 0 {
            self.unsupported.borrow_mut().push((port.to_string(), offset));
        }
        match self.ports.get(port) {
            Some(PortBinding::Output { .. }) => format!("pinWrite({}, {});", port, value),
            _ => format!("(void)({});", value),
        }
    }
}

struct InstanceCtx<'a, 'o> {
    program: &'a ControlProgram,
    am: &'a ActorMachine,
    channels: &'a ChannelMap,
    out: &'o mut Emitter,
    diagnostics: &'o mut Vec<Diagnostic>,
}

impl InstanceCtx<'_, '_> {
    fn name(&self) -> &str {
        &self.program.name
    }

    fn port_params(&self) -> String {
        let mut params: Vec<String> = self
            .program
            .ports
            .iter()
            .map(|p| {
                let decl = if p.is_input {
                    self.am.input_port(&p.name)
                } else {
                    self.am.output_port(&p.name)
                };
                let ty = decl.map_or("int32_t", |(_, d)| d.token_type.as_str());
                format!("hls::stream<{}> &{}", ty, p.name)
            })
            .collect();
        params.push(format!("IO_{} &io", self.name()));
        params.join(", ")
    }

    fn port_args(&self) -> String {
        let mut args: Vec<&str> = self.program.ports.iter().map(|p| p.name.as_str()).collect();
        args.push("io");
        args.join(", ")
    }

    /// Persistent scopes are initialized by the constructor, before any
    /// stream is bound, so only transient scopes see the ports.
    fn scope_params(&self, scope: ScopeId, ports: &str) -> String {
        match self.am.scope(scope) {
            Some(s) if !s.persistent => ports.to_string(),
            _ => String::new(),
        }
    }

    fn emit(&mut self) {
        let name = self.name().to_string();
        let ports: BTreeMap<String, PortBinding> = self
            .program
            .ports
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    self.channels.binding(&name, &p.name, p.is_input),
                )
            })
            .collect();
        let tr = HlsTranslator {
            ports: &ports,
            unsupported: RefCell::new(Vec::new()),
        };

        self.out.line(format!("// ── instance {} ──", name));
        self.out.blank();
        self.emit_io_struct(&name);
        self.emit_class(&name);
        self.emit_members(&name, &tr);
        self.emit_scheduler(&name, &ports);

        for (port, offset) in tr.unsupported.into_inner() {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0300,
                    NodeRef::Port(Some(name.clone()), port),
                    format!("not implemented: stream access at offset {}", offset),
                )
                .with_hint("hardware streams expose only their head token"),
            );
        }
        debug!(instance = %name, "emitted hls controller");
    }

    fn emit_io_struct(&mut self, name: &str) {
        self.out.open(format!("struct IO_{} {{", name));
        for p in &self.program.ports {
            if p.is_input {
                self.out.line(format!("int {}_count;", p.name));
            } else {
                self.out.line(format!("int {}_size;", p.name));
                self.out.line(format!("int {}_count;", p.name));
            }
        }
        self.out.close("};");
        self.out.blank();
    }

    fn emit_class(&mut self, name: &str) {
        let params = self.port_params();
        self.out.line(format!("class class_{} {{", name));
        self.out.line("private:");
        self.out.indent();
        self.out.line("int program_counter;");
        for scope in &self.am.scopes {
            for decl in &scope.declarations {
                self.out.line(format!("{} {};", decl.ty, decl.name));
            }
        }
        for p in self.program.ports.iter().filter(|p| p.is_input) {
            let ty = self
                .am
                .input_port(&p.name)
                .map_or("int32_t", |(_, d)| d.token_type.as_str());
            self.out.line(format!("{} {}_head;", ty, p.name));
            self.out.line(format!("bool {}_held;", p.name));
        }
        for i in 0..self.am.scopes.len() {
            let id = ScopeId(i as u32);
            let decl = format!("void init_{}({});", id, self.scope_params(id, &params));
            self.out.line(decl);
        }
        for (i, c) in self.am.conditions.iter().enumerate() {
            if matches!(c, Condition::Predicate { .. }) {
                self.out.line(format!("bool condition_{}({});", i, params));
            }
        }
        for i in 0..self.am.transitions.len() {
            self.out.line(format!("void transition_{}({});", i, params));
        }
        self.out.dedent();
        self.out.line("public:");
        self.out.indent();
        self.out.open(format!("class_{}() {{", name));
        for p in self.program.ports.iter().filter(|p| p.is_input) {
            self.out.line(format!("{}_held = false;", p.name));
        }
        for s in &self.program.persistent_scopes {
            self.out.line(format!("init_{}();", s));
        }
        self.out
            .line(format!("program_counter = {};", self.program.initial_state.0));
        self.out.close("}");
        self.out.line(format!("StateReturn operator()({});", params));
        self.out.dedent();
        self.out.line("};");
        self.out.blank();
    }

    fn emit_members(&mut self, name: &str, tr: &HlsTranslator<'_>) {
        let params = self.port_params();
        for (i, scope) in self.am.scopes.iter().enumerate() {
            let id = ScopeId(i as u32);
            let sig = format!(
                "void class_{}::init_{}({}) {{",
                name,
                id,
                self.scope_params(id, &params)
            );
            self.out.open(sig);
            for decl in &scope.declarations {
                if let Some(value) = &decl.value {
                    self.out
                        .line(format!("{} = {};", tr.var(&decl.name), translate(tr, value)));
                }
            }
            self.out.close("}");
            self.out.blank();
        }
        for (i, c) in self.am.conditions.iter().enumerate() {
            if let Condition::Predicate { expr, .. } = c {
                self.out
                    .open(format!("bool class_{}::condition_{}({}) {{", name, i, params));
                self.out.line("#pragma HLS INLINE");
                self.out.line(format!("return {};", translate(tr, expr)));
                self.out.close("}");
                self.out.blank();
            }
        }
        for (i, t) in self.am.transitions.iter().enumerate() {
            self.out
                .open(format!("void class_{}::transition_{}({}) {{", name, i, params));
            self.out.line("#pragma HLS INLINE off");
            if let Err(e) = emit_stmts(self.out, &t.body, tr, &self.am.sum_types) {
                self.diagnostics.push(Diagnostic::error(
                    codes::E0100,
                    NodeRef::Transition(name.to_string(), TransitionId(i as u32)),
                    e.to_string(),
                ));
            }
            self.out.close("}");
            self.out.blank();
        }
    }

    fn emit_scheduler(&mut self, name: &str, ports: &BTreeMap<String, PortBinding>) {
        let params = self.port_params();
        let args = self.port_args();
        let init_args: Vec<String> = (0..self.am.scopes.len())
            .map(|i| self.scope_params(ScopeId(i as u32), &args))
            .collect();
        let program = self.program;
        let out = &mut *self.out;

        out.open(format!("StateReturn class_{}::operator()({}) {{", name, params));
        out.line("#pragma HLS INLINE");
        out.line("StateReturn si;");
        out.line("int i = 0;");
        out.line("si.num_firings = 0;");
        out.line("si.reason = REASON_NONE;");
        out.blank();
        out.line("switch (this->program_counter) {");
        for s in &program.dispatch {
            out.line(format!("case {}: goto {};", s.0, s));
        }
        out.line(format!("default: goto {};", program.initial_state));
        out.line("}");
        out.blank();

        for block in &program.blocks {
            out.label(block.state.to_string());
            for s in &block.init_scopes {
                let a = init_args.get(s.index()).map_or("", String::as_str);
                out.line(format!("init_{}({});", s, a));
            }
            match &block.op {
                Op::Suspend { resume_at } => {
                    out.line(format!("this->program_counter = {};", resume_at.0));
                    out.line("goto finished;");
                }
                Op::Branch {
                    condition,
                    test,
                    on_true,
                    on_false,
                    block_reason,
                } => {
                    let cond = match test {
                        CondTest::Predicate(_) => format!("condition_{}({})", condition.0, args),
                        CondTest::Tokens { port, n } => match ports.get(port) {
                            Some(PortBinding::Input { .. }) => {
                                format!("pinAvailIn({}, io) >= {}", port, n)
                            }
                            _ => "false".to_string(),
                        },
                        CondTest::Space { port, n } => match ports.get(port) {
                            Some(PortBinding::Output { .. }) => {
                                format!("pinAvailOut({}, io) >= {}", port, n)
                            }
                            _ => "true".to_string(),
                        },
                    };
                    out.open(format!("if ({}) {{", cond));
                    out.line(format!("goto {};", on_true));
                    out.reopen("} else {");
                    if let Some(reason) = block_reason {
                        let r = match reason {
                            BlockReason::Starved => "REASON_STARVED",
                            BlockReason::Full => "REASON_FULL",
                        };
                        out.line("si.num_firings = i;");
                        out.line(format!("si.reason = {};", r));
                    }
                    out.line(format!("goto {};", on_false));
                    out.close("}");
                }
                Op::Fire {
                    transition,
                    commits,
                    next,
                } => {
                    out.line(format!("transition_{}({});", transition.0, args));
                    out.line("i++;");
                    for c in commits {
                        match ports.get(&c.port) {
                            Some(PortBinding::Input { .. }) => {
                                out.line(format!("pinConsume({}, {});", c.port, c.rate))
                            }
                            Some(PortBinding::Output { .. }) => {
                                out.line(format!("io.{}_count += {};", c.port, c.rate))
                            }
                            _ => {}
                        }
                    }
                    out.line(format!("goto {};", next));
                }
            }
        }
        out.blank();
        out.label("finished");
        out.line("si.num_firings = i;");
        out.line("return si;");
        out.close("}");
        out.blank();
    }
}
