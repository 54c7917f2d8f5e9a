// codegen.rs — C code generation for actor networks
//
// Emits one C translation unit: the network header (FIFO storage, reader
// counts, scheduling-info type, prototypes), then per instance the port
// transaction functions, scope initializers, predicate conditions, transition
// bodies, the resumable goto scheduler and the instance initializer.
//
// Preconditions: allocation and synthesis completed without errors.
// Postconditions: returns `CodegenResult` with the generated C source.
// Failure modes: E0100 for case statements over undeclared sum types or
//                variants.
// Side effects (generated code only): with `traces` set, the scheduler opens
//                one trace file per connected port for the duration of a
//                quantum.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::am::{ActorMachine, Condition, SumType};
use crate::channel::{ChannelMap, PortBinding};
use crate::condition::{BlockReason, CondTest};
use crate::ctl::{ControlProgram, Op};
use crate::diag::{codes, Diagnostic, NodeRef};
use crate::emit::Emitter;
use crate::expr::{emit_stmts, translate, ExprTranslator};
use crate::id::{ConditionId, ScopeId, TransitionId};
use crate::network::Network;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CodegenResult {
    pub generated: GeneratedCode,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct GeneratedCode {
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct CodegenOptions {
    /// SHA-256 of the input IR, printed in the banner.
    pub provenance: Option<String>,
    /// Append every consumed and produced token to `traces/<inst>_<port>.txt`.
    pub traces: bool,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// `programs` holds one control program per network instance, by name.
#[instrument(skip_all, fields(network = %network.name, instances = programs.len()))]
pub fn codegen(
    network: &Network,
    channels: &ChannelMap,
    programs: &[ControlProgram],
    options: &CodegenOptions,
) -> CodegenResult {
    let mut ctx = CodegenCtx {
        network,
        channels,
        programs,
        options,
        out: Emitter::new(),
        diagnostics: Vec::new(),
    };
    ctx.emit_all();
    CodegenResult {
        generated: GeneratedCode {
            source: ctx.out.finish(),
        },
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct CodegenCtx<'a> {
    network: &'a Network,
    channels: &'a ChannelMap,
    programs: &'a [ControlProgram],
    options: &'a CodegenOptions,
    out: Emitter,
    diagnostics: Vec<Diagnostic>,
}

/// Spells variables, peeks and writes of one instance.
struct CTranslator<'a> {
    instance: &'a str,
    vars: BTreeSet<&'a str>,
    ports: &'a BTreeMap<String, PortBinding>,
}

impl ExprTranslator for CTranslator<'_> {
    fn var(&self, name: &str) -> String {
        if self.vars.contains(name) {
            format!("{}_{}", self.instance, name)
        } else {
            name.to_string()
        }
    }

    fn peek(&self, port: &str, offset: u32) -> String {
        match self.ports.get(port) {
            Some(PortBinding::Input { channel, .. }) => format!(
                "fifo_{c}_buffer[({i}_index_{p} + {o}) % SIZE_{c}]",
                c = channel.0,
                i = self.instance,
                p = port,
                o = offset
            ),
            _ => "0".to_string(),
        }
    }

    fn write(&self, port: &str, offset: u32, value: &str) -> String {
        match self.ports.get(port) {
            Some(PortBinding::Output { channel, .. }) => format!(
                "fifo_{c}_buffer[({i}_index_{p} + {o}) % SIZE_{c}] = {v};",
                c = channel.0,
                i = self.instance,
                p = port,
                o = offset,
                v = value
            ),
            _ => format!("(void)({});", value),
        }
    }
}

fn reason_const(reason: BlockReason) -> &'static str {
    match reason {
        BlockReason::Starved => "REASON_STARVED",
        BlockReason::Full => "REASON_FULL",
    }
}

impl<'a> CodegenCtx<'a> {
    fn emit_all(&mut self) {
        self.emit_preamble();
        self.emit_runtime_types();
        self.emit_sum_types();
        self.emit_fifos();
        self.emit_prototypes();
        for program in self.programs {
            match self.network.instance(&program.name) {
                Some(inst) => self.emit_instance(program, &inst.machine),
                None => self.diagnostics.push(Diagnostic::error(
                    codes::E0100,
                    NodeRef::Instance(program.name.clone()),
                    "control program has no matching network instance",
                )),
            }
        }
        self.emit_network_initializer();
    }

    // ── Phase 1: Preamble and network header ────────────────────────────

    fn emit_preamble(&mut self) {
        self.out.line(format!(
            "/* Generated by amc {} (actor machine compiler). Do not edit. */",
            env!("CARGO_PKG_VERSION")
        ));
        self.out.line(format!("/* network: {} */", self.network.name));
        if let Some(hash) = &self.options.provenance {
            self.out.line(format!("/* source sha256: {} */", hash));
        }
        self.out.blank();
        self.out.line("#include <limits.h>");
        self.out.line("#include <stdbool.h>");
        self.out.line("#include <stdint.h>");
        if self.options.traces {
            self.out.line("#include <stdio.h>");
        }
        self.out.blank();
    }

    fn emit_runtime_types(&mut self) {
        self.out.line("typedef enum {");
        self.out.line("    REASON_NONE = 0,");
        self.out.line("    REASON_STARVED,");
        self.out.line("    REASON_FULL");
        self.out.line("} sched_reason_t;");
        self.out.blank();
        self.out.line("typedef struct {");
        self.out.line("    int num_firings;");
        self.out.line("    sched_reason_t reason;");
        self.out.line("} schedinfo_t;");
        self.out.blank();
        self.out.line("#define DECLARE_FIFO(type, size, id, readers) \\");
        self.out.line("    static type fifo_##id##_buffer[size]; \\");
        self.out.line("    static unsigned int fifo_##id##_write_index; \\");
        self.out.line("    static unsigned int fifo_##id##_read_index[readers]");
        self.out.blank();
    }

    fn emit_sum_types(&mut self) {
        let mut seen = BTreeSet::new();
        for inst in &self.network.instances {
            for st in &inst.machine.sum_types {
                if seen.insert(st.name.as_str()) {
                    emit_sum_type(&mut self.out, st);
                }
            }
        }
    }

    fn emit_fifos(&mut self) {
        for ch in &self.channels.channels {
            let readers: Vec<String> = ch
                .readers
                .iter()
                .map(|r| format!("{} ({})", r.target, r.id))
                .collect();
            self.out.line(format!(
                "/* {}: {} -> {} */",
                ch.id,
                ch.source,
                readers.join(", ")
            ));
            self.out.line(format!("#define SIZE_{} {}", ch.id.0, ch.capacity));
            self.out.line(format!("#define READERS_{} {}", ch.id.0, ch.readers.len()));
            self.out.line(format!(
                "DECLARE_FIFO({ty}, SIZE_{id}, {id}, READERS_{id});",
                ty = ch.token_type,
                id = ch.id.0
            ));
            self.out.blank();
        }
    }

    fn emit_prototypes(&mut self) {
        for p in self.programs {
            self.out.line(format!("void {}_initialize(void);", p.name));
            self.out.line(format!("void {}_scheduler(schedinfo_t *si);", p.name));
        }
        self.out.line(format!("void {}_initialize(void);", self.network.name));
        self.out.blank();
    }

    fn emit_network_initializer(&mut self) {
        self.out.open(format!("void {}_initialize(void) {{", self.network.name));
        for p in self.programs {
            self.out.line(format!("{}_initialize();", p.name));
        }
        self.out.close("}");
    }

    // ── Phase 2: Instance ───────────────────────────────────────────────

    fn emit_instance(&mut self, program: &ControlProgram, am: &ActorMachine) {
        let name = program.name.as_str();
        self.out.line(format!("/* ── instance {} ── */", name));
        self.out.blank();
        self.out.line(format!("static int {}_program_counter;", name));

        let ports: BTreeMap<String, PortBinding> = program
            .ports
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    self.channels.binding(name, &p.name, p.is_input),
                )
            })
            .collect();

        let vars: BTreeSet<&str> = am
            .scopes
            .iter()
            .flat_map(|s| s.declarations.iter().map(|d| d.name.as_str()))
            .collect();
        for scope in &am.scopes {
            for decl in &scope.declarations {
                self.out
                    .line(format!("static {} {}_{};", decl.ty, name, decl.name));
            }
        }
        if self.options.traces {
            for p in traced_ports(&ports) {
                self.out.line(format!("static FILE *{}_trace_{};", name, p));
            }
        }
        self.out.blank();

        for p in &program.ports {
            let binding = ports
                .get(&p.name)
                .copied()
                .unwrap_or(PortBinding::Unconnected);
            if p.is_input {
                self.emit_input_port(name, &p.name, binding);
            } else {
                self.emit_output_port(name, &p.name, binding);
            }
        }

        let tr = CTranslator {
            instance: name,
            vars,
            ports: &ports,
        };
        self.emit_scope_inits(name, am, &tr);
        self.emit_conditions(name, am, &tr);
        self.emit_transitions(name, am, &tr);
        self.emit_scheduler(program, &ports);
        self.emit_initializer(program);
        debug!(instance = name, "emitted instance");
    }

    fn emit_input_port(&mut self, inst: &str, port: &str, binding: PortBinding) {
        let out = &mut self.out;
        match binding {
            PortBinding::Input {
                channel, reader, ..
            } => {
                let c = channel.0;
                out.line(format!("/* port {}: {} reader {} */", port, channel, reader.0));
                out.line(format!("static unsigned int {}_index_{};", inst, port));
                out.line(format!("static unsigned int {}_limit_{};", inst, port));
                out.blank();
                out.open(format!("static void {}_read_{}(void) {{", inst, port));
                out.line(format!(
                    "{}_index_{} = fifo_{}_read_index[{}];",
                    inst, port, c, reader.0
                ));
                out.line(format!("{}_limit_{} = fifo_{}_write_index;", inst, port, c));
                out.close("}");
                out.blank();
                out.open(format!("static void {}_read_end_{}(void) {{", inst, port));
                out.line(format!(
                    "fifo_{}_read_index[{}] = {}_index_{};",
                    c, reader.0, inst, port
                ));
                out.close("}");
                out.blank();
                out.open(format!("static unsigned int {}_avail_{}(void) {{", inst, port));
                out.line(format!(
                    "return ({i}_limit_{p} + 2 * SIZE_{c} - {i}_index_{p}) % (2 * SIZE_{c});",
                    i = inst,
                    p = port,
                    c = c
                ));
                out.close("}");
            }
            _ => {
                out.line(format!("/* port {}: unconnected */", port));
                out.line(format!("static void {}_read_{}(void) {{}}", inst, port));
                out.line(format!("static void {}_read_end_{}(void) {{}}", inst, port));
                out.open(format!("static unsigned int {}_avail_{}(void) {{", inst, port));
                out.line("return 0;");
                out.close("}");
            }
        }
        out.blank();
    }

    fn emit_output_port(&mut self, inst: &str, port: &str, binding: PortBinding) {
        let out = &mut self.out;
        match binding {
            PortBinding::Output {
                channel, readers, ..
            } => {
                let c = channel.0;
                out.line(format!("/* port {}: {}, {} reader(s) */", port, channel, readers));
                out.line(format!("static unsigned int {}_index_{};", inst, port));
                out.line(format!("static unsigned int {}_room_{};", inst, port));
                out.blank();
                out.open(format!("static void {}_write_{}(void) {{", inst, port));
                out.line("unsigned int r;");
                out.line(format!("{}_index_{} = fifo_{}_write_index;", inst, port, c));
                out.line(format!("{}_room_{} = SIZE_{};", inst, port, c));
                // The slowest reader bounds the room.
                out.open(format!("for (r = 0; r < READERS_{}; r++) {{", c));
                out.line(format!(
                    "unsigned int used = ({i}_index_{p} + 2 * SIZE_{c} - fifo_{c}_read_index[r]) % (2 * SIZE_{c});",
                    i = inst,
                    p = port,
                    c = c
                ));
                out.open(format!("if (SIZE_{} - used < {}_room_{}) {{", c, inst, port));
                out.line(format!("{}_room_{} = SIZE_{} - used;", inst, port, c));
                out.close("}");
                out.close("}");
                out.close("}");
                out.blank();
                out.open(format!("static void {}_write_end_{}(void) {{", inst, port));
                out.line(format!("fifo_{}_write_index = {}_index_{};", c, inst, port));
                out.close("}");
            }
            _ => {
                out.line(format!("/* port {}: no readers, tokens are dropped */", port));
                out.line(format!(
                    "static unsigned int {}_room_{} = UINT_MAX;",
                    inst, port
                ));
                out.line(format!("static void {}_write_{}(void) {{}}", inst, port));
                out.line(format!("static void {}_write_end_{}(void) {{}}", inst, port));
            }
        }
        out.blank();
    }

    fn emit_scope_inits(&mut self, inst: &str, am: &ActorMachine, tr: &CTranslator<'_>) {
        for (i, scope) in am.scopes.iter().enumerate() {
            let id = ScopeId(i as u32);
            self.out
                .open(format!("static void {}_init_{}(void) {{", inst, id));
            for decl in &scope.declarations {
                if let Some(value) = &decl.value {
                    self.out.line(format!(
                        "{} = {};",
                        tr.var(&decl.name),
                        translate(tr, value)
                    ));
                }
            }
            self.out.close("}");
            self.out.blank();
        }
    }

    fn emit_conditions(&mut self, inst: &str, am: &ActorMachine, tr: &CTranslator<'_>) {
        for (i, cond) in am.conditions.iter().enumerate() {
            if let Condition::Predicate { expr, .. } = cond {
                let id = ConditionId(i as u32);
                self.out
                    .open(format!("static bool {}_condition_{}(void) {{", inst, id.0));
                self.out.line(format!("return {};", translate(tr, expr)));
                self.out.close("}");
                self.out.blank();
            }
        }
    }

    fn emit_transitions(&mut self, inst: &str, am: &ActorMachine, tr: &CTranslator<'_>) {
        for (i, transition) in am.transitions.iter().enumerate() {
            let id = TransitionId(i as u32);
            self.out
                .open(format!("static void {}_transition_{}(void) {{", inst, id.0));
            if self.options.traces {
                self.emit_trace(inst, am, tr.ports, &transition.input_rates, true);
            }
            if let Err(e) = emit_stmts(&mut self.out, &transition.body, tr, &am.sum_types) {
                self.diagnostics.push(Diagnostic::error(
                    codes::E0100,
                    NodeRef::Transition(inst.to_string(), id),
                    e.to_string(),
                ));
            }
            if self.options.traces {
                self.emit_trace(inst, am, tr.ports, &transition.output_rates, false);
            }
            self.out.close("}");
            self.out.blank();
        }
    }

    /// Log the tokens a firing consumes (before the body) or produces
    /// (after it). Tokens sit at the port cursor until the scheduler commits.
    fn emit_trace(
        &mut self,
        inst: &str,
        am: &ActorMachine,
        ports: &BTreeMap<String, PortBinding>,
        rates: &BTreeMap<String, u32>,
        is_input: bool,
    ) {
        for (port, rate) in rates {
            let channel = match ports.get(port) {
                Some(PortBinding::Input { channel, .. }) if is_input => *channel,
                Some(PortBinding::Output { channel, .. }) if !is_input => *channel,
                _ => continue,
            };
            let decl = if is_input {
                am.input_port(port)
            } else {
                am.output_port(port)
            };
            let Some((format, cast)) = decl.and_then(|(_, d)| trace_format(&d.token_type)) else {
                self.out
                    .line(format!("/* trace {}: token type is not printable */", port));
                continue;
            };
            let file = format!("{}_trace_{}", inst, port);
            self.out.open(format!("if ({} != NULL) {{", file));
            self.out.line("unsigned int k;");
            self.out.open(format!("for (k = 0; k < {}; k++) {{", rate));
            self.out.line(format!(
                "fprintf({f}, \"{fmt}\\n\", ({cast})fifo_{c}_buffer[({i}_index_{p} + k) % SIZE_{c}]);",
                f = file,
                fmt = format,
                cast = cast,
                c = channel.0,
                i = inst,
                p = port
            ));
            self.out.close("}");
            self.out.close("}");
        }
    }

    // ── Phase 3: Scheduler ──────────────────────────────────────────────

    fn emit_scheduler(&mut self, program: &ControlProgram, ports: &BTreeMap<String, PortBinding>) {
        let inst = program.name.as_str();
        let out = &mut self.out;
        out.open(format!("void {}_scheduler(schedinfo_t *si) {{", inst));
        out.line("int i = 0;");
        out.line("si->num_firings = 0;");
        out.line("si->reason = REASON_NONE;");
        out.blank();
        if self.options.traces {
            for p in traced_ports(ports) {
                out.line(format!(
                    "{i}_trace_{p} = fopen(\"traces/{i}_{p}.txt\", \"a\");",
                    i = inst,
                    p = p
                ));
            }
        }
        for p in &program.ports {
            let op = if p.is_input { "read" } else { "write" };
            out.line(format!("{}_{}_{}();", inst, op, p.name));
        }
        out.blank();

        out.line(format!("switch ({}_program_counter) {{", inst));
        for s in &program.dispatch {
            out.line(format!("case {}: goto {};", s.0, s));
        }
        out.line(format!("default: goto {};", program.initial_state));
        out.line("}");
        out.blank();

        for block in &program.blocks {
            out.label(block.state.to_string());
            for s in &block.init_scopes {
                out.line(format!("{}_init_{}();", inst, s));
            }
            match &block.op {
                Op::Suspend { resume_at } => {
                    out.line(format!("{}_program_counter = {};", inst, resume_at.0));
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
                        CondTest::Predicate(_) => format!("{}_condition_{}()", inst, condition.0),
                        CondTest::Tokens { port, n } => {
                            format!("{}_avail_{}() >= {}", inst, port, n)
                        }
                        CondTest::Space { port, n } => format!("{}_room_{} >= {}", inst, port, n),
                    };
                    out.open(format!("if ({}) {{", cond));
                    out.line(format!("goto {};", on_true));
                    out.reopen("} else {");
                    if let Some(reason) = block_reason {
                        out.line("si->num_firings = i;");
                        out.line(format!("si->reason = {};", reason_const(*reason)));
                    }
                    out.line(format!("goto {};", on_false));
                    out.close("}");
                }
                Op::Fire {
                    transition,
                    commits,
                    next,
                } => {
                    out.line(format!("{}_transition_{}();", inst, transition.0));
                    out.line("i++;");
                    for c in commits {
                        let binding = ports.get(&c.port).copied();
                        match (c.is_input, binding) {
                            (true, Some(PortBinding::Input { channel, .. })) => {
                                out.line(format!(
                                    "{i}_index_{p} = ({i}_index_{p} + {r}) % (2 * SIZE_{c});",
                                    i = inst,
                                    p = c.port,
                                    r = c.rate,
                                    c = channel.0
                                ));
                                out.line(format!("{}_read_end_{}();", inst, c.port));
                            }
                            (false, Some(PortBinding::Output { channel, .. })) => {
                                out.line(format!(
                                    "{i}_index_{p} = ({i}_index_{p} + {r}) % (2 * SIZE_{c});",
                                    i = inst,
                                    p = c.port,
                                    r = c.rate,
                                    c = channel.0
                                ));
                                out.line(format!("{}_room_{} -= {};", inst, c.port, c.rate));
                                out.line(format!("{}_write_end_{}();", inst, c.port));
                            }
                            (true, _) => out.line(format!("{}_read_end_{}();", inst, c.port)),
                            (false, _) => out.line(format!("{}_write_end_{}();", inst, c.port)),
                        }
                    }
                    out.line(format!("goto {};", next));
                }
            }
        }
        out.blank();
        out.label("finished");
        out.line("si->num_firings = i;");
        if self.options.traces {
            for p in traced_ports(ports) {
                out.open(format!("if ({}_trace_{} != NULL) {{", inst, p));
                out.line(format!("fclose({}_trace_{});", inst, p));
                out.line(format!("{}_trace_{} = NULL;", inst, p));
                out.close("}");
            }
        }
        for p in &program.ports {
            let op = if p.is_input { "read_end" } else { "write_end" };
            out.line(format!("{}_{}_{}();", inst, op, p.name));
        }
        out.close("}");
        out.blank();
    }

    fn emit_initializer(&mut self, program: &ControlProgram) {
        let inst = program.name.as_str();
        self.out.open(format!("void {}_initialize(void) {{", inst));
        for s in &program.persistent_scopes {
            self.out.line(format!("{}_init_{}();", inst, s));
        }
        self.out.line(format!(
            "{}_program_counter = {};",
            inst, program.initial_state.0
        ));
        self.out.close("}");
        self.out.blank();
    }
}

/// Ports bound to a channel; only those carry tokens worth tracing.
fn traced_ports(ports: &BTreeMap<String, PortBinding>) -> impl Iterator<Item = &str> {
    ports
        .iter()
        .filter(|(_, b)| !matches!(b, PortBinding::Unconnected))
        .map(|(name, _)| name.as_str())
}

/// printf conversion and cast for a scalar token type.
fn trace_format(ty: &str) -> Option<(&'static str, &'static str)> {
    match ty {
        "int8_t" | "int16_t" | "int32_t" | "int64_t" | "int" | "long" | "short" | "char"
        | "bool" => Some(("%lld", "long long")),
        "uint8_t" | "uint16_t" | "uint32_t" | "uint64_t" | "unsigned int" | "unsigned" => {
            Some(("%llu", "unsigned long long"))
        }
        "float" | "double" => Some(("%f", "double")),
        _ => None,
    }
}

/// Tagged-union declaration for a sum type. Also used by the HLS target.
pub(crate) fn emit_sum_type(out: &mut Emitter, st: &SumType) {
    let tags: Vec<String> = st
        .variants
        .iter()
        .map(|v| format!("TAG_{}_{}", st.name, v.name))
        .collect();
    out.line(format!("typedef enum {{ {} }} {}_tag_t;", tags.join(", "), st.name));
    out.open("typedef struct {");
    out.line(format!("{}_tag_t tag;", st.name));
    if st.variants.iter().any(|v| !v.fields.is_empty()) {
        out.open("union {");
        for v in st.variants.iter().filter(|v| !v.fields.is_empty()) {
            let fields: Vec<String> = v
                .fields
                .iter()
                .map(|f| format!("{} {};", f.ty, f.name))
                .collect();
            out.line(format!("struct {{ {} }} {};", fields.join(" "), v.name));
        }
        out.close("} data;");
    }
    out.close(format!("}} {};", st.name));
    out.blank();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::{Field, Variant};

    #[test]
    fn sum_type_declaration() {
        let st = SumType {
            name: "Msg".into(),
            variants: vec![
                Variant {
                    name: "Data".into(),
                    fields: vec![Field {
                        name: "v".into(),
                        ty: "int32_t".into(),
                    }],
                },
                Variant {
                    name: "Eos".into(),
                    fields: vec![],
                },
            ],
        };
        let mut out = Emitter::new();
        emit_sum_type(&mut out, &st);
        assert_eq!(
            out.finish(),
            "\
typedef enum { TAG_Msg_Data, TAG_Msg_Eos } Msg_tag_t;
typedef struct {
    Msg_tag_t tag;
    union {
        struct { int32_t v; } Data;
    } data;
} Msg;

"
        );
    }

    #[test]
    fn translator_spells_ports_and_vars() {
        let ports: BTreeMap<String, PortBinding> = [
            (
                "in".to_string(),
                PortBinding::Input {
                    channel: crate::id::ChannelId(2),
                    reader: crate::id::ReaderId(1),
                    capacity: 4,
                },
            ),
            ("dead".to_string(), PortBinding::Unconnected),
        ]
        .into();
        let tr = CTranslator {
            instance: "f",
            vars: ["acc"].into(),
            ports: &ports,
        };
        assert_eq!(tr.var("acc"), "f_acc");
        assert_eq!(tr.var("tmp"), "tmp");
        assert_eq!(tr.peek("in", 1), "fifo_2_buffer[(f_index_in + 1) % SIZE_2]");
        assert_eq!(tr.write("dead", 0, "3"), "(void)(3);");
    }
}
