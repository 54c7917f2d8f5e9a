// dot.rs — Graphviz DOT output for synthesized controllers
//
// Renders each control program as a state/instruction graph: states are
// filled circles, `Exec` a rectangle labelled with its transition, `Wait` a
// small double circle, `Test` a diamond labelled with the port test or
// `(guard)`. False branches are dashed.
//
// Preconditions: `programs` came out of the synthesize pass.
// Postconditions: returns a valid DOT string, one cluster per controller.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::condition::CondTest;
use crate::ctl::{ControlProgram, Op};

/// Emit every program whose name matches `instance` (all when `None`).
pub fn emit_dot(programs: &[ControlProgram], instance: Option<&str>) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, programs, instance);
    buf
}

fn write_dot(
    buf: &mut String,
    programs: &[ControlProgram],
    instance: Option<&str>,
) -> fmt::Result {
    writeln!(buf, "digraph controllers {{")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    for program in programs
        .iter()
        .filter(|p| instance.map_or(true, |name| p.name == name))
    {
        writeln!(buf)?;
        write_program(buf, program)?;
    }
    writeln!(buf, "}}")
}

fn write_program(buf: &mut String, program: &ControlProgram) -> fmt::Result {
    let inst = sanitize(&program.name);
    writeln!(buf, "    subgraph cluster_{inst} {{")?;
    writeln!(buf, "        label=\"{}\";", program.name)?;
    writeln!(buf, "        style=rounded;")?;
    writeln!(buf, "        color=gray50;")?;

    // Instruction nodes are numbered per controller in block order.
    for (n, block) in program.blocks.iter().enumerate() {
        let state = format!("{inst}_{}", block.state);
        let instr = format!("{inst}_i{n}");
        writeln!(
            buf,
            "        {state} [shape=circle, style=filled, label=\"{}\"];",
            block.state
        )?;
        match &block.op {
            Op::Fire {
                transition, next, ..
            } => {
                writeln!(
                    buf,
                    "        {instr} [shape=rectangle, label=\"{}\"];",
                    transition.0
                )?;
                writeln!(buf, "        {state} -> {instr} -> {inst}_{next};")?;
            }
            Op::Suspend { resume_at } => {
                writeln!(
                    buf,
                    "        {instr} [shape=doublecircle, label=\"\", width=0.2, height=0.2];"
                )?;
                writeln!(buf, "        {state} -> {instr} -> {inst}_{resume_at};")?;
            }
            Op::Branch {
                test,
                on_true,
                on_false,
                ..
            } => {
                writeln!(
                    buf,
                    "        {instr} [shape=diamond, label=\"{}\"];",
                    test_label(test)
                )?;
                writeln!(buf, "        {state} -> {instr};")?;
                writeln!(buf, "        {instr} -> {inst}_{on_false} [style=dashed];")?;
                writeln!(buf, "        {instr} -> {inst}_{on_true};")?;
            }
        }
    }
    writeln!(buf, "    }}")
}

fn test_label(test: &CondTest) -> String {
    match test {
        CondTest::Predicate(_) => "(guard)".to_string(),
        port => port.to_string(),
    }
}

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ConditionId, StateId, TransitionId};
    use crate::ctl::Block;

    fn program(name: &str) -> ControlProgram {
        ControlProgram {
            name: name.into(),
            initial_state: StateId(0),
            dispatch: vec![StateId(0)],
            blocks: vec![
                Block {
                    state: StateId(0),
                    init_scopes: vec![],
                    op: Op::Branch {
                        condition: ConditionId(0),
                        test: CondTest::Tokens {
                            port: "in".into(),
                            n: 2,
                        },
                        on_true: StateId(1),
                        on_false: StateId(2),
                        block_reason: None,
                    },
                },
                Block {
                    state: StateId(1),
                    init_scopes: vec![],
                    op: Op::Fire {
                        transition: TransitionId(3),
                        commits: vec![],
                        next: StateId(0),
                    },
                },
                Block {
                    state: StateId(2),
                    init_scopes: vec![],
                    op: Op::Suspend {
                        resume_at: StateId(0),
                    },
                },
            ],
            ports: vec![],
            persistent_scopes: vec![],
        }
    }

    #[test]
    fn shapes_and_dashed_false_edge() {
        let dot = emit_dot(&[program("a.b")], None);
        assert!(dot.starts_with("digraph controllers {\n"));
        assert!(dot.contains("subgraph cluster_a_b {"));
        assert!(dot.contains("a_b_i0 [shape=diamond, label=\"tokens(in, 2)\"];"));
        assert!(dot.contains("a_b_i0 -> a_b_S2 [style=dashed];"));
        assert!(dot.contains("a_b_i1 [shape=rectangle, label=\"3\"];"));
        assert!(dot.contains("a_b_S1 -> a_b_i1 -> a_b_S0;"));
        assert!(dot.contains("a_b_i2 [shape=doublecircle"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn instance_filter() {
        let dot = emit_dot(&[program("x"), program("y")], Some("y"));
        assert!(!dot.contains("cluster_x"));
        assert!(dot.contains("cluster_y"));
    }

    #[test]
    fn predicate_renders_as_guard() {
        let test = CondTest::Predicate(crate::am::Expr::var("done"));
        assert_eq!(test_label(&test), "(guard)");
    }
}
