// controller.rs — Controller synthesis
//
// Flattens an actor machine into a resumable control program. States keep
// their given ids; the dispatch table covers exactly the `Wait` targets, the
// only places execution can resume. Each block initializes the scopes its
// policy asks for, then runs its single instruction. `Exec` commits its rates
// on the spot; `finished` ends every port once more before returning.
//
// Preconditions: `am` passed `ActorMachine::validate`.
// Postconditions: `verify_controller` holds (C1 dispatch completeness,
//                 C2 jump targets valid, C3 reachable states emitted).
// Failure modes: E0100 if a referenced condition/transition is missing,
//                W0400 per state unreachable from any entry point.
// Side effects: none.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use crate::am::{ActorMachine, Instruction};
use crate::condition::CondTest;
use crate::ctl::{Block, ControlProgram, Op, PortRef, RateCommit};
use crate::diag::{codes, Diagnostic, NodeRef};
use crate::id::{ScopeId, StateId};
use crate::liveness::ScopeInit;
use crate::pass::StageCert;

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub program: ControlProgram,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Synthesis ───────────────────────────────────────────────────────────────

#[instrument(skip(am, scopes), fields(states = am.states.len(), policy = scopes.name()))]
pub fn synthesize(name: &str, am: &ActorMachine, scopes: &dyn ScopeInit) -> SynthesisResult {
    let mut diags = Vec::new();
    let dispatch: Vec<StateId> = am.wait_targets().into_iter().collect();

    let mut blocks = Vec::with_capacity(am.states.len());
    for (sid, state) in am.state_ids().zip(&am.states) {
        let op = match &state.instruction {
            Instruction::Wait { target } => Op::Suspend { resume_at: *target },
            Instruction::Test {
                condition,
                when_true,
                when_false,
            } => {
                let Some(cond) = am.condition(*condition) else {
                    diags.push(missing(name, sid, "condition", condition.0));
                    continue;
                };
                let test = CondTest::lower(cond);
                Op::Branch {
                    condition: *condition,
                    block_reason: test.block_reason(),
                    test,
                    on_true: *when_true,
                    on_false: *when_false,
                }
            }
            Instruction::Exec { transition, target } => {
                let Some(tr) = am.transition(*transition) else {
                    diags.push(missing(name, sid, "transition", transition.0));
                    continue;
                };
                let inputs = tr.input_rates.iter().map(|(p, r)| (p, *r, true));
                let outputs = tr.output_rates.iter().map(|(p, r)| (p, *r, false));
                let commits = inputs
                    .chain(outputs)
                    .filter(|(_, rate, _)| *rate > 0)
                    .map(|(port, rate, is_input)| RateCommit {
                        port: port.clone(),
                        is_input,
                        rate,
                    })
                    .collect();
                Op::Fire {
                    transition: *transition,
                    commits,
                    next: *target,
                }
            }
        };
        blocks.push(Block {
            state: sid,
            init_scopes: scopes.scopes_for(am, sid),
            op,
        });
    }

    let ports = am
        .input_ports
        .iter()
        .map(|p| PortRef {
            name: p.name.clone(),
            is_input: true,
        })
        .chain(am.output_ports.iter().map(|p| PortRef {
            name: p.name.clone(),
            is_input: false,
        }))
        .collect();

    let persistent_scopes = am
        .scopes
        .iter()
        .enumerate()
        .filter(|(_, s)| s.persistent)
        .map(|(i, _)| ScopeId(i as u32))
        .collect();

    let program = ControlProgram {
        name: name.to_string(),
        initial_state: am.initial_state,
        dispatch,
        blocks,
        ports,
        persistent_scopes,
    };

    let live = reachable(am);
    for sid in am.state_ids().filter(|s| !live.contains(s)) {
        diags.push(Diagnostic::warning(
            codes::W0400,
            NodeRef::State(name.to_string(), sid),
            "state is unreachable from the initial state and every wait target",
        ));
    }

    debug!(
        blocks = program.blocks.len(),
        resume_points = program.dispatch.len(),
        "synthesized controller"
    );
    SynthesisResult {
        program,
        diagnostics: diags,
    }
}

fn missing(name: &str, state: StateId, what: &str, id: u32) -> Diagnostic {
    Diagnostic::error(
        codes::E0100,
        NodeRef::State(name.to_string(), state),
        format!("instruction refers to undefined {} {}", what, id),
    )
}

/// States reachable from the initial state or any wait target.
pub fn reachable(am: &ActorMachine) -> BTreeSet<StateId> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<StateId> = am.wait_targets().into_iter().collect();
    stack.push(am.initial_state);
    while let Some(s) = stack.pop() {
        let Some(state) = am.state(s) else { continue };
        if seen.insert(s) {
            stack.extend(state.instruction.targets());
        }
    }
    seen
}

// ── Verification ────────────────────────────────────────────────────────────

/// Postcondition certificate for a synthesized controller.
#[derive(Debug, Clone)]
pub struct ControllerCert {
    /// C1: one dispatch arm per wait target, nothing else.
    pub c1_dispatch_complete: bool,
    /// C2: every jump and dispatch target is an emitted block.
    pub c2_targets_valid: bool,
    /// C3: every reachable state has a block.
    pub c3_reachable_emitted: bool,
}

impl StageCert for ControllerCert {
    fn all_pass(&self) -> bool {
        self.c1_dispatch_complete && self.c2_targets_valid && self.c3_reachable_emitted
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("C1_dispatch_complete", self.c1_dispatch_complete),
            ("C2_targets_valid", self.c2_targets_valid),
            ("C3_reachable_emitted", self.c3_reachable_emitted),
        ]
    }
}

pub fn verify_controller(program: &ControlProgram, am: &ActorMachine) -> ControllerCert {
    ControllerCert {
        c1_dispatch_complete: verify_c1(program, am),
        c2_targets_valid: verify_c2(program),
        c3_reachable_emitted: reachable(am)
            .iter()
            .all(|s| program.block(*s).is_some()),
    }
}

fn verify_c1(program: &ControlProgram, am: &ActorMachine) -> bool {
    let arms: BTreeSet<StateId> = program.dispatch.iter().copied().collect();
    arms.len() == program.dispatch.len() && arms == am.wait_targets()
}

fn verify_c2(program: &ControlProgram) -> bool {
    let emitted: BTreeSet<StateId> = program.blocks.iter().map(|b| b.state).collect();
    let jumps = program.blocks.iter().flat_map(|b| match &b.op {
        Op::Suspend { resume_at } => vec![*resume_at],
        Op::Branch {
            on_true, on_false, ..
        } => vec![*on_true, *on_false],
        Op::Fire { next, .. } => vec![*next],
    });
    emitted.contains(&program.initial_state)
        && program.dispatch.iter().all(|s| emitted.contains(s))
        && jumps.into_iter().all(|s| emitted.contains(&s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::am::{Condition, PortDecl, State, Transition};
    use crate::condition::BlockReason;
    use crate::id::{ConditionId, TransitionId};
    use crate::liveness::CoarseInit;

    fn port(name: &str) -> PortDecl {
        PortDecl {
            name: name.into(),
            token_type: "int32_t".into(),
        }
    }

    fn test(c: u32, t: u32, f: u32) -> State {
        State {
            instruction: Instruction::Test {
                condition: ConditionId(c),
                when_true: StateId(t),
                when_false: StateId(f),
            },
        }
    }

    fn exec(t: u32, next: u32) -> State {
        State {
            instruction: Instruction::Exec {
                transition: TransitionId(t),
                target: StateId(next),
            },
        }
    }

    fn wait(target: u32) -> State {
        State {
            instruction: Instruction::Wait {
                target: StateId(target),
            },
        }
    }

    /// S0 tokens(in,1)? S1 : S3; S1 space(out,1)? S2 : S4; S2 exec -> S0;
    /// S3 wait -> S0; S4 wait -> S1.
    fn copier() -> ActorMachine {
        ActorMachine {
            input_ports: vec![port("in")],
            output_ports: vec![port("out")],
            conditions: vec![
                Condition::PortAvailability {
                    port: "in".into(),
                    n: 1,
                    is_input: true,
                },
                Condition::PortAvailability {
                    port: "out".into(),
                    n: 1,
                    is_input: false,
                },
            ],
            transitions: vec![Transition {
                input_rates: [("in".to_string(), 1)].into(),
                output_rates: [("out".to_string(), 1)].into(),
                ..Transition::default()
            }],
            states: vec![test(0, 1, 3), test(1, 2, 4), exec(0, 0), wait(0), wait(1)],
            ..ActorMachine::default()
        }
    }

    #[test]
    fn dispatch_covers_wait_targets_only() {
        let res = synthesize("copy", &copier(), &CoarseInit);
        assert!(res.diagnostics.is_empty());
        assert_eq!(res.program.dispatch, vec![StateId(0), StateId(1)]);
        assert_eq!(res.program.blocks.len(), 5);
        assert!(verify_controller(&res.program, &copier()).all_pass());
    }

    #[test]
    fn port_tests_record_block_reason() {
        let res = synthesize("copy", &copier(), &CoarseInit);
        let reasons: Vec<_> = res
            .program
            .blocks
            .iter()
            .filter_map(|b| match &b.op {
                Op::Branch { block_reason, .. } => Some(*block_reason),
                _ => None,
            })
            .collect();
        assert_eq!(
            reasons,
            vec![Some(BlockReason::Starved), Some(BlockReason::Full)]
        );
    }

    #[test]
    fn exec_commits_inputs_then_outputs() {
        let res = synthesize("copy", &copier(), &CoarseInit);
        let Op::Fire { commits, next, .. } = &res.program.blocks[2].op else {
            panic!("S2 should fire");
        };
        assert_eq!(*next, StateId(0));
        assert_eq!(
            commits,
            &vec![
                RateCommit {
                    port: "in".into(),
                    is_input: true,
                    rate: 1
                },
                RateCommit {
                    port: "out".into(),
                    is_input: false,
                    rate: 1
                },
            ]
        );
    }

    #[test]
    fn unreachable_state_warns() {
        let mut am = copier();
        am.states.push(exec(0, 0));
        let res = synthesize("copy", &am, &CoarseInit);
        assert_eq!(res.diagnostics.len(), 1);
        assert_eq!(res.diagnostics[0].code, Some(codes::W0400));
        assert_eq!(
            res.diagnostics[0].node,
            NodeRef::State("copy".into(), StateId(5))
        );
    }

    #[test]
    fn cert_detects_missing_dispatch_arm() {
        let am = copier();
        let mut program = synthesize("copy", &am, &CoarseInit).program;
        program.dispatch.pop();
        let cert = verify_controller(&program, &am);
        assert!(!cert.c1_dispatch_complete);
        assert!(cert.c2_targets_valid, "{:?}", cert.obligations());
    }

    #[test]
    fn cert_detects_dropped_block() {
        let am = copier();
        let mut program = synthesize("copy", &am, &CoarseInit).program;
        program.blocks.retain(|b| b.state != StateId(4));
        let cert = verify_controller(&program, &am);
        assert!(!cert.c2_targets_valid);
        assert!(!cert.c3_reachable_emitted);
    }
}
