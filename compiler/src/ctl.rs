// ctl.rs — Target-agnostic control program
//
// The synthesizer's output: a dispatch table over resumption points followed
// by one labeled block per state. Both emission targets and the simulator
// consume this form. `Display` renders the listing printed by `--emit ctl`.

use std::fmt;

use crate::condition::{BlockReason, CondTest};
use crate::id::{ConditionId, ScopeId, StateId, TransitionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    pub name: String,
    pub is_input: bool,
}

/// A rate advance committed by an `Exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateCommit {
    pub port: String,
    pub is_input: bool,
    pub rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Save `resume_at` and return to the caller.
    Suspend { resume_at: StateId },
    Branch {
        condition: ConditionId,
        test: CondTest,
        on_true: StateId,
        on_false: StateId,
        /// Recorded into scheduling-info when the test fails.
        block_reason: Option<BlockReason>,
    },
    Fire {
        transition: TransitionId,
        commits: Vec<RateCommit>,
        next: StateId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub state: StateId,
    pub init_scopes: Vec<ScopeId>,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlProgram {
    pub name: String,
    pub initial_state: StateId,
    /// Resumption points in ascending order; one dispatch arm each.
    pub dispatch: Vec<StateId>,
    /// One block per state, in state-id order.
    pub blocks: Vec<Block>,
    /// Ports ended at `finished`, inputs before outputs.
    pub ports: Vec<PortRef>,
    /// Persistent scopes run once by the instance initializer.
    pub persistent_scopes: Vec<ScopeId>,
}

impl ControlProgram {
    pub fn block(&self, state: StateId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.state == state)
    }
}

impl fmt::Display for ControlProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "controller {} (initial {})", self.name, self.initial_state)?;
        if !self.persistent_scopes.is_empty() {
            let s: Vec<String> = self.persistent_scopes.iter().map(|s| s.to_string()).collect();
            writeln!(f, "  persistent {}", s.join(", "))?;
        }
        write!(f, "dispatch:")?;
        for s in &self.dispatch {
            write!(f, " {}", s)?;
        }
        writeln!(f, " default -> {}", self.initial_state)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.state)?;
            for s in &block.init_scopes {
                writeln!(f, "  init {}", s)?;
            }
            match &block.op {
                Op::Suspend { resume_at } => writeln!(f, "  wait -> {}", resume_at)?,
                Op::Branch {
                    condition,
                    test,
                    on_true,
                    on_false,
                    block_reason,
                } => {
                    write!(f, "  test {} {} ? {} : {}", condition, test, on_true, on_false)?;
                    match block_reason {
                        Some(r) => writeln!(f, " [{}]", r)?,
                        None => writeln!(f)?,
                    }
                }
                Op::Fire {
                    transition,
                    commits,
                    next,
                } => {
                    write!(f, "  exec {}", transition)?;
                    for c in commits {
                        let verb = if c.is_input { "consume" } else { "produce" };
                        write!(f, "; {} {} {}", verb, c.port, c.rate)?;
                    }
                    writeln!(f, " -> {}", next)?;
                }
            }
        }
        write!(f, "finished:")?;
        for p in &self.ports {
            write!(f, " end {}", p.name)?;
        }
        writeln!(f)
    }
}
