// sim.rs — Cooperative scheduler simulation
//
// Executes synthesized control programs against `fifo` channels the way the
// generated C does: each quantum opens a transaction on every port, dispatches
// on the saved program counter, walks blocks until a `Wait`, and ends every
// port at `finished`. Transition bodies and predicates are supplied by a
// `Behavior`, so the simulator needs no expression semantics of its own.
//
// Failure modes: SimError (protocol violation, unbound port, a quantum that
//                never reaches a `Wait` within the step budget).

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::trace;

use crate::am::Expr;
use crate::channel::{ChannelMap, PortBinding};
use crate::condition::{BlockReason, CondTest};
use crate::ctl::{ControlProgram, Op};
use crate::fifo::{Fifo, ProtocolError, ReadCursor, WriteCursor};
use crate::id::{ChannelId, ConditionId, ScopeId, StateId, TransitionId};

pub const DEFAULT_STEP_BUDGET: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("actor '{actor}' has no port '{port}'")]
    UnknownPort { actor: String, port: String },
    #[error("no actor named '{0}'")]
    UnknownActor(String),
    #[error("control program '{actor}' has no block for {state}")]
    MissingBlock { actor: String, state: StateId },
    #[error("quantum of '{actor}' ran {budget} steps without suspending")]
    StepBudget { actor: String, budget: usize },
    #[error("behavior failed: {0}")]
    Behavior(String),
}

/// Feedback written back to the outer scheduler after one quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedInfo {
    /// Transitions executed during the quantum.
    pub num_firings: u32,
    /// Set by the last port test that failed, if any.
    pub reason: Option<BlockReason>,
    pub resumed_at: StateId,
    pub suspended_at: StateId,
}

// ── Port access during a firing ─────────────────────────────────────────────

enum PortTx {
    Read { channel: usize, cursor: ReadCursor },
    Write { channel: usize, cursor: WriteCursor },
    /// Unconnected output: room is unbounded, writes vanish.
    Sink,
}

/// Open transactions of one actor, as seen by its behavior.
pub struct PortIo<'a> {
    actor: &'a str,
    ports: &'a BTreeMap<String, PortTx>,
    fifos: &'a mut [Fifo<i64>],
}

impl PortIo<'_> {
    fn port(&self, name: &str) -> Result<&PortTx, SimError> {
        self.ports.get(name).ok_or_else(|| SimError::UnknownPort {
            actor: self.actor.to_string(),
            port: name.to_string(),
        })
    }

    pub fn peek(&self, port: &str, offset: u32) -> Result<i64, SimError> {
        match self.port(port)? {
            PortTx::Read { channel, cursor } => Ok(*self.fifos[*channel].peek(cursor, offset)?),
            _ => Err(SimError::UnknownPort {
                actor: self.actor.to_string(),
                port: port.to_string(),
            }),
        }
    }

    pub fn write(&mut self, port: &str, offset: u32, value: i64) -> Result<(), SimError> {
        match self.port(port)? {
            PortTx::Write { channel, cursor } => {
                let (channel, cursor) = (*channel, *cursor);
                self.fifos[channel].write(&cursor, offset, value)?;
                Ok(())
            }
            PortTx::Sink => Ok(()),
            PortTx::Read { .. } => Err(SimError::UnknownPort {
                actor: self.actor.to_string(),
                port: port.to_string(),
            }),
        }
    }

    /// Tokens readable on an input port in the open transaction.
    pub fn available(&self, port: &str) -> Result<u32, SimError> {
        match self.port(port)? {
            PortTx::Read { cursor, .. } => Ok(cursor.available()),
            _ => Ok(0),
        }
    }
}

pub trait Behavior {
    fn predicate(
        &mut self,
        condition: ConditionId,
        expr: &Expr,
        io: &PortIo<'_>,
    ) -> Result<bool, SimError>;

    fn fire(&mut self, transition: TransitionId, io: &mut PortIo<'_>) -> Result<(), SimError>;

    fn init_scope(&mut self, _scope: ScopeId) {}
}

// ── Simulator ───────────────────────────────────────────────────────────────

struct ActorSim {
    program: ControlProgram,
    program_counter: StateId,
    bindings: Vec<(String, PortBinding)>,
}

pub struct Simulator {
    fifos: Vec<Fifo<i64>>,
    actors: Vec<ActorSim>,
    pub step_budget: usize,
}

impl Simulator {
    pub fn new(channels: &ChannelMap, programs: &[ControlProgram]) -> Result<Self, SimError> {
        let fifos = channels
            .channels
            .iter()
            .map(|ch| Fifo::new(ch.capacity, ch.readers.len()))
            .collect::<Result<Vec<_>, _>>()?;
        let actors = programs
            .iter()
            .map(|p| ActorSim {
                bindings: p
                    .ports
                    .iter()
                    .map(|port| {
                        (
                            port.name.clone(),
                            channels.binding(&p.name, &port.name, port.is_input),
                        )
                    })
                    .collect(),
                program_counter: p.initial_state,
                program: p.clone(),
            })
            .collect();
        Ok(Simulator {
            fifos,
            actors,
            step_budget: DEFAULT_STEP_BUDGET,
        })
    }

    pub fn fifo(&self, id: ChannelId) -> Option<&Fifo<i64>> {
        self.fifos.get(id.index())
    }

    /// Direct access for feeding network inputs and draining outputs.
    pub fn fifo_mut(&mut self, id: ChannelId) -> Option<&mut Fifo<i64>> {
        self.fifos.get_mut(id.index())
    }

    pub fn program_counter(&self, actor: &str) -> Option<StateId> {
        self.actors
            .iter()
            .find(|a| a.program.name == actor)
            .map(|a| a.program_counter)
    }

    /// Run one scheduler quantum of `actor`.
    pub fn run_quantum(
        &mut self,
        actor: &str,
        behavior: &mut dyn Behavior,
    ) -> Result<SchedInfo, SimError> {
        let budget = self.step_budget;
        let sim = self
            .actors
            .iter_mut()
            .find(|a| a.program.name == actor)
            .ok_or_else(|| SimError::UnknownActor(actor.to_string()))?;
        let fifos = &mut self.fifos;

        // Begin every port.
        let mut ports = BTreeMap::new();
        for (name, binding) in &sim.bindings {
            let tx = match *binding {
                PortBinding::Input {
                    channel, reader, ..
                } => PortTx::Read {
                    channel: channel.index(),
                    cursor: fifos[channel.index()].begin_read(reader.index())?,
                },
                PortBinding::Output { channel, .. } => PortTx::Write {
                    channel: channel.index(),
                    cursor: fifos[channel.index()].begin_write(),
                },
                PortBinding::Unconnected => PortTx::Sink,
            };
            ports.insert(name.clone(), tx);
        }

        let program = &sim.program;
        let resumed_at = if program.dispatch.contains(&sim.program_counter) {
            sim.program_counter
        } else {
            program.initial_state
        };
        let mut pc = resumed_at;
        let mut firings = 0u32;
        let mut reason = None;
        let mut steps = 0usize;

        let suspended_at = loop {
            steps += 1;
            if steps > budget {
                return Err(SimError::StepBudget {
                    actor: actor.to_string(),
                    budget,
                });
            }
            let block = program.block(pc).ok_or_else(|| SimError::MissingBlock {
                actor: actor.to_string(),
                state: pc,
            })?;
            for scope in &block.init_scopes {
                behavior.init_scope(*scope);
            }
            trace!(actor, state = %pc, "step");
            match &block.op {
                Op::Suspend { resume_at } => break *resume_at,
                Op::Branch {
                    condition,
                    test,
                    on_true,
                    on_false,
                    block_reason,
                } => {
                    let io = PortIo {
                        actor,
                        ports: &ports,
                        fifos: &mut fifos[..],
                    };
                    let holds = match test {
                        CondTest::Tokens { port, n } => io.available(port)? >= *n,
                        CondTest::Space { port, n } => match io.port(port)? {
                            PortTx::Write { cursor, .. } => cursor.room() >= *n,
                            _ => true,
                        },
                        CondTest::Predicate(expr) => behavior.predicate(*condition, expr, &io)?,
                    };
                    if holds {
                        pc = *on_true;
                    } else {
                        if block_reason.is_some() {
                            reason = *block_reason;
                        }
                        pc = *on_false;
                    }
                }
                Op::Fire {
                    transition,
                    commits,
                    next,
                } => {
                    let mut io = PortIo {
                        actor,
                        ports: &ports,
                        fifos: &mut fifos[..],
                    };
                    behavior.fire(*transition, &mut io)?;
                    for c in commits {
                        let tx = ports.get_mut(&c.port).ok_or_else(|| SimError::UnknownPort {
                            actor: actor.to_string(),
                            port: c.port.clone(),
                        })?;
                        match tx {
                            PortTx::Read { channel, cursor } => {
                                cursor.advance(c.rate)?;
                                fifos[*channel].end_read(cursor)?;
                            }
                            PortTx::Write { channel, cursor } => {
                                cursor.advance(c.rate)?;
                                fifos[*channel].end_write(cursor);
                            }
                            PortTx::Sink => {}
                        }
                    }
                    firings += 1;
                    pc = *next;
                }
            }
        };

        // finished: end every port once more.
        for tx in ports.values() {
            match tx {
                PortTx::Read { channel, cursor } => fifos[*channel].end_read(cursor)?,
                PortTx::Write { channel, cursor } => fifos[*channel].end_write(cursor),
                PortTx::Sink => {}
            }
        }
        sim.program_counter = suspended_at;

        Ok(SchedInfo {
            num_firings: firings,
            reason,
            resumed_at,
            suspended_at,
        })
    }
}
