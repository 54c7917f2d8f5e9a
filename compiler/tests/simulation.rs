// Simulation tests: run synthesized controllers quantum by quantum against
// modelled channels and check resumption, scheduling info and atomicity.

use std::path::PathBuf;

use amc::am::Expr;
use amc::codegen::CodegenOptions;
use amc::condition::BlockReason;
use amc::id::{ChannelId, ConditionId, StateId, TransitionId};
use amc::pass::PassId;
use amc::pipeline::{run_pipeline, CompilationState};
use amc::settings::Settings;
use amc::sim::{Behavior, PortIo, SimError, Simulator};

// ── Behaviors for tests/fixtures/pipe.json ──────────────────────────────────

struct Gen {
    n: i64,
}

impl Behavior for Gen {
    fn predicate(&mut self, _: ConditionId, _: &Expr, _: &PortIo<'_>) -> Result<bool, SimError> {
        Ok(true)
    }

    fn fire(&mut self, _: TransitionId, io: &mut PortIo<'_>) -> Result<(), SimError> {
        io.write("out", 0, self.n)?;
        self.n += 1;
        Ok(())
    }
}

struct Doubler;

impl Behavior for Doubler {
    fn predicate(&mut self, _: ConditionId, _: &Expr, _: &PortIo<'_>) -> Result<bool, SimError> {
        Ok(true)
    }

    fn fire(&mut self, _: TransitionId, io: &mut PortIo<'_>) -> Result<(), SimError> {
        let x = io.peek("in", 0)?;
        io.write("out", 0, x * 2)
    }
}

#[derive(Default)]
struct Sink {
    seen: Vec<i64>,
}

impl Behavior for Sink {
    fn predicate(&mut self, _: ConditionId, _: &Expr, _: &PortIo<'_>) -> Result<bool, SimError> {
        Ok(true)
    }

    fn fire(&mut self, _: TransitionId, io: &mut PortIo<'_>) -> Result<(), SimError> {
        self.seen.push(io.peek("in", 0)?);
        Ok(())
    }
}

fn pipe() -> Simulator {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/pipe.json");
    let (_, network) = amc::network::load_network(&path).unwrap();
    let mut state = CompilationState::new(network, Settings::default());
    run_pipeline(&mut state, PassId::Verify, &CodegenOptions::default(), |_, _| {}).unwrap();
    Simulator::new(&state.channels.unwrap(), &state.programs.unwrap()).unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[test]
fn producer_fills_channel_then_reports_full() {
    let mut sim = pipe();
    let info = sim.run_quantum("gen", &mut Gen { n: 0 }).unwrap();
    assert_eq!(info.num_firings, 8);
    assert_eq!(info.reason, Some(BlockReason::Full));
    assert_eq!(info.suspended_at, StateId(0));
    assert_eq!(sim.fifo(ChannelId(0)).unwrap().count(0), Ok(8));
}

#[test]
fn tokens_flow_end_to_end_in_order() {
    let mut sim = pipe();
    let mut gen = Gen { n: 0 };
    let mut sink = Sink::default();
    for _ in 0..3 {
        sim.run_quantum("gen", &mut gen).unwrap();
        sim.run_quantum("copy", &mut Doubler).unwrap();
        sim.run_quantum("sink", &mut sink).unwrap();
    }
    let expected: Vec<i64> = (0..24).map(|v| v * 2).collect();
    assert_eq!(sink.seen, expected);
}

#[test]
fn controller_resumes_at_saved_wait_target() {
    let mut sim = pipe();
    let mut gen = Gen { n: 0 };
    sim.run_quantum("gen", &mut gen).unwrap();
    sim.run_quantum("copy", &mut Doubler).unwrap();
    sim.run_quantum("gen", &mut gen).unwrap();

    // Input available but output full: blocks in S1, waits to resume there.
    let blocked = sim.run_quantum("copy", &mut Doubler).unwrap();
    assert_eq!(blocked.num_firings, 0);
    assert_eq!(blocked.reason, Some(BlockReason::Full));
    assert_eq!(blocked.suspended_at, StateId(1));
    assert_eq!(sim.program_counter("copy"), Some(StateId(1)));

    sim.run_quantum("sink", &mut Sink::default()).unwrap();
    let resumed = sim.run_quantum("copy", &mut Doubler).unwrap();
    assert_eq!(resumed.resumed_at, StateId(1));
    assert_eq!(resumed.num_firings, 8);
    assert_eq!(resumed.reason, Some(BlockReason::Starved));
}

#[test]
fn failed_test_commits_nothing() {
    let mut sim = pipe();
    let mut gen = Gen { n: 0 };
    sim.run_quantum("gen", &mut gen).unwrap();
    sim.run_quantum("copy", &mut Doubler).unwrap();
    sim.run_quantum("gen", &mut gen).unwrap();
    sim.run_quantum("copy", &mut Doubler).unwrap();

    // The tokens test passed, the space test failed: no input was consumed.
    assert_eq!(sim.fifo(ChannelId(0)).unwrap().count(0), Ok(8));
    assert_eq!(sim.fifo(ChannelId(1)).unwrap().count(0), Ok(8));
}

#[test]
fn first_quantum_of_idle_consumer_is_starved() {
    let mut sim = pipe();
    let info = sim.run_quantum("sink", &mut Sink::default()).unwrap();
    assert_eq!(info.num_firings, 0);
    assert_eq!(info.reason, Some(BlockReason::Starved));
    assert_eq!(info.resumed_at, StateId(0));
}

#[test]
fn unknown_actor_is_an_error() {
    let mut sim = pipe();
    assert_eq!(
        sim.run_quantum("nobody", &mut Sink::default()),
        Err(SimError::UnknownActor("nobody".into()))
    );
}
