use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use amc::am::{ActorMachine, Condition, Expr, Instruction, PortDecl, State, Stmt, Transition};
use amc::codegen::CodegenOptions;
use amc::id::{ConditionId, StateId, TransitionId};
use amc::network::{Connection, Instance, Network, PortEnd};
use amc::pass::PassId;
use amc::pipeline::{run_pipeline, CompilationState};
use amc::settings::Settings;

// Benchmark networks: a chain of copier actors, `stage_0 -> ... -> stage_{n-1}`.

fn port(name: &str) -> PortDecl {
    PortDecl {
        name: name.into(),
        token_type: "int32_t".into(),
    }
}

fn state(instruction: Instruction) -> State {
    State { instruction }
}

/// S0 tokens(in)? S1 : S3; S1 space(out)? S2 : S4; S2 exec -> S0;
/// S3 wait -> S0; S4 wait -> S1.
fn copier() -> ActorMachine {
    let rate = |p: &str| -> BTreeMap<String, u32> { [(p.to_string(), 1)].into() };
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
            body: vec![Stmt::Write {
                port: "out".into(),
                offset: 0,
                value: Expr::Peek {
                    port: "in".into(),
                    offset: 0,
                },
            }],
            input_rates: rate("in"),
            output_rates: rate("out"),
            ..Transition::default()
        }],
        states: vec![
            state(Instruction::Test {
                condition: ConditionId(0),
                when_true: StateId(1),
                when_false: StateId(3),
            }),
            state(Instruction::Test {
                condition: ConditionId(1),
                when_true: StateId(2),
                when_false: StateId(4),
            }),
            state(Instruction::Exec {
                transition: TransitionId(0),
                target: StateId(0),
            }),
            state(Instruction::Wait {
                target: StateId(0),
            }),
            state(Instruction::Wait {
                target: StateId(1),
            }),
        ],
        ..ActorMachine::default()
    }
}

fn chain(n: usize) -> Network {
    let instances = (0..n)
        .map(|i| Instance {
            name: format!("stage_{}", i),
            machine: copier(),
        })
        .collect();
    let mut connections = vec![Connection {
        source: PortEnd::boundary("src"),
        target: PortEnd::new("stage_0", "in"),
        buffer_capacity: Some(64),
    }];
    connections.extend((1..n).map(|i| Connection {
        source: PortEnd::new(&format!("stage_{}", i - 1), "out"),
        target: PortEnd::new(&format!("stage_{}", i), "in"),
        buffer_capacity: Some(64),
    }));
    connections.push(Connection {
        source: PortEnd::new(&format!("stage_{}", n - 1), "out"),
        target: PortEnd::boundary("dst"),
        buffer_capacity: Some(64),
    });
    Network {
        name: "chain".into(),
        input_ports: vec![port("src")],
        output_ports: vec![port("dst")],
        instances,
        connections,
    }
}

fn bench_synthesis(c: &mut Criterion) {
    let am = copier();
    let settings = Settings::default();
    c.bench_function("synthesize/copier", |b| {
        b.iter(|| {
            let policy = amc::liveness::policy_for(&am, &settings);
            let r = amc::controller::synthesize("copy", black_box(&am), policy);
            black_box(&r.program);
        });
    });
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    let settings = Settings::default();
    for n in [1_usize, 10, 100] {
        let net = chain(n);
        let id = BenchmarkId::from_parameter(format!("{}stages", n));
        group.bench_with_input(id, &net, |b, net| {
            b.iter(|| {
                let r = amc::channel::allocate(black_box(net), &settings);
                black_box(&r.channels);
            });
        });
    }
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline/emit_c");
    for n in [1_usize, 10, 100] {
        let net = chain(n);
        let id = BenchmarkId::from_parameter(format!("{}stages", n));
        group.bench_with_input(id, &net, |b, net| {
            b.iter(|| {
                let mut state = CompilationState::new(net.clone(), Settings::default());
                let opts = CodegenOptions::default();
                let r = run_pipeline(&mut state, PassId::Emit, &opts, |_, _| {});
                assert!(r.is_ok());
                black_box(&state.generated);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_synthesis, bench_allocation, bench_full_pipeline);
criterion_main!(benches);
