// Snapshot tests: lock the synthesized control program listing (`--emit ctl`).
//
// Uses the library API (load → validate → synthesize) on `tests/fixtures/`.
// Snapshots are inline; run `cargo insta review` after intentional changes.

use std::path::PathBuf;

use amc::codegen::CodegenOptions;
use amc::pass::PassId;
use amc::pipeline::{run_pipeline, CompilationState};
use amc::settings::Settings;

fn listing(instance: &str, settings: Settings) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/pipe.json");
    let (_, network) = amc::network::load_network(&path).unwrap();
    let mut state = CompilationState::new(network, settings);
    run_pipeline(&mut state, PassId::Verify, &CodegenOptions::default(), |_, _| {}).unwrap();
    state
        .programs
        .unwrap()
        .iter()
        .find(|p| p.name == instance)
        .map(|p| p.to_string().trim_end().to_string())
        .unwrap()
}

#[test]
fn copier_controller() {
    insta::assert_snapshot!(listing("copy", Settings::default()), @r"
    controller copy (initial S0)
    dispatch: S0 S1 default -> S0
    S0:
      test c0 tokens(in, 1) ? S1 : S3 [starved]
    S1:
      test c1 space(out, 1) ? S2 : S4 [full]
    S2:
      init scope0
      exec t0; consume in 1; produce out 1 -> S0
    S3:
      wait -> S0
    S4:
      wait -> S1
    finished: end in end out
    ");
}

#[test]
fn generator_keeps_persistent_scope_out_of_blocks() {
    insta::assert_snapshot!(listing("gen", Settings::default()), @r"
    controller gen (initial S0)
      persistent scope0
    dispatch: S0 default -> S0
    S0:
      test c0 space(out, 1) ? S1 : S2 [full]
    S1:
      exec t0; produce out 1 -> S0
    S2:
      wait -> S0
    finished: end out
    ");
}
