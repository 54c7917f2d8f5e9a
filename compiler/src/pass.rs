// pass.rs — Pass descriptor module: metadata, dependency resolution, certificates
//
// Declares the compiler's 5 passes (loading the network JSON is outside the
// runner), their dependency edges, and the artifacts they produce. Used by
// the pipeline runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (loading excluded, handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Validate,
    Allocate,
    Synthesize,
    Verify,
    Emit,
}

/// Machine-readable artifact identifiers. Each maps to a field of
/// `pipeline::CompilationState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Validated, // per-instance IR checks
    Channels,  // ChannelMap
    Programs,  // Vec<ControlProgram>
    Certs,     // Vec<ControllerCert>
    Generated, // GeneratedCode or HlsResult
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions, documentation only.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[],
            outputs: &[ArtifactId::Validated],
            invariants: "every id resolves, every port name is declared once, instance names are unique",
        },
        PassId::Allocate => PassDescriptor {
            name: "allocate",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Channels],
            invariants: "one channel per driven source pin, capacities resolved",
        },
        PassId::Synthesize => PassDescriptor {
            name: "synthesize",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Programs],
            invariants: "one control program per instance",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Synthesize],
            outputs: &[ArtifactId::Certs],
            invariants: "C1-C3 obligations hold for every controller",
        },
        PassId::Emit => PassDescriptor {
            name: "emit",
            inputs: &[PassId::Allocate, PassId::Verify],
            outputs: &[ArtifactId::Generated],
            invariants: "target source emitted",
        },
    }
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Proof obligations a pass checks on its own output.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    /// Named obligations and whether each holds.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 5 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::Validate,
    PassId::Allocate,
    PassId::Synthesize,
    PassId::Verify,
    PassId::Emit,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_allocate_skips_synthesis() {
        let passes = required_passes(PassId::Allocate);
        assert_eq!(passes, vec![PassId::Validate, PassId::Allocate]);
        assert!(!passes.contains(&PassId::Synthesize));
    }

    #[test]
    fn required_passes_emit_includes_all() {
        let passes = required_passes(PassId::Emit);
        assert_eq!(passes.len(), 5);
        assert_eq!(passes, ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_verify() {
        assert_eq!(
            required_passes(PassId::Verify),
            vec![PassId::Validate, PassId::Synthesize, PassId::Verify]
        );
    }

    #[test]
    fn required_passes_validate_is_minimal() {
        assert_eq!(required_passes(PassId::Validate), vec![PassId::Validate]);
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass).unwrap();
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep).unwrap();
                assert!(
                    dep_pos < self_pos,
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
