// liveness.rs — Scope initialization policies
//
// Decides which scope initializers run at the head of each state's block.
// Two policies share the `ScopeInit` contract: the frontend's precise
// liveness table, or a coarse rule that re-initializes every non-persistent
// scope the instruction depends on, transitively. Persistent scopes are never
// returned; the instance initializer owns them.
//
// Both policies return scopes dependencies-first so an initializer never
// reads a variable of a scope that has not been set up yet.

use std::collections::BTreeSet;

use crate::am::{ActorMachine, Condition, Instruction};
use crate::id::{ScopeId, StateId};
use crate::settings::Settings;

pub trait ScopeInit {
    /// Scopes to initialize before the instruction of `state` runs.
    fn scopes_for(&self, am: &ActorMachine, state: StateId) -> Vec<ScopeId>;

    fn name(&self) -> &'static str;
}

/// Externally computed per-state liveness.
pub struct PreciseLiveness;

impl ScopeInit for PreciseLiveness {
    fn scopes_for(&self, am: &ActorMachine, state: StateId) -> Vec<ScopeId> {
        let wanted: BTreeSet<ScopeId> = am
            .liveness
            .iter()
            .flatten()
            .filter(|e| e.state == state)
            .flat_map(|e| e.init.iter().copied())
            .collect();
        dependency_order(am, &wanted)
    }

    fn name(&self) -> &'static str {
        "precise"
    }
}

/// Every non-persistent scope the instruction reads, plus what those scopes
/// depend on.
pub struct CoarseInit;

impl ScopeInit for CoarseInit {
    fn scopes_for(&self, am: &ActorMachine, state: StateId) -> Vec<ScopeId> {
        let direct: &[ScopeId] = match am.state(state).map(|s| &s.instruction) {
            Some(Instruction::Test { condition, .. }) => match am.condition(*condition) {
                Some(Condition::Predicate { scopes, .. }) => scopes.as_slice(),
                _ => &[],
            },
            Some(Instruction::Exec { transition, .. }) => {
                am.transition(*transition).map_or(&[][..], |t| t.scopes.as_slice())
            }
            _ => &[],
        };
        let mut closure = BTreeSet::new();
        let mut stack: Vec<ScopeId> = direct.to_vec();
        while let Some(s) = stack.pop() {
            if closure.insert(s) {
                if let Some(scope) = am.scope(s) {
                    stack.extend(scope.depends_on.iter().copied());
                }
            }
        }
        dependency_order(am, &closure)
    }

    fn name(&self) -> &'static str {
        "coarse"
    }
}

/// Select the policy for one machine. The precise table is used only when
/// enabled and actually supplied.
pub fn policy_for(am: &ActorMachine, settings: &Settings) -> &'static dyn ScopeInit {
    if settings.scope_liveness && am.liveness.is_some() {
        &PreciseLiveness
    } else {
        &CoarseInit
    }
}

/// Post-order over `depends_on`, restricted to `set`, persistent scopes
/// dropped. Ties break on ascending scope id.
fn dependency_order(am: &ActorMachine, set: &BTreeSet<ScopeId>) -> Vec<ScopeId> {
    fn visit(
        am: &ActorMachine,
        s: ScopeId,
        set: &BTreeSet<ScopeId>,
        seen: &mut BTreeSet<ScopeId>,
        out: &mut Vec<ScopeId>,
    ) {
        if !seen.insert(s) {
            return;
        }
        if let Some(scope) = am.scope(s) {
            for dep in &scope.depends_on {
                if set.contains(dep) {
                    visit(am, *dep, set, seen, out);
                }
            }
            if !scope.persistent {
                out.push(s);
            }
        }
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for s in set {
        visit(am, *s, set, &mut seen, &mut out);
    }
    out
}
