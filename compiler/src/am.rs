// am.rs — Actor machine IR consumed by the backend
//
// The frontend hands over an already type-checked, already-scheduled actor
// machine: an ordered list of states, each holding exactly one instruction,
// plus the conditions, transitions and scopes those instructions refer to.
// The IR is closed: every instruction is a Wait, Test or Exec and every
// condition is a predicate or a port-availability test.
//
// Preconditions: none (types + structural validation).
// Postconditions: `validate` reports every dangling id and undeclared port.
// Failure modes: E0100 (dangling reference), E0101 (empty controller),
//                E0102 (port name declared twice), E0204 (port not declared
//                by the actor).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic, NodeRef};
use crate::id::{ConditionId, ScopeId, StateId, TransitionId};
use crate::pattern::Alternative;

// ── Controller ──────────────────────────────────────────────────────────────

/// The single instruction a state holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    /// Suspend; execution resumes at `target` on the next quantum.
    Wait { target: StateId },
    Test {
        condition: ConditionId,
        when_true: StateId,
        when_false: StateId,
    },
    Exec {
        transition: TransitionId,
        target: StateId,
    },
}

impl Instruction {
    /// Every state this instruction may jump to.
    pub fn targets(&self) -> Vec<StateId> {
        match self {
            Instruction::Wait { target } | Instruction::Exec { target, .. } => vec![*target],
            Instruction::Test {
                when_true,
                when_false,
                ..
            } => vec![*when_true, *when_false],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    pub instruction: Instruction,
}

// ── Conditions and transitions ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Predicate {
        expr: Expr,
        /// Scopes the predicate reads.
        #[serde(default)]
        scopes: Vec<ScopeId>,
    },
    PortAvailability {
        port: String,
        n: u32,
        is_input: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default)]
    pub body: Vec<Stmt>,
    /// Tokens consumed per input port on commit.
    #[serde(default)]
    pub input_rates: BTreeMap<String, u32>,
    /// Tokens produced per output port on commit.
    #[serde(default)]
    pub output_rates: BTreeMap<String, u32>,
    /// Scopes the body reads.
    #[serde(default)]
    pub scopes: Vec<ScopeId>,
}

// ── Scopes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub declarations: Vec<VarDecl>,
    /// Persistent scopes hold actor state and are initialized once.
    #[serde(default)]
    pub persistent: bool,
    /// Scopes whose variables this scope's initializers read.
    #[serde(default)]
    pub depends_on: Vec<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub value: Option<Expr>,
}

/// Externally computed liveness: the minimal scopes to initialize before the
/// instruction of `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessEntry {
    pub state: StateId,
    pub init: Vec<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

// ── Sum types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumType {
    pub name: String,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl SumType {
    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name == name)
    }
}

// ── Scalar expressions and statements ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Var {
        name: String,
    },
    Int {
        value: i64,
    },
    Bool {
        value: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// Token at `offset` past the read cursor of an input port.
    Peek {
        port: String,
        #[serde(default)]
        offset: u32,
    },
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var { name: name.into() }
    }

    pub fn int(value: i64) -> Self {
        Expr::Int { value }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn collect_ports<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Var { .. } | Expr::Int { .. } | Expr::Bool { .. } => {}
            Expr::Unary { operand, .. } => operand.collect_ports(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_ports(out);
                rhs.collect_ports(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_ports(out)),
            Expr::Peek { port, .. } => out.push(port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stmt {
    Assign {
        target: String,
        value: Expr,
    },
    /// Store a token at `offset` past the write cursor of an output port.
    Write {
        port: String,
        #[serde(default)]
        offset: u32,
        value: Expr,
    },
    If {
        cond: Expr,
        #[serde(default)]
        then: Vec<Stmt>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Stmt>,
    },
    Call {
        procedure: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// Pattern match over a value of a declared sum type.
    Case {
        scrutinee: Expr,
        sum_type: String,
        alternatives: Vec<Alternative<Vec<Stmt>>>,
        #[serde(default)]
        default: Vec<Stmt>,
    },
}

impl Stmt {
    fn collect_ports<'a>(&'a self, reads: &mut Vec<&'a str>, writes: &mut Vec<&'a str>) {
        match self {
            Stmt::Assign { value, .. } => value.collect_ports(reads),
            Stmt::Write { port, value, .. } => {
                writes.push(port);
                value.collect_ports(reads);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_ports(reads);
                for s in then.iter().chain(otherwise) {
                    s.collect_ports(reads, writes);
                }
            }
            Stmt::Call { args, .. } => args.iter().for_each(|a| a.collect_ports(reads)),
            Stmt::Case {
                scrutinee,
                alternatives,
                default,
                ..
            } => {
                scrutinee.collect_ports(reads);
                for alt in alternatives {
                    for g in &alt.guards {
                        g.collect_ports(reads);
                    }
                    for s in &alt.body {
                        s.collect_ports(reads, writes);
                    }
                }
                for s in default {
                    s.collect_ports(reads, writes);
                }
            }
        }
    }
}

// ── Actor machine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMachine {
    #[serde(default)]
    pub input_ports: Vec<PortDecl>,
    #[serde(default)]
    pub output_ports: Vec<PortDecl>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub states: Vec<State>,
    #[serde(default)]
    pub initial_state: StateId,
    /// Precise scope liveness computed by the frontend, if available.
    #[serde(default)]
    pub liveness: Option<Vec<LivenessEntry>>,
    #[serde(default)]
    pub sum_types: Vec<SumType>,
}

impl ActorMachine {
    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(id.index())
    }

    pub fn condition(&self, id: ConditionId) -> Option<&Condition> {
        self.conditions.get(id.index())
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.get(id.index())
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index())
    }

    pub fn state_ids(&self) -> impl Iterator<Item = StateId> {
        (0..self.states.len() as u32).map(StateId)
    }

    /// Position and declaration of an input port.
    pub fn input_port(&self, name: &str) -> Option<(usize, &PortDecl)> {
        self.input_ports
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<(usize, &PortDecl)> {
        self.output_ports
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    pub fn sum_type(&self, name: &str) -> Option<&SumType> {
        self.sum_types.iter().find(|t| t.name == name)
    }

    /// States targeted by some `Wait`, in ascending id order. These are the
    /// only legal resumption points.
    pub fn wait_targets(&self) -> BTreeSet<StateId> {
        self.states
            .iter()
            .filter_map(|s| match s.instruction {
                Instruction::Wait { target } => Some(target),
                _ => None,
            })
            .collect()
    }

    /// Structural validation. `instance` names the unit in diagnostics.
    pub fn validate(&self, instance: &str) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let inst = instance.to_string();

        if self.states.is_empty() {
            diags.push(Diagnostic::error(
                codes::E0101,
                NodeRef::Instance(inst.clone()),
                "actor machine has no states",
            ));
            return diags;
        }
        // Ports are looked up by name alone, so inputs and outputs share one
        // namespace.
        let mut names = BTreeSet::new();
        for port in self.input_ports.iter().chain(&self.output_ports) {
            if !names.insert(port.name.as_str()) {
                diags.push(Diagnostic::error(
                    codes::E0102,
                    NodeRef::Port(Some(inst.clone()), port.name.clone()),
                    format!("port '{}' is declared more than once", port.name),
                ));
            }
        }

        if self.state(self.initial_state).is_none() {
            diags.push(Diagnostic::error(
                codes::E0100,
                NodeRef::Instance(inst.clone()),
                format!("initial state {} does not exist", self.initial_state),
            ));
        }

        for (sid, state) in self.state_ids().zip(&self.states) {
            let node = NodeRef::State(inst.clone(), sid);
            for target in state.instruction.targets() {
                if self.state(target).is_none() {
                    diags.push(Diagnostic::error(
                        codes::E0100,
                        node.clone(),
                        format!("jump to undefined state {}", target),
                    ));
                }
            }
            match &state.instruction {
                Instruction::Test { condition, .. } if self.condition(*condition).is_none() => {
                    diags.push(Diagnostic::error(
                        codes::E0100,
                        node,
                        format!("test of undefined condition {}", condition.0),
                    ));
                }
                Instruction::Exec { transition, .. } if self.transition(*transition).is_none() => {
                    diags.push(Diagnostic::error(
                        codes::E0100,
                        node,
                        format!("exec of undefined transition {}", transition.0),
                    ));
                }
                _ => {}
            }
        }

        for (i, cond) in self.conditions.iter().enumerate() {
            let node = NodeRef::Condition(inst.clone(), ConditionId(i as u32));
            match cond {
                Condition::PortAvailability { port, is_input, .. } => {
                    let declared = if *is_input {
                        self.input_port(port).is_some()
                    } else {
                        self.output_port(port).is_some()
                    };
                    if !declared {
                        diags.push(undeclared_port(node, port, *is_input));
                    }
                }
                Condition::Predicate { expr, scopes } => {
                    let mut reads = Vec::new();
                    expr.collect_ports(&mut reads);
                    for port in reads {
                        if self.input_port(port).is_none() {
                            diags.push(undeclared_port(node.clone(), port, true));
                        }
                    }
                    self.check_scopes(scopes, &node, &mut diags);
                }
            }
        }

        for (i, tr) in self.transitions.iter().enumerate() {
            let node = NodeRef::Transition(inst.clone(), TransitionId(i as u32));
            for port in tr.input_rates.keys() {
                if self.input_port(port).is_none() {
                    diags.push(undeclared_port(node.clone(), port, true));
                }
            }
            for port in tr.output_rates.keys() {
                if self.output_port(port).is_none() {
                    diags.push(undeclared_port(node.clone(), port, false));
                }
            }
            let (mut reads, mut writes) = (Vec::new(), Vec::new());
            for s in &tr.body {
                s.collect_ports(&mut reads, &mut writes);
            }
            for port in reads {
                if self.input_port(port).is_none() {
                    diags.push(undeclared_port(node.clone(), port, true));
                }
            }
            for port in writes {
                if self.output_port(port).is_none() {
                    diags.push(undeclared_port(node.clone(), port, false));
                }
            }
            self.check_scopes(&tr.scopes, &node, &mut diags);
        }

        for (i, scope) in self.scopes.iter().enumerate() {
            let node = NodeRef::Scope(inst.clone(), ScopeId(i as u32));
            self.check_scopes(&scope.depends_on, &node, &mut diags);
        }

        if let Some(entries) = &self.liveness {
            for entry in entries {
                let node = NodeRef::State(inst.clone(), entry.state);
                if self.state(entry.state).is_none() {
                    diags.push(Diagnostic::error(
                        codes::E0100,
                        node.clone(),
                        "liveness entry for undefined state",
                    ));
                }
                self.check_scopes(&entry.init, &node, &mut diags);
            }
        }

        diags
    }

    fn check_scopes(&self, scopes: &[ScopeId], node: &NodeRef, diags: &mut Vec<Diagnostic>) {
        for s in scopes {
            if self.scope(*s).is_none() {
                diags.push(Diagnostic::error(
                    codes::E0100,
                    node.clone(),
                    format!("reference to undefined scope {}", s.0),
                ));
            }
        }
    }
}

fn undeclared_port(node: NodeRef, port: &str, is_input: bool) -> Diagnostic {
    let dir = if is_input { "input" } else { "output" };
    Diagnostic::error(
        codes::E0204,
        node,
        format!("{} port '{}' is not declared by the actor", dir, port),
    )
}
