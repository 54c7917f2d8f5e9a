// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all backend passes.
// Every diagnostic names the IR node it is about (`NodeRef`) so the driver can
// report the offending state, port or connection.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::{ConditionId, ScopeId, StateId, TransitionId};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0200`, `W0201`).
///
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Malformed IR
    pub const E0100: DiagCode = DiagCode("E0100");
    pub const E0101: DiagCode = DiagCode("E0101");
    pub const E0102: DiagCode = DiagCode("E0102");

    // Channel allocation
    pub const E0200: DiagCode = DiagCode("E0200");
    pub const E0201: DiagCode = DiagCode("E0201");
    pub const E0202: DiagCode = DiagCode("E0202");
    pub const E0203: DiagCode = DiagCode("E0203");
    pub const E0204: DiagCode = DiagCode("E0204");
    pub const W0200: DiagCode = DiagCode("W0200");
    pub const W0201: DiagCode = DiagCode("W0201");

    // Unsupported features
    pub const E0300: DiagCode = DiagCode("E0300");

    // Controller verification
    pub const E0400: DiagCode = DiagCode("E0400");
    pub const W0400: DiagCode = DiagCode("W0400");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Node reference ───────────────────────────────────────────────────────

/// Identity of the IR node a diagnostic is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Network,
    Instance(String),
    State(String, StateId),
    Condition(String, ConditionId),
    Transition(String, TransitionId),
    Scope(String, ScopeId),
    /// A port end; `None` instance means a network-level port.
    Port(Option<String>, String),
    /// Position in the network's connection list.
    Connection(usize),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Network => write!(f, "network"),
            NodeRef::Instance(i) => write!(f, "instance '{}'", i),
            NodeRef::State(i, s) => write!(f, "{}.{}", i, s),
            NodeRef::Condition(i, c) => write!(f, "{}.condition {}", i, c.0),
            NodeRef::Transition(i, t) => write!(f, "{}.transition {}", i, t.0),
            NodeRef::Scope(i, s) => write!(f, "{}.scope {}", i, s.0),
            NodeRef::Port(Some(i), p) => write!(f, "{}.{}", i, p),
            NodeRef::Port(None, p) => write!(f, "network port {}", p),
            NodeRef::Connection(n) => write!(f, "connection #{}", n),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub node: NodeRef,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, node: NodeRef, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            node,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(code: DiagCode, node: NodeRef, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, node, message).with_code(code)
    }

    pub fn warning(code: DiagCode, node: NodeRef, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, node, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.node, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.node, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, NodeRef::Network, "something failed");
        assert_eq!(format!("{d}"), "error: network: something failed");
    }

    #[test]
    fn display_with_code_and_node() {
        let d = Diagnostic::warning(
            codes::W0201,
            NodeRef::Port(Some("src".into()), "out".into()),
            "output port has no readers",
        );
        assert_eq!(
            format!("{d}"),
            "warning[W0201]: src.out: output port has no readers"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(
            codes::E0200,
            NodeRef::Port(Some("a".into()), "x".into()),
            "capacity mismatch",
        )
        .with_hint("declare one capacity for every connection leaving a.x");

        assert_eq!(d.code, Some(codes::E0200));
        assert!(d.is_error());
        assert!(format!("{d}").contains("\n  hint: declare one capacity"));
    }

    #[test]
    fn state_node_display() {
        let node = NodeRef::State("filter".into(), StateId(4));
        assert_eq!(node.to_string(), "filter.S4");
    }
}
