// condition.rs — Firing-condition dispatch
//
// Maps an actor-machine condition onto what a target must test: a scalar
// predicate (handed to the expression translator) or a token/space query
// against the channel protocol.

use std::fmt;

use crate::am::{Condition, Expr};
use crate::expr::{translate, ExprTranslator};

/// Why a failed port test blocked the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not enough input tokens.
    Starved,
    /// Not enough output room.
    Full,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Starved => write!(f, "starved"),
            BlockReason::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondTest {
    Predicate(Expr),
    /// At least `n` tokens readable on an input port.
    Tokens { port: String, n: u32 },
    /// Room for at least `n` tokens on an output port, across every reader.
    Space { port: String, n: u32 },
}

impl CondTest {
    pub fn lower(cond: &Condition) -> Self {
        match cond {
            Condition::Predicate { expr, .. } => CondTest::Predicate(expr.clone()),
            Condition::PortAvailability {
                port,
                n,
                is_input: true,
            } => CondTest::Tokens {
                port: port.clone(),
                n: *n,
            },
            Condition::PortAvailability {
                port,
                n,
                is_input: false,
            } => CondTest::Space {
                port: port.clone(),
                n: *n,
            },
        }
    }

    /// Only port tests report a blocking reason; a false predicate is a plain
    /// branch.
    pub fn block_reason(&self) -> Option<BlockReason> {
        match self {
            CondTest::Predicate(_) => None,
            CondTest::Tokens { .. } => Some(BlockReason::Starved),
            CondTest::Space { .. } => Some(BlockReason::Full),
        }
    }
}

/// Prints expressions in source-like form for listings and graphs.
struct Listing;

impl ExprTranslator for Listing {
    fn var(&self, name: &str) -> String {
        name.to_string()
    }

    fn peek(&self, port: &str, offset: u32) -> String {
        format!("{}[{}]", port, offset)
    }

    fn write(&self, port: &str, offset: u32, value: &str) -> String {
        format!("{}[{}] := {}", port, offset, value)
    }
}

impl fmt::Display for CondTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CondTest::Predicate(e) => {
                let text = translate(&Listing, e);
                if text.starts_with('(') {
                    write!(f, "{}", text)
                } else {
                    write!(f, "({})", text)
                }
            }
            CondTest::Tokens { port, n } => write!(f, "tokens({}, {})", port, n),
            CondTest::Space { port, n } => write!(f, "space({}, {})", port, n),
        }
    }
}
