// settings.rs — Compile settings shared by every pass
//
// Plain configuration struct with defaults; the CLI maps its flags 1:1 onto
// these fields.

use std::fmt;

/// Resolution rule for fan-out connections that declare different capacities
/// on the same source pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// All declared capacities on a pin must agree (E0200 otherwise).
    #[default]
    Strict,
    /// The pin takes the largest declared capacity (W0200).
    Max,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Target {
    #[default]
    C,
    Hls,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::C => write!(f, "c"),
            Target::Hls => write!(f, "hls"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Use the frontend's per-state liveness table when the machine has one;
    /// otherwise fall back to coarse dependency-based initialization.
    pub scope_liveness: bool,
    /// Capacity of connections that declare none.
    pub default_buffer_depth: u32,
    pub capacity_policy: CapacityPolicy,
    pub target: Target,
    /// C target only: log every token a transition consumes or produces to
    /// `traces/<instance>_<port>.txt`.
    pub enable_traces: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scope_liveness: true,
            default_buffer_depth: 4096,
            capacity_policy: CapacityPolicy::Strict,
            target: Target::C,
            enable_traces: false,
        }
    }
}
