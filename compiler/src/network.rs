// network.rs — Instances, connections and IR loading
//
// A network is the unit the driver compiles: a set of named actor-machine
// instances wired together by connections, plus the network's own boundary
// ports. Connections are kept in input order; that order decides channel and
// reader numbering downstream.
//
// Preconditions: none.
// Postconditions: `parse_network` returns a fully decoded `Network` or a
//                 `LoadError` naming the file.
// Failure modes: unreadable file, malformed JSON, unknown instruction kind;
//                `validate` reports E0102 for duplicate instance or boundary
//                port names and forwards each machine's own checks.
// Side effects: `load_network` reads one file.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::am::{ActorMachine, PortDecl};
use crate::diag::{codes, Diagnostic, NodeRef};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed network IR in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One end of a connection. `instance: None` names a network boundary port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortEnd {
    #[serde(default)]
    pub instance: Option<String>,
    pub port: String,
}

impl PortEnd {
    pub fn new(instance: &str, port: &str) -> Self {
        PortEnd {
            instance: Some(instance.to_string()),
            port: port.to_string(),
        }
    }

    pub fn boundary(port: &str) -> Self {
        PortEnd {
            instance: None,
            port: port.to_string(),
        }
    }
}

impl fmt::Display for PortEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(i) => write!(f, "{}.{}", i, self.port),
            None => write!(f, "{}", self.port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: PortEnd,
    pub target: PortEnd,
    /// Declared depth in tokens. Absent means the configured default.
    #[serde(default)]
    pub buffer_capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub machine: ActorMachine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default = "default_network_name")]
    pub name: String,
    #[serde(default)]
    pub input_ports: Vec<PortDecl>,
    #[serde(default)]
    pub output_ports: Vec<PortDecl>,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

fn default_network_name() -> String {
    "top".to_string()
}

impl Network {
    /// Structural checks over the whole network: unique instance names,
    /// unique boundary port names, then every instance's machine.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diags = Vec::new();

        let mut seen = BTreeSet::new();
        for inst in &self.instances {
            if !seen.insert(inst.name.as_str()) {
                diags.push(Diagnostic::error(
                    codes::E0102,
                    NodeRef::Instance(inst.name.clone()),
                    format!("instance '{}' is declared more than once", inst.name),
                ));
            }
        }

        let mut ports = BTreeSet::new();
        for port in self.input_ports.iter().chain(&self.output_ports) {
            if !ports.insert(port.name.as_str()) {
                diags.push(Diagnostic::error(
                    codes::E0102,
                    NodeRef::Port(None, port.name.clone()),
                    format!("network port '{}' is declared more than once", port.name),
                ));
            }
        }

        for inst in &self.instances {
            diags.extend(inst.machine.validate(&inst.name));
        }
        diags
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// Token type carried by a source pin, if the pin exists.
    pub fn source_type(&self, end: &PortEnd) -> Option<&str> {
        match &end.instance {
            Some(inst) => self
                .instance(inst)?
                .machine
                .output_port(&end.port)
                .map(|(_, p)| p.token_type.as_str()),
            None => self
                .input_ports
                .iter()
                .find(|p| p.name == end.port)
                .map(|p| p.token_type.as_str()),
        }
    }

    /// Token type accepted by a sink pin, if the pin exists.
    pub fn target_type(&self, end: &PortEnd) -> Option<&str> {
        match &end.instance {
            Some(inst) => self
                .instance(inst)?
                .machine
                .input_port(&end.port)
                .map(|(_, p)| p.token_type.as_str()),
            None => self
                .output_ports
                .iter()
                .find(|p| p.name == end.port)
                .map(|p| p.token_type.as_str()),
        }
    }
}

/// Decode network IR text. `path` is only used in error messages.
pub fn parse_network(text: &str, path: &Path) -> Result<Network, LoadError> {
    serde_json::from_str(text).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and decode the network IR at `path`, returning the raw text alongside
/// it for provenance hashing.
pub fn load_network(path: &Path) -> Result<(String, Network), LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let network = parse_network(&text, path)?;
    Ok((text, network))
}
