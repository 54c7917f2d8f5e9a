// channel.rs — Channel buffer allocation
//
// Assigns one physical ring buffer per distinct source pin and numbers the
// readers of each buffer in first-seen connection order. The reader number is
// the index into the generated program's reader-cursor array, so the walk over
// `Network::connections` below must stay a single ordered pass.
//
// Preconditions: instances passed `ActorMachine::validate`.
// Postconditions: every connected input pin maps to exactly one
//                 (channel, reader); every channel has a resolved capacity > 0.
// Failure modes: E0200 capacity mismatch (strict policy), E0201 unknown pin,
//                E0202 floating input, E0203 multiple drivers,
//                E0300 dynamically-sized buffer or a capacity beyond the
//                cursor range.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, instrument};

use crate::diag::{codes, Diagnostic, NodeRef};
use crate::fifo::MAX_CAPACITY;
use crate::id::{ChannelId, IdAllocator, ReaderId};
use crate::network::{Network, PortEnd};
use crate::settings::{CapacityPolicy, Settings};

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reader {
    pub id: ReaderId,
    pub target: PortEnd,
    /// Position of the originating connection in the network.
    pub connection: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub source: PortEnd,
    pub capacity: u32,
    pub token_type: String,
    /// Ordered by reader id.
    pub readers: Vec<Reader>,
}

/// How one port of an instance is backed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortBinding {
    Input {
        channel: ChannelId,
        reader: ReaderId,
        capacity: u32,
    },
    Output {
        channel: ChannelId,
        readers: usize,
        capacity: u32,
    },
    /// Output pin nobody reads. Writes are dropped, room is unbounded.
    Unconnected,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    pub channels: Vec<Channel>,
    by_source: BTreeMap<PortEnd, ChannelId>,
    by_target: BTreeMap<PortEnd, (ChannelId, ReaderId)>,
}

impl ChannelMap {
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.index())
    }

    pub fn for_source(&self, end: &PortEnd) -> Option<&Channel> {
        self.by_source.get(end).and_then(|id| self.channel(*id))
    }

    pub fn for_target(&self, end: &PortEnd) -> Option<(ChannelId, ReaderId)> {
        self.by_target.get(end).copied()
    }

    /// Binding of `port` on `instance`. Input pins that were never connected
    /// resolve to `Unconnected` as well; allocation already reported them.
    pub fn binding(&self, instance: &str, port: &str, is_input: bool) -> PortBinding {
        let end = PortEnd::new(instance, port);
        if is_input {
            match self.for_target(&end) {
                Some((channel, reader)) => PortBinding::Input {
                    channel,
                    reader,
                    capacity: self.channel(channel).map_or(0, |c| c.capacity),
                },
                None => PortBinding::Unconnected,
            }
        } else {
            match self.for_source(&end) {
                Some(ch) => PortBinding::Output {
                    channel: ch.id,
                    readers: ch.readers.len(),
                    capacity: ch.capacity,
                },
                None => PortBinding::Unconnected,
            }
        }
    }
}

impl fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in &self.channels {
            writeln!(
                f,
                "{} {} capacity={} type={}",
                ch.id, ch.source, ch.capacity, ch.token_type
            )?;
            for r in &ch.readers {
                writeln!(f, "  {} -> {} (connection #{})", r.id, r.target, r.connection)?;
            }
        }
        Ok(())
    }
}

/// Result of channel allocation.
#[derive(Debug, Clone)]
pub struct AllocationResult {
    pub channels: ChannelMap,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Allocation ──────────────────────────────────────────────────────────────

#[instrument(skip_all, fields(network = %network.name, connections = network.connections.len()))]
pub fn allocate(network: &Network, settings: &Settings) -> AllocationResult {
    let mut diags = Vec::new();
    let mut ids = IdAllocator::new();
    let mut map = ChannelMap::default();
    // Declared capacity per connection, grouped by channel.
    let mut declared: Vec<Vec<(usize, Option<u32>)>> = Vec::new();

    for (idx, conn) in network.connections.iter().enumerate() {
        let Some(token_type) = network.source_type(&conn.source) else {
            diags.push(unknown_pin(idx, &conn.source, "source"));
            continue;
        };
        if network.target_type(&conn.target).is_none() {
            diags.push(unknown_pin(idx, &conn.target, "target"));
            continue;
        }
        if let Some((ch, _)) = map.for_target(&conn.target) {
            diags.push(
                Diagnostic::error(
                    codes::E0203,
                    port_node(&conn.target),
                    format!("input port is driven by more than one connection (already fed by {})", ch),
                )
                .with_hint(format!("connection #{} is the second driver", idx)),
            );
            continue;
        }

        let channel = match map.by_source.get(&conn.source) {
            Some(id) => *id,
            None => {
                let id = ids.alloc_channel();
                map.by_source.insert(conn.source.clone(), id);
                map.channels.push(Channel {
                    id,
                    source: conn.source.clone(),
                    capacity: 0,
                    token_type: token_type.to_string(),
                    readers: Vec::new(),
                });
                declared.push(Vec::new());
                id
            }
        };
        let reader = ids.alloc_reader(channel);
        map.by_target.insert(conn.target.clone(), (channel, reader));
        map.channels[channel.index()].readers.push(Reader {
            id: reader,
            target: conn.target.clone(),
            connection: idx,
        });
        declared[channel.index()].push((idx, conn.buffer_capacity));
    }

    for (ch, decls) in map.channels.iter_mut().zip(&declared) {
        ch.capacity = resolve_capacity(ch, decls, settings, &mut diags);
        debug!(channel = %ch.id, source = %ch.source, capacity = ch.capacity, readers = ch.readers.len(), "allocated channel");
    }

    check_pins(network, &map, &mut diags);

    AllocationResult {
        channels: map,
        diagnostics: diags,
    }
}

fn resolve_capacity(
    ch: &Channel,
    decls: &[(usize, Option<u32>)],
    settings: &Settings,
    diags: &mut Vec<Diagnostic>,
) -> u32 {
    let explicit: Vec<u32> = decls.iter().filter_map(|(_, c)| *c).collect();
    let resolved = match explicit.split_first() {
        None => settings.default_buffer_depth,
        Some((first, rest)) if rest.iter().all(|c| c == first) => *first,
        Some((first, _)) => {
            let max = explicit.iter().copied().max().unwrap_or(*first);
            let listed = explicit
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            match settings.capacity_policy {
                CapacityPolicy::Strict => {
                    diags.push(
                        Diagnostic::error(
                            codes::E0200,
                            port_node(&ch.source),
                            format!("fan-out connections declare different capacities ({})", listed),
                        )
                        .with_hint("declare one capacity for every connection leaving this pin, or pass --capacity-policy max"),
                    );
                    *first
                }
                CapacityPolicy::Max => {
                    diags.push(Diagnostic::warning(
                        codes::W0200,
                        port_node(&ch.source),
                        format!("fan-out connections declare different capacities ({}); using {}", listed, max),
                    ));
                    max
                }
            }
        }
    };
    if resolved == 0 {
        diags.push(Diagnostic::error(
            codes::E0300,
            port_node(&ch.source),
            "not implemented: dynamically-sized buffer (capacity 0)",
        ));
    } else if resolved > MAX_CAPACITY {
        diags.push(
            Diagnostic::error(
                codes::E0300,
                port_node(&ch.source),
                format!("not implemented: buffer capacity {} exceeds {}", resolved, MAX_CAPACITY),
            )
            .with_hint("channel cursors are 32-bit and run modulo twice the capacity"),
        );
    }
    resolved
}

fn check_pins(network: &Network, map: &ChannelMap, diags: &mut Vec<Diagnostic>) {
    for inst in &network.instances {
        for port in &inst.machine.input_ports {
            let end = PortEnd::new(&inst.name, &port.name);
            if map.for_target(&end).is_none() {
                diags.push(Diagnostic::error(
                    codes::E0202,
                    port_node(&end),
                    "input port is not fed by any connection",
                ));
            }
        }
        for port in &inst.machine.output_ports {
            let end = PortEnd::new(&inst.name, &port.name);
            if map.for_source(&end).is_none() {
                diags.push(
                    Diagnostic::warning(codes::W0201, port_node(&end), "output port has no readers")
                        .with_hint("tokens written here are dropped"),
                );
            }
        }
    }
    for port in &network.output_ports {
        let end = PortEnd::boundary(&port.name);
        if map.for_target(&end).is_none() {
            diags.push(Diagnostic::error(
                codes::E0202,
                port_node(&end),
                "network output is not fed by any connection",
            ));
        }
    }
}

fn port_node(end: &PortEnd) -> NodeRef {
    NodeRef::Port(end.instance.clone(), end.port.clone())
}

fn unknown_pin(idx: usize, end: &PortEnd, role: &str) -> Diagnostic {
    Diagnostic::error(
        codes::E0201,
        NodeRef::Connection(idx),
        format!("{} '{}' is not a declared port of a known instance", role, end),
    )
}

// ── Fan-out plan ────────────────────────────────────────────────────────────

/// A broadcast actor the hardware target inserts in front of a multi-reader
/// channel. Hardware FIFOs are point-to-point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fanout {
    pub name: String,
    pub channel: ChannelId,
    pub token_type: String,
    /// Downstream pins in reader-id order.
    pub outputs: Vec<PortEnd>,
}

pub fn fanout_plan(map: &ChannelMap) -> Vec<Fanout> {
    map.channels
        .iter()
        .filter(|ch| ch.readers.len() > 1)
        .map(|ch| Fanout {
            name: match &ch.source.instance {
                Some(inst) => format!("fanout_{}_port_{}", inst, ch.source.port),
                None => format!("fanout_port_{}", ch.source.port),
            },
            channel: ch.id,
            token_type: ch.token_type.clone(),
            outputs: ch.readers.iter().map(|r| r.target.clone()).collect(),
        })
        .collect()
}
