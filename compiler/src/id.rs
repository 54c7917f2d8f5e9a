// id.rs — Dense typed identifiers for actor-machine and channel entities
//
// States, conditions, transitions and scopes are identified by their position
// in the actor machine's lists; that position is the only stable identity the
// IR carries, and downstream labels/case arms are keyed on it. Channels and
// readers are allocated in first-seen connection order so the generated
// cursor arrays are reproducible compile-to-compile.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

dense_id!(
    /// Position of a state in `ActorMachine::states`.
    StateId,
    "S"
);
dense_id!(
    /// Position of a condition in `ActorMachine::conditions`.
    ConditionId,
    "c"
);
dense_id!(
    /// Position of a transition in `ActorMachine::transitions`.
    TransitionId,
    "t"
);
dense_id!(
    /// Position of a scope in `ActorMachine::scopes`.
    ScopeId,
    "scope"
);
dense_id!(
    /// One physical ring buffer, one per distinct source pin.
    ChannelId,
    "fifo_"
);
dense_id!(
    /// Index into a channel's reader-cursor array.
    ReaderId,
    "r"
);

/// Allocator for channel and reader ids. Produces monotonically increasing
/// ids in allocation order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_channel: u32,
    next_reader: Vec<u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_channel(&mut self) -> ChannelId {
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;
        self.next_reader.push(0);
        id
    }

    /// Next reader id on `channel`. Reader ids are dense per channel.
    pub fn alloc_reader(&mut self, channel: ChannelId) -> ReaderId {
        let slot = &mut self.next_reader[channel.index()];
        let id = ReaderId(*slot);
        *slot += 1;
        id
    }

    pub fn channel_count(&self) -> usize {
        self.next_channel as usize
    }
}
