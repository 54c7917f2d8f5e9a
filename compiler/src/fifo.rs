// fifo.rs — Executable model of the shared channel protocol
//
// One writer and any number of readers share a single ring buffer. Each side
// opens a transaction (`begin_*`) that snapshots the shared cursors, works on
// a local copy, and publishes with `end_*`. Nothing a transaction does is
// visible to other parties before its `end_*`.
//
// Cursors run modulo 2·capacity and slots are addressed modulo capacity, so
// `write - read` (mod 2·capacity) is the exact backlog in 0..=capacity and a
// full channel is distinguishable from an empty one for any capacity.
//
// The generated C and HLS code implement the same protocol; this model drives
// the simulator and the property tests.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("channel capacity {0} is out of range")]
    InvalidCapacity(u32),
    #[error("reader {0} does not exist")]
    UnknownReader(usize),
    #[error("reader {reader} consumed {requested} tokens but only {available} were available")]
    Overconsume {
        reader: usize,
        requested: u32,
        available: u32,
    },
    #[error("writer produced {requested} tokens but only {room} slots were free")]
    Overproduce { requested: u32, room: u32 },
    #[error("access at offset {offset} outside the {limit} tokens of this transaction")]
    OutOfWindow { offset: u32, limit: u32 },
}

/// Open read transaction of one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCursor {
    reader: usize,
    index: u32,
    /// Writer cursor as seen at `begin_read`.
    limit: u32,
    wrap: u32,
}

impl ReadCursor {
    pub fn reader(&self) -> usize {
        self.reader
    }

    /// Tokens still readable in this transaction.
    pub fn available(&self) -> u32 {
        distance(self.index, self.limit, self.wrap)
    }

    /// Consume `n` tokens locally. Takes effect for others at `end_read`.
    pub fn advance(&mut self, n: u32) -> Result<(), ProtocolError> {
        let available = self.available();
        if n > available {
            return Err(ProtocolError::Overconsume {
                reader: self.reader,
                requested: n,
                available,
            });
        }
        self.index = bump(self.index, n, self.wrap);
        Ok(())
    }
}

/// Open write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCursor {
    index: u32,
    room: u32,
    wrap: u32,
}

impl WriteCursor {
    /// Free slots still writable in this transaction, bounded by the slowest
    /// reader as of `begin_write`.
    pub fn room(&self) -> u32 {
        self.room
    }

    pub fn advance(&mut self, n: u32) -> Result<(), ProtocolError> {
        if n > self.room {
            return Err(ProtocolError::Overproduce {
                requested: n,
                room: self.room,
            });
        }
        self.index = bump(self.index, n, self.wrap);
        self.room -= n;
        Ok(())
    }
}

/// Largest supported capacity. Cursors run to `2 * capacity` and the
/// generated C adds `2 * SIZE` to a cursor before reducing it, so
/// `4 * capacity` must still fit in an `unsigned int`.
pub const MAX_CAPACITY: u32 = u32::MAX / 4;

#[derive(Debug, Clone)]
pub struct Fifo<T> {
    buffer: Vec<T>,
    capacity: u32,
    write_index: u32,
    read_index: Vec<u32>,
}

impl<T: Clone + Default> Fifo<T> {
    pub fn new(capacity: u32, readers: usize) -> Result<Self, ProtocolError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(ProtocolError::InvalidCapacity(capacity));
        }
        Ok(Fifo {
            buffer: vec![T::default(); capacity as usize],
            capacity,
            write_index: 0,
            read_index: vec![0; readers],
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn readers(&self) -> usize {
        self.read_index.len()
    }

    fn wrap(&self) -> u32 {
        self.capacity * 2
    }

    fn slot(&self, index: u32, offset: u32) -> usize {
        ((index as u64 + offset as u64) % self.capacity as u64) as usize
    }

    /// Committed backlog of `reader`.
    pub fn count(&self, reader: usize) -> Result<u32, ProtocolError> {
        let read = self
            .read_index
            .get(reader)
            .copied()
            .ok_or(ProtocolError::UnknownReader(reader))?;
        Ok(distance(read, self.write_index, self.wrap()))
    }

    /// Committed free space: the minimum over all readers. A channel without
    /// readers has the whole buffer free.
    pub fn room(&self) -> u32 {
        let wrap = self.wrap();
        self.read_index
            .iter()
            .map(|r| self.capacity - distance(*r, self.write_index, wrap))
            .min()
            .unwrap_or(self.capacity)
    }

    pub fn begin_read(&self, reader: usize) -> Result<ReadCursor, ProtocolError> {
        let index = self
            .read_index
            .get(reader)
            .copied()
            .ok_or(ProtocolError::UnknownReader(reader))?;
        Ok(ReadCursor {
            reader,
            index,
            limit: self.write_index,
            wrap: self.wrap(),
        })
    }

    /// Token at `offset` past the cursor's local position.
    pub fn peek(&self, cursor: &ReadCursor, offset: u32) -> Result<&T, ProtocolError> {
        let limit = cursor.available();
        if offset >= limit {
            return Err(ProtocolError::OutOfWindow { offset, limit });
        }
        Ok(&self.buffer[self.slot(cursor.index, offset)])
    }

    /// Publish the cursor's position. Calling it again without further
    /// consumption is a no-op.
    pub fn end_read(&mut self, cursor: &ReadCursor) -> Result<(), ProtocolError> {
        let slot = self
            .read_index
            .get_mut(cursor.reader)
            .ok_or(ProtocolError::UnknownReader(cursor.reader))?;
        *slot = cursor.index;
        Ok(())
    }

    pub fn begin_write(&self) -> WriteCursor {
        WriteCursor {
            index: self.write_index,
            room: self.room(),
            wrap: self.wrap(),
        }
    }

    pub fn write(
        &mut self,
        cursor: &WriteCursor,
        offset: u32,
        value: T,
    ) -> Result<(), ProtocolError> {
        if offset >= cursor.room {
            return Err(ProtocolError::OutOfWindow {
                offset,
                limit: cursor.room,
            });
        }
        let slot = self.slot(cursor.index, offset);
        self.buffer[slot] = value;
        Ok(())
    }

    pub fn end_write(&mut self, cursor: &WriteCursor) {
        self.write_index = cursor.index;
    }
}

/// `to - from` in a cursor space of size `wrap`.
fn distance(from: u32, to: u32, wrap: u32) -> u32 {
    ((to as u64 + wrap as u64 - from as u64) % wrap as u64) as u32
}

fn bump(index: u32, n: u32, wrap: u32) -> u32 {
    ((index as u64 + n as u64) % wrap as u64) as u32
}
