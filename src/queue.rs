//! `send_queue` and the `unconfirmed` outstanding table (4.C, 4.D).
//!
//! Grounded on `sctp::queue::pending_queue` (FIFO-of-fragments,
//! atomic-enqueue-of-one-message) and `sctp::queue::payload_queue`
//! (chunk_map + running byte count), simplified to plain `VecDeque`/
//! `HashMap` since the coarse lock in `mutex.rs` already serializes every
//! access — the teacher's internal `tokio::sync::Mutex` split and atomics
//! exist to let producers push without the association-wide lock, which
//! this design deliberately does not attempt (SPEC_FULL.md §9).

use std::collections::{HashMap, VecDeque};

use crate::chunk::DataChunk;

#[derive(Debug, Default)]
pub struct SendQueue {
    chunks: VecDeque<DataChunk>,
    n_bytes: usize,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues every fragment of one application message. Called with the
    /// whole `Vec` already built so no other `send_data` call can interleave
    /// fragments between these pushes.
    pub fn push_message(&mut self, fragments: Vec<DataChunk>) {
        for c in fragments {
            self.n_bytes += c.user_data.len();
            self.chunks.push_back(c);
        }
    }

    pub fn front(&self) -> Option<&DataChunk> {
        self.chunks.front()
    }

    pub fn pop_front(&mut self) -> Option<DataChunk> {
        let c = self.chunks.pop_front();
        if let Some(c) = &c {
            self.n_bytes -= c.user_data.len();
        }
        c
    }

    /// Drops every chunk at the head of the queue belonging to
    /// `(stream_id, stream_seq)`, stopping at the first chunk that doesn't
    /// match (fragments of one message are always contiguous in the queue,
    /// per invariant 7).
    pub fn drop_message(&mut self, stream_id: u16, stream_seq: u16) {
        while let Some(front) = self.chunks.front() {
            if front.stream_id == stream_id && front.stream_seq == stream_seq {
                let c = self.chunks.pop_front().unwrap();
                self.n_bytes -= c.user_data.len();
            } else {
                break;
            }
        }
    }

    pub fn buffered_amount(&self) -> usize {
        self.n_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Debug, Default)]
pub struct Unconfirmed {
    chunks: HashMap<u32, DataChunk>,
    n_bytes: usize,
}

impl Unconfirmed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, c: DataChunk) {
        self.n_bytes += c.user_data.len();
        self.chunks.insert(c.tsn.expect("tsn assigned before insert"), c);
    }

    pub fn get(&self, tsn: u32) -> Option<&DataChunk> {
        self.chunks.get(&tsn)
    }

    pub fn get_mut(&mut self, tsn: u32) -> Option<&mut DataChunk> {
        self.chunks.get_mut(&tsn)
    }

    pub fn remove(&mut self, tsn: u32) -> Option<DataChunk> {
        let c = self.chunks.remove(&tsn);
        if let Some(c) = &c {
            self.n_bytes -= c.user_data.len();
        }
        c
    }

    pub fn contains(&self, tsn: u32) -> bool {
        self.chunks.contains_key(&tsn)
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.n_bytes
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &DataChunk> {
        self.chunks.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut DataChunk> {
        self.chunks.values_mut()
    }

    pub fn tsns(&self) -> impl Iterator<Item = &u32> {
        self.chunks.keys()
    }
}
