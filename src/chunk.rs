use std::collections::BTreeMap;
use std::time::Instant;

use bytes::Bytes;

/// Sentinel meaning "no limit" for `max_lifetime_ms` / `max_retransmissions`.
pub const UNLIMITED: u32 = u32::MAX;

/// A single DATA-chunk-sized unit of an application message.
///
/// `tsn` is left unassigned (`None`) until the send loop dequeues it from
/// `send_queue`, matching the data model's "assigned at send time, not
/// enqueue time" rule.
#[derive(Debug, Clone)]
pub struct DataChunk {
    pub tsn: Option<u32>,
    pub stream_id: u16,
    pub stream_seq: u16,
    pub unordered: bool,
    pub beginning: bool,
    pub ending: bool,
    pub payload_protocol_id: u32,
    pub user_data: Bytes,

    pub created_at: Instant,
    pub last_sent_at: Option<Instant>,
    pub send_count: u32,

    pub max_lifetime_ms: u32,
    pub max_retransmissions: u32,
}

impl DataChunk {
    /// `max_lifetime_ms`/`max_retransmissions` test from 4.G, evaluated
    /// against a caller-supplied `now` so the send loop samples the clock
    /// once per tick rather than once per chunk.
    pub fn is_abandoned_now(&self, now: Instant) -> bool {
        if self.max_lifetime_ms != UNLIMITED
            && now.duration_since(self.created_at).as_millis() as u64 > self.max_lifetime_ms as u64
        {
            return true;
        }
        if self.max_retransmissions != UNLIMITED && self.send_count > self.max_retransmissions {
            return true;
        }
        false
    }

    pub fn key(&self) -> (u16, u16) {
        (self.stream_id, self.stream_seq)
    }
}

/// A FORWARD-TSN announcement: the new cumulative TSN, plus the highest
/// abandoned stream-sequence-number per ordered stream so the peer's
/// reassembler can resynchronise (RFC 3758 §3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTsn {
    pub new_cumulative_tsn: u32,
    pub streams: BTreeMap<u16, u16>,
}

/// Approximates the on-wire size of a FORWARD-TSN chunk: a fixed header plus
/// 4 bytes per stream/seq pair. Wire framing is out of scope for this crate,
/// but the MTU-fit check in 4.B needs a size estimate to decide whether to
/// lower `advanced_peer_ack_point` instead of emitting an oversized chunk.
pub fn forward_tsn_wire_len(streams_len: usize) -> usize {
    const FORWARD_TSN_HEADER_LEN: usize = 4 /* chunk header */ + 4 /* new cumulative tsn */;
    const STREAM_ENTRY_LEN: usize = 4;
    FORWARD_TSN_HEADER_LEN + streams_len * STREAM_ENTRY_LEN
}
