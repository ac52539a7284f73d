//! PR-SCTP engine (4.G): abandonment, advanced-peer-ack-point maintenance,
//! FORWARD-TSN emission.
//!
//! Grounded on `association_internal.rs::create_forward_tsn` (per-stream
//! highest-SSN map) and `check_partial_reliability_status` (abandonment
//! trigger site), adapted from the teacher's per-stream `ReliabilityType`
//! test to this spec's per-chunk `max_lifetime_ms`/`max_retransmissions`
//! test. Resolves SPEC_FULL.md §9's two open questions: abandoned fragments
//! are stored under their own TSN key (not the originating chunk's), and an
//! oversized FORWARD-TSN is avoided by lowering `advanced_peer_ack_point`
//! rather than emitted anyway.

use std::time::{Duration, Instant};

use log::warn;

use crate::chunk::{forward_tsn_wire_len, DataChunk, ForwardTsn};
use crate::error::{Error, Result};
use crate::queue::{SendQueue, Unconfirmed};
use crate::util::{sna32_is_newer, sna32lt};

/// Moves `tsn` from `unconfirmed` into `abandoned`, cascades to sibling
/// fragments of the same message, and drops any still-queued fragments of
/// that message from `send_queue` (4.G "Abandon a chunk").
///
/// Calling this while PR-SCTP is not negotiated is a programming error; both
/// this function and `advance_peer_ack_point` are `pub`, reachable directly
/// by a caller that bypasses the sender's own enablement gating, so the
/// check lives here rather than only at the internal call sites.
pub fn abandon_chunk(
    pr_sctp_enabled: bool,
    tsn: u32,
    unconfirmed: &mut Unconfirmed,
    missing: &mut std::collections::BTreeSet<u32>,
    abandoned: &mut std::collections::HashMap<u32, DataChunk>,
    send_queue: &mut SendQueue,
) -> Result<()> {
    if !pr_sctp_enabled {
        return Err(Error::PartialReliabilityNotEnabled);
    }

    let Some(chunk) = unconfirmed.remove(tsn) else {
        return Ok(());
    };
    missing.remove(&tsn);
    let key = chunk.key();
    let is_fragment = !(chunk.beginning && chunk.ending);
    abandoned.insert(tsn, chunk);

    if is_fragment {
        let sibling_tsns: Vec<u32> = unconfirmed
            .values()
            .filter(|c| c.key() == key)
            .filter_map(|c| c.tsn)
            .collect();
        for sibling_tsn in sibling_tsns {
            if let Some(sibling) = unconfirmed.remove(sibling_tsn) {
                missing.remove(&sibling_tsn);
                abandoned.insert(sibling_tsn, sibling);
            }
        }
        send_queue.drop_message(key.0, key.1);
    }

    Ok(())
}

/// 4.G "Advance the peer ack point": abandons newly-eligible unconfirmed
/// chunks, advances `advanced_peer_ack_point` over contiguous abandoned
/// TSNs, and returns a FORWARD-TSN to emit if one is due and not
/// duplicate-suppressed.
///
/// Like `abandon_chunk`, calling this while PR-SCTP is not negotiated is a
/// programming error and returns `Err(Error::PartialReliabilityNotEnabled)`
/// rather than mutating anything.
#[allow(clippy::too_many_arguments)]
pub fn advance_peer_ack_point(
    pr_sctp_enabled: bool,
    now: Instant,
    advanced_peer_ack_point: &mut u32,
    cumulative_ack_tsn_or_initial: u32,
    unconfirmed: &mut Unconfirmed,
    missing: &mut std::collections::BTreeSet<u32>,
    abandoned: &mut std::collections::HashMap<u32, DataChunk>,
    send_queue: &mut SendQueue,
    last_sent_forward_tsn: &mut Option<(u32, Instant)>,
    rto: u64,
    mtu: usize,
) -> Result<Option<ForwardTsn>> {
    if !pr_sctp_enabled {
        return Err(Error::PartialReliabilityNotEnabled);
    }

    let expired: Vec<u32> = unconfirmed
        .values()
        .filter(|c| c.is_abandoned_now(now))
        .filter_map(|c| c.tsn)
        .collect();
    for tsn in expired {
        abandon_chunk(pr_sctp_enabled, tsn, unconfirmed, missing, abandoned, send_queue)?;
    }

    while abandoned.contains_key(&advanced_peer_ack_point.wrapping_add(1)) {
        *advanced_peer_ack_point = advanced_peer_ack_point.wrapping_add(1);
    }

    if !sna32_is_newer(cumulative_ack_tsn_or_initial, *advanced_peer_ack_point) {
        return Ok(None);
    }

    if let Some((last_value, last_time)) = last_sent_forward_tsn {
        if *last_value == *advanced_peer_ack_point
            && now.duration_since(*last_time) < Duration::from_millis(rto)
        {
            return Ok(None);
        }
    }

    let mut forward_tsn = build_forward_tsn(*advanced_peer_ack_point, abandoned);

    if forward_tsn_wire_len(forward_tsn.streams.len()) > mtu {
        warn!(
            "forward-tsn for new_cumulative_tsn={} would exceed mtu={}; lowering advanced_peer_ack_point instead of emitting oversized",
            forward_tsn.new_cumulative_tsn, mtu
        );
        lower_to_fit(&mut forward_tsn, advanced_peer_ack_point, mtu);
    }

    let stale_tsns: Vec<u32> = unconfirmed
        .tsns()
        .copied()
        .filter(|tsn| !sna32lt(*advanced_peer_ack_point, *tsn))
        .collect();
    for tsn in stale_tsns {
        unconfirmed.remove(tsn);
        missing.remove(&tsn);
    }

    *last_sent_forward_tsn = Some((forward_tsn.new_cumulative_tsn, now));

    Ok(Some(forward_tsn))
}

/// Builds the FORWARD-TSN record: new cumulative TSN plus, for every
/// *ordered* abandoned chunk, the highest stream_seq abandoned per stream.
fn build_forward_tsn(
    new_cumulative_tsn: u32,
    abandoned: &std::collections::HashMap<u32, DataChunk>,
) -> ForwardTsn {
    let mut streams = std::collections::BTreeMap::new();
    for c in abandoned.values() {
        if c.unordered {
            continue;
        }
        streams
            .entry(c.stream_id)
            .and_modify(|seq: &mut u16| {
                if crate::util::sna16lt(*seq, c.stream_seq) {
                    *seq = c.stream_seq;
                }
            })
            .or_insert(c.stream_seq);
    }
    ForwardTsn {
        new_cumulative_tsn,
        streams,
    }
}

fn lower_to_fit(forward_tsn: &mut ForwardTsn, advanced_peer_ack_point: &mut u32, mtu: usize) {
    while forward_tsn_wire_len(forward_tsn.streams.len()) > mtu && !forward_tsn.streams.is_empty() {
        let drop_stream = *forward_tsn
            .streams
            .iter()
            .max_by_key(|(_, seq)| **seq)
            .map(|(id, _)| id)
            .unwrap();
        forward_tsn.streams.remove(&drop_stream);
    }
    // `new_cumulative_tsn == 0` is a valid post-wrap cumulative point (scenario
    // 6), not "unset" — always apply the lowered value.
    *advanced_peer_ack_point = forward_tsn.new_cumulative_tsn;
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use std::collections::{BTreeSet, HashMap};

    fn chunk(tsn: u32, stream_id: u16, stream_seq: u16, beginning: bool, ending: bool) -> DataChunk {
        DataChunk {
            tsn: Some(tsn),
            stream_id,
            stream_seq,
            unordered: false,
            beginning,
            ending,
            payload_protocol_id: 53,
            user_data: Bytes::from_static(b"x"),
            created_at: Instant::now(),
            last_sent_at: Some(Instant::now()),
            send_count: 1,
            max_lifetime_ms: 100,
            max_retransmissions: crate::chunk::UNLIMITED,
        }
    }

    #[test]
    fn abandon_cascades_to_sibling_fragments_under_own_key() {
        let mut unconfirmed = Unconfirmed::new();
        let mut missing = BTreeSet::new();
        let mut abandoned = HashMap::new();
        let mut send_queue = SendQueue::new();

        unconfirmed.insert(chunk(50, 0, 7, true, false));
        unconfirmed.insert(chunk(51, 0, 7, false, false));
        unconfirmed.insert(chunk(52, 0, 7, false, true));

        abandon_chunk(true, 50, &mut unconfirmed, &mut missing, &mut abandoned, &mut send_queue)
            .unwrap();

        assert!(unconfirmed.is_empty());
        assert_eq!(abandoned.len(), 3);
        assert!(abandoned.contains_key(&50));
        assert!(abandoned.contains_key(&51));
        assert!(abandoned.contains_key(&52));
        assert_eq!(abandoned.get(&51).unwrap().tsn, Some(51));
    }

    #[test]
    fn advance_peer_ack_point_skips_when_not_newer() {
        let mut unconfirmed = Unconfirmed::new();
        let mut missing = BTreeSet::new();
        let mut abandoned = HashMap::new();
        let mut send_queue = SendQueue::new();
        let mut advanced = 49_u32;
        let mut last_sent = None;

        let out = advance_peer_ack_point(
            true,
            Instant::now(),
            &mut advanced,
            49,
            &mut unconfirmed,
            &mut missing,
            &mut abandoned,
            &mut send_queue,
            &mut last_sent,
            3000,
            1300,
        )
        .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn advance_peer_ack_point_rejects_when_pr_sctp_disabled() {
        let mut unconfirmed = Unconfirmed::new();
        let mut missing = BTreeSet::new();
        let mut abandoned = HashMap::new();
        let mut send_queue = SendQueue::new();
        let mut advanced = 49_u32;
        let mut last_sent = None;

        let err = advance_peer_ack_point(
            false,
            Instant::now(),
            &mut advanced,
            50,
            &mut unconfirmed,
            &mut missing,
            &mut abandoned,
            &mut send_queue,
            &mut last_sent,
            3000,
            1300,
        )
        .unwrap_err();
        assert_eq!(err, crate::error::Error::PartialReliabilityNotEnabled);
    }

    #[test]
    fn advance_peer_ack_point_emits_once_then_suppresses_duplicate() {
        let mut unconfirmed = Unconfirmed::new();
        let mut missing = BTreeSet::new();
        let mut abandoned = HashMap::new();
        let mut send_queue = SendQueue::new();

        for (tsn, b, e) in [(50, true, false), (51, false, false), (52, false, false), (53, false, true)] {
            unconfirmed.insert(chunk(tsn, 0, 3, b, e));
        }
        // force expiry
        for c in unconfirmed.values_mut() {
            c.created_at = Instant::now() - Duration::from_millis(200);
        }

        let mut advanced = 49_u32;
        let mut last_sent = None;
        let now = Instant::now();

        let out = advance_peer_ack_point(
            true,
            now,
            &mut advanced,
            49,
            &mut unconfirmed,
            &mut missing,
            &mut abandoned,
            &mut send_queue,
            &mut last_sent,
            3000,
            1300,
        )
        .unwrap();
        let fts = out.expect("forward-tsn expected");
        assert_eq!(fts.new_cumulative_tsn, 53);
        assert_eq!(fts.streams.get(&0), Some(&3));

        // Immediately after, unchanged state, same tick time: suppressed.
        let out2 = advance_peer_ack_point(
            true,
            now,
            &mut advanced,
            49,
            &mut unconfirmed,
            &mut missing,
            &mut abandoned,
            &mut send_queue,
            &mut last_sent,
            3000,
            1300,
        )
        .unwrap();
        assert!(out2.is_none());
    }

    #[test]
    fn lower_to_fit_applies_zero_cumulative_tsn() {
        let mut unconfirmed = Unconfirmed::new();
        let mut missing = BTreeSet::new();
        let mut abandoned = HashMap::new();
        let mut send_queue = SendQueue::new();

        unconfirmed.insert(chunk(u32::MAX, 0, 5, true, true));
        unconfirmed.insert(chunk(0, 1, 9, true, true));
        for c in unconfirmed.values_mut() {
            c.created_at = Instant::now() - Duration::from_millis(200);
        }

        let mut advanced = u32::MAX.wrapping_sub(1);
        let mut last_sent = None;

        // mtu smaller than even the bare forward-tsn header forces
        // lower_to_fit to drop every stream entry; the resulting
        // new_cumulative_tsn is exactly 0 (a valid post-wrap value, not
        // "unset") and must still be applied to advanced_peer_ack_point.
        let out = advance_peer_ack_point(
            true,
            Instant::now(),
            &mut advanced,
            u32::MAX.wrapping_sub(5),
            &mut unconfirmed,
            &mut missing,
            &mut abandoned,
            &mut send_queue,
            &mut last_sent,
            3000,
            4,
        )
        .unwrap();

        let fts = out.expect("forward-tsn expected");
        assert_eq!(fts.new_cumulative_tsn, 0);
        assert!(fts.streams.is_empty());
        assert_eq!(advanced, 0);
    }
}
