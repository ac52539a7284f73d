//! `got_sack` (4.I), grounded on `association_internal.rs`'s
//! `handle_sack`/`process_selective_ack` orchestration (Karn's-rule RTT
//! gating, the `update_cwnd` short-circuit on abandoned chunks), adapted to
//! this spec's simpler `missing`-set gap model — no SACK duplicate-report
//! counter or fast-retransmit threshold, since that machinery isn't part of
//! this sender's design.

use std::time::Instant;

use log::{trace, warn};

use crate::chunk::ForwardTsn;
use crate::congestion;
use crate::internal::SenderInternal;
use crate::util::{sna32_distance, sna32_is_newer, sna32_is_newer_or_equal, sna32lt};

#[derive(Debug, Clone, Copy)]
pub struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone)]
pub struct SackInput {
    pub cumulative_tsn_ack: u32,
    pub arwnd: usize,
    pub gap_ack_blocks: Vec<GapAckBlock>,
}

pub struct SackOutcome {
    pub forward_tsn: Option<ForwardTsn>,
}

pub fn handle_sack(internal: &mut SenderInternal, sack: SackInput) -> SackOutcome {
    let now = Instant::now();

    // Step 1.
    internal.in_retransmit_mode = false;

    // Step 2.
    let max_distance = internal.max_distance();

    // Step 3.
    let mut update_cwnd = true;
    let mut last_acked_chunk_size = 0_usize;
    if let Some(c) = internal.unconfirmed.get(sack.cumulative_tsn_ack) {
        last_acked_chunk_size = c.user_data.len();
        if c.send_count == 1 {
            if let Some(last_sent_at) = c.last_sent_at {
                let rtt_ms = now.duration_since(last_sent_at).as_millis() as u64;
                internal.rto_mgr.set_new_rtt(rtt_ms);
            }
        }
    } else if internal.abandoned.contains_key(&sack.cumulative_tsn_ack) {
        update_cwnd = false;
    }

    let mut cumulative_advanced = false;
    let mut skip_gaps = false;

    if !internal.got_first_sack {
        // Step 4: first SACK handling.
        if sna32_is_newer_or_equal(internal.initial_tsn, sack.cumulative_tsn_ack) {
            internal.got_first_sack = true;
            let start = internal.initial_tsn;
            internal.ack_up_to(sack.cumulative_tsn_ack, start);
            cumulative_advanced = true;
        } else {
            warn!(
                "[{}] first sack acks tsn {} older than initial_tsn {}; ignoring",
                internal.association_id, sack.cumulative_tsn_ack, internal.initial_tsn
            );
            skip_gaps = true;
        }
    } else {
        // Step 5: subsequent SACKs.
        let distance_from_current = sna32_distance(internal.cumulative_ack_tsn, sack.cumulative_tsn_ack);
        let stale = sna32lt(sack.cumulative_tsn_ack, internal.cumulative_ack_tsn);
        if distance_from_current > max_distance || stale {
            warn!(
                "[{}] sack cumulative_tsn_ack {} is stale or spurious relative to cumulative_ack_tsn {}; skipping gap processing",
                internal.association_id, sack.cumulative_tsn_ack, internal.cumulative_ack_tsn
            );
            skip_gaps = true;
        } else if sna32_is_newer(internal.cumulative_ack_tsn, sack.cumulative_tsn_ack) {
            let start = internal.cumulative_ack_tsn.wrapping_add(1);
            internal.ack_up_to(sack.cumulative_tsn_ack, start);
            cumulative_advanced = true;
        }
    }

    // Step 6: gap blocks.
    if !skip_gaps {
        process_gap_blocks(internal, &sack, max_distance);
    }

    // Step 7.
    internal.rwnd = congestion::update_rwnd(sack.arwnd, internal.outstanding_bytes());

    // Step 8.
    if cumulative_advanced && update_cwnd {
        internal.cwnd = congestion::on_cumulative_advance(
            internal.cwnd,
            internal.ssthresh,
            internal.outstanding_bytes(),
            last_acked_chunk_size,
            internal.mtu,
        );
    }

    // Step 9.
    let mut forward_tsn = None;
    if internal.pr_sctp_enabled {
        if sna32_is_newer(internal.advanced_peer_ack_point, sack.cumulative_tsn_ack) {
            internal.advanced_peer_ack_point = sack.cumulative_tsn_ack;
        }
        forward_tsn = match crate::pr_sctp::advance_peer_ack_point(
            internal.pr_sctp_enabled,
            now,
            &mut internal.advanced_peer_ack_point,
            internal.cumulative_ack_tsn,
            &mut internal.unconfirmed,
            &mut internal.missing,
            &mut internal.abandoned,
            &mut internal.send_queue,
            &mut internal.last_sent_forward_tsn,
            internal.rto_mgr.get_rto(),
            internal.mtu,
        ) {
            Ok(forward_tsn) => forward_tsn,
            Err(e) => {
                // Never surfaced as an Err to the got_sack caller (§7); the
                // `pr_sctp_enabled` guard above means this is unreachable in
                // normal operation.
                warn!("[{}] {}", internal.association_id, e);
                None
            }
        };
    }

    // Step 10 (signalling the loop) is the caller's responsibility.
    SackOutcome { forward_tsn }
}

fn process_gap_blocks(internal: &mut SenderInternal, sack: &SackInput, max_distance: u32) {
    let mut last_good_end: u16 = 0;
    for block in &sack.gap_ack_blocks {
        if block.start <= last_good_end || block.start as u32 > max_distance {
            warn!(
                "[{}] inconsistent gap-ack-block start={} end={}; stopping gap processing",
                internal.association_id, block.start, block.end
            );
            break;
        }
        for offset in (last_good_end + 1)..block.start {
            let tsn = sack.cumulative_tsn_ack.wrapping_add(offset as u32);
            if internal.missing.contains(&tsn) {
                continue;
            }
            if internal.unconfirmed.contains(tsn) {
                internal.missing.insert(tsn);
            } else {
                trace!(
                    "[{}] gap-reported tsn {} not present in unconfirmed; skipping",
                    internal.association_id,
                    tsn
                );
            }
        }
        last_good_end = block.end;
    }
}
