//! Congestion/flow control (4.E), grounded on
//! `association_internal.rs::new()` (initial cwnd formula) and
//! `on_cumulative_tsn_ack_point_advanced` (slow-start / congestion-avoidance
//! update). The teacher's fast-recovery / `partial_bytes_acked` machinery is
//! not ported: this sender retransmits off the `missing` gap set instead of
//! HTNA-based fast retransmit, so there is no fast-recovery phase to track.

/// `cwnd = min(4*mtu, max(2*mtu, cwnd_factor))`, RFC 4960 §7.2.1.
pub fn initial_cwnd(mtu: usize, cwnd_factor: usize) -> usize {
    (4 * mtu).min((2 * mtu).max(cwnd_factor))
}

pub fn update_rwnd(arwnd: usize, outstanding_bytes: usize) -> usize {
    arwnd.saturating_sub(outstanding_bytes)
}

/// Slow-start / congestion-avoidance cwnd update on a cumulatively-advancing
/// SACK. `last_acked_chunk_size` is the payload length of the single chunk
/// whose ack advanced `cumulative_ack_tsn` on this SACK.
pub fn on_cumulative_advance(
    cwnd: usize,
    ssthresh: usize,
    outstanding_bytes: usize,
    last_acked_chunk_size: usize,
    mtu: usize,
) -> usize {
    let fully_utilized = cwnd <= outstanding_bytes;
    if cwnd < ssthresh {
        if fully_utilized {
            cwnd + last_acked_chunk_size.min(mtu)
        } else {
            cwnd
        }
    } else if fully_utilized {
        cwnd + mtu
    } else {
        cwnd
    }
}

/// cwnd collapse on the first T3 retransmission within a tick.
pub struct T3Collapse {
    pub ssthresh: usize,
    pub cwnd: usize,
}

pub fn on_t3_retransmission(cwnd: usize, mtu: usize) -> T3Collapse {
    T3Collapse {
        ssthresh: (cwnd / 2).max(4 * mtu),
        cwnd: mtu,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initial_cwnd_matches_rfc_formula() {
        assert_eq!(initial_cwnd(1300, 4380), 4380);
        assert_eq!(initial_cwnd(1500, 4380), 6000);
        assert_eq!(initial_cwnd(100, 4380), 400);
    }

    #[test]
    fn slow_start_grows_only_when_fully_utilized() {
        let cwnd = on_cumulative_advance(1000, 5000, 1000, 500, 1300);
        assert_eq!(cwnd, 1500);
        let cwnd = on_cumulative_advance(1000, 5000, 500, 500, 1300);
        assert_eq!(cwnd, 1000);
    }

    #[test]
    fn congestion_avoidance_grows_by_one_mtu() {
        let cwnd = on_cumulative_advance(6000, 5000, 6000, 900, 1300);
        assert_eq!(cwnd, 7300);
    }

    #[test]
    fn t3_collapse_matches_scenario_3() {
        let out = on_t3_retransmission(16 * 1024, 1300);
        assert_eq!(out.ssthresh, 8192);
        assert_eq!(out.cwnd, 1300);
    }
}
