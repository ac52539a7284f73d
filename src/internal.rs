//! `SenderInternal`: all mutable sender state behind one coarse lock, and
//! the `do_send` tick body (4.H).
//!
//! Grounded on `association_internal.rs`'s overall struct shape and its
//! `pop_pending_data_chunks_to_send` / `get_data_packets_to_retransmit`
//! dequeue-and-budget loops. The wake-signal plumbing
//! (`sctp::stream::Stream::awake_write_loop_ch`) lives in `sender.rs`
//! alongside the spawned worker task; this module only computes one tick's
//! worth of work given `now`, so it can be unit-tested synchronously.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::chunk::{DataChunk, ForwardTsn, UNLIMITED};
use crate::congestion;
use crate::pr_sctp;
use crate::queue::{SendQueue, Unconfirmed};
use crate::rto::RtoManager;
use crate::util::sna32_distance;

pub type SendChunkCallback = Arc<dyn Fn(DataChunk) + Send + Sync>;
pub type ForwardTsnCallback = Arc<dyn Fn(ForwardTsn) + Send + Sync>;
pub type BurstCompleteCallback = Arc<dyn Fn() + Send + Sync>;

pub struct SenderInternal {
    pub association_id: String,
    pub mtu: usize,
    pub max_burst: usize,
    pub burst_period_ms: u64,
    pub pr_sctp_enabled: bool,

    pub next_tsn: u32,
    pub initial_tsn: u32,

    pub send_queue: SendQueue,
    pub unconfirmed: Unconfirmed,
    pub missing: BTreeSet<u32>,
    pub abandoned: HashMap<u32, DataChunk>,
    pub stream_seqnums: HashMap<u16, u16>,

    pub cwnd: usize,
    pub ssthresh: usize,
    pub rwnd: usize,
    pub initial_remote_arwnd: usize,

    pub cumulative_ack_tsn: u32,
    pub got_first_sack: bool,
    pub advanced_peer_ack_point: u32,
    pub last_sent_forward_tsn: Option<(u32, Instant)>,

    pub rto_mgr: RtoManager,
    pub in_retransmit_mode: bool,

    pub closed: bool,

    pub send_chunk_cb: SendChunkCallback,
    pub forward_tsn_cb: Option<ForwardTsnCallback>,
    pub burst_complete_cb: Option<BurstCompleteCallback>,
}

/// Result of one `do_send` tick: chunks/forward-tsn to hand to callbacks
/// (collected while the lock is held, invoked after it is released, per
/// SPEC_FULL.md §5's shared-resource policy) plus how long the loop should
/// wait before ticking again absent a wake-up.
pub struct TickOutput {
    pub sent: Vec<DataChunk>,
    pub forward_tsn: Option<ForwardTsn>,
    pub send_chunk_cb: SendChunkCallback,
    pub forward_tsn_cb: Option<ForwardTsnCallback>,
    pub burst_complete_cb: Option<BurstCompleteCallback>,
    pub wait: Duration,
}

impl SenderInternal {
    pub fn outstanding_bytes(&self) -> usize {
        self.unconfirmed.outstanding_bytes()
    }

    pub fn buffered_amount(&self) -> usize {
        self.send_queue.buffered_amount()
    }

    fn effective_rto(&self) -> u64 {
        self.rto_mgr.get_rto()
    }

    /// 4.C `send_data`: fragments `user_data` to MTU, assigns a stream
    /// sequence number for ordered messages, and enqueues atomically.
    #[allow(clippy::too_many_arguments)]
    pub fn send_data(
        &mut self,
        stream_id: u16,
        payload_protocol_id: u32,
        user_data: bytes::Bytes,
        ordered: bool,
        max_lifetime_ms: Option<u32>,
        max_retransmissions: Option<u32>,
    ) {
        let stream_seq = if ordered {
            let seq = self.stream_seqnums.entry(stream_id).or_insert(0);
            let assigned = *seq;
            *seq = seq.wrapping_add(1);
            assigned
        } else {
            0
        };

        let now = Instant::now();
        let mtu = self.mtu;
        let total_len = user_data.len();
        let chunk_count = if total_len == 0 {
            1
        } else {
            (total_len + mtu - 1) / mtu
        };

        let mut fragments = Vec::with_capacity(chunk_count);
        for i in 0..chunk_count {
            let start = i * mtu;
            let end = (start + mtu).min(total_len);
            let piece = user_data.slice(start..end);
            fragments.push(DataChunk {
                tsn: None,
                stream_id,
                stream_seq,
                unordered: !ordered,
                beginning: i == 0,
                ending: i == chunk_count - 1,
                payload_protocol_id,
                user_data: piece,
                created_at: now,
                last_sent_at: None,
                send_count: 0,
                max_lifetime_ms: max_lifetime_ms.unwrap_or(UNLIMITED),
                max_retransmissions: max_retransmissions.unwrap_or(UNLIMITED),
            });
        }

        trace!(
            "[{}] send_data: stream={} seq={} fragments={}",
            self.association_id,
            stream_id,
            stream_seq,
            fragments.len()
        );

        self.send_queue.push_message(fragments);
    }

    /// 4.D `remove_acked_unconfirmed`: walks TSNs from `cumulative_ack_tsn`
    /// (exclusive on repeat calls, per the Open Question 3 resolution)
    /// through `sack_tsn` inclusive, removing each from all three tables.
    fn remove_acked_unconfirmed(&mut self, sack_tsn: u32, start_inclusive: u32) {
        let bound = self.unconfirmed.len() as u64 + 1;
        let mut tsn = start_inclusive;
        let mut visited = 0_u64;
        loop {
            if visited > bound {
                warn!(
                    "[{}] remove_acked_unconfirmed exceeded safety bound, stopping",
                    self.association_id
                );
                break;
            }
            let removed_from_any = self.unconfirmed.remove(tsn).is_some()
                | self.missing.remove(&tsn)
                | self.abandoned.remove(&tsn).is_some();
            if !removed_from_any {
                trace!(
                    "[{}] tsn {} acked but present in no table",
                    self.association_id,
                    tsn
                );
            }
            if tsn == sack_tsn {
                break;
            }
            tsn = tsn.wrapping_add(1);
            visited += 1;
        }
        self.cumulative_ack_tsn = sack_tsn;
    }

    /// Entry point used by `got_sack` (4.D) for both the first-SACK path
    /// (start == sack_tsn, a one-TSN walk covering just `initial_tsn`) and
    /// subsequent SACKs (start == cumulative_ack_tsn + 1).
    pub(crate) fn ack_up_to(&mut self, sack_tsn: u32, start_inclusive: u32) {
        self.remove_acked_unconfirmed(sack_tsn, start_inclusive);
    }

    /// Guards the PR-SCTP entry point on `self.pr_sctp_enabled` before ever
    /// calling into `pr_sctp::advance_peer_ack_point`, so the `Err` that
    /// function returns for a disabled sender can only fire here as a
    /// should-never-happen defensive case, never as ordinary disabled-PR-SCTP
    /// operation.
    fn run_pr_sctp_advance(&mut self, now: Instant) -> Option<ForwardTsn> {
        if !self.pr_sctp_enabled {
            return None;
        }
        let acked = if self.got_first_sack {
            self.cumulative_ack_tsn
        } else {
            self.initial_tsn
        };
        match pr_sctp::advance_peer_ack_point(
            self.pr_sctp_enabled,
            now,
            &mut self.advanced_peer_ack_point,
            acked,
            &mut self.unconfirmed,
            &mut self.missing,
            &mut self.abandoned,
            &mut self.send_queue,
            &mut self.last_sent_forward_tsn,
            self.effective_rto(),
            self.mtu,
        ) {
            Ok(forward_tsn) => forward_tsn,
            Err(e) => {
                warn!("[{}] {}", self.association_id, e);
                None
            }
        }
    }

    /// One `do_send` tick (4.H). Mutates all sender state and returns the
    /// chunks to hand to the wire callback plus the next wait duration; the
    /// caller (the spawned worker in `sender.rs`) invokes callbacks after
    /// releasing the lock.
    pub fn do_send_tick(&mut self) -> TickOutput {
        let now = Instant::now();
        let mut sent = Vec::new();

        let outstanding = self.outstanding_bytes();
        let mut budget = if self.in_retransmit_mode || self.cwnd < outstanding || self.rwnd == 0 {
            1
        } else {
            self.max_burst
        };

        let forward_tsn = self.run_pr_sctp_advance(now);

        // Priority 1: gap-reported misses, oldest-first in sequence-arithmetic
        // order (a raw BTreeSet iteration would misorder a window straddling
        // the TSN wrap).
        if budget > 0 {
            let mut missing_tsns: Vec<u32> = self.missing.iter().copied().collect();
            missing_tsns.sort_by(|a, b| {
                if a == b {
                    std::cmp::Ordering::Equal
                } else if crate::util::sna32lt(*a, *b) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                }
            });
            for tsn in missing_tsns {
                if budget == 0 {
                    break;
                }
                if let Some(chunk) = self.unconfirmed.get_mut(tsn) {
                    chunk.last_sent_at = Some(now);
                    chunk.send_count += 1;
                    sent.push(chunk.clone());
                    budget -= 1;
                }
            }
        }

        // Priority 2: RTO-expired unconfirmed chunks.
        if budget > 0 {
            let rto = if self.rto_mgr.has_rtt() {
                self.rto_mgr.get_rto()
            } else {
                crate::rto::RTO_INITIAL
            };
            let expired_tsns: Vec<u32> = self
                .unconfirmed
                .values()
                .filter(|c| {
                    c.last_sent_at
                        .map(|t| now.duration_since(t).as_millis() as u64 > rto)
                        .unwrap_or(false)
                })
                .filter_map(|c| c.tsn)
                .collect();

            let mut first_retransmission_this_tick = true;
            for tsn in expired_tsns {
                if budget == 0 {
                    break;
                }
                if let Some(chunk) = self.unconfirmed.get_mut(tsn) {
                    chunk.last_sent_at = Some(now);
                    chunk.send_count += 1;
                    sent.push(chunk.clone());
                    budget -= 1;

                    if first_retransmission_this_tick && !self.in_retransmit_mode {
                        let collapse = congestion::on_t3_retransmission(self.cwnd, self.mtu);
                        self.ssthresh = collapse.ssthresh;
                        self.cwnd = collapse.cwnd;
                        self.in_retransmit_mode = true;
                        if self.rto_mgr.has_rtt() {
                            self.rto_mgr.backoff();
                        }
                        debug!(
                            "[{}] T3 retransmission: ssthresh={} cwnd={} rto={}",
                            self.association_id,
                            self.ssthresh,
                            self.cwnd,
                            self.rto_mgr.get_rto()
                        );
                    }
                    first_retransmission_this_tick = false;
                }
            }
        }

        // Priority 3: new chunks from send_queue.
        while budget > 0 {
            let Some(front) = self.send_queue.front() else {
                break;
            };
            if self.pr_sctp_enabled && front.is_abandoned_now(now) {
                self.send_queue.pop_front();
                continue;
            }
            let mut chunk = self.send_queue.pop_front().unwrap();
            if chunk.tsn.is_none() {
                chunk.tsn = Some(self.next_tsn);
                self.next_tsn = self.next_tsn.wrapping_add(1);
            }
            chunk.last_sent_at = Some(now);
            chunk.send_count = 1;
            self.unconfirmed.insert(chunk.clone());
            sent.push(chunk);
            budget -= 1;
        }

        let wait = self.compute_wait_time();

        TickOutput {
            sent,
            forward_tsn,
            send_chunk_cb: self.send_chunk_cb.clone(),
            forward_tsn_cb: self.forward_tsn_cb.clone(),
            burst_complete_cb: self.burst_complete_cb.clone(),
            wait,
        }
    }

    fn compute_wait_time(&self) -> Duration {
        let rto = if self.rto_mgr.has_rtt() {
            self.rto_mgr.get_rto()
        } else {
            crate::rto::RTO_INITIAL
        };

        let work_remains = !self.send_queue.is_empty() || !self.missing.is_empty();
        if work_remains {
            let ms = if self.rwnd > 0 && self.cwnd > self.outstanding_bytes() {
                self.burst_period_ms
            } else {
                rto
            };
            return Duration::from_millis(ms);
        }

        if !self.unconfirmed.is_empty() {
            return Duration::from_millis(rto);
        }

        Duration::from_millis(crate::rto::RTO_INITIAL)
    }

    /// 4.I `got_sack`, steps 1-9 (step 10's wake-up signal is fired by the
    /// caller in `sender.rs` once the lock is released).
    pub fn got_sack(&mut self, sack: crate::sack::SackInput) -> crate::sack::SackOutcome {
        crate::sack::handle_sack(self, sack)
    }

    pub fn max_distance(&self) -> u32 {
        sna32_distance(self.cumulative_ack_tsn, self.next_tsn)
    }

    pub fn forward_tsn_cb(&self) -> Option<ForwardTsnCallback> {
        self.forward_tsn_cb.clone()
    }
}
