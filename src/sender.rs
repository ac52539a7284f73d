//! The public handle (§6), grounded on the `Association`/`AssociationInternal`
//! and `Stream`/internal-state split used throughout the teacher crate: a
//! thin, cloneable, `Arc`-based handle (`Sender`) wrapping the single-locked
//! `SenderInternal` plus the wake-signal channel
//! (`sctp::stream::Stream::awake_write_loop_ch`'s coalescing `try_send`
//! pattern).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, trace};
use tokio::sync::mpsc;

use crate::congestion;
use crate::internal::{
    BurstCompleteCallback, ForwardTsnCallback, SendChunkCallback, SenderInternal,
};
use crate::mutex::Mutex;
use crate::queue::{SendQueue, Unconfirmed};
use crate::rto::RtoManager;
use crate::sack::SackInput;

/// Configuration accepted by [`Sender::new`]. Every constant from the
/// constants table (SPEC_FULL.md §6) is individually overridable and
/// defaults to the value in that table.
pub struct SenderConfig {
    pub association_id: String,
    pub send_chunk_cb: SendChunkCallback,
    pub forward_tsn_cb: Option<ForwardTsnCallback>,
    pub burst_complete_cb: Option<BurstCompleteCallback>,

    pub mtu: usize,
    pub initial_tsn: u32,
    pub initial_remote_arwnd: usize,
    pub pr_sctp_enabled: bool,

    pub max_burst: usize,
    pub burst_period_ms: u64,
    pub rto_initial: u64,
    pub rto_min: u64,
    pub rto_max: u64,
    pub cwnd_factor: usize,
}

impl SenderConfig {
    pub fn new(association_id: impl Into<String>, send_chunk_cb: SendChunkCallback) -> Self {
        SenderConfig {
            association_id: association_id.into(),
            send_chunk_cb,
            forward_tsn_cb: None,
            burst_complete_cb: None,
            mtu: DEFAULT_MTU,
            initial_tsn: 0,
            initial_remote_arwnd: 0,
            pr_sctp_enabled: false,
            max_burst: DEFAULT_MAX_BURST,
            burst_period_ms: DEFAULT_BURST_PERIOD_MS,
            rto_initial: crate::rto::RTO_INITIAL,
            rto_min: crate::rto::RTO_MIN,
            rto_max: crate::rto::RTO_MAX,
            cwnd_factor: DEFAULT_CWND_FACTOR,
        }
    }
}

pub const DEFAULT_MTU: usize = 1300;
pub const DEFAULT_MAX_BURST: usize = 4;
pub const DEFAULT_BURST_PERIOD_MS: u64 = 50;
pub const DEFAULT_CWND_FACTOR: usize = 4380;

/// The reliable data-sender handle exposed to an SCTP association.
///
/// Cheaply `Clone`-able; clones share the same underlying worker and state.
#[derive(Clone)]
pub struct Sender {
    internal: Arc<Mutex<SenderInternal>>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Arc<std::sync::Mutex<Option<mpsc::Receiver<()>>>>,
    started: Arc<AtomicBool>,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Self {
        let mtu = if config.mtu == 0 { DEFAULT_MTU } else { config.mtu };
        let cwnd = congestion::initial_cwnd(mtu, config.cwnd_factor);

        let internal = SenderInternal {
            association_id: config.association_id,
            mtu,
            max_burst: config.max_burst,
            burst_period_ms: config.burst_period_ms,
            pr_sctp_enabled: config.pr_sctp_enabled,

            next_tsn: config.initial_tsn,
            initial_tsn: config.initial_tsn,

            send_queue: SendQueue::new(),
            unconfirmed: Unconfirmed::new(),
            missing: BTreeSet::new(),
            abandoned: HashMap::new(),
            stream_seqnums: HashMap::new(),

            cwnd,
            ssthresh: config.initial_remote_arwnd,
            rwnd: config.initial_remote_arwnd,
            initial_remote_arwnd: config.initial_remote_arwnd,

            cumulative_ack_tsn: config.initial_tsn.wrapping_sub(1),
            got_first_sack: false,
            advanced_peer_ack_point: config.initial_tsn,
            last_sent_forward_tsn: None,

            rto_mgr: RtoManager::new(config.rto_initial, config.rto_min, config.rto_max),
            in_retransmit_mode: false,

            closed: false,

            send_chunk_cb: config.send_chunk_cb,
            forward_tsn_cb: config.forward_tsn_cb,
            burst_complete_cb: config.burst_complete_cb,
        };

        let (wake_tx, wake_rx) = mpsc::channel(1);

        Sender {
            internal: Arc::new(Mutex::new(internal)),
            wake_tx,
            wake_rx: Arc::new(std::sync::Mutex::new(Some(wake_rx))),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    fn signal(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// `send_data` (4.C). Enqueues atomically and wakes the send loop.
    ///
    /// Returns `Err(Error::SenderClosed)` without enqueuing if `close()` has
    /// already been called.
    #[allow(clippy::too_many_arguments)]
    pub fn send_data(
        &self,
        stream_id: u16,
        payload_protocol_id: u32,
        user_data: Bytes,
        ordered: bool,
        max_lifetime_ms: Option<u32>,
        max_retransmissions: Option<u32>,
    ) -> crate::error::Result<()> {
        {
            let mut internal = self.internal.lock("send_data");
            if internal.closed {
                return Err(crate::error::Error::SenderClosed);
            }
            internal.send_data(
                stream_id,
                payload_protocol_id,
                user_data,
                ordered,
                max_lifetime_ms,
                max_retransmissions,
            );
        }
        self.signal();
        Ok(())
    }

    /// `got_sack` (4.I). Runs the handler under the lock, then invokes the
    /// forward-TSN callback (if any) without the lock held, then signals.
    pub fn got_sack(&self, sack: SackInput) {
        let (forward_tsn, forward_tsn_cb) = {
            let mut internal = self.internal.lock("got_sack");
            let outcome = internal.got_sack(sack);
            (outcome.forward_tsn, internal.forward_tsn_cb())
        };

        if let (Some(fts), Some(cb)) = (forward_tsn, forward_tsn_cb) {
            cb(fts);
        }

        self.signal();
    }

    /// Updates the stored initial-arwnd reference. Does not directly alter
    /// the current `rwnd` (that happens on the next SACK, per §6).
    pub fn set_receiver_window(&self, arwnd: usize) {
        let mut internal = self.internal.lock("set_receiver_window");
        internal.initial_remote_arwnd = arwnd;
    }

    pub fn buffered_amount(&self) -> usize {
        let internal = self.internal.lock("buffered_amount");
        internal.buffered_amount()
    }

    pub fn next_tsn(&self) -> u32 {
        let internal = self.internal.lock("next_tsn");
        internal.next_tsn
    }

    /// Idempotent; spawns the worker exactly once.
    pub fn start_sending(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let wake_rx = self
            .wake_rx
            .lock()
            .unwrap()
            .take()
            .expect("start_sending called exactly once after taking wake_rx");

        let internal = self.internal.clone();
        tokio::spawn(run_send_loop(internal, wake_rx));
    }

    /// Idempotent; requests the worker to finish its current tick and stop.
    pub fn close(&self) {
        {
            let mut internal = self.internal.lock("close");
            if internal.closed {
                return;
            }
            internal.closed = true;
        }
        self.signal();
    }
}

async fn run_send_loop(internal: Arc<Mutex<SenderInternal>>, mut wake_rx: mpsc::Receiver<()>) {
    loop {
        let tick = {
            let mut guard = internal.lock("do_send tick");
            if guard.closed {
                trace!("[{}] send loop closing", guard.association_id);
                break;
            }
            guard.do_send_tick()
        };

        for chunk in tick.sent {
            (tick.send_chunk_cb)(chunk);
        }

        if let Some(fts) = tick.forward_tsn {
            if let Some(cb) = &tick.forward_tsn_cb {
                cb(fts);
            }
        }

        if let Some(cb) = &tick.burst_complete_cb {
            cb();
        }

        tokio::select! {
            _ = wake_rx.recv() => {
                debug!("send loop woken early");
            }
            _ = tokio::time::sleep(tick.wait) => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn test_config(sent: Arc<StdMutex<Vec<crate::chunk::DataChunk>>>) -> SenderConfig {
        let mut config = SenderConfig::new(
            "test",
            Arc::new(move |c| sent.lock().unwrap().push(c)),
        );
        config.initial_tsn = 100;
        config.initial_remote_arwnd = 8192;
        config
    }

    #[tokio::test]
    async fn scenario_1_fragmentation_and_normal_ack() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sender = Sender::new(test_config(sent.clone()));
        sender.start_sending();

        sender
            .send_data(0, 53, Bytes::from(vec![7u8; 3000]), true, None, None)
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let snapshot: Vec<_> = sent.lock().unwrap().clone();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.iter().map(|c| c.tsn).collect::<Vec<_>>(),
            vec![Some(100), Some(101), Some(102)]
        );
        assert!(snapshot[0].beginning && !snapshot[0].ending);
        assert!(!snapshot[1].beginning && !snapshot[1].ending);
        assert!(!snapshot[2].beginning && snapshot[2].ending);

        sender.got_sack(SackInput {
            cumulative_tsn_ack: 102,
            arwnd: 8192,
            gap_ack_blocks: vec![],
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sender.buffered_amount(), 0);
        sender.close();
    }

    #[tokio::test]
    async fn send_data_after_close_is_rejected() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sender = Sender::new(test_config(sent));
        sender.start_sending();
        sender.close();

        let err = sender
            .send_data(0, 53, Bytes::from_static(b"late"), true, None, None)
            .unwrap_err();
        assert_eq!(err, crate::error::Error::SenderClosed);
    }
}
