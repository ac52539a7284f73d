//! The reliable data-sender half of an SCTP association: fragmentation,
//! congestion control, RTT/RTO estimation, and PR-SCTP abandonment
//! (RFC 4960 §6/§7, RFC 3758).
//!
//! Wire framing, the handshake state machine, and the peer-side receiver
//! are external collaborators; this crate only consumes a decoded SACK and
//! produces `DataChunk`/`ForwardTsn` values for the caller to serialize.

pub mod chunk;
pub mod congestion;
pub mod error;
pub mod internal;
pub mod mutex;
pub mod pr_sctp;
pub mod queue;
pub mod rto;
pub mod sack;
pub mod sender;
pub mod util;

pub use chunk::{DataChunk, ForwardTsn, UNLIMITED};
pub use error::{Error, Result};
pub use sack::{GapAckBlock, SackInput};
pub use sender::{Sender, SenderConfig};
