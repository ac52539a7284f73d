use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the sender.
///
/// Peer-protocol-violation conditions (a stale SACK, an inconsistent gap
/// block, a missing TSN not in `unconfirmed`) are deliberately NOT modeled
/// here: those are logged and skipped inline by `got_sack`, never returned,
/// since the sender must never tear down the association over a malformed
/// peer report.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("abandon_chunk called but PR-SCTP was not negotiated for this sender")]
    PartialReliabilityNotEnabled,

    #[error("the sender has already been closed")]
    SenderClosed,

    #[error("{0}")]
    Other(String),
}
