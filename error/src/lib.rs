//! Error types shared across the btcwatch workspace.
//!
//! Each crate that talks to the outside world (the node's RPC endpoint, its
//! publish/subscribe sockets, raw transaction bytes) classifies its failures
//! into one of the kinds below rather than letting opaque errors propagate
//! inward, per the "dynamic value shapes" and "exception-for-control-flow"
//! design notes.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The four outcomes a call against the node's JSON-RPC endpoint can have.
///
/// `NotFound` is not a failure in the usual sense: it is the RPC-level
/// "not found" response and drives status selection in the transaction and
/// block analyzers.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// The node responded that the requested entity does not exist.
    #[error("not found")]
    NotFound,

    /// The request could not reach the node, or the connection dropped.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node's response could not be parsed, or a batched response's id
    /// did not correlate to any outstanding request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The request exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl RpcError {
    /// True for the "absent" case that callers route into status selection
    /// rather than error handling.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RpcError::NotFound)
    }

    /// True for the two kinds the scheduler treats identically: back off and
    /// retry on the next turn without mutating state (§7.1, §7.3).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Protocol(_))
    }
}

/// Failure to parse a raw transaction byte string (§4.3).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte string is not a well-formed consensus-encoded transaction.
    #[error("malformed transaction payload: {0}")]
    Malformed(String),

    /// A script was longer than the policy maximum; treated as non-standard
    /// rather than fatal, but rejected outright past a hard ceiling.
    #[error("script exceeds the maximum allowed length")]
    ScriptTooLong,
}

/// Internal invariant violations (§7.4): never routed to a caller, always
/// logged and skipped by the scheduler so a single bad turn cannot abort the
/// process.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantErrorKind {
    /// A transaction was found analyzed while it was also queued to unwatch.
    UnwatchRace,
    /// An input key in `transaction_input_keys` has no matching entry in the
    /// conflict index, or vice versa.
    ConflictIndexDesync,
    /// The analyzed-block window exceeded its bound N.
    WindowOverflow,
}

impl fmt::Display for InvariantErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvariantErrorKind::UnwatchRace => "txid analyzed while queued for unwatch",
            InvariantErrorKind::ConflictIndexDesync => "conflict index out of sync with analysis",
            InvariantErrorKind::WindowOverflow => "analyzed-block window exceeded its bound",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
#[error("internal invariant violated: {kind} ({detail})")]
pub struct InvariantError {
    pub kind: InvariantErrorKind,
    pub detail: String,
}

impl InvariantError {
    pub fn new(kind: InvariantErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}
