//! Error taxonomy for the framed codec and the servers/client built on it.
//!
//! Mirrors the closed failure-kind set carried in a [`crate::stats::ClientStats`]
//! record: every non-timeout decode/encode fault is both an [`Error`] variant
//! the caller sees immediately and a [`FailureKind`] recorded against the
//! client that caused it.

use std::io;

/// The closed set of failure kinds tracked per client (spec §3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
  Timeout,
  BadWrite,
  BadCrc,
  BadHeader,
  Oversize,
  InvalidUtf8,
  InvalidJson,
  Handler,
  Framing,
}

/// Errors surfaced by the framed codec and the components built on it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// No byte was received before the read deadline. Recoverable: the
  /// caller may retry the read on the same connection.
  #[error("socket timeout")]
  Timeout,

  /// The peer closed the connection (cleanly or mid-read). Not an error
  /// condition worth logging above info; the connection is already closed.
  #[error("socket connection broken")]
  ConnectionBroken,

  /// A non-recoverable decode/encode fault. The connection has already
  /// been closed by the caller of the codec by the time this is returned.
  #[error("framing fault: {0:?}")]
  Framing(FailureKind),

  /// The owner-supplied handler returned an error.
  #[error("handler error: {0}")]
  Handler(String),

  /// Construction/bind-time I/O failure (not part of a live message loop).
  #[error(transparent)]
  Io(#[from] io::Error),
}

impl Error {
  /// The [`FailureKind`] this error should be recorded as, if any.
  ///
  /// `ConnectionBroken` has no failure kind: an orderly or abrupt peer
  /// disconnect is logged at info, not counted as a fault (spec §7).
  pub fn failure_kind(&self) -> Option<FailureKind> {
    match self {
      Error::Timeout => Some(FailureKind::Timeout),
      Error::Framing(kind) => Some(*kind),
      Error::Handler(_) => Some(FailureKind::Handler),
      Error::ConnectionBroken | Error::Io(_) => None,
    }
  }

  /// True if this error means the connection must be closed. Only a bare
  /// [`Error::Timeout`] with zero bytes received is recoverable.
  pub fn is_fatal(&self) -> bool {
    !matches!(self, Error::Timeout)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
