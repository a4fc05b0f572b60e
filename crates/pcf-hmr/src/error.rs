//! Error types for the hot-reload control plane

use std::io;
use thiserror::Error;

/// Result type for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the control plane
#[derive(Error, Debug)]
pub enum Error {
  /// IO error
  #[error("IO error: {0}")]
  Io(io::Error),

  /// Failed to bind the control-plane listener
  #[error("Failed to bind {addr}: {source}")]
  Bind {
    /// Address the listener attempted to bind
    addr: String,
    /// Underlying bind error
    source: io::Error,
  },

  /// File watcher error
  #[error("Watch error: {0}")]
  Watch(notify::Error),

  /// Rejected ACK payload; the message is returned to the caller verbatim
  #[error("{0}")]
  InvalidAck(&'static str),
}

impl Error {
  /// Whether this error is an address-in-use bind failure
  pub fn is_addr_in_use(&self) -> bool {
    matches!(
      self,
      Error::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse
    )
  }
}

impl From<io::Error> for Error {
  fn from(value: io::Error) -> Self {
    Error::Io(value)
  }
}

impl From<notify::Error> for Error {
  fn from(value: notify::Error) -> Self {
    Error::Watch(value)
  }
}
