//! Error types for the interception engine

use std::io;
use thiserror::Error;

/// Result type for interception operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the MITM proxy
#[derive(Error, Debug)]
pub enum Error {
  /// IO error
  #[error("IO error: {0}")]
  Io(io::Error),

  /// Failed to bind the proxy listener
  #[error("Failed to bind {addr}: {source}")]
  Bind {
    /// Address the listener attempted to bind
    addr: String,
    /// Underlying bind error
    source: io::Error,
  },

  /// Certificate error
  #[error("Certificate error: {0}")]
  Certificate(String),

  /// TLS error
  #[error("TLS error: {0}")]
  Tls(String),

  /// HTTP parsing error
  #[error("HTTP error: {0}")]
  Http(http::Error),

  /// Upstream forwarding error
  #[error("Upstream error: {0}")]
  Upstream(reqwest::Error),

  /// Invalid request
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  /// Invalid interception pattern
  #[error("Invalid control pattern: {0}")]
  Pattern(String),
}

impl Error {
  /// Create a certificate error and log it
  pub fn certificate(msg: impl Into<String>) -> Self {
    let error = Error::Certificate(msg.into());
    tracing::error!("{}", error);
    error
  }

  /// Create a TLS error and log it
  pub fn tls(msg: impl Into<String>) -> Self {
    let error = Error::Tls(msg.into());
    tracing::error!("{}", error);
    error
  }

  /// Create an invalid request error and log it
  pub fn invalid_request(msg: impl Into<String>) -> Self {
    let error = Error::InvalidRequest(msg.into());
    tracing::error!("{}", error);
    error
  }

  /// Create a bind error; callers decide how to report it
  pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
    Error::Bind {
      addr: addr.into(),
      source,
    }
  }

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

impl From<http::Error> for Error {
  fn from(value: http::Error) -> Self {
    Error::Http(value)
  }
}

impl From<reqwest::Error> for Error {
  fn from(value: reqwest::Error) -> Self {
    Error::Upstream(value)
  }
}
