// src/error.rs

use std::io;
use thiserror::Error;

use crate::options::Phase;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum ListenError {
  // --- Socket Primitive Errors ---
  #[error("socket() failed: {0}")]
  Socket(#[source] io::Error),
  #[error("bind({addr}) failed: {source}")]
  Bind {
    addr: String,
    #[source]
    source: io::Error,
  },
  #[error("listen(backlog {backlog}) failed: {source}")]
  Listen {
    backlog: i32,
    #[source]
    source: io::Error,
  },
  #[error("accept() failed: {0}")]
  Accept(#[source] io::Error),
  #[error("could not hand off connection: {0}")]
  Spawn(#[source] io::Error),

  // --- Configuration Errors (never retried) ---
  #[error("option fork not allowed here")]
  ForkNotAllowed,
  #[error("invalid range specification: {0}")]
  InvalidRange(String),
  #[error("invalid value for option {name}")]
  InvalidOptionValue { name: &'static str },
  #[error("applying option {name} at phase {phase:?} failed: {source}")]
  ApplyOption {
    name: &'static str,
    phase: Phase,
    #[source]
    source: io::Error,
  },

  // --- Retry Errors ---
  #[error("giving up after {attempts} attempt(s): {last}")]
  NoMoreRetries { attempts: u32, last: Box<ListenError> },

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl ListenError {
  /// Returns the platform error behind this failure, if there is one.
  pub fn io_error(&self) -> Option<&io::Error> {
    match self {
      ListenError::Socket(e) | ListenError::Accept(e) | ListenError::Spawn(e) => Some(e),
      ListenError::Bind { source, .. }
      | ListenError::Listen { source, .. }
      | ListenError::ApplyOption { source, .. } => Some(source),
      ListenError::NoMoreRetries { last, .. } => last.io_error(),
      _ => None,
    }
  }

  /// Shorthand for matching on the underlying `io::ErrorKind`.
  pub fn io_kind(&self) -> Option<io::ErrorKind> {
    self.io_error().map(io::Error::kind)
  }
}
