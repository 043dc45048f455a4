// src/diag.rs

//! Leveled diagnostics shared by the listen engine and the retry controller.

use std::fmt;

use socket2::SockAddr;

use crate::endpoint::RetryPolicy;

/// Severity used for failures that may be retried.
///
/// Under retrying or forever operation a transient failure is expected and is
/// reported at `Info`; otherwise the same failure terminates the call and is
/// reported at `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Info,
  Error,
}

impl Severity {
  pub fn for_policy(policy: &RetryPolicy) -> Self {
    if policy.is_retrying() {
      Severity::Info
    } else {
      Severity::Error
    }
  }
}

/// Emits a `tracing` event at a runtime-selected [`Severity`].
#[macro_export]
macro_rules! diag {
  ($severity:expr, $($arg:tt)+) => {
    match $severity {
      $crate::diag::Severity::Info => ::tracing::info!($($arg)+),
      $crate::diag::Severity::Error => ::tracing::error!($($arg)+),
    }
  };
}

/// Printable form of a socket address of any family.
pub struct AddrInfo<'a>(pub &'a SockAddr);

impl fmt::Display for AddrInfo<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(sa) = self.0.as_socket() {
      return write!(f, "{}", sa);
    }
    #[cfg(unix)]
    if self.0.domain() == socket2::Domain::UNIX {
      return match self.0.as_pathname() {
        Some(path) => write!(f, "unix:{}", path.display()),
        None => f.write_str("unix:<unnamed>"),
      };
    }
    write!(f, "AF={} len={}", self.0.family(), self.0.len())
  }
}

/// Printable form of an address that may not have been retrievable.
pub struct MaybeAddrInfo<'a>(pub Option<&'a SockAddr>);

impl fmt::Display for MaybeAddrInfo<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0 {
      Some(addr) => AddrInfo(addr).fmt(f),
      None => f.write_str("<unknown>"),
    }
  }
}
