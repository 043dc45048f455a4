// src/listen/mod.rs

//! The listen/accept engine.
//!
//! One [`Listener::attempt`] creates, configures, binds and listens on a
//! socket, then accepts until a connection is admitted. What happens to the
//! admitted connection depends on the `fork` option: without it the
//! connection replaces the listener inside the endpoint; with it the
//! connection is handed to the installed [`ConnectionSpawner`] and the loop
//! keeps accepting. [`Listener::listen_and_accept`] wraps attempts in the
//! endpoint's retry policy.

mod accept;
pub mod retry;

use std::path::PathBuf;

use socket2::{SockAddr, Socket};

use crate::diag::{AddrInfo, Severity};
use crate::endpoint::{Endpoint, SocketSpec, TcpWrapConfig};
use crate::error::ListenError;
use crate::options::{OptName, OptionSet, Phase};
use crate::peer::{AddressRange, PeerAdmission, PeerCheck};
use crate::spawn::ConnectionSpawner;
use crate::sys;

/// Backlog used when the `backlog` option is absent.
pub const DEFAULT_BACKLOG: i32 = 5;

/// Result of one listen attempt.
#[must_use]
#[derive(Debug)]
pub enum AttemptOutcome {
  /// A connection was admitted and finalized.
  Accepted,
  /// Transient failure; retry after the endpoint's interval.
  RetryLater(ListenError),
  /// Transient failure; retry without pausing.
  RetryNow(ListenError),
  /// Not retryable in any mode.
  Fatal(ListenError),
}

impl AttemptOutcome {
  pub fn is_accepted(&self) -> bool {
    matches!(self, AttemptOutcome::Accepted)
  }

  pub fn error(&self) -> Option<&ListenError> {
    match self {
      AttemptOutcome::Accepted => None,
      AttemptOutcome::RetryLater(e) | AttemptOutcome::RetryNow(e) | AttemptOutcome::Fatal(e) => Some(e),
    }
  }
}

/// Listen engine with its admission policy and, when forking is allowed,
/// the spawner that services admitted connections.
pub struct Listener {
  admission: Box<dyn PeerAdmission>,
  spawner: Option<Box<dyn ConnectionSpawner>>,
}

impl Default for Listener {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for Listener {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Listener")
      .field("may_fork", &self.may_fork())
      .finish_non_exhaustive()
  }
}

impl Listener {
  /// Engine with the standard [`PeerCheck`] policy and forking disabled.
  pub fn new() -> Self {
    Self {
      admission: Box::new(PeerCheck::new()),
      spawner: None,
    }
  }

  pub fn with_admission(mut self, admission: impl PeerAdmission + 'static) -> Self {
    self.admission = Box::new(admission);
    self
  }

  /// Allows the `fork` option; admitted connections go to `spawner`.
  pub fn with_spawner(mut self, spawner: impl ConnectionSpawner + 'static) -> Self {
    self.spawner = Some(Box::new(spawner));
    self
  }

  pub fn may_fork(&self) -> bool {
    self.spawner.is_some()
  }

  /// Listens on `local_addr` until one connection is admitted, retrying
  /// transient failures as the endpoint's retry policy allows.
  ///
  /// Each retry starts from a fresh copy of `template`. On success the
  /// endpoint holds the connected socket, or in a forked child, the child's
  /// connection. `local_addr` is updated to the address actually bound.
  pub fn listen_and_accept(
    &mut self,
    endpoint: &mut Endpoint,
    local_addr: &mut SockAddr,
    options: OptionSet,
    template: &OptionSet,
    spec: SocketSpec,
  ) -> Result<(), ListenError> {
    retry::retry_loop(endpoint, options, template, |endpoint, options, severity| {
      self.attempt_at(endpoint, local_addr, options, &spec, severity)
    })
  }

  /// Runs a single listen attempt. Options consumed by the attempt are
  /// removed from `options`.
  pub fn attempt(
    &mut self,
    endpoint: &mut Endpoint,
    local_addr: &mut SockAddr,
    options: &mut OptionSet,
    spec: &SocketSpec,
  ) -> AttemptOutcome {
    let severity = Severity::for_policy(endpoint.retry_policy());
    self.attempt_at(endpoint, local_addr, options, spec, severity)
  }

  fn attempt_at(
    &mut self,
    endpoint: &mut Endpoint,
    local_addr: &mut SockAddr,
    options: &mut OptionSet,
    spec: &SocketSpec,
    severity: Severity,
  ) -> AttemptOutcome {
    let fork = options.take_bool(OptName::Fork).unwrap_or(false);
    if fork {
      if self.spawner.is_none() {
        tracing::error!(endpoint = %endpoint.name(), "option fork not allowed here");
        return AttemptOutcome::Fatal(ListenError::ForkNotAllowed);
      }
      endpoint.set_does_fork();
    }

    if let Err(e) = options.apply_endpoint(endpoint, Phase::Init) {
      return AttemptOutcome::Fatal(e);
    }

    if fork {
      if let Some(spawner) = self.spawner.as_mut() {
        if let Err(e) = spawner.prepare() {
          tracing::warn!(endpoint = %endpoint.name(), error = %e, "could not install child termination handling");
        }
      }
    }

    let listener = match open_listener(endpoint, local_addr, options, spec, severity) {
      Ok(listener) => listener,
      Err(outcome) => return outcome,
    };

    if let Err(e) = load_peer_rules(endpoint, local_addr, options) {
      return AttemptOutcome::Fatal(e);
    }

    tracing::debug!(endpoint = %endpoint.name(), local = %AddrInfo(local_addr), fork, "starting accept loop");

    let finalized = match self.accept_loop(listener, endpoint, local_addr, options, fork, severity) {
      Ok(finalized) => finalized,
      Err(outcome) => return outcome,
    };

    if !finalized {
      if let Err(e) = options.open_late(endpoint) {
        return AttemptOutcome::Fatal(e);
      }
    }
    AttemptOutcome::Accepted
  }
}

/// Creates, configures, binds and listens. The socket is closed again on
/// every failure path.
fn open_listener(
  endpoint: &mut Endpoint,
  local_addr: &mut SockAddr,
  options: &mut OptionSet,
  spec: &SocketSpec,
  severity: Severity,
) -> Result<Socket, AttemptOutcome> {
  let listener = sys::socket(spec, severity).map_err(AttemptOutcome::RetryLater)?;

  options
    .apply_socket(&listener, Phase::PastSocket)
    .map_err(AttemptOutcome::Fatal)?;
  options.apply_cloexec(&listener).map_err(AttemptOutcome::Fatal)?;
  options
    .apply_socket(&listener, Phase::PreBind)
    .map_err(AttemptOutcome::Fatal)?;
  options
    .apply_socket(&listener, Phase::Bind)
    .map_err(AttemptOutcome::Fatal)?;

  if let Err(e) = sys::bind(&listener, local_addr, severity) {
    sys::close(listener);
    return Err(AttemptOutcome::RetryLater(e));
  }

  let named = named_path(local_addr);
  if let Some(path) = &named {
    endpoint.set_named_path(path.clone());
    options.apply_named(path, Phase::Fd).map_err(AttemptOutcome::Fatal)?;
  }

  if let Some(bound) = sys::local_addr(&listener) {
    *local_addr = bound;
  }

  options
    .apply_socket(&listener, Phase::PastBind)
    .map_err(AttemptOutcome::Fatal)?;
  if let Some(path) = &named {
    options.apply_named(path, Phase::Early).map_err(AttemptOutcome::Fatal)?;
    options.apply_named(path, Phase::PreOpen).map_err(AttemptOutcome::Fatal)?;
  }

  let backlog = listen_backlog(options);
  if let Err(e) = sys::listen(&listener, backlog) {
    sys::close(listener);
    return Err(AttemptOutcome::Fatal(e));
  }
  Ok(listener)
}

/// Backlog for listen(): the `backlog` option, consumed, or [`DEFAULT_BACKLOG`].
fn listen_backlog(options: &mut OptionSet) -> i32 {
  options.take_int(OptName::Backlog).unwrap_or(DEFAULT_BACKLOG)
}

/// Moves the peer admission options into the endpoint.
fn load_peer_rules(endpoint: &mut Endpoint, local_addr: &SockAddr, options: &mut OptionSet) -> Result<(), ListenError> {
  if let Some(spec) = options.take_string(OptName::Range) {
    match AddressRange::parse(&spec, local_addr.domain()) {
      Ok(range) => endpoint.set_range(range),
      Err(e) => {
        tracing::error!(endpoint = %endpoint.name(), range = %spec, error = %e, "invalid range");
        return Err(e);
      }
    }
  }

  let tcpwrap = TcpWrapConfig {
    name: options.take_string(OptName::TcpWrap),
    allow_table: options.take_string(OptName::AllowTable),
    deny_table: options.take_string(OptName::DenyTable),
  };
  if !tcpwrap.is_empty() {
    endpoint.set_tcpwrap(tcpwrap);
  }

  let source_port = options.take_u16(OptName::SourcePort);
  let low_port = options.take_bool(OptName::LowPort).unwrap_or(false);
  endpoint.set_peer_port_rules(source_port, low_port);
  Ok(())
}

#[cfg(unix)]
fn named_path(addr: &SockAddr) -> Option<PathBuf> {
  if addr.domain() != socket2::Domain::UNIX {
    return None;
  }
  addr.as_pathname().map(|p| p.to_path_buf())
}

#[cfg(not(unix))]
fn named_path(_addr: &SockAddr) -> Option<PathBuf> {
  None
}
