// src/endpoint.rs

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::peer::AddressRange;
use crate::sys;

/// Default pause between failed listen attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Retry state of an endpoint.
///
/// `retry` counts the remaining retries and is decremented before each one;
/// `forever` ignores the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub retry: u32,
  pub forever: bool,
  pub interval: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retry: 0,
      forever: false,
      interval: DEFAULT_RETRY_INTERVAL,
    }
  }
}

impl RetryPolicy {
  pub fn new(retry: u32, interval: Duration) -> Self {
    Self {
      retry,
      forever: false,
      interval,
    }
  }

  pub fn forever(interval: Duration) -> Self {
    Self {
      retry: 0,
      forever: true,
      interval,
    }
  }

  pub fn is_retrying(&self) -> bool {
    self.forever || self.retry > 0
  }

  /// Same interval, no retries. What a spawned child gets.
  pub fn disabled(&self) -> Self {
    Self {
      retry: 0,
      forever: false,
      interval: self.interval,
    }
  }
}

/// Family, type and protocol for the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketSpec {
  pub domain: Domain,
  pub ty: Type,
  pub protocol: Option<Protocol>,
}

impl SocketSpec {
  pub fn new(domain: Domain, ty: Type, protocol: Option<Protocol>) -> Self {
    Self { domain, ty, protocol }
  }

  /// A stream socket in the family of `addr`.
  pub fn stream_for(addr: &SockAddr) -> Self {
    Self::new(addr.domain(), Type::STREAM, None)
  }
}

/// TCP-wrapper style configuration handed through to the host ACL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpWrapConfig {
  pub name: Option<String>,
  pub allow_table: Option<String>,
  pub deny_table: Option<String>,
}

impl TcpWrapConfig {
  pub fn is_empty(&self) -> bool {
    self.name.is_none() && self.allow_table.is_none() && self.deny_table.is_none()
  }
}

/// One listening endpoint: its configuration, retry state, and once a
/// connection has been handed to it, the connected socket.
///
/// While an attempt runs the listening socket is owned by the engine; the
/// endpoint only ever holds the connected socket that replaces it.
#[derive(Debug)]
pub struct Endpoint {
  name: String,
  socket: Option<Socket>,
  retry: RetryPolicy,
  range: Option<AddressRange>,
  tcpwrap: Option<TcpWrapConfig>,
  source_port: Option<u16>,
  low_port: bool,
  does_fork: bool,
  forked_child: bool,
  unlink_close: bool,
  named_path: Option<PathBuf>,
}

impl Endpoint {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      socket: None,
      retry: RetryPolicy::default(),
      range: None,
      tcpwrap: None,
      source_port: None,
      low_port: false,
      does_fork: false,
      forked_child: false,
      unlink_close: true,
      named_path: None,
    }
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    &self.retry
  }

  pub(crate) fn retry_policy_mut(&mut self) -> &mut RetryPolicy {
    &mut self.retry
  }

  /// The connected socket, once one has been accepted.
  pub fn socket(&self) -> Option<&Socket> {
    self.socket.as_ref()
  }

  pub fn is_connected(&self) -> bool {
    self.socket.is_some()
  }

  /// Takes the connected socket out of the endpoint. The endpoint is closed
  /// afterwards.
  pub fn into_socket(mut self) -> Option<Socket> {
    self.socket.take()
  }

  pub fn range(&self) -> Option<&AddressRange> {
    self.range.as_ref()
  }

  pub fn tcpwrap(&self) -> Option<&TcpWrapConfig> {
    self.tcpwrap.as_ref()
  }

  pub fn source_port(&self) -> Option<u16> {
    self.source_port
  }

  pub fn low_port(&self) -> bool {
    self.low_port
  }

  /// Whether this endpoint was configured to fork a handler per connection.
  pub fn does_fork(&self) -> bool {
    self.does_fork
  }

  /// Whether this endpoint is the child side of a handoff.
  pub fn is_forked_child(&self) -> bool {
    self.forked_child
  }

  pub fn unlink_on_close(&self) -> bool {
    self.unlink_close
  }

  pub fn set_unlink_on_close(&mut self, unlink: bool) {
    self.unlink_close = unlink;
  }

  /// Filesystem path of the bound named endpoint, if any.
  pub fn named_path(&self) -> Option<&Path> {
    self.named_path.as_deref()
  }

  // --- Engine-side mutation ---

  pub(crate) fn set_does_fork(&mut self) {
    self.does_fork = true;
  }

  pub(crate) fn set_named_path(&mut self, path: PathBuf) {
    self.named_path = Some(path);
  }

  pub(crate) fn set_range(&mut self, range: AddressRange) {
    self.range = Some(range);
  }

  pub(crate) fn set_tcpwrap(&mut self, tcpwrap: TcpWrapConfig) {
    self.tcpwrap = Some(tcpwrap);
  }

  pub(crate) fn set_peer_port_rules(&mut self, source_port: Option<u16>, low_port: bool) {
    self.source_port = source_port;
    self.low_port = low_port;
  }

  /// Makes `socket` the active handle, closing any previous one.
  pub(crate) fn adopt(&mut self, socket: Socket) {
    if let Some(old) = self.socket.replace(socket) {
      sys::close(old);
    }
  }

  /// Builds the endpoint a spawned handler receives: it owns `socket`, never
  /// retries, and may not remove the named endpoint on close.
  pub(crate) fn child_for(&self, socket: Socket) -> Endpoint {
    Endpoint {
      name: self.name.clone(),
      socket: Some(socket),
      retry: self.retry.disabled(),
      range: self.range.clone(),
      tcpwrap: self.tcpwrap.clone(),
      source_port: self.source_port,
      low_port: self.low_port,
      does_fork: self.does_fork,
      forked_child: true,
      unlink_close: false,
      named_path: self.named_path.clone(),
    }
  }

  /// Becomes `child`. Used in a forked child, where the parent's copy of this
  /// endpoint must not remove the named endpoint when it goes away.
  pub(crate) fn become_child(&mut self, child: Endpoint) {
    self.unlink_close = false;
    *self = child;
  }

  /// Closes the endpoint explicitly, reporting close failures.
  pub fn close(mut self) {
    if let Some(socket) = self.socket.take() {
      sys::close(socket);
    }
  }
}

impl Drop for Endpoint {
  fn drop(&mut self) {
    if let Some(socket) = self.socket.take() {
      sys::close(socket);
    }
    if !self.unlink_close {
      return;
    }
    if let Some(path) = self.named_path.take() {
      match std::fs::remove_file(&path) {
        Ok(_) => {
          tracing::debug!(endpoint = %self.name, path = ?path, "Removed named endpoint on close.")
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
          tracing::trace!(endpoint = %self.name, path = ?path, "Named endpoint already gone on close.");
        }
        Err(e) => {
          tracing::warn!(endpoint = %self.name, path = ?path, error = %e, "Failed to remove named endpoint on close.");
        }
      }
    }
  }
}
