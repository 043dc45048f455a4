// src/options/apply.rs

use std::io;
use std::path::Path;

use socket2::Socket;

use super::{OptName, OptRecord, OptValue, OptionSet, Phase};
use crate::endpoint::Endpoint;
use crate::error::ListenError;

fn apply_err(record: &OptRecord, phase: Phase, source: io::Error) -> ListenError {
  ListenError::ApplyOption {
    name: record.name().as_str(),
    phase,
    source,
  }
}

fn acts_on_socket(name: OptName) -> bool {
  matches!(
    name,
    OptName::ReuseAddr
      | OptName::ReusePort
      | OptName::Ipv6Only
      | OptName::RcvBuf
      | OptName::SndBuf
      | OptName::KeepAlive
      | OptName::NoDelay
      | OptName::BindToDevice
      | OptName::NonBlock
  )
}

fn set_on_socket(socket: &Socket, record: &OptRecord) -> io::Result<()> {
  match (record.name(), record.value()) {
    (OptName::ReuseAddr, OptValue::Bool(b)) => socket.set_reuse_address(*b),
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    (OptName::ReusePort, OptValue::Bool(b)) => socket.set_reuse_port(*b),
    (OptName::Ipv6Only, OptValue::Bool(b)) => socket.set_only_v6(*b),
    (OptName::RcvBuf, OptValue::Int(n)) => socket.set_recv_buffer_size(usize::try_from(*n).unwrap_or(0)),
    (OptName::SndBuf, OptValue::Int(n)) => socket.set_send_buffer_size(usize::try_from(*n).unwrap_or(0)),
    (OptName::KeepAlive, OptValue::Bool(b)) => socket.set_keepalive(*b),
    (OptName::NoDelay, OptValue::Bool(b)) => socket.set_nodelay(*b),
    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    (OptName::BindToDevice, OptValue::String(dev)) => socket.bind_device(Some(dev.as_bytes())),
    (OptName::NonBlock, OptValue::Bool(b)) => socket.set_nonblocking(*b),
    (name, _) => Err(io::Error::new(
      io::ErrorKind::Unsupported,
      format!("option {} is not supported on this platform", name.as_str()),
    )),
  }
}

#[cfg(unix)]
fn set_on_path(path: &Path, record: &OptRecord) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  match (record.name(), record.value()) {
    (OptName::Perm, OptValue::Int(mode)) => {
      let mode = u32::try_from(*mode).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
      std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }
    _ => Ok(()),
  }
}

#[cfg(not(unix))]
fn set_on_path(_path: &Path, _record: &OptRecord) -> io::Result<()> {
  Ok(())
}

impl OptionSet {
  /// Applies every socket-level option of `phase` to `socket`.
  ///
  /// An empty matching subset is a no-op. Applied records are removed.
  pub fn apply_socket(&mut self, socket: &Socket, phase: Phase) -> Result<(), ListenError> {
    for record in self.drain_phase(phase, acts_on_socket) {
      set_on_socket(socket, &record).map_err(|e| apply_err(&record, phase, e))?;
      tracing::debug!(option = record.name().as_str(), ?phase, "applied socket option");
    }
    Ok(())
  }

  /// Applies options of `phase` that act on the filesystem entry of a named
  /// endpoint.
  pub fn apply_named(&mut self, path: &Path, phase: Phase) -> Result<(), ListenError> {
    for record in self.drain_phase(phase, |n| n == OptName::Perm) {
      set_on_path(path, &record).map_err(|e| apply_err(&record, phase, e))?;
      tracing::debug!(option = record.name().as_str(), ?phase, path = ?path, "applied named option");
    }
    Ok(())
  }

  /// Applies options of `phase` that configure the endpoint itself rather
  /// than any descriptor.
  pub fn apply_endpoint(&mut self, endpoint: &mut Endpoint, phase: Phase) -> Result<(), ListenError> {
    for record in self.drain_phase(phase, |n| n == OptName::UnlinkClose) {
      if let OptValue::Bool(b) = record.value() {
        endpoint.set_unlink_on_close(*b);
      }
    }
    Ok(())
  }

  /// Sets close-on-exec on `socket` according to the `cloexec` option
  /// (default on). Does not consume the option; it applies to the listening
  /// socket and to every accepted one.
  pub fn apply_cloexec(&self, socket: &Socket) -> Result<(), ListenError> {
    let cloexec = self.peek_bool(OptName::Cloexec).unwrap_or(true);
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_cloexec(cloexec).map_err(|source| ListenError::ApplyOption {
      name: OptName::Cloexec.as_str(),
      phase: Phase::PastSocket,
      source,
    })?;
    #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
    let _ = (socket, cloexec);
    Ok(())
  }

  /// Deferred finalization of a connected endpoint: applies the LATE phase to
  /// its connected socket and reports options that were never used.
  pub fn open_late(&mut self, endpoint: &mut Endpoint) -> Result<(), ListenError> {
    if let Some(socket) = endpoint.socket() {
      self.apply_socket(socket, Phase::Late)?;
    }
    for leftover in self.records.iter().filter(|r| r.name() != OptName::Cloexec) {
      tracing::warn!(
        option = leftover.name().as_str(),
        phase = ?leftover.phase(),
        "option not applicable here, ignored"
      );
    }
    Ok(())
  }
}
