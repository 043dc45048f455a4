// src/sys.rs

//! Thin wrappers over the socket primitives.
//!
//! Each wrapper reports its failure at the level its caller asks for and hands
//! the raw `io::Error` back so it can still be classified. Queries whose result
//! is optional return `Option` and only warn.

use std::io;
use std::net::Shutdown;

use socket2::{SockAddr, Socket};

use crate::diag::{AddrInfo, Severity};
use crate::diag;
use crate::endpoint::SocketSpec;
use crate::error::ListenError;

pub(crate) fn socket(spec: &SocketSpec, severity: Severity) -> Result<Socket, ListenError> {
  Socket::new(spec.domain, spec.ty, spec.protocol).map_err(|e| {
    diag!(severity, domain = ?spec.domain, ty = ?spec.ty, protocol = ?spec.protocol, error = %e, "socket() failed");
    ListenError::Socket(e)
  })
}

pub(crate) fn bind(socket: &Socket, addr: &SockAddr, severity: Severity) -> Result<(), ListenError> {
  socket.bind(addr).map_err(|e| {
    diag!(severity, addr = %AddrInfo(addr), error = %e, "bind() failed");
    ListenError::Bind {
      addr: AddrInfo(addr).to_string(),
      source: e,
    }
  })
}

pub(crate) fn listen(socket: &Socket, backlog: i32) -> Result<(), ListenError> {
  socket.listen(backlog).map_err(|e| {
    tracing::error!(backlog, error = %e, "listen() failed");
    ListenError::Listen { backlog, source: e }
  })
}

/// Accepts one connection. The error is returned unlogged; the accept loop
/// decides what it means.
pub(crate) fn accept(socket: &Socket) -> io::Result<Socket> {
  socket.accept().map(|(conn, _peer)| conn)
}

pub(crate) fn local_addr(socket: &Socket) -> Option<SockAddr> {
  match socket.local_addr() {
    Ok(addr) => Some(addr),
    Err(e) => {
      tracing::warn!(error = %e, "getsockname() failed");
      None
    }
  }
}

pub(crate) fn peer_addr(socket: &Socket) -> Option<SockAddr> {
  match socket.peer_addr() {
    Ok(addr) => Some(addr),
    Err(e) => {
      tracing::warn!(error = %e, "getpeername() failed");
      None
    }
  }
}

pub(crate) fn shutdown(socket: &Socket) {
  if let Err(e) = socket.shutdown(Shutdown::Both) {
    tracing::info!(error = %e, "shutdown() failed");
  }
}

/// Closes `socket`, reporting a failing close instead of swallowing it.
#[cfg(unix)]
pub(crate) fn close(socket: Socket) {
  use std::os::fd::IntoRawFd;
  let fd = socket.into_raw_fd();
  // SAFETY: `fd` came from an owned socket and is closed exactly once here.
  if unsafe { libc::close(fd) } < 0 {
    tracing::info!(fd, error = %io::Error::last_os_error(), "close() failed");
  }
}

#[cfg(not(unix))]
pub(crate) fn close(socket: Socket) {
  drop(socket);
}
