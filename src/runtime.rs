// src/runtime.rs

//! Tokio integration: the blocking engine on the blocking pool, and a spawner
//! that services connections there too.

use std::io;
use std::sync::Arc;

use socket2::SockAddr;
use tokio::runtime::Handle;

use crate::endpoint::{Endpoint, SocketSpec};
use crate::error::ListenError;
use crate::listen::Listener;
use crate::options::OptionSet;
use crate::spawn::{ConnectionSpawner, Handler, Spawned};

/// Everything handed back by [`listen_and_accept_async`] on success.
#[derive(Debug)]
pub struct Accepted {
  pub listener: Listener,
  pub endpoint: Endpoint,
  /// The address the listener was actually bound to.
  pub local_addr: SockAddr,
}

/// Runs [`Listener::listen_and_accept`] on tokio's blocking pool.
///
/// The listener and endpoint move into the blocking task and come back in
/// [`Accepted`]. Retry pauses happen on the blocking thread, never on a
/// runtime worker.
pub async fn listen_and_accept_async(
  mut listener: Listener,
  mut endpoint: Endpoint,
  mut local_addr: SockAddr,
  options: OptionSet,
  template: OptionSet,
  spec: SocketSpec,
) -> Result<Accepted, ListenError> {
  tokio::task::spawn_blocking(move || {
    listener.listen_and_accept(&mut endpoint, &mut local_addr, options, &template, spec)?;
    Ok(Accepted {
      listener,
      endpoint,
      local_addr,
    })
  })
  .await
  .map_err(|je| ListenError::Internal(format!("Blocking listen task join error: {}", je)))?
}

/// Services each connection on the blocking pool of a tokio runtime.
pub struct TokioSpawner {
  handle: Handle,
  handler: Handler,
  spawned: u64,
}

impl TokioSpawner {
  pub fn new(handle: Handle, handler: impl Fn(Endpoint) + Send + Sync + 'static) -> Self {
    Self {
      handle,
      handler: Arc::new(handler),
      spawned: 0,
    }
  }

  /// Spawner bound to the runtime the caller is running in.
  pub fn current(handler: impl Fn(Endpoint) + Send + Sync + 'static) -> io::Result<Self> {
    let handle = Handle::try_current().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Self::new(handle, handler))
  }
}

impl std::fmt::Debug for TokioSpawner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TokioSpawner").field("spawned", &self.spawned).finish()
  }
}

impl ConnectionSpawner for TokioSpawner {
  fn spawn(&mut self, child: Endpoint) -> io::Result<Spawned> {
    self.spawned += 1;
    let child_id = format!("relisten-task-{}", self.spawned);
    let handler = self.handler.clone();
    let task_id = child_id.clone();
    self.handle.spawn_blocking(move || {
      tracing::trace!(child = %task_id, "connection task started");
      handler(child);
    });
    Ok(Spawned::Parent { child_id })
  }
}
