// src/spawn.rs

//! Handoff of admitted connections to an independent task.
//!
//! With the `fork` option the listener keeps accepting while every admitted
//! connection is serviced elsewhere. A [`ConnectionSpawner`] decides where:
//! on a thread, on tokio's blocking pool, or in a forked child process.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::endpoint::Endpoint;

/// Result of handing a connection off.
#[derive(Debug)]
pub enum Spawned {
  /// The connection now belongs to another task; keep listening.
  Parent { child_id: String },
  /// The caller itself is now the child and must service `Endpoint`.
  Child(Endpoint),
}

pub trait ConnectionSpawner: Send {
  /// Installs child-termination handling. Called before the listening socket
  /// is created whenever forking is requested.
  fn prepare(&mut self) -> io::Result<()> {
    Ok(())
  }

  /// Transfers exclusive ownership of `child` (which holds the accepted
  /// socket) to an independent task.
  fn spawn(&mut self, child: Endpoint) -> io::Result<Spawned>;
}

/// Connection handler run by the in-process spawners.
pub type Handler = Arc<dyn Fn(Endpoint) + Send + Sync>;

/// Services each connection on its own OS thread.
pub struct ThreadSpawner {
  handler: Handler,
  children: Vec<JoinHandle<()>>,
  spawned: u64,
}

impl ThreadSpawner {
  pub fn new(handler: impl Fn(Endpoint) + Send + Sync + 'static) -> Self {
    Self {
      handler: Arc::new(handler),
      children: Vec::new(),
      spawned: 0,
    }
  }

  /// Number of handler threads not yet reaped.
  pub fn live_children(&self) -> usize {
    self.children.len()
  }

  /// Joins handler threads that have finished.
  fn reap(&mut self) {
    let (done, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.children)
      .into_iter()
      .partition(JoinHandle::is_finished);
    self.children = live;
    for handle in done {
      let name = handle.thread().name().map(str::to_owned);
      if handle.join().is_err() {
        tracing::warn!(thread = ?name, "connection handler panicked");
      }
    }
  }
}

impl std::fmt::Debug for ThreadSpawner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ThreadSpawner")
      .field("live_children", &self.children.len())
      .field("spawned", &self.spawned)
      .finish()
  }
}

impl ConnectionSpawner for ThreadSpawner {
  fn prepare(&mut self) -> io::Result<()> {
    self.reap();
    Ok(())
  }

  fn spawn(&mut self, child: Endpoint) -> io::Result<Spawned> {
    self.reap();
    self.spawned += 1;
    let name = format!("relisten-conn-{}", self.spawned);
    let handler = self.handler.clone();
    let handle = thread::Builder::new().name(name.clone()).spawn(move || handler(child))?;
    self.children.push(handle);
    Ok(Spawned::Parent { child_id: name })
  }
}

#[cfg(all(unix, feature = "fork"))]
pub use self::fork::ForkSpawner;

#[cfg(all(unix, feature = "fork"))]
mod fork {
  use std::io;

  use nix::sys::signal::{self, SigHandler, Signal};
  use nix::unistd::{self, ForkResult};

  use super::{ConnectionSpawner, Spawned};
  use crate::endpoint::Endpoint;

  type ChildHook = Box<dyn FnMut() -> io::Result<()> + Send>;

  /// Services each connection in a forked child process.
  ///
  /// Only sound while the calling process is single-threaded.
  #[derive(Default)]
  pub struct ForkSpawner {
    in_child: Option<ChildHook>,
  }

  impl ForkSpawner {
    pub fn new() -> Self {
      Self::default()
    }

    /// Runs `hook` in every child right after the fork, before the child
    /// takes over the connection. Use it to drop parent-only state such as
    /// locks. A failing hook terminates the child with status 1.
    pub fn with_child_hook(mut self, hook: impl FnMut() -> io::Result<()> + Send + 'static) -> Self {
      self.in_child = Some(Box::new(hook));
      self
    }
  }

  impl std::fmt::Debug for ForkSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ForkSpawner")
        .field("in_child", &self.in_child.is_some())
        .finish()
    }
  }

  impl ConnectionSpawner for ForkSpawner {
    fn prepare(&mut self) -> io::Result<()> {
      // Ignoring SIGCHLD makes the kernel reap terminated children.
      // SAFETY: installs SIG_IGN, no handler code runs.
      unsafe { signal::signal(Signal::SIGCHLD, SigHandler::SigIgn) }
        .map(|_| ())
        .map_err(io::Error::from)
    }

    fn spawn(&mut self, child: Endpoint) -> io::Result<Spawned> {
      // SAFETY: the child only continues the single-threaded accept path.
      match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child: pid }) => {
          // The child owns the accepted socket now.
          child.close();
          Ok(Spawned::Parent {
            child_id: pid.to_string(),
          })
        }
        Ok(ForkResult::Child) => {
          if let Some(hook) = self.in_child.as_mut() {
            if let Err(e) = hook() {
              tracing::error!(error = %e, "post-fork cleanup in child failed");
              std::process::exit(1);
            }
          }
          Ok(Spawned::Child(child))
        }
        Err(errno) => Err(io::Error::from(errno)),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::mpsc;
  use std::time::Duration;

  #[test]
  fn test_thread_spawner_runs_handler_with_child() {
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let mut spawner = ThreadSpawner::new(move |ep: Endpoint| {
      let _ = tx.lock().unwrap().send((ep.is_forked_child(), ep.retry_policy().is_retrying()));
    });

    let parent = Endpoint::new("TCP-LISTEN");
    let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None).unwrap();
    let outcome = spawner.spawn(parent.child_for(socket)).unwrap();
    assert!(matches!(outcome, Spawned::Parent { ref child_id } if child_id == "relisten-conn-1"));

    let (forked_child, retrying) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(forked_child);
    assert!(!retrying);
  }

  #[test]
  fn test_thread_spawner_reaps_finished_children() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_handler = ran.clone();
    let mut spawner = ThreadSpawner::new(move |_ep: Endpoint| {
      ran_in_handler.fetch_add(1, Ordering::SeqCst);
    });
    let parent = Endpoint::new("TCP-LISTEN");
    for _ in 0..3 {
      let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None).unwrap();
      spawner.spawn(parent.child_for(socket)).unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while spawner.live_children() > 0 && std::time::Instant::now() < deadline {
      spawner.prepare().unwrap();
      thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ran.load(Ordering::SeqCst), 3);
    assert_eq!(spawner.live_children(), 0);
  }
}
