// src/listen/accept.rs

use std::io;

use socket2::{SockAddr, Socket};

use super::{AttemptOutcome, Listener};
use crate::diag;
use crate::diag::{AddrInfo, MaybeAddrInfo, Severity};
use crate::endpoint::Endpoint;
use crate::error::ListenError;
use crate::options::{OptionSet, Phase};
use crate::peer::Admission;
use crate::spawn::Spawned;
use crate::sys;

impl Listener {
  /// Accepts on `listener` until a connection is admitted and handed off.
  ///
  /// Returns `Ok(true)` when the connection has already been finalized (a
  /// forked child), `Ok(false)` when the caller still has to finalize the
  /// endpoint. The listening socket is closed on every exit path; in fork mode
  /// the parent never returns `Ok`.
  pub(super) fn accept_loop(
    &mut self,
    listener: Socket,
    endpoint: &mut Endpoint,
    local_addr: &SockAddr,
    options: &mut OptionSet,
    fork: bool,
    severity: Severity,
  ) -> Result<bool, AttemptOutcome> {
    loop {
      tracing::info!(endpoint = %endpoint.name(), local = %AddrInfo(local_addr), "listening");

      let conn = match sys::accept(&listener) {
        Ok(conn) => conn,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
          tracing::info!(endpoint = %endpoint.name(), error = %e, "accept() aborted by peer, continuing");
          continue;
        }
        Err(e) => {
          diag!(severity, endpoint = %endpoint.name(), error = %e, "accept() failed");
          sys::close(listener);
          return Err(AttemptOutcome::RetryLater(ListenError::Accept(e)));
        }
      };

      if let Err(e) = options.apply_cloexec(&conn) {
        sys::close(conn);
        sys::close(listener);
        return Err(AttemptOutcome::Fatal(e));
      }

      let peer = sys::peer_addr(&conn);
      let local = sys::local_addr(&conn);
      tracing::info!(
        endpoint = %endpoint.name(),
        peer = %MaybeAddrInfo(peer.as_ref()),
        local = %MaybeAddrInfo(local.as_ref()),
        "accepting connection"
      );

      if self.admission.check(endpoint, peer.as_ref(), local.as_ref()) == Admission::Deny {
        sys::shutdown(&conn);
        sys::close(conn);
        continue;
      }
      tracing::info!(endpoint = %endpoint.name(), peer = %MaybeAddrInfo(peer.as_ref()), "permitting connection");

      let applied = options
        .apply_socket(&listener, Phase::Fd)
        .and_then(|()| options.apply_socket(&listener, Phase::Connected));
      if let Err(e) = applied {
        sys::close(conn);
        sys::close(listener);
        return Err(AttemptOutcome::Fatal(e));
      }

      if !fork {
        sys::close(listener);
        endpoint.adopt(conn);
        return Ok(false);
      }

      let mut child = endpoint.child_for(conn);
      // Finalized before the handoff so both processes see the same socket
      // state; a failure only costs this one connection.
      if let Err(e) = options.clone().open_late(&mut child) {
        tracing::warn!(endpoint = %endpoint.name(), error = %e, "could not finalize connection, dropping it");
        child.close();
        continue;
      }

      let Some(spawner) = self.spawner.as_mut() else {
        sys::close(listener);
        return Err(AttemptOutcome::Fatal(ListenError::ForkNotAllowed));
      };
      match spawner.spawn(child) {
        Ok(Spawned::Parent { child_id }) => {
          tracing::info!(endpoint = %endpoint.name(), child = %child_id, "connection handed off, still listening");
        }
        Ok(Spawned::Child(child)) => {
          sys::close(listener);
          endpoint.become_child(child);
          return Ok(true);
        }
        Err(e) => {
          diag!(severity, endpoint = %endpoint.name(), error = %e, "could not hand off connection");
          sys::close(listener);
          return Err(AttemptOutcome::RetryLater(ListenError::Spawn(e)));
        }
      }
    }
  }
}
