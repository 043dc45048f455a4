// src/peer/mod.rs

//! Admission of accepted peers, independent of the kernel's accept().

mod range;

pub use range::AddressRange;

use std::net::SocketAddr;
use std::ops::RangeInclusive;

use socket2::SockAddr;

use crate::diag::MaybeAddrInfo;
use crate::endpoint::{Endpoint, TcpWrapConfig};

/// Peer ports accepted by the `lowport` option.
pub const LOW_PORTS: RangeInclusive<u16> = 640..=1023;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  Admit,
  Deny,
}

/// Decides whether an accepted connection may be serviced.
///
/// Addresses are `None` when they could not be queried. Implementations must
/// not have side effects on the connection.
pub trait PeerAdmission: Send + Sync {
  fn check(&self, endpoint: &Endpoint, peer: Option<&SockAddr>, local: Option<&SockAddr>) -> Admission;
}

impl<F> PeerAdmission for F
where
  F: Fn(&Endpoint, Option<&SockAddr>, Option<&SockAddr>) -> Admission + Send + Sync,
{
  fn check(&self, endpoint: &Endpoint, peer: Option<&SockAddr>, local: Option<&SockAddr>) -> Admission {
    self(endpoint, peer, local)
  }
}

/// Host/service ACL consulted when the endpoint carries TCP-wrapper
/// configuration.
pub trait HostAcl: Send + Sync {
  fn allows(&self, config: &TcpWrapConfig, peer: Option<&SockAddr>, local: Option<&SockAddr>) -> bool;
}

/// The standard admission policy: address range, source port, low port, and
/// an optional host ACL.
#[derive(Default)]
pub struct PeerCheck {
  acl: Option<Box<dyn HostAcl>>,
}

impl std::fmt::Debug for PeerCheck {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PeerCheck").field("acl", &self.acl.is_some()).finish()
  }
}

impl PeerCheck {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_acl(acl: impl HostAcl + 'static) -> Self {
    Self { acl: Some(Box::new(acl)) }
  }

  fn check_ports(&self, endpoint: &Endpoint, peer: Option<&SockAddr>, inet: Option<SocketAddr>) -> Admission {
    let has_port_rule = endpoint.source_port().is_some() || endpoint.low_port();
    if !has_port_rule {
      return Admission::Admit;
    }
    let port = match (peer, inet) {
      (_, Some(sa)) => sa.port(),
      // Peer of a family without ports.
      (Some(_), None) => return Admission::Admit,
      (None, None) => {
        tracing::info!("refusing connection from unknown peer due to port restriction");
        return Admission::Deny;
      }
    };
    if let Some(wanted) = endpoint.source_port() {
      if port != wanted {
        tracing::info!(port, wanted, "refusing connection due to wrong source port");
        return Admission::Deny;
      }
    }
    if endpoint.low_port() && !LOW_PORTS.contains(&port) {
      tracing::info!(port, "refusing connection due to lowport option");
      return Admission::Deny;
    }
    Admission::Admit
  }
}

impl PeerAdmission for PeerCheck {
  fn check(&self, endpoint: &Endpoint, peer: Option<&SockAddr>, local: Option<&SockAddr>) -> Admission {
    let inet = peer.and_then(SockAddr::as_socket);

    if let Some(range) = endpoint.range() {
      let in_range = inet.map_or(false, |sa| range.contains(sa.ip()));
      if !in_range {
        tracing::info!(peer = %MaybeAddrInfo(peer), "refusing connection due to range option");
        return Admission::Deny;
      }
    }

    if self.check_ports(endpoint, peer, inet) == Admission::Deny {
      return Admission::Deny;
    }

    if let Some(config) = endpoint.tcpwrap().filter(|c| !c.is_empty()) {
      match &self.acl {
        Some(acl) if acl.allows(config, peer, local) => {}
        Some(_) => {
          tracing::info!(peer = %MaybeAddrInfo(peer), "refusing connection due to host ACL");
          return Admission::Deny;
        }
        None => {
          tracing::warn!(peer = %MaybeAddrInfo(peer), "tcpwrap configured but no host ACL installed, refusing connection");
          return Admission::Deny;
        }
      }
    }

    Admission::Admit
  }
}
