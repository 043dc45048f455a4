// src/peer/range.rs

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use socket2::Domain;

use crate::error::ListenError;

/// Admitted peer address range: a network address plus mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressRange {
  V4 { net: Ipv4Addr, mask: Ipv4Addr },
  V6 { net: Ipv6Addr, mask: Ipv6Addr },
}

impl AddressRange {
  /// Parses a range for a listener of family `domain`.
  ///
  /// IPv4 accepts `ADDR/BITS` and `ADDR:MASK`; IPv6 accepts `[ADDR]/BITS` and
  /// `ADDR/BITS`. Other families have no ranges.
  pub fn parse(spec: &str, domain: Domain) -> Result<Self, ListenError> {
    let invalid = || ListenError::InvalidRange(spec.to_string());
    if domain == Domain::IPV4 {
      let (addr, mask) = if let Some((addr, bits)) = spec.split_once('/') {
        (addr, v4_mask_from_bits(bits).ok_or_else(invalid)?)
      } else if let Some((addr, mask)) = spec.split_once(':') {
        (addr, mask.parse::<Ipv4Addr>().map_err(|_| invalid())?)
      } else {
        return Err(invalid());
      };
      let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
      Ok(AddressRange::V4 {
        net: Ipv4Addr::from(u32::from(addr) & u32::from(mask)),
        mask,
      })
    } else if domain == Domain::IPV6 {
      let (addr, bits) = spec.rsplit_once('/').ok_or_else(invalid)?;
      let addr = addr.strip_prefix('[').and_then(|a| a.strip_suffix(']')).unwrap_or(addr);
      let addr: Ipv6Addr = addr.parse().map_err(|_| invalid())?;
      let mask = v6_mask_from_bits(bits).ok_or_else(invalid)?;
      Ok(AddressRange::V6 {
        net: Ipv6Addr::from(u128::from(addr) & u128::from(mask)),
        mask,
      })
    } else {
      Err(ListenError::InvalidRange(format!(
        "{} (ranges are only supported for IPv4 and IPv6 listeners)",
        spec
      )))
    }
  }

  pub fn contains(&self, ip: IpAddr) -> bool {
    match (self, ip) {
      (AddressRange::V4 { net, mask }, IpAddr::V4(v4)) => u32::from(v4) & u32::from(*mask) == u32::from(*net),
      (AddressRange::V4 { .. }, IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
        Some(v4) => self.contains(IpAddr::V4(v4)),
        None => false,
      },
      (AddressRange::V6 { net, mask }, IpAddr::V6(v6)) => u128::from(v6) & u128::from(*mask) == u128::from(*net),
      (AddressRange::V6 { .. }, IpAddr::V4(_)) => false,
    }
  }
}

fn v4_mask_from_bits(bits: &str) -> Option<Ipv4Addr> {
  let bits: u32 = bits.parse().ok()?;
  if bits > 32 {
    return None;
  }
  Some(Ipv4Addr::from(u32::MAX.checked_shl(32 - bits).unwrap_or(0)))
}

fn v6_mask_from_bits(bits: &str) -> Option<Ipv6Addr> {
  let bits: u32 = bits.parse().ok()?;
  if bits > 128 {
    return None;
  }
  Some(Ipv6Addr::from(u128::MAX.checked_shl(128 - bits).unwrap_or(0)))
}
