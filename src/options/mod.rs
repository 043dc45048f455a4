// src/options/mod.rs

//! Declarative configuration applied at ordered lifecycle checkpoints.
//!
//! Values arrive here already parsed. The engine either retrieves a few named
//! values directly (which consumes them) or asks the set to apply everything
//! belonging to a [`Phase`]. Applied records are removed from the set, so an
//! option set is single-use and a fresh copy must be taken from the template
//! before every new attempt.

mod apply;

use crate::error::ListenError;

/// Named checkpoints in the life of a listening socket, in the order the
/// engine visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
  Init,
  PastSocket,
  PreBind,
  Bind,
  Fd,
  PastBind,
  Early,
  PreOpen,
  Listen,
  Accept,
  PastAccept,
  Connected,
  Late,
}

/// Option groups. Used to decide which kind of target an option can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
  Fd,
  Socket,
  Ip,
  Ip6,
  Tcp,
  Named,
  Listen,
  Child,
  Range,
  TcpWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptType {
  Bool,
  Int,
  UShort,
  String,
}

/// Recognized option names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OptName {
  // Retrieved directly by the engine
  Fork,
  Backlog,
  Range,
  SourcePort,
  LowPort,
  TcpWrap,
  AllowTable,
  DenyTable,
  // Descriptor state
  UnlinkClose,
  // Socket level
  Cloexec,
  ReuseAddr,
  ReusePort,
  Ipv6Only,
  RcvBuf,
  SndBuf,
  KeepAlive,
  NoDelay,
  BindToDevice,
  // Filesystem-named endpoints
  Perm,
  // Connected descriptor
  NonBlock,
}

/// Static description of an option: its name, group, phase and value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptDesc {
  pub name: &'static str,
  pub group: Group,
  pub phase: Phase,
  pub ty: OptType,
}

const fn desc(name: &'static str, group: Group, phase: Phase, ty: OptType) -> OptDesc {
  OptDesc { name, group, phase, ty }
}

impl OptName {
  pub const fn desc(self) -> OptDesc {
    use OptType::*;
    match self {
      OptName::Fork => desc("fork", Group::Child, Phase::PastAccept, Bool),
      OptName::Backlog => desc("backlog", Group::Listen, Phase::Listen, Int),
      OptName::Range => desc("range", Group::Range, Phase::Accept, String),
      OptName::SourcePort => desc("sourceport", Group::Ip, Phase::Late, UShort),
      OptName::LowPort => desc("lowport", Group::Ip, Phase::Late, Bool),
      OptName::TcpWrap => desc("tcpwrap", Group::TcpWrap, Phase::Accept, String),
      OptName::AllowTable => desc("allow-table", Group::TcpWrap, Phase::Accept, String),
      OptName::DenyTable => desc("deny-table", Group::TcpWrap, Phase::Accept, String),
      OptName::UnlinkClose => desc("unlink-close", Group::Named, Phase::Init, Bool),
      OptName::Cloexec => desc("cloexec", Group::Fd, Phase::PastSocket, Bool),
      OptName::ReuseAddr => desc("reuseaddr", Group::Socket, Phase::PastSocket, Bool),
      OptName::ReusePort => desc("reuseport", Group::Socket, Phase::PastSocket, Bool),
      OptName::Ipv6Only => desc("ipv6only", Group::Ip6, Phase::PreBind, Bool),
      OptName::RcvBuf => desc("rcvbuf", Group::Socket, Phase::PastSocket, Int),
      OptName::SndBuf => desc("sndbuf", Group::Socket, Phase::PastSocket, Int),
      OptName::KeepAlive => desc("keepalive", Group::Socket, Phase::PastSocket, Bool),
      OptName::NoDelay => desc("nodelay", Group::Tcp, Phase::PastSocket, Bool),
      OptName::BindToDevice => desc("bindtodevice", Group::Socket, Phase::Bind, String),
      OptName::Perm => desc("perm", Group::Named, Phase::Fd, Int),
      OptName::NonBlock => desc("nonblock", Group::Fd, Phase::Late, Bool),
    }
  }

  pub const fn as_str(self) -> &'static str {
    self.desc().name
  }

  pub const fn phase(self) -> Phase {
    self.desc().phase
  }

  pub const fn group(self) -> Group {
    self.desc().group
  }
}

/// An already-validated option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptValue {
  Bool(bool),
  Int(i32),
  UShort(u16),
  String(String),
}

impl OptValue {
  fn ty(&self) -> OptType {
    match self {
      OptValue::Bool(_) => OptType::Bool,
      OptValue::Int(_) => OptType::Int,
      OptValue::UShort(_) => OptType::UShort,
      OptValue::String(_) => OptType::String,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptRecord {
  name: OptName,
  value: OptValue,
}

impl OptRecord {
  /// Pairs a name with a value, rejecting values of the wrong type.
  pub fn new(name: OptName, value: OptValue) -> Result<Self, ListenError> {
    if value.ty() != name.desc().ty {
      return Err(ListenError::InvalidOptionValue { name: name.as_str() });
    }
    Ok(Self { name, value })
  }

  pub fn name(&self) -> OptName {
    self.name
  }

  pub fn value(&self) -> &OptValue {
    &self.value
  }

  pub fn phase(&self) -> Phase {
    self.name.phase()
  }
}

/// Ordered collection of option records.
///
/// `Clone` is how a live set is rebuilt from its template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
  records: Vec<OptRecord>,
}

impl OptionSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, record: OptRecord) {
    self.records.push(record);
  }

  /// Builder-style [`push`](Self::push) with type checking.
  pub fn with(mut self, name: OptName, value: OptValue) -> Result<Self, ListenError> {
    self.push(OptRecord::new(name, value)?);
    Ok(self)
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn contains(&self, name: OptName) -> bool {
    self.records.iter().any(|r| r.name == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &OptRecord> {
    self.records.iter()
  }

  // --- Retrieval ---
  // Retrieving an option removes its first occurrence from the set.

  fn take(&mut self, name: OptName) -> Option<OptValue> {
    let pos = self.records.iter().position(|r| r.name == name)?;
    Some(self.records.remove(pos).value)
  }

  pub fn take_bool(&mut self, name: OptName) -> Option<bool> {
    match self.take(name)? {
      OptValue::Bool(b) => Some(b),
      _ => None,
    }
  }

  pub fn take_int(&mut self, name: OptName) -> Option<i32> {
    match self.take(name)? {
      OptValue::Int(i) => Some(i),
      _ => None,
    }
  }

  pub fn take_u16(&mut self, name: OptName) -> Option<u16> {
    match self.take(name)? {
      OptValue::UShort(u) => Some(u),
      _ => None,
    }
  }

  pub fn take_string(&mut self, name: OptName) -> Option<String> {
    match self.take(name)? {
      OptValue::String(s) => Some(s),
      _ => None,
    }
  }

  /// Reads a boolean without consuming it.
  pub fn peek_bool(&self, name: OptName) -> Option<bool> {
    self.records.iter().find(|r| r.name == name).and_then(|r| match r.value {
      OptValue::Bool(b) => Some(b),
      _ => None,
    })
  }

  /// Removes and returns every record of `phase` for which `accepts` holds,
  /// preserving their relative order.
  fn drain_phase(&mut self, phase: Phase, accepts: impl Fn(OptName) -> bool) -> Vec<OptRecord> {
    let mut taken = Vec::new();
    let mut kept = Vec::with_capacity(self.records.len());
    for record in self.records.drain(..) {
      if record.phase() == phase && accepts(record.name) {
        taken.push(record);
      } else {
        kept.push(record);
      }
    }
    self.records = kept;
    taken
  }
}
