//! Connection targets
//!
//! A target is either a numeric address or a hostname. Both are reduced to
//! a single host string before the engine sees them; name resolution is
//! left to the engine.

use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Numeric address
    Addr(IpAddr),
    /// Hostname, resolved by the engine
    Host(String),
}

impl Target {
    /// Host parameter handed to the engine
    pub fn host(&self) -> Cow<'_, str> {
        match self {
            Target::Addr(addr) => Cow::Owned(addr.to_string()),
            Target::Host(name) => Cow::Borrowed(name),
        }
    }

    /// Whether this target is a numeric address
    pub fn is_addr(&self) -> bool {
        matches!(self, Target::Addr(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host())
    }
}

impl From<IpAddr> for Target {
    fn from(addr: IpAddr) -> Self {
        Target::Addr(addr)
    }
}

impl From<Ipv4Addr> for Target {
    fn from(addr: Ipv4Addr) -> Self {
        Target::Addr(IpAddr::V4(addr))
    }
}

impl From<Ipv6Addr> for Target {
    fn from(addr: Ipv6Addr) -> Self {
        Target::Addr(IpAddr::V6(addr))
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        let s = s.trim();
        match s.parse::<IpAddr>() {
            Ok(addr) => Target::Addr(addr),
            Err(_) => Target::Host(s.to_string()),
        }
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::from(s.as_str())
    }
}

impl From<&String> for Target {
    fn from(s: &String) -> Self {
        Target::from(s.as_str())
    }
}
