//! IPv4 CIDR blocks

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// An IPv4 network in CIDR notation with all host bits zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CidrParseError(String);

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

impl Ipv4Cidr {
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self, CidrParseError> {
        if prefix > 32 {
            return Err(CidrParseError(format!("prefix length {} is out of range", prefix)));
        }
        if u32::from(network) & !mask(prefix) != 0 {
            return Err(CidrParseError(format!(
                "{}/{} has host bits set",
                network, prefix
            )));
        }
        Ok(Self { network, prefix })
    }

    /// A single host (`/32`)
    pub fn host(addr: Ipv4Addr) -> Self {
        Self {
            network: addr,
            prefix: 32,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Split into consecutive blocks of `new_prefix`
    ///
    /// Returns an empty iterator when `new_prefix` is shorter than this
    /// block's prefix or longer than 32.
    pub fn subnets(&self, new_prefix: u8) -> impl Iterator<Item = Ipv4Cidr> + use<> {
        let valid = new_prefix >= self.prefix && new_prefix <= 32;
        let count: u64 = if valid {
            1u64 << (new_prefix - self.prefix)
        } else {
            0
        };
        let base = u32::from(self.network) as u64;
        let step = 1u64 << (32 - new_prefix.min(32) as u32);
        (0..count).map(move |i| Ipv4Cidr {
            network: Ipv4Addr::from((base + i * step) as u32),
            prefix: new_prefix,
        })
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| CidrParseError(format!("'{}' is not in a.b.c.d/n form", s)))?;

        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| CidrParseError(format!("'{}' is not an IPv4 address", addr)))?;

        // u8 parsing would accept a leading '+'
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CidrParseError(format!("'{}' is not a prefix length", prefix)));
        }
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| CidrParseError(format!("'{}' is not a prefix length", prefix)))?;

        Ipv4Cidr::new(network, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
