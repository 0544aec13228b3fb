//! CIDR - IPv4 blocks and equal-size subnet carving

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Smallest subnet a VPC accepts
pub const MAX_SUBNET_PREFIX: u8 = 28;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CidrError {
    #[error("CIDR block must be in format x.x.x.x/n, got '{0}'")]
    Format(String),

    #[error("Invalid IP address in CIDR block '{0}'")]
    Address(String),

    #[error("Prefix length must be between 0 and 32 in CIDR block '{0}'")]
    Prefix(String),

    #[error("CIDR block '{0}' has host bits set")]
    HostBits(String),

    #[error("Cannot carve {count} subnets out of {block}: they would be smaller than /{max}")]
    TooSmall { block: String, count: usize, max: u8 },
}

/// An IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Split into `count` equal blocks of the smallest power of two that fits,
    /// allocated in address order.
    pub fn split(&self, count: usize) -> Result<Vec<Ipv4Cidr>, CidrError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let extra_bits = usize::BITS - (count - 1).leading_zeros();
        let new_prefix = u32::from(self.prefix) + extra_bits;
        if new_prefix > u32::from(MAX_SUBNET_PREFIX) {
            return Err(CidrError::TooSmall {
                block: self.to_string(),
                count,
                max: MAX_SUBNET_PREFIX,
            });
        }

        // A /0 block spans 2^32 addresses, one past u32
        let base = u64::from(u32::from(self.network));
        let step = 1u64 << (32 - new_prefix);
        Ok((0..count as u64)
            .map(|i| Ipv4Cidr {
                network: Ipv4Addr::from((base + i * step) as u32),
                prefix: new_prefix as u8,
            })
            .collect())
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CidrError::Format(s.to_string()))?;
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| CidrError::Address(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| CidrError::Prefix(s.to_string()))?;
        if prefix > 32 {
            return Err(CidrError::Prefix(s.to_string()));
        }

        let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
        if u32::from(network) & !mask != 0 {
            return Err(CidrError::HostBits(s.to_string()));
        }

        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
