//! Outbound fetch policy: which hosts and address ranges may never be contacted

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{GovbriefError, Result};

/// Hostnames refused before any DNS lookup
pub const DEFAULT_BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "metadata",
    "metadata.google.internal",
    "metadata.goog",
    "metadata.azure.internal",
    "instance-data",
    "instance-data.ec2.internal",
];

/// Private, loopback, link-local and reserved ranges
pub const DEFAULT_BLOCKED_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
    "2001:db8::/32",
];

/// An address block in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    base: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn new(base: IpAddr, prefix: u8) -> Result<Self> {
        let max = match base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(GovbriefError::Validation {
                message: format!("prefix /{prefix} is longer than {max} bits"),
            });
        }
        Ok(Self { base, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.base, ip) {
            (IpAddr::V4(base), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix);
                u32::from(base) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(base), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix);
                u128::from(base) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpRange {
    type Err = GovbriefError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix.parse::<u8>().map_err(|e| GovbriefError::Validation {
                    message: format!("bad prefix in '{s}': {e}"),
                })?;
                (addr, Some(prefix))
            }
            None => (s, None),
        };
        let base = addr
            .parse::<IpAddr>()
            .map_err(|e| GovbriefError::Validation {
                message: format!("bad address in '{s}': {e}"),
            })?;
        let prefix = prefix.unwrap_or(match base {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        });
        Self::new(base, prefix)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix)
    }
}

/// Immutable policy value handed to the fetcher at construction
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    blocked_hosts: Vec<String>,
    blocked_ranges: Vec<IpRange>,
    pub max_redirects: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            blocked_hosts: DEFAULT_BLOCKED_HOSTS.iter().map(|s| s.to_string()).collect(),
            blocked_ranges: DEFAULT_BLOCKED_RANGES
                .iter()
                .filter_map(|r| r.parse().ok())
                .collect(),
            max_redirects: 5,
        }
    }
}

impl FetchPolicy {
    pub fn from_config(cfg: &crate::config::FetchConfig) -> Result<Self> {
        let blocked_ranges = cfg
            .blocked_ranges
            .iter()
            .map(|r| r.parse::<IpRange>())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| GovbriefError::Config {
                message: e.to_string(),
            })?;
        Ok(Self {
            blocked_hosts: cfg
                .blocked_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            blocked_ranges,
            max_redirects: cfg.max_redirects,
        })
    }

    pub fn with_blocked_hosts(mut self, hosts: Vec<String>) -> Self {
        self.blocked_hosts = hosts;
        self
    }

    pub fn with_blocked_ranges(mut self, ranges: Vec<IpRange>) -> Self {
        self.blocked_ranges = ranges;
        self
    }

    /// Refused hostname, matched exactly or as a parent domain
    pub fn host_is_blocked(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        host.ends_with(".localhost")
            || self
                .blocked_hosts
                .iter()
                .any(|b| host == *b || host.ends_with(&format!(".{b}")))
    }

    /// Range that `ip` falls into, if it is blocked
    pub fn blocking_range(&self, ip: IpAddr) -> Option<IpRange> {
        let ip = normalize(ip);
        self.blocked_ranges.iter().copied().find(|r| r.contains(ip))
    }
}

/// A v6 address that carries a v4 address is judged as that v4 address:
/// mapped (`::ffff:a.b.c.d`), compatible (`::a.b.c.d`), NAT64
/// (`64:ff9b::a.b.c.d`) and 6to4 (`2002:aabb:ccdd::`)
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => embedded_v4(v6).map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}

fn embedded_v4(v6: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return Some(v4);
    }
    let seg = v6.segments();
    let o = v6.octets();
    let tail = Ipv4Addr::new(o[12], o[13], o[14], o[15]);
    match seg {
        // `::` and `::1` stay v6 so they report their own ranges
        [0, 0, 0, 0, 0, 0, 0, 0] | [0, 0, 0, 0, 0, 0, 0, 1] => None,
        [0, 0, 0, 0, 0, 0, _, _] => Some(tail),
        [0x64, 0xff9b, 0, 0, 0, 0, _, _] => Some(tail),
        [0x2002, ..] => Some(Ipv4Addr::new(o[2], o[3], o[4], o[5])),
        _ => None,
    }
}
