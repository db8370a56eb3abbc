//! IP address and CIDR handling
//!
//! Parses textual addresses and `address/prefix` subnets for the allow/deny
//! lists, and normalises IPv6 addresses to their /64 for rate-limit keying.

use std::net::{IpAddr, Ipv6Addr};

use tracing::warn;

/// Parse a textual IP address.
///
/// Accepts dotted-quad IPv4, IPv6 (including `::` compression), bracketed
/// IPv6, and IPv4-mapped IPv6 (`::ffff:a.b.c.d`), which is stripped to its
/// IPv4 form.
pub fn parse_ip(s: &str) -> Option<IpAddr> {
    let s = s.trim();
    let s = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')).unwrap_or(s);

    let addr: IpAddr = s.parse().ok()?;
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => Some(IpAddr::V4(v4)),
            None => Some(addr),
        },
        IpAddr::V4(_) => Some(addr),
    }
}

/// A parsed CIDR subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cidr {
    addr: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parse `address[/prefix]`. A missing prefix defaults to the full
    /// address length (32 for IPv4, 128 for IPv6).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };

        let addr = parse_ip(addr_part)?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };

        Some(Self { addr, prefix })
    }

    /// Membership test. Requires family equality; compares the first
    /// ⌈prefix/8⌉ bytes, masking trailing bits in the final byte.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.addr) {
            (IpAddr::V4(a), IpAddr::V4(b)) => masked_eq(&a.octets(), &b.octets(), self.prefix),
            (IpAddr::V6(a), IpAddr::V6(b)) => masked_eq(&a.octets(), &b.octets(), self.prefix),
            _ => false,
        }
    }
}

fn masked_eq(a: &[u8], b: &[u8], prefix: u8) -> bool {
    let full_bytes = (prefix / 8) as usize;
    if a[..full_bytes] != b[..full_bytes] {
        return false;
    }
    let rem = prefix % 8;
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    (a[full_bytes] & mask) == (b[full_bytes] & mask)
}

/// An ordered list of subnets built from configuration strings.
///
/// Lists are best-effort filters: malformed entries are skipped with a
/// warning and never cause an error at check time.
#[derive(Debug, Clone, Default)]
pub struct CidrList {
    entries: Vec<Cidr>,
}

impl CidrList {
    pub fn from_strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = Vec::new();
        for item in items {
            let item = item.as_ref();
            if item.trim().is_empty() {
                continue;
            }
            match Cidr::parse(item) {
                Some(cidr) => entries.push(cidr),
                None => warn!(entry = %item, "skipping malformed CIDR entry"),
            }
        }
        Self { entries }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.iter().any(|c| c.contains(ip))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rate-limit key for an address.
///
/// IPv6 addresses are collapsed to their /64 (bytes 8..15 zeroed, canonical
/// form suffixed with `/64`) so that rotation within a single allocation
/// shares one bucket. IPv4 addresses pass through unchanged.
pub fn normalize_ipv6_to_64(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            octets[8..].fill(0);
            format!("{}/64", Ipv6Addr::from(octets))
        }
    }
}
