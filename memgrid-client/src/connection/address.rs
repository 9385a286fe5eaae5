//! Member addresses and parsing of configured address strings.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use rand::seq::SliceRandom;

use memgrid_core::{GridError, Result};

/// Port members listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 5701;

/// Number of consecutive ports probed for an address given without a port.
pub const DEFAULT_PORT_TRY_COUNT: u16 = 3;

/// Largest port try count that stays within the port range.
pub const MAX_PORT_TRY_COUNT: u16 = u16::MAX - DEFAULT_PORT + 1;

/// Host and port of a cluster member endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// Creates an address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`.
    ///
    /// A bare IPv6 literal without brackets is accepted and has no port.
    pub fn parse_host_port(value: &str) -> Result<(String, Option<u16>)> {
        let value = value.trim();
        if value.is_empty() {
            return Err(GridError::Configuration("address must not be empty".into()));
        }

        if let Some(rest) = value.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                GridError::Configuration(format!("unterminated IPv6 literal in '{}'", value))
            })?;
            let port = match tail {
                "" => None,
                tail => match tail.strip_prefix(':') {
                    Some(port) => Some(parse_port(value, port)?),
                    None => {
                        return Err(GridError::Configuration(format!(
                            "unexpected characters after IPv6 literal in '{}'",
                            value
                        )))
                    }
                },
            };
            return Ok((host.to_string(), port));
        }

        match value.matches(':').count() {
            0 => Ok((value.to_string(), None)),
            1 => {
                let (host, port) = value.split_once(':').unwrap_or((value, ""));
                if host.is_empty() {
                    return Err(GridError::Configuration(format!(
                        "missing host in '{}'",
                        value
                    )));
                }
                Ok((host.to_string(), Some(parse_port(value, port)?)))
            }
            _ => Ok((value.to_string(), None)),
        }
    }

    /// Resolves the address to a socket address, preferring the first result.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                GridError::Connection(format!("could not resolve address {}", self))
            })
    }
}

fn parse_port(value: &str, port: &str) -> Result<u16> {
    port.parse::<u16>()
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(|| GridError::Configuration(format!("invalid port in '{}'", value)))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Candidate addresses split into ones to try first and fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addresses {
    /// Addresses tried first.
    pub primary: Vec<Address>,
    /// Addresses tried after every primary one.
    pub secondary: Vec<Address>,
}

impl Addresses {
    /// Creates an address set.
    pub fn new(primary: Vec<Address>, secondary: Vec<Address>) -> Self {
        Self { primary, secondary }
    }

    /// Appends another set, keeping primaries ahead of secondaries.
    pub fn add_all(&mut self, other: Addresses) {
        self.primary.extend(other.primary);
        self.secondary.extend(other.secondary);
    }

    /// Shuffles each list independently.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.primary.shuffle(&mut rng);
        self.secondary.shuffle(&mut rng);
    }

    /// Returns all addresses, primaries first.
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.primary.iter().chain(self.secondary.iter())
    }

    /// Total number of addresses.
    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }

    /// Returns `true` when both lists are empty.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }
}

/// Expands one configured address string into candidates.
///
/// With an explicit port the result is that single primary address. A bare
/// host yields a primary at [`DEFAULT_PORT`] and `port_try_count - 1`
/// secondaries at the following ports, for members that picked the next
/// free port on startup.
pub fn socket_addresses(value: &str, port_try_count: u16) -> Result<Addresses> {
    let (host, port) = Address::parse_host_port(value)?;
    match port {
        Some(port) => Ok(Addresses::new(vec![Address::new(host, port)], Vec::new())),
        None => {
            let primary = vec![Address::new(host.clone(), DEFAULT_PORT)];
            let secondary = (1..port_try_count.max(1))
                .map_while(|offset| DEFAULT_PORT.checked_add(offset))
                .map(|port| Address::new(host.clone(), port))
                .collect();
            Ok(Addresses::new(primary, secondary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        assert_eq!(
            Address::parse_host_port("10.0.0.1:5702").unwrap(),
            ("10.0.0.1".to_string(), Some(5702))
        );
        assert_eq!(
            Address::parse_host_port(" member-a ").unwrap(),
            ("member-a".to_string(), None)
        );
    }

    #[test]
    fn test_parse_ipv6_forms() {
        assert_eq!(
            Address::parse_host_port("[::1]:5703").unwrap(),
            ("::1".to_string(), Some(5703))
        );
        assert_eq!(
            Address::parse_host_port("[fe80::1]").unwrap(),
            ("fe80::1".to_string(), None)
        );
        assert_eq!(
            Address::parse_host_port("fe80::1").unwrap(),
            ("fe80::1".to_string(), None)
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Address::parse_host_port("").is_err());
        assert!(Address::parse_host_port("host:notaport").is_err());
        assert!(Address::parse_host_port("host:0").is_err());
        assert!(Address::parse_host_port(":5701").is_err());
        assert!(Address::parse_host_port("[::1").is_err());
        assert!(Address::parse_host_port("[::1]x").is_err());
    }

    #[test]
    fn test_display_brackets_ipv6() {
        assert_eq!(Address::new("127.0.0.1", 5701).to_string(), "127.0.0.1:5701");
        assert_eq!(Address::new("::1", 5701).to_string(), "[::1]:5701");
    }

    #[test]
    fn test_bare_host_expands_to_port_range() {
        let addresses = socket_addresses("192.168.0.4", 3).unwrap();
        assert_eq!(addresses.primary, vec![Address::new("192.168.0.4", 5701)]);
        assert_eq!(
            addresses.secondary,
            vec![
                Address::new("192.168.0.4", 5702),
                Address::new("192.168.0.4", 5703)
            ]
        );
    }

    #[test]
    fn test_expansion_follows_try_count() {
        for count in 1..6u16 {
            let addresses = socket_addresses("node", count).unwrap();
            assert_eq!(addresses.primary.len(), 1);
            assert_eq!(addresses.secondary.len(), (count - 1) as usize);
        }
    }

    #[test]
    fn test_expansion_stops_at_last_port() {
        let addresses = socket_addresses("node", u16::MAX).unwrap();
        assert_eq!(addresses.primary.len(), 1);
        assert_eq!(addresses.secondary.len(), usize::from(MAX_PORT_TRY_COUNT) - 1);
        assert_eq!(addresses.secondary.last().map(Address::port), Some(u16::MAX));
    }

    #[test]
    fn test_explicit_port_is_not_expanded() {
        let addresses = socket_addresses("node:6000", 3).unwrap();
        assert_eq!(addresses.primary, vec![Address::new("node", 6000)]);
        assert!(addresses.secondary.is_empty());
    }

    #[test]
    fn test_shuffle_keeps_primaries_first() {
        let mut addresses = Addresses::new(
            (0..10).map(|i| Address::new("p", 5701 + i)).collect(),
            (0..10).map(|i| Address::new("s", 5701 + i)).collect(),
        );
        addresses.shuffle();

        let hosts: Vec<&str> = addresses.iter().map(Address::host).collect();
        assert!(hosts[..10].iter().all(|h| *h == "p"));
        assert!(hosts[10..].iter().all(|h| *h == "s"));
        assert_eq!(addresses.len(), 20);
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let resolved = Address::new("127.0.0.1", 5701).resolve().await.unwrap();
        assert_eq!(resolved, "127.0.0.1:5701".parse::<SocketAddr>().unwrap());
    }
}
