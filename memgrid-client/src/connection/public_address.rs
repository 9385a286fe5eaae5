//! Choosing between a member's internal and public address.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use memgrid_core::Result;

use super::address::Address;
use super::discovery::AddressProvider;
use crate::listener::Member;

const REACHABLE_ADDRESS_TIMEOUT: Duration = Duration::from_secs(1);
const NON_REACHABLE_ADDRESS_TIMEOUT: Duration = Duration::from_secs(3);
const REACHABLE_CHECK_MEMBER_COUNT: usize = 3;

/// Checks whether an address accepts TCP connections.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `address` accepted a connection within `timeout`.
    async fn is_reachable(&self, address: &Address, timeout: Duration) -> bool;
}

/// Probe that opens, then drops, a TCP connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, address: &Address, timeout: Duration) -> bool {
        let target = (address.host(), address.port());
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }
}

/// Maps members to the address the client dials.
///
/// A user-set flag decides outright. Otherwise the client uses internal
/// addresses when one of them matches a configured host, and probes a few
/// members when none does. The result is a hint; probing never fails the
/// connect attempt.
#[derive(Debug)]
pub struct PublicAddressTranslator {
    user_flag: Option<bool>,
    configured_hosts: Vec<String>,
    probe: Arc<dyn ReachabilityProbe>,
    decided: Mutex<Option<bool>>,
}

impl PublicAddressTranslator {
    /// Creates a translator. `configured_hosts` are the hosts of the
    /// configured member addresses.
    pub fn new(user_flag: Option<bool>, configured_hosts: Vec<String>) -> Self {
        Self::with_probe(user_flag, configured_hosts, Arc::new(TcpProbe))
    }

    /// Creates a translator with a custom reachability probe.
    pub fn with_probe(
        user_flag: Option<bool>,
        configured_hosts: Vec<String>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            user_flag,
            configured_hosts,
            probe,
            decided: Mutex::new(None),
        }
    }

    /// Translator that always uses internal addresses.
    pub fn disabled() -> Self {
        Self::new(Some(false), Vec::new())
    }

    /// Returns the address to dial for `member` given the current member
    /// list. Members without a public address go through `provider`.
    pub async fn translate(
        &self,
        member: &Member,
        members: &[Member],
        provider: &dyn AddressProvider,
    ) -> Result<Option<Address>> {
        if let Some(public) = member.public_address() {
            if self.use_public_address(members).await {
                return Ok(Some(public.clone()));
            }
        }
        provider.translate(member.address()).await
    }

    /// Decides whether public addresses are used for `members`.
    pub async fn use_public_address(&self, members: &[Member]) -> bool {
        if let Some(flag) = self.user_flag {
            return flag;
        }
        if let Some(decided) = *self.decided.lock().unwrap_or_else(PoisonError::into_inner) {
            return decided;
        }
        if members.is_empty() {
            return false;
        }

        let decision = self.decide(members).await;
        tracing::debug!(use_public = decision, "decided member address kind");
        *self.decided.lock().unwrap_or_else(PoisonError::into_inner) = Some(decision);
        decision
    }

    async fn decide(&self, members: &[Member]) -> bool {
        if members.iter().all(|member| member.public_address().is_none()) {
            return false;
        }
        if self.any_member_matches_configured_host(members).await {
            return false;
        }

        for member in members
            .iter()
            .filter(|member| member.public_address().is_some())
            .take(REACHABLE_CHECK_MEMBER_COUNT)
        {
            if self
                .probe
                .is_reachable(member.address(), REACHABLE_ADDRESS_TIMEOUT)
                .await
            {
                return false;
            }
            if let Some(public) = member.public_address() {
                if self
                    .probe
                    .is_reachable(public, NON_REACHABLE_ADDRESS_TIMEOUT)
                    .await
                {
                    return true;
                }
            }
        }
        false
    }

    async fn any_member_matches_configured_host(&self, members: &[Member]) -> bool {
        if self.configured_hosts.is_empty() {
            return false;
        }

        let mut configured: HashSet<String> = self.configured_hosts.iter().cloned().collect();
        for host in &self.configured_hosts {
            configured.extend(resolve_host(host).await.into_iter().map(|ip| ip.to_string()));
        }

        for member in members {
            let host = member.address().host();
            if configured.contains(host) {
                return true;
            }
            for ip in resolve_host(host).await {
                if configured.contains(&ip.to_string()) {
                    return true;
                }
            }
        }
        false
    }
}

async fn resolve_host(host: &str) -> Vec<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return vec![ip];
    }
    match tokio::net::lookup_host((host, 0)).await {
        Ok(addresses) => addresses.map(|address| address.ip()).collect(),
        Err(_) => Vec::new(),
    }
}
