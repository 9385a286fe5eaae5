//! Address providers: where the client looks for cluster members.

use std::fmt;

use async_trait::async_trait;
use memgrid_core::Result;

use super::address::{socket_addresses, Address, Addresses};

/// Address used when no member address is configured.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Source of candidate member addresses for one cluster.
#[async_trait]
pub trait AddressProvider: Send + Sync + fmt::Debug {
    /// Returns the addresses to try, primaries first.
    async fn load_addresses(&self) -> Result<Addresses>;

    /// Maps an address learned from the cluster to the address the client
    /// should dial. `None` means the address is unknown to this provider.
    async fn translate(&self, address: &Address) -> Result<Option<Address>>;
}

/// Provider backed by the configured member address strings.
///
/// Addresses are dialed as-is; a bare host expands into the default port
/// range.
#[derive(Debug, Clone)]
pub struct DefaultAddressProvider {
    members: Vec<String>,
    port_try_count: u16,
}

impl DefaultAddressProvider {
    /// Creates a provider from address strings. An empty list means the
    /// loopback address.
    pub fn new(members: Vec<String>, port_try_count: u16) -> Self {
        let members = if members.is_empty() {
            vec![DEFAULT_ADDRESS.to_string()]
        } else {
            members
        };
        Self {
            members,
            port_try_count,
        }
    }

    /// Returns the address strings this provider expands.
    pub fn members(&self) -> &[String] {
        &self.members
    }
}

#[async_trait]
impl AddressProvider for DefaultAddressProvider {
    async fn load_addresses(&self) -> Result<Addresses> {
        let mut addresses = Addresses::default();
        for member in &self.members {
            addresses.add_all(socket_addresses(member, self.port_try_count)?);
        }
        Ok(addresses)
    }

    async fn translate(&self, address: &Address) -> Result<Option<Address>> {
        Ok(Some(address.clone()))
    }
}
