//! Cloud discovery: member addresses from the managed-service discovery API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use memgrid_core::{GridError, Result};

use super::address::{Address, Addresses};
use super::discovery::AddressProvider;

const DISCOVERY_PATH: &str = "/cluster/discovery";

#[derive(Debug, Deserialize)]
struct DiscoveryEntry {
    #[serde(rename = "private-address")]
    private_address: String,
    #[serde(rename = "public-address")]
    public_address: String,
}

/// Address provider that resolves members through the cloud discovery API.
///
/// The API returns private/public address pairs. Private addresses are what
/// members report to each other; the client dials the public ones.
#[derive(Debug)]
pub struct CloudAddressProvider {
    url: String,
    timeout: Duration,
    private_to_public: RwLock<HashMap<Address, Address>>,
}

impl CloudAddressProvider {
    /// Creates a provider for `token` against `url_base`.
    pub fn new(url_base: &str, token: &str, timeout: Duration) -> Self {
        Self {
            url: format!(
                "{}{}?token={}",
                url_base.trim_end_matches('/'),
                DISCOVERY_PATH,
                token
            ),
            timeout,
            private_to_public: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the discovery URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<HashMap<Address, Address>> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| GridError::Connection(format!("failed to create HTTP client: {}", e)))?;

        let response = client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| GridError::Connection(format!("cloud discovery request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GridError::Connection(format!(
                "cloud discovery returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GridError::Connection(format!("failed to read discovery response: {}", e)))?;

        let addresses = parse_response(&body)?;
        tracing::info!(count = addresses.len(), "cloud discovery returned members");
        Ok(addresses)
    }

    async fn refresh(&self) -> Result<HashMap<Address, Address>> {
        let addresses = self.fetch().await?;
        *self.private_to_public.write().await = addresses.clone();
        Ok(addresses)
    }
}

/// Parses a discovery response body into a private to public address map.
///
/// A private address carries no port of its own and takes the public one's.
fn parse_response(body: &str) -> Result<HashMap<Address, Address>> {
    let entries: Vec<DiscoveryEntry> = serde_json::from_str(body)
        .map_err(|e| GridError::Protocol(format!("malformed cloud discovery response: {}", e)))?;

    let mut addresses = HashMap::with_capacity(entries.len());
    for entry in entries {
        let (public_host, public_port) = Address::parse_host_port(&entry.public_address)?;
        let public_port = public_port.ok_or_else(|| {
            GridError::Protocol(format!(
                "public address '{}' has no port",
                entry.public_address
            ))
        })?;
        let (private_host, _) = Address::parse_host_port(&entry.private_address)?;
        addresses.insert(
            Address::new(private_host, public_port),
            Address::new(public_host, public_port),
        );
    }
    Ok(addresses)
}

#[async_trait]
impl AddressProvider for CloudAddressProvider {
    async fn load_addresses(&self) -> Result<Addresses> {
        let addresses = self.refresh().await?;
        Ok(Addresses::new(addresses.into_keys().collect(), Vec::new()))
    }

    async fn translate(&self, address: &Address) -> Result<Option<Address>> {
        if let Some(public) = self.private_to_public.read().await.get(address) {
            return Ok(Some(public.clone()));
        }
        let refreshed = match self.refresh().await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "cloud discovery refresh failed");
                return Ok(None);
            }
        };
        Ok(refreshed.get(address).cloned())
    }
}
