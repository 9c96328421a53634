//! Minimal Hetzner Cloud API client
//!
//! Covers the server and SSH key endpoints node and key management need.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use ertia_common::Secret;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Production API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud/v1";

const PROVIDER: &str = "hetzner";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Power actions on a server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerAction {
    /// Soft reboot
    Reboot,
    /// ACPI shutdown
    Shutdown,
    /// Power on
    PowerOn,
}

impl ServerAction {
    fn path(self) -> &'static str {
        match self {
            ServerAction::Reboot => "reboot",
            ServerAction::Shutdown => "shutdown",
            ServerAction::PowerOn => "poweron",
        }
    }
}

/// Body of `POST /servers`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CreateServerRequest {
    /// Server name
    pub name: String,
    /// Server type name, e.g. `cx11`
    pub server_type: String,
    /// Image name, e.g. `ubuntu-20.04`
    pub image: String,
    /// SSH key ids to install for root
    pub ssh_keys: Vec<u64>,
    /// Boot the server once created
    pub start_after_create: bool,
    /// Location name, e.g. `fsn1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A server as returned by the API
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Server {
    /// Server id
    pub id: u64,
    /// Public addresses
    pub public_net: PublicNet,
}

/// Public network configuration of a server
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PublicNet {
    /// Primary IPv4 address
    #[serde(default)]
    pub ipv4: Option<AddressBlock>,
    /// Primary IPv6 network
    #[serde(default)]
    pub ipv6: Option<AddressBlock>,
}

/// An address or network in CIDR-less or CIDR notation
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AddressBlock {
    /// `203.0.113.7` or `2001:db8:1234::/64`
    pub ip: String,
}

impl PublicNet {
    /// Primary IPv4 address, if assigned
    pub fn ipv4_addr(&self) -> Option<Ipv4Addr> {
        self.ipv4.as_ref()?.ip.parse().ok()
    }

    /// Base address of the IPv6 network, if assigned
    pub fn ipv6_addr(&self) -> Option<Ipv6Addr> {
        let block = &self.ipv6.as_ref()?.ip;
        block.split('/').next()?.parse().ok()
    }
}

/// A registered SSH key
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SshKeyInfo {
    /// Key id
    pub id: u64,
    /// MD5 fingerprint
    pub fingerprint: String,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Deserialize)]
struct SshKeyEnvelope {
    ssh_key: SshKeyInfo,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

/// Hetzner Cloud API client
#[derive(Clone)]
pub struct HetznerClient {
    http: reqwest::Client,
    base_url: String,
    token: Secret,
}

impl std::fmt::Debug for HetznerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HetznerClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HetznerClient {
    /// Create a client authenticating with `token`
    pub fn new(token: Secret) -> Result<Self> {
        if token.is_empty() {
            return Err(Error::config("Hetzner API token is empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::api(PROVIDER, None, format!("failed to build client: {}", e)))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        })
    }

    /// Talk to a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(self.token.expose())
            .send()
            .await
            .map_err(|e| Error::api(PROVIDER, None, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
            Err(_) => body,
        };
        Err(Error::api(PROVIDER, Some(status.as_u16()), message))
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        response
            .json()
            .await
            .map_err(|e| Error::api(PROVIDER, Some(status), format!("invalid response: {}", e)))
    }

    /// Create and boot a server
    pub async fn create_server(&self, request: &CreateServerRequest) -> Result<Server> {
        debug!(name = %request.name, server_type = %request.server_type, "Creating Hetzner server");
        let envelope: ServerEnvelope = self
            .execute_json(self.http.post(self.url("/servers")).json(request))
            .await?;
        Ok(envelope.server)
    }

    /// Delete a server
    pub async fn delete_server(&self, id: u64) -> Result<()> {
        self.execute(self.http.delete(self.url(&format!("/servers/{}", id))))
            .await?;
        Ok(())
    }

    /// Trigger a power action
    pub async fn server_action(&self, id: u64, action: ServerAction) -> Result<()> {
        let path = format!("/servers/{}/actions/{}", id, action.path());
        self.execute(self.http.post(self.url(&path))).await?;
        Ok(())
    }

    /// Register an SSH public key
    pub async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKeyInfo> {
        let body = serde_json::json!({ "name": name, "public_key": public_key });
        let envelope: SshKeyEnvelope = self
            .execute_json(self.http.post(self.url("/ssh_keys")).json(&body))
            .await?;
        Ok(envelope.ssh_key)
    }

    /// Remove an SSH key
    pub async fn delete_ssh_key(&self, id: u64) -> Result<()> {
        self.execute(self.http.delete(self.url(&format!("/ssh_keys/{}", id))))
            .await?;
        Ok(())
    }
}
