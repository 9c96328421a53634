//! Minimal GleSYS API client
//!
//! Every call is a JSON `POST` authenticated with HTTP basic auth (project
//! id and API key). Replies are wrapped in a `response` object whose
//! `status` carries the real outcome.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use ertia_common::Secret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Production API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.glesys.com";

/// User agent sent with every request
pub const USER_AGENT: &str = "ERTIA: Frictionless Kubernetes";

const PROVIDER: &str = "glesys";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A login created on a new server
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServerUser {
    /// Login name
    pub username: String,
    /// Authorized public keys
    pub publickeys: Vec<String>,
    /// Password, used for sudo
    pub password: String,
}

/// Body of `/server/create`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CreateServerRequest {
    /// Server hostname
    pub hostname: String,
    /// Virtualisation platform
    pub platform: String,
    /// Data center name
    pub datacenter: String,
    /// OS template
    pub templatename: String,
    /// Disk size in GB
    pub disksize: u32,
    /// Memory in MB
    pub memorysize: u32,
    /// Number of CPU cores
    pub cpucores: u32,
    /// Bandwidth in Mbit/s
    pub bandwidth: u32,
    /// IPv4 address to assign, `any` for a fresh one
    pub ip: String,
    /// IPv6 address to assign, `any` for a fresh one
    pub ipv6: String,
    /// Logins to create
    pub users: Vec<ServerUser>,
}

/// A server as returned by `/server/create`
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Server {
    /// Server id, e.g. `kvm1234567`
    pub serverid: String,
    /// Assigned addresses
    #[serde(default)]
    pub iplist: Vec<IpEntry>,
}

/// One assigned address
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct IpEntry {
    /// Address text
    pub ipaddress: String,
    /// 4 or 6
    pub version: u8,
}

impl Server {
    /// First IPv4 address in the list
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.iplist
            .iter()
            .filter(|ip| ip.version == 4)
            .find_map(|ip| ip.ipaddress.parse().ok())
    }

    /// First IPv6 address in the list
    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        self.iplist
            .iter()
            .filter(|ip| ip.version == 6)
            .find_map(|ip| ip.ipaddress.parse().ok())
    }
}

/// A DNS record in a hosted domain
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DnsRecord {
    /// Record id
    pub recordid: u64,
    /// Host part relative to the domain
    pub host: String,
    /// Record type
    #[serde(rename = "type")]
    pub kind: String,
    /// Record data
    pub data: String,
}

/// Body of `/domain/addrecord`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AddRecordRequest {
    /// Hosted domain
    pub domainname: String,
    /// Host part relative to the domain
    pub host: String,
    /// Record type
    #[serde(rename = "type")]
    pub kind: String,
    /// Record data
    pub data: String,
    /// Time to live in seconds
    pub ttl: u32,
}

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Deserialize)]
struct StatusOnly {
    status: Status,
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ServerReply {
    server: Server,
}

#[derive(Deserialize)]
struct RecordsReply {
    #[serde(default)]
    records: Vec<DnsRecord>,
}

/// GleSYS API client
#[derive(Clone)]
pub struct GlesysClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    token: Secret,
}

impl std::fmt::Debug for GlesysClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlesysClient")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl GlesysClient {
    /// Create a client for the GleSYS project `project` using API key `token`
    pub fn new(project: impl Into<String>, token: Secret) -> Result<Self> {
        let project = project.into();
        if project.is_empty() {
            return Err(Error::config("GleSYS project id is empty"));
        }
        if token.is_empty() {
            return Err(Error::config("GleSYS API key is empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::api(PROVIDER, None, format!("failed to build client: {}", e)))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            project,
            token,
        })
    }

    /// Talk to a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn call<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(path = %path, "GleSYS request");
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.project, Some(self.token.expose()))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::api(PROVIDER, None, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::api(PROVIDER, Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<Envelope<StatusOnly>>(&text) {
                Ok(envelope) if !envelope.response.status.text.is_empty() => {
                    envelope.response.status.text
                }
                _ => text,
            };
            return Err(Error::api(PROVIDER, Some(status.as_u16()), message));
        }

        let envelope: Envelope<StatusOnly> = serde_json::from_str(&text).map_err(|e| {
            Error::api(PROVIDER, Some(status.as_u16()), format!("invalid response: {}", e))
        })?;
        let code = envelope.response.status.code;
        if code != 0 && code != 200 {
            return Err(Error::api(
                PROVIDER,
                Some(code),
                envelope.response.status.text,
            ));
        }

        serde_json::from_str::<Envelope<T>>(&text)
            .map(|e| e.response)
            .map_err(|e| {
                Error::api(PROVIDER, Some(status.as_u16()), format!("invalid response: {}", e))
            })
    }

    /// Create and boot a server
    pub async fn create_server(&self, request: &CreateServerRequest) -> Result<Server> {
        let reply: ServerReply = self.call("/server/create", request).await?;
        Ok(reply.server)
    }

    /// Destroy a server and release its addresses
    pub async fn destroy_server(&self, serverid: &str) -> Result<()> {
        let body = serde_json::json!({ "serverid": serverid, "keepip": false });
        self.call::<_, serde_json::Value>("/server/destroy", &body)
            .await?;
        Ok(())
    }

    /// Shut a server down
    pub async fn stop_server(&self, serverid: &str) -> Result<()> {
        let body = serde_json::json!({ "serverid": serverid });
        self.call::<_, serde_json::Value>("/server/stop", &body)
            .await?;
        Ok(())
    }

    /// Boot a stopped server
    pub async fn start_server(&self, serverid: &str) -> Result<()> {
        let body = serde_json::json!({ "serverid": serverid });
        self.call::<_, serde_json::Value>("/server/start", &body)
            .await?;
        Ok(())
    }

    /// Fail unless `domain` is hosted in this project
    pub async fn domain_details(&self, domain: &str) -> Result<()> {
        let body = serde_json::json!({ "domainname": domain });
        self.call::<_, serde_json::Value>("/domain/details", &body)
            .await?;
        Ok(())
    }

    /// Records of a hosted domain
    pub async fn list_records(&self, domain: &str) -> Result<Vec<DnsRecord>> {
        let body = serde_json::json!({ "domainname": domain });
        let reply: RecordsReply = self.call("/domain/listrecords", &body).await?;
        Ok(reply.records)
    }

    /// Add a record
    pub async fn add_record(&self, request: &AddRecordRequest) -> Result<()> {
        self.call::<_, serde_json::Value>("/domain/addrecord", request)
            .await?;
        Ok(())
    }

    /// Point an existing record at new data
    pub async fn update_record(&self, recordid: u64, data: &str) -> Result<()> {
        let body = serde_json::json!({ "recordid": recordid, "data": data });
        self.call::<_, serde_json::Value>("/domain/updaterecord", &body)
            .await?;
        Ok(())
    }
}
