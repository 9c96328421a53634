//! Wildcard DNS configuration for the cluster's ingress

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of the wildcard record
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum DnsStatus {
    /// Record not yet written (or needs rewriting)
    #[default]
    New,
    /// Record points at the current ingress address
    Ready,
}

/// DNS sub-configuration of a project
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    /// Domain the wildcard record is created under, e.g. `apps.example.com`
    pub domain: String,
    /// Address the record currently points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    /// Record status
    #[serde(default)]
    pub status: DnsStatus,
    /// When the record was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl DnsConfig {
    /// Create a configuration whose record has not been written yet
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// Whether the record still has to be written
    pub fn needs_adapting(&self) -> bool {
        self.status != DnsStatus::Ready
    }

    /// Record that the wildcard now points at `ip`
    pub fn mark_ready(&mut self, ip: Ipv4Addr) {
        self.status = DnsStatus::Ready;
        self.ipv4 = Some(ip);
        self.updated = Some(Utc::now());
    }
}
