//! Wildcard DNS record for the cluster's ingress
//!
//! The record lives in the GleSYS-hosted zone made of the configured
//! domain's last two labels. `apps.example.com` becomes host `*.apps` in
//! zone `example.com`; `example.com` itself becomes host `*`.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use ertia_common::{NodeStatus, Project};
use tracing::{debug, info, instrument};

use super::{AddRecordRequest, GlesysProvider, NAME};
use crate::{DnsProvider, Error, Result};

const RECORD_TTL: u32 = 1800;
const RECORD_TYPE: &str = "A";

/// Zone and relative host of the wildcard record for `domain`
fn wildcard_target(domain: &str) -> Result<(String, String)> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(Error::config("DNS domain is empty"));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(Error::config(format!(
            "could not find a zone in DNS domain {}",
            domain
        )));
    }

    let split = labels.len() - 2;
    let zone = labels[split..].join(".");
    let host = if split == 0 {
        "*".to_string()
    } else {
        format!("*.{}", labels[..split].join("."))
    };
    Ok((zone, host))
}

/// Address of the node that receives ingress traffic
fn ingress_ip(project: &Project) -> Result<Ipv4Addr> {
    let node = project
        .find_non_master_node()
        .ok_or_else(|| Error::config("no non-master node to point DNS at"))?;

    if !matches!(node.status, NodeStatus::Active | NodeStatus::Ready) {
        return Err(Error::config(format!(
            "non-master node {} is not active",
            node.name
        )));
    }
    node.ipv4
        .ok_or_else(|| Error::config(format!("no IPv4 found on node {}", node.name)))
}

#[async_trait]
impl DnsProvider for GlesysProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(provider = NAME))]
    async fn create_record(&self, project: &mut Project) -> Result<()> {
        let domain = match &project.dns {
            Some(dns) if dns.needs_adapting() => dns.domain.clone(),
            _ => return Ok(()),
        };

        let (zone, host) = wildcard_target(&domain)?;
        let ip = ingress_ip(project)?;

        self.client.domain_details(&zone).await?;
        let existing = self
            .client
            .list_records(&zone)
            .await?
            .into_iter()
            .find(|r| r.host == host && r.kind == RECORD_TYPE);

        match existing {
            Some(record) => {
                debug!(record_id = record.recordid, "Updating wildcard record");
                self.client
                    .update_record(record.recordid, &ip.to_string())
                    .await?;
            }
            None => {
                debug!(zone = %zone, host = %host, "Adding wildcard record");
                self.client
                    .add_record(&AddRecordRequest {
                        domainname: zone.clone(),
                        host: host.clone(),
                        kind: RECORD_TYPE.to_string(),
                        data: ip.to_string(),
                        ttl: RECORD_TTL,
                    })
                    .await?;
            }
        }

        if let Some(mut dns) = project.dns.clone() {
            dns.mark_ready(ip);
            project.update_dns(dns);
        }
        self.store.persist(project).await?;
        info!(zone = %zone, host = %host, ip = %ip, "Wildcard record points at ingress");
        Ok(())
    }
}
