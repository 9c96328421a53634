//! Admin kubeconfig handling
//!
//! K3S writes `/etc/rancher/k3s/k3s.yaml` with the API server on a loopback
//! address. Before the file is usable from the operator's machine every
//! loopback server URL has to point at the master's public address.

use std::net::IpAddr;
use std::path::Path;

use serde_yaml::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::K3sError;

const LOOPBACK_HOSTS: [&str; 3] = ["127.0.0.1", "localhost", "[::1]"];

/// Rewrite loopback API server URLs in `kubeconfig` to `address`
pub fn rewrite_loopback_servers(kubeconfig: &str, address: IpAddr) -> Result<String, K3sError> {
    let mut config: Value = serde_yaml::from_str(kubeconfig)
        .map_err(|e| K3sError::kubeconfig(format!("failed to parse: {}", e)))?;

    let host = match address {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    };

    let clusters = config
        .get_mut("clusters")
        .and_then(|c| c.as_sequence_mut())
        .ok_or_else(|| K3sError::kubeconfig("no clusters in kubeconfig"))?;

    let mut rewritten = 0;
    for cluster in clusters.iter_mut() {
        let Some(server) = cluster
            .get_mut("cluster")
            .and_then(|c| c.get_mut("server"))
        else {
            continue;
        };
        if let Some(new_server) = server.as_str().and_then(|s| rewrite_server(s, &host)) {
            *server = Value::String(new_server);
            rewritten += 1;
        }
    }
    debug!(rewritten, host = %host, "Rewrote kubeconfig server URLs");

    serde_yaml::to_string(&config)
        .map_err(|e| K3sError::kubeconfig(format!("failed to serialize: {}", e)))
}

fn rewrite_server(server: &str, host: &str) -> Option<String> {
    let (scheme, rest) = server.split_once("://")?;
    LOOPBACK_HOSTS.iter().find_map(|loopback| {
        let tail = rest.strip_prefix(loopback)?;
        (tail.is_empty() || tail.starts_with(':') || tail.starts_with('/'))
            .then(|| format!("{}://{}{}", scheme, host, tail))
    })
}

/// Write the kubeconfig readable by the owner only
pub async fn write_kubeconfig(path: &Path, contents: &str) -> Result<(), K3sError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| K3sError::io(parent, e))?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(|e| K3sError::io(path, e))?;
    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| K3sError::io(path, e))?;
    }

    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| K3sError::io(path, e))?;
    file.flush().await.map_err(|e| K3sError::io(path, e))?;
    Ok(())
}
