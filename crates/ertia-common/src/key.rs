//! SSH key registered with the infrastructure back end

use serde::{Deserialize, Serialize};

/// Status of the project's SSH key on its back end
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum KeyStatus {
    /// Not yet registered
    #[default]
    New,
    /// Registration in progress
    Adapting,
    /// Registered and usable for node creation
    Active,
    /// Registration failed, see the key's `error`
    Failing,
    /// Removed from the back end
    Deleted,
}

/// Public key material handed to the back end when creating nodes
///
/// The install protocol does not use this entry; it authenticates with the
/// private keys found in the local keys directory.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    /// Name shown in the back end's console
    pub name: String,
    /// OpenSSH public key line
    pub public_key: String,
    /// Identifier assigned by the back end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Fingerprint reported by the back end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Registration status
    #[serde(default)]
    pub status: KeyStatus,
    /// Last registration failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SshKey {
    /// Create an unregistered key
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public_key: public_key.into(),
            ..Default::default()
        }
    }
}
