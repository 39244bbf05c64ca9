// ACME directory and metadata

use serde::{Deserialize, Serialize};

/// Endpoints advertised by an ACME server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    #[serde(rename = "newAccount")]
    pub new_account: String,

    #[serde(rename = "newOrder")]
    pub new_order: String,

    #[serde(rename = "newNonce")]
    pub new_nonce: String,

    #[serde(rename = "revokeCert", default, skip_serializing_if = "Option::is_none")]
    pub revoke_cert: Option<String>,

    #[serde(rename = "keyChange", default, skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

impl Directory {
    /// Whether the server only accepts accounts bound to an external account.
    pub fn requires_external_account(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|meta| meta.external_account_required)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService", skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(rename = "caaIdentities", skip_serializing_if = "Option::is_none")]
    pub caa_identities: Option<Vec<String>>,

    #[serde(
        rename = "externalAccountRequired",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_account_required: Option<bool>,
}
