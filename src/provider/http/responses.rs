//! # Response Types
//!
//! JSON payloads returned by the secret store API.

use crate::secret::{Payload, RemoteSecretState, VersionToken};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Page of `GET /v1/secrets`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSecretsResponse {
    #[serde(default)]
    pub secrets: Vec<RemoteSecretState>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Body of `GET /v1/secrets/{name}`
#[derive(Deserialize)]
pub struct GetSecretResponse {
    #[allow(dead_code, reason = "Part of the API contract, the caller already knows the name")]
    pub name: String,
    #[allow(dead_code, reason = "Part of the API contract, versions come from list()")]
    pub version: VersionToken,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl GetSecretResponse {
    /// Move the values into a [`Payload`] without copying the plaintext
    pub fn into_payload(self) -> Payload {
        self.data.into_iter().collect()
    }
}

/// Body returned by a successful `PUT`
#[derive(Debug, Deserialize)]
pub struct PutSecretResponse {
    pub version: VersionToken,
}
