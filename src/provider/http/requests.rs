//! # Request Types
//!
//! JSON bodies sent to the secret store API.

use crate::secret::{Checksum, Payload};
use serde::Serialize;
use std::collections::BTreeMap;

/// Body of `PUT /v1/secrets/{name}`
///
/// Borrows the payload so plaintext is only copied into the request buffer.
#[derive(Serialize)]
pub struct PutSecretRequest<'a> {
    pub data: BTreeMap<&'a str, &'a str>,
    pub checksum: &'a Checksum,
}

impl<'a> PutSecretRequest<'a> {
    pub fn new(payload: &'a Payload, checksum: &'a Checksum) -> Self {
        Self {
            data: payload.iter().map(|(k, v)| (k, v.expose())).collect(),
            checksum,
        }
    }
}
