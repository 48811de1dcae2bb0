//! # HTTP Secret Store
//!
//! Client for a JSON-over-HTTP secret store.
//!
//! API endpoints (relative to the configured base URL):
//! - `GET    /v1/secrets[?pageToken=]` - list secrets with version and checksum
//! - `GET    /v1/secrets/{name}` - read the payload of a secret
//! - `PUT    /v1/secrets/{name}` - write a payload (`If-Match` / `If-None-Match: *`)
//! - `DELETE /v1/secrets/{name}` - delete a secret (`If-Match`)
//!
//! Logical names may contain `/`; they are sent as a single percent-encoded path segment.

mod requests;
mod responses;

use crate::constants::DEFAULT_STORE_TIMEOUT_SECS;
use crate::decrypt::error::truncate_detail;
use crate::provider::common::{StoreOperation, record_store_call};
use crate::provider::{RemoteStore, StoreError};
use crate::secret::{Payload, RemoteSecretState, SecretValue, VersionToken};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, Method, StatusCode, Url};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span};

use requests::PutSecretRequest;
use responses::{GetSecretResponse, ListSecretsResponse, PutSecretResponse};

/// HTTP secret store client
#[derive(Clone)]
pub struct HttpSecretStore {
    http_client: Client,
    base_url: Url,
    token: Option<SecretValue>,
}

impl std::fmt::Debug for HttpSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSecretStore")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpSecretStore {
    /// Create a client for the store at `base_url`
    ///
    /// # Errors
    /// Returns an error if the URL is not an absolute http(s) URL or the client cannot be built
    pub fn new(base_url: &str, token: Option<SecretValue>) -> Result<Self> {
        Self::with_timeout(
            base_url,
            token,
            Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
        )
    }

    /// Create a client with a per-request timeout
    ///
    /// # Errors
    /// Returns an error if the URL is not an absolute http(s) URL or the client cannot be built
    pub fn with_timeout(base_url: &str, token: Option<SecretValue>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid secret store URL: {base_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            anyhow::bail!("Secret store URL must be an http(s) URL: {base_url}");
        }

        // Create HTTP client with rustls
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "Initializing HTTP secret store client for {} (authenticated: {})",
            base_url,
            token.is_some()
        );

        Ok(Self {
            http_client,
            base_url,
            token,
        })
    }

    /// Base URL (for testing)
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/v1/secrets[/{name}]`, encoding the name as one segment
    fn secrets_url(&self, name: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                StoreError::Rejected(format!("cannot build a path on {}", self.base_url))
            })?;
            segments.pop_if_empty().extend(["v1", "secrets"]);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        Ok(url)
    }

    fn make_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let request = self.http_client.request(method, url);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token.expose())),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        name: &str,
        expected: Option<&VersionToken>,
    ) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, name, expected, &body))
    }

    async fn list_page(&self, page_token: Option<&str>) -> Result<ListSecretsResponse, StoreError> {
        let mut url = self.secrets_url(None)?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        let response = self
            .send(self.make_request(Method::GET, url), "", None)
            .await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Transient(format!("invalid list response: {e}")))
    }
}

/// Map an HTTP error status to a [`StoreError`]
///
/// 404 is `NotFound`, 409/412 `VersionConflict`, 401/403 `Unauthorized`,
/// 408/429/5xx `Transient` and any other status `Rejected`.
#[must_use]
pub fn map_status(
    status: StatusCode,
    name: &str,
    expected: Option<&VersionToken>,
    body: &str,
) -> StoreError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate_detail(body.trim()));
    match status.as_u16() {
        404 => StoreError::NotFound {
            name: name.to_string(),
        },
        409 | 412 => StoreError::VersionConflict {
            name: name.to_string(),
            expected: expected.map_or_else(|| "absent".to_string(), ToString::to_string),
        },
        401 | 403 => StoreError::Unauthorized(detail),
        408 | 429 => StoreError::Transient(detail),
        code if code >= 500 => StoreError::Transient(detail),
        _ => StoreError::Rejected(detail),
    }
}

fn map_transport_error(error: reqwest::Error) -> StoreError {
    if error.is_builder() {
        StoreError::Rejected(error.to_string())
    } else {
        // Connect failures, timeouts and interrupted bodies are all worth retrying
        StoreError::Transient(error.to_string())
    }
}

#[async_trait]
impl RemoteStore for HttpSecretStore {
    fn provider_name(&self) -> &'static str {
        "http"
    }

    async fn list(&self) -> Result<Vec<RemoteSecretState>, StoreError> {
        let span = info_span!("http.secrets.list", store.url = %self.base_url);
        record_store_call(self.provider_name(), StoreOperation::List, async {
            let mut secrets = Vec::new();
            let mut seen_tokens = HashSet::new();
            let mut page_token: Option<String> = None;
            loop {
                let page = self.list_page(page_token.as_deref()).await?;
                secrets.extend(page.secrets);
                match page.next_page_token {
                    Some(token) if !token.is_empty() => {
                        if !seen_tokens.insert(token.clone()) {
                            return Err(StoreError::Rejected(format!(
                                "listing does not terminate, page token {token} repeated"
                            )));
                        }
                        page_token = Some(token);
                    }
                    _ => break,
                }
            }
            debug!("Listed {} secrets from {}", secrets.len(), self.base_url);
            Ok(secrets)
        })
        .instrument(span)
        .await
    }

    async fn get(&self, name: &str) -> Result<Payload, StoreError> {
        let span = info_span!("http.secrets.get", secret.name = name);
        record_store_call(self.provider_name(), StoreOperation::Get, async {
            let url = self.secrets_url(Some(name))?;
            let response = self
                .send(self.make_request(Method::GET, url), name, None)
                .await?;
            let secret: GetSecretResponse = response
                .json()
                .await
                .map_err(|e| StoreError::Transient(format!("invalid get response: {e}")))?;
            Ok(secret.into_payload())
        })
        .instrument(span)
        .await
    }

    async fn put(
        &self,
        name: &str,
        payload: &Payload,
        expected_version: Option<&VersionToken>,
    ) -> Result<VersionToken, StoreError> {
        let span = info_span!(
            "http.secrets.put",
            secret.name = name,
            expected.version = expected_version.map(VersionToken::as_str)
        );
        record_store_call(self.provider_name(), StoreOperation::Put, async {
            let url = self.secrets_url(Some(name))?;
            let checksum = payload.checksum();
            let request = self.make_request(Method::PUT, url);
            let request = match expected_version {
                Some(version) => request.header(IF_MATCH, version.as_str()),
                None => request.header(IF_NONE_MATCH, "*"),
            }
            .json(&PutSecretRequest::new(payload, &checksum));

            let response = self.send(request, name, expected_version).await?;
            // The write already happened; a retry would only conflict with it
            let body: PutSecretResponse = response
                .json()
                .await
                .map_err(|e| StoreError::Rejected(format!("invalid put response: {e}")))?;
            Ok(body.version)
        })
        .instrument(span)
        .await
    }

    async fn delete(&self, name: &str, expected_version: &VersionToken) -> Result<(), StoreError> {
        let span = info_span!(
            "http.secrets.delete",
            secret.name = name,
            expected.version = expected_version.as_str()
        );
        record_store_call(self.provider_name(), StoreOperation::Delete, async {
            let url = self.secrets_url(Some(name))?;
            let request = self
                .make_request(Method::DELETE, url)
                .header(IF_MATCH, expected_version.as_str());
            self.send(request, name, Some(expected_version)).await?;
            Ok(())
        })
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let v = VersionToken::new("v3");
        let cases = [
            (StatusCode::NOT_FOUND, "not_found"),
            (StatusCode::CONFLICT, "version_conflict"),
            (StatusCode::PRECONDITION_FAILED, "version_conflict"),
            (StatusCode::UNAUTHORIZED, "unauthorized"),
            (StatusCode::FORBIDDEN, "unauthorized"),
            (StatusCode::REQUEST_TIMEOUT, "transient"),
            (StatusCode::TOO_MANY_REQUESTS, "transient"),
            (StatusCode::BAD_GATEWAY, "transient"),
            (StatusCode::SERVICE_UNAVAILABLE, "transient"),
            (StatusCode::BAD_REQUEST, "rejected"),
            (StatusCode::PAYLOAD_TOO_LARGE, "rejected"),
        ];
        for (status, kind) in cases {
            assert_eq!(map_status(status, "app/dev", Some(&v), "").kind(), kind, "{status}");
        }
    }

    #[test]
    fn test_conflict_reports_expected_version() {
        let err = map_status(StatusCode::PRECONDITION_FAILED, "app/dev", None, "");
        assert_eq!(
            err,
            StoreError::VersionConflict {
                name: "app/dev".to_string(),
                expected: "absent".to_string(),
            }
        );
    }

    #[test]
    fn test_secret_names_are_single_segments() {
        let store = HttpSecretStore::new("http://127.0.0.1:8200/store/", None).unwrap();
        let url = store.secrets_url(Some("app/dev")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8200/store/v1/secrets/app%2Fdev");
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(HttpSecretStore::new("file:///tmp/store", None).is_err());
        assert!(HttpSecretStore::new("not a url", None).is_err());
    }

    #[test]
    fn test_debug_does_not_print_token() {
        let store =
            HttpSecretStore::new("https://store.example", Some(SecretValue::new("hunter2"))).unwrap();
        assert!(!format!("{store:?}").contains("hunter2"));
    }
}
