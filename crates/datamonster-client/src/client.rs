//! The signed reqwest-backed session.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, DATE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use datamonster_core::{DmError, Result};

use crate::sign::{date_header_value, decode_secret, sign_request};
use crate::transport::{CONTENT_TYPE_JSON, Payload, Transport, classify_response};

/// Default server base URL.
pub const DEFAULT_SERVER: &str = "https://dm.adaptivemgmt.com";

/// Statuses treated as transient and retried.
const RETRY_STATUSES: [u16; 3] = [500, 502, 504];

/// Maximum number of retries after the initial attempt.
const MAX_RETRIES: u32 = 3;

/// Default base delay between retries; doubles per attempt.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// An authenticated session against a DataMonster server.
///
/// Each outbound request gets a fresh `Date` header and signature. Requests that
/// fail with 500/502/504 are retried with exponential backoff; 4xx responses and
/// transport failures are not retried.
#[derive(Clone)]
pub struct DmClient {
    http: reqwest::Client,
    server: String,
    key_id: String,
    secret_hex: String,
    retry_backoff: Duration,
}

impl fmt::Debug for DmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmClient")
            .field("server", &self.server)
            .field("key_id", &self.key_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl DmClient {
    /// Creates a session against the default server with TLS verification on.
    ///
    /// Fails with [`DmError::Auth`] if `secret` is not valid hex.
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        Self::with_config(key_id, secret, None, true)
    }

    /// Creates a session with an explicit server and TLS verification flag.
    pub fn with_config(
        key_id: impl Into<String>,
        secret: impl Into<String>,
        server: Option<String>,
        verify: bool,
    ) -> Result<Self> {
        let secret_hex = secret.into();
        // Surface malformed key material at construction, not on first call.
        decode_secret(&secret_hex)?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify)
            .build()
            .map_err(|e| DmError::Network(e.to_string()))?;

        Ok(Self {
            http,
            server: server.unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            key_id: key_id.into(),
            secret_hex,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Overrides the base retry delay.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Returns the server base URL this session talks to.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    fn builder(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::RequestBuilder> {
        let date = date_header_value();
        let signature = sign_request(&self.secret_hex, method, path, &date)?;
        let url = format!("{}{}", self.server, path);

        let mut builder = match method {
            "POST" => self.http.post(&url),
            _ => self.http.get(&url),
        };
        let authorization = format!("DM {}:{}", self.key_id, signature);
        builder = builder.headers(request_headers(&date, &authorization, headers)?);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder)
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<Payload> {
        let mut attempt = 0;
        loop {
            tracing::debug!(method, path, attempt, "DataMonster request");
            let response = self
                .builder(method, path, body, headers)?
                .send()
                .await
                .map_err(|e| DmError::Network(e.to_string()))?;

            let status = response.status();
            if RETRY_STATUSES.contains(&status.as_u16()) && attempt < MAX_RETRIES {
                let delay = self.retry_backoff * 2u32.pow(attempt);
                tracing::debug!(status = status.as_u16(), ?delay, "retrying transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let reason = status.canonical_reason().unwrap_or("").to_string();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DmError::Network(e.to_string()))?;

            return classify_response(status.as_u16(), &reason, &content_type, bytes.to_vec());
        }
    }
}

/// Assembles the outbound header set. Caller headers use insert semantics, so a
/// caller-supplied `Accept` replaces the JSON default instead of joining it.
fn request_headers(
    date: &str,
    authorization: &str,
    extra: &[(&str, &str)],
) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    map.insert(
        DATE,
        HeaderValue::from_str(date).map_err(|e| DmError::Network(e.to_string()))?,
    );
    map.insert(
        AUTHORIZATION,
        HeaderValue::from_str(authorization).map_err(|e| DmError::Network(e.to_string()))?,
    );
    map.insert(ACCEPT, HeaderValue::from_static(CONTENT_TYPE_JSON));
    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DmError::Network(e.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| DmError::Network(e.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for DmClient {
    async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Result<Payload> {
        self.request("GET", path, None, headers).await
    }

    async fn post(&self, path: &str, body: &Value, headers: &[(&str, &str)]) -> Result<Payload> {
        self.request("POST", path, Some(body), headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_secret_fails_at_construction() {
        let err = DmClient::new("key", "not hex").unwrap_err();
        assert!(matches!(err, DmError::Auth(_)));
    }

    #[test]
    fn debug_redacts_the_secret() {
        let client = DmClient::new("key", "deadbeef").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("deadbeef"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn accept_defaults_to_json() {
        let map = request_headers("date", "DM key:sig", &[]).unwrap();
        assert_eq!(map.get(ACCEPT).unwrap(), CONTENT_TYPE_JSON);
        assert_eq!(map.get(DATE).unwrap(), "date");
        assert_eq!(map.get(AUTHORIZATION).unwrap(), "DM key:sig");
    }

    #[test]
    fn caller_accept_replaces_the_default() {
        let map = request_headers("date", "DM key:sig", &[("Accept", "avro/binary")]).unwrap();
        // Exactly one Accept value: the caller's, not both.
        assert_eq!(map.get_all(ACCEPT).iter().count(), 1);
        assert_eq!(map.get(ACCEPT).unwrap(), "avro/binary");
    }

    #[test]
    fn default_server_is_used_when_unset() {
        let client = DmClient::new("key", "deadbeef").unwrap();
        assert_eq!(client.server(), DEFAULT_SERVER);

        let client =
            DmClient::with_config("key", "deadbeef", Some("https://example.com".into()), true)
                .unwrap();
        assert_eq!(client.server(), "https://example.com");
    }
}
