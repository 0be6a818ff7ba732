//! Management API client
//!
//! Three operations against the CLIProxyAPI management base: list auth
//! files, relay one synthetic probe through a chosen auth file, and delete
//! an auth file by name. Every call attaches the bearer management key and a
//! fixed per-request timeout; exceeding the timeout surfaces as a transport
//! failure, never as a classification.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{AuthFileEntry, ListResponse, ProbeResponse};

/// The synthetic downstream request sent through each credential.
///
/// This is operator-supplied configuration, not protocol: the management
/// server substitutes `$TOKEN$` in the header template with the credential
/// under test and replays the request verbatim. The body is an opaque
/// string and is never parsed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeTemplate {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl Default for ProbeTemplate {
    /// The fixed Codex chat-completion probe.
    fn default() -> Self {
        let headers = [
            ("Authorization", "Bearer $TOKEN$"),
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
            ("Openai-Beta", "responses=experimental"),
            ("Version", "0.98.0"),
            ("User-Agent", "codex_cli_rs/0.98.0 (Windows 10; x86_64)"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            method: "POST".to_string(),
            url: "https://chatgpt.com/backend-api/codex/responses/compact".to_string(),
            headers,
            body: serde_json::json!({
                "model": "gpt-5-mini",
                "input": [{
                    "role": "user",
                    "content": [{"type": "input_text", "text": "ping"}]
                }]
            })
            .to_string(),
        }
    }
}

/// Abstraction over the management API for the reconciliation loop.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Gateway>`), so tests can substitute a scripted gateway.
pub trait Gateway: Send + Sync {
    /// `GET /auth-files` — the full listing, unfiltered.
    fn list_entries<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AuthFileEntry>>> + Send + 'a>>;

    /// `POST /api-call` — relay the probe template through one auth file.
    ///
    /// A non-2xx on the management call itself is an error; the downstream
    /// status (including 401/429) arrives inside the `ProbeResponse`.
    fn probe_entry<'a>(
        &'a self,
        key: &'a str,
        auth_index: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeResponse>> + Send + 'a>>;

    /// `DELETE /auth-files?name=…` — remove an auth file by name.
    fn delete_entry<'a>(
        &'a self,
        key: &'a str,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// reqwest-backed gateway implementation.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    template: ProbeTemplate,
}

impl HttpGateway {
    /// `base_url` is the management root, e.g.
    /// `http://127.0.0.1:8317/v0/management` (no trailing slash).
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        timeout: Duration,
        template: ProbeTemplate,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            template,
        }
    }

    /// Send one management request and return `(status, body text)`.
    ///
    /// Transport-level failures (no response at all) become
    /// `Error::Transport`; a received non-2xx is reported by the caller as
    /// `Error::Api` so the status and raw body are preserved.
    async fn send(&self, request: reqwest::RequestBuilder, key: &str) -> Result<(u16, String)> {
        let response = request
            .bearer_auth(key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

impl Gateway for HttpGateway {
    fn list_entries<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AuthFileEntry>>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/auth-files", self.base_url);
            let (status, body) = self.send(self.client.get(&url), key).await?;
            if !(200..300).contains(&status) {
                return Err(Error::Api { status, body });
            }

            let listing: ListResponse = serde_json::from_str(&body).unwrap_or_default();
            debug!(files = listing.files.len(), "listed auth files");
            Ok(listing.files)
        })
    }

    fn probe_entry<'a>(
        &'a self,
        key: &'a str,
        auth_index: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ProbeResponse>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/api-call", self.base_url);
            let payload = serde_json::json!({
                "auth_index": auth_index,
                "method": self.template.method,
                "url": self.template.url,
                "header": self.template.headers,
                "data": self.template.body,
            });

            let (status, body) = self
                .send(self.client.post(&url).json(&payload), key)
                .await?;
            if !(200..300).contains(&status) {
                return Err(Error::Api { status, body });
            }

            // An empty or non-JSON relay body means no downstream response
            Ok(serde_json::from_str(&body).unwrap_or_default())
        })
    }

    fn delete_entry<'a>(
        &'a self,
        key: &'a str,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/auth-files", self.base_url);
            let request = self.client.delete(&url).query(&[("name", name)]);
            let (status, body) = self.send(request, key).await?;
            if !(200..300).contains(&status) {
                return Err(Error::Api { status, body });
            }
            debug!(name, "deleted auth file");
            Ok(())
        })
    }
}
