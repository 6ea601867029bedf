//! Confirms an Ollama API behind an open port and inventories its models.
//!
//! Certificate validation is off for every request made here: targets are
//! usually internal hosts with self-signed or no certificates, and the check
//! only looks at response shape.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use sweeper_core::{Outcome, Probe, Target};
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

/// Body text served by the Ollama root endpoint.
pub const OLLAMA_MARKER: &str = "Ollama is running";
pub const DEFAULT_PORT: u16 = 11434;
const MAX_BODY: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Https => "https",
            Scheme::Http => "http",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub timeout_ms: u64,
    pub redirects: usize,
    pub user_agent: String,
    /// Tried in order; the first scheme that gets any response decides.
    pub schemes: Vec<Scheme>,
    /// Also accept any 2xx response, not just the marker text.
    pub lenient: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            timeout_ms: 5000,
            redirects: 2,
            user_agent: format!("sweeper/{}", env!("CARGO_PKG_VERSION")),
            schemes: vec![Scheme::Https, Scheme::Http],
            lenient: false,
        }
    }
}

pub fn build_client(opts: &CheckOptions) -> Result<Client> {
    let client = Client::builder()
        .redirect(Policy::limited(opts.redirects))
        .timeout(Duration::from_millis(opts.timeout_ms))
        .user_agent(opts.user_agent.clone())
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .gzip(true)
        .build()?;
    Ok(client)
}

/// Fingerprint rule for the root endpoint.
pub fn is_ollama(status: u16, body: &str, lenient: bool) -> bool {
    body.contains(OLLAMA_MARKER) || (lenient && (200..300).contains(&status))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Confirmed { url: String },
    NotConfirmed { url: String, status: u16 },
    Unreachable { error: String },
}

async fn fetch_root(client: &Client, url: &str) -> Result<(u16, String)> {
    let resp = client.get(url).send().await?;
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await?;
    let body = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY)]).into_owned();
    Ok((status, body))
}

/// One request per scheme until something answers.
pub async fn check_service(client: &Client, ip: IpAddr, port: u16, schemes: &[Scheme], lenient: bool) -> Verdict {
    let authority = SocketAddr::new(ip, port);
    let mut last_error = String::from("no scheme configured");
    for scheme in schemes {
        let url = format!("{}://{}/", scheme.as_str(), authority);
        match fetch_root(client, &url).await {
            Ok((status, body)) => {
                return if is_ollama(status, &body, lenient) {
                    Verdict::Confirmed { url }
                } else {
                    Verdict::NotConfirmed { url, status }
                };
            }
            Err(e) => {
                debug!(%url, error = %e, "request failed");
                last_error = e.to_string();
            }
        }
    }
    Verdict::Unreachable { error: last_error }
}

/// Service verification check for `host:port` targets.
#[derive(Debug, Clone)]
pub struct OllamaProbe {
    client: Client,
    schemes: Vec<Scheme>,
    lenient: bool,
}

impl OllamaProbe {
    pub fn new(opts: &CheckOptions) -> Result<Self> {
        if opts.schemes.is_empty() {
            return Err(anyhow!("at least one scheme is required"));
        }
        Ok(OllamaProbe { client: build_client(opts)?, schemes: opts.schemes.clone(), lenient: opts.lenient })
    }
}

#[async_trait]
impl Probe for OllamaProbe {
    async fn check(&self, target: &Target) -> Outcome {
        let port = target.port.unwrap_or(DEFAULT_PORT);
        match check_service(&self.client, target.host, port, &self.schemes, self.lenient).await {
            Verdict::Confirmed { .. } => Outcome::found([port]),
            Verdict::NotConfirmed { .. } => Outcome::Unconfirmed,
            Verdict::Unreachable { .. } => Outcome::Unreachable,
        }
    }
}

/// Models advertised by one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelReport {
    pub host: String,
    pub status: String,
    pub models: Vec<String>,
    pub error: Option<String>,
}

impl ModelReport {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Deserialize)]
struct Tags {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: Option<String>,
}

/// `host[:port]` or a full URL, normalised to a base URL without trailing slash.
pub fn base_url(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}

/// Split a host string into host and explicit port, dropping any scheme.
pub fn split_host_port(host: &str) -> (String, Option<u16>) {
    match Url::parse(&base_url(host)) {
        Ok(url) => (url.host_str().unwrap_or_default().to_string(), url.port()),
        Err(_) => (host.to_string(), None),
    }
}

async fn fetch_tags(client: &Client, base: &str) -> Result<Vec<String>> {
    let url = format!("{}/api/tags", base);
    let resp = client.get(&url).send().await?.error_for_status()?;
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await?;
    let tags: Tags = serde_json::from_slice(&bytes).map_err(|_| {
        let snippet: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
        anyhow!("invalid JSON from {}: {} (status={})", url, snippet.replace('\n', " "), status)
    })?;
    Ok(tags.models.into_iter().filter_map(|m| m.name).filter(|n| !n.is_empty()).collect())
}

/// GET `/api/tags` on one host.
pub async fn fetch_models(client: &Client, host: &str) -> ModelReport {
    match fetch_tags(client, &base_url(host)).await {
        Ok(models) => ModelReport { host: host.to_string(), status: "ok".into(), models, error: None },
        Err(e) => ModelReport { host: host.to_string(), status: "error".into(), models: Vec::new(), error: Some(e.to_string()) },
    }
}

/// Inventory many hosts with at most `concurrency` requests in flight. Reports keep input order.
pub async fn list_models(hosts: Vec<String>, client: Client, concurrency: usize) -> Vec<ModelReport> {
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::new();
    for host in hosts {
        let permit = match sem.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let r = fetch_models(&client, &host).await;
            drop(permit);
            r
        }));
    }
    let mut out = Vec::new();
    for h in handles {
        if let Ok(r) = h.await {
            out.push(r);
        }
    }
    out
}
