//! # HTTP control-plane client.
//!
//! Speaks the platform's runtime API (version `2018-06-01`):
//!
//! ```text
//! GET  /2018-06-01/runtime/invocation/next            → payload + Lambda-Runtime-* headers
//! POST /2018-06-01/runtime/invocation/{id}/response   ← raw success payload
//! POST /2018-06-01/runtime/invocation/{id}/error      ← ErrorEnvelope JSON
//! POST /2018-06-01/runtime/init/error                 ← ErrorEnvelope JSON
//! ```
//!
//! Error posts carry `Lambda-Runtime-Function-Error-Type: <errorType>`.
//! `next` is sent without a request timeout: the platform holds it open until
//! there is work.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, Url};

use crate::client::{ControlPlane, retry::with_retry};
use crate::config::Config;
use crate::error::{BridgeError, ClientError};
use crate::events::Bus;
use crate::invocation::{Invocation, Malformed, RequestId};
use crate::policies::BackoffPolicy;
use crate::report::ErrorEnvelope;

pub const API_VERSION: &str = "2018-06-01";

pub const HEADER_REQUEST_ID: &str = "lambda-runtime-aws-request-id";
pub const HEADER_DEADLINE_MS: &str = "lambda-runtime-deadline-ms";
pub const HEADER_ERROR_TYPE: &str = "lambda-runtime-function-error-type";
const CONTEXT_HEADER_PREFIX: &str = "lambda-runtime-";

/// [`ControlPlane`] over HTTP with a bounded retry budget for `next`.
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    http: Client,
    base: Url,
    bus: Bus,
    poll_attempts: u32,
    poll_backoff: BackoffPolicy,
    report_timeout: Duration,
    default_timeout: Duration,
    max_payload_bytes: usize,
}

impl HttpControlPlane {
    /// Builds a client for `cfg.runtime_api` publishing retry events on `bus`.
    pub fn new(cfg: &Config, bus: Bus) -> Result<Self, ClientError> {
        let base = base_url(&cfg.runtime_api)?;
        let http = Client::builder()
            .user_agent(concat!("bridgevisor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base,
            bus,
            poll_attempts: cfg.poll_attempts(),
            poll_backoff: cfg.poll_backoff,
            report_timeout: cfg.report_timeout,
            default_timeout: cfg.default_timeout,
            max_payload_bytes: cfg.max_payload_bytes,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// One `next` attempt, no retries.
    async fn fetch_next(&self) -> Result<Invocation, ClientError> {
        let url = self.endpoint(&["runtime", "invocation", "next"])?;
        let resp = ensure_success(self.http.get(url).send().await?).await?;

        let headers = resp.headers().clone();
        let request_id = header_str(&headers, HEADER_REQUEST_ID)
            .filter(|id| !id.is_empty())
            .ok_or(ClientError::MissingHeader(HEADER_REQUEST_ID))?
            .to_string();
        let deadline = parse_deadline(header_str(&headers, HEADER_DEADLINE_MS), self.default_timeout);
        let payload = resp.bytes().await?;

        let mut inv = Invocation::new(request_id, payload, SystemTime::now());
        inv.headers = context_headers(&headers);
        match deadline {
            Ok(at) => inv.deadline = at,
            Err(raw) => inv.malformed = Some(Malformed::InvalidDeadline(raw)),
        }
        if inv.malformed.is_none() && inv.payload.len() > self.max_payload_bytes {
            inv.malformed = Some(Malformed::PayloadTooLarge {
                size: inv.payload.len(),
                limit: self.max_payload_bytes,
            });
        }
        Ok(inv)
    }

    async fn post_envelope(&self, url: Url, envelope: &ErrorEnvelope) -> Result<(), ClientError> {
        let mut req = self
            .http
            .post(url)
            .timeout(self.report_timeout)
            .json(envelope);
        if envelope.error_type().bytes().all(|b| b.is_ascii_graphic()) {
            req = req.header(HEADER_ERROR_TYPE, envelope.error_type());
        }
        ensure_success(req.send().await?).await.map(drop)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn next_invocation(&self) -> Result<Invocation, BridgeError> {
        with_retry(self.poll_attempts, &self.poll_backoff, &self.bus, || self.fetch_next()).await
    }

    async fn report_success(&self, id: &RequestId, payload: Bytes) -> Result<(), ClientError> {
        let url = self.endpoint(&["runtime", "invocation", id.as_str(), "response"])?;
        let resp = self
            .http
            .post(url)
            .timeout(self.report_timeout)
            .body(payload)
            .send()
            .await?;
        ensure_success(resp).await.map(drop)
    }

    async fn report_failure(
        &self,
        id: &RequestId,
        envelope: &ErrorEnvelope,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["runtime", "invocation", id.as_str(), "error"])?;
        self.post_envelope(url, envelope).await
    }

    async fn report_init_error(&self, envelope: &ErrorEnvelope) -> Result<(), ClientError> {
        let url = self.endpoint(&["runtime", "init", "error"])?;
        self.post_envelope(url, envelope).await
    }
}

/// Accepts `host:port` or a full `http://host:port` address.
fn base_url(runtime_api: &str) -> Result<Url, ClientError> {
    let trimmed = runtime_api.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return Err(ClientError::InvalidEndpoint(runtime_api.to_string()));
    }
    let raw = if trimmed.contains("://") {
        format!("{trimmed}/{API_VERSION}")
    } else {
        format!("http://{trimmed}/{API_VERSION}")
    };
    let url = Url::parse(&raw).map_err(|_| ClientError::InvalidEndpoint(runtime_api.to_string()))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ClientError::InvalidEndpoint(runtime_api.to_string()));
    }
    Ok(url)
}

async fn ensure_success(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body: body.chars().take(256).collect(),
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Absent header → `now + fallback`; unparseable header → `Err(raw)`.
fn parse_deadline(raw: Option<&str>, fallback: Duration) -> Result<SystemTime, String> {
    match raw {
        None => Ok(SystemTime::now() + fallback),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms))
            .map_err(|_| v.to_string()),
    }
}

/// Every `lambda-runtime-*` header except the two the bridge consumes itself.
fn context_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| {
            let n = name.as_str();
            n.starts_with(CONTEXT_HEADER_PREFIX) && n != HEADER_REQUEST_ID && n != HEADER_DEADLINE_MS
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
