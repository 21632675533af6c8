//! Webhook delivery for release announcements.
//!
//! A [`WebhookClient`] POSTs a JSON [`AnnouncePayload`] to one URL. When a
//! secret is configured the body is signed with HMAC-SHA256 and the digest is
//! sent as `X-Herald-Signature: sha256=<hex>`.
//!
//! Delivery is synchronous: the caller decides whether a failed announcement
//! matters. [`WebhookError::is_transient`] separates retryable failures
//! (timeouts, 408, 429, 5xx) from permanent ones (other 4xx).

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "X-Herald-Signature";

/// User agent for webhook requests.
pub const USER_AGENT: &str = concat!("herald/", env!("CARGO_PKG_VERSION"));

/// Announcement body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub version: String,
    pub tag: String,
    pub message: String,
}

/// Webhook delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to serialize webhook payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl WebhookError {
    pub fn is_transient(&self) -> bool {
        match self {
            WebhookError::Status { status, .. } => is_transient_status(*status),
            WebhookError::Transport(e) => e.is_timeout() || e.is_connect(),
            WebhookError::Serialize(_) => false,
        }
    }
}

/// 408, 429 and every 5xx are worth retrying; everything else is not.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// HMAC-SHA256 of `body`, hex encoded.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Blocking webhook client bound to one URL.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::blocking::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(
        url: impl Into<String>,
        secret: Option<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, WebhookError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver one payload; any non-2xx status is an error.
    pub fn send(&self, payload: &AnnouncePayload) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(payload)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(
                SIGNATURE_HEADER,
                format!("sha256={}", sign_payload(secret, &body)),
            );
        }

        let response = request.body(body).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
