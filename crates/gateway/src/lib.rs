//! Outbound side of the messaging gateway.
//!
//! Pairing and transport live in an external gateway process; this crate
//! only knows how to ask it to deliver a text message.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::domain::ContactId;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{reason}")]
    Rejected { status: Option<u16>, reason: String },
    #[error("gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl GatewayError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            status: None,
            reason: reason.into(),
        }
    }
}

/// Sink for outgoing text messages.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Deliver `body` to `to`. Returns once the gateway has acknowledged the send.
    async fn send_text(&self, to: &ContactId, body: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Serialize)]
struct OutgoingText<'a> {
    to: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Gateway reached over HTTP: `POST {base_url}/send` with `{to, body}`.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn send_url(&self) -> Result<Url, GatewayError> {
        Ok(self.base_url.join("send")?)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send_text(&self, to: &ContactId, body: &str) -> Result<(), GatewayError> {
        let url = self.send_url()?;
        debug!(%url, contact_id = %to, "forwarding message to gateway");
        let response = self
            .client
            .post(url)
            .json(&OutgoingText {
                to: to.as_str(),
                body,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reason = response
            .json::<GatewayErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("gateway responded with {status}"))
            });
        Err(GatewayError::Rejected {
            status: Some(status.as_u16()),
            reason,
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
