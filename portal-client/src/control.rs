//! Control channel to the portal daemon.

use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;
use shared::protocol::{API_PREFIX, HASH_SEGMENT, INVITES_SEGMENT, PORTALS_SEGMENT};
use shared::types::{InviteToken, NewPortal, PortalId, PortalListing, VersionedPortal};
use crate::config::DaemonConfig;
use crate::error::ControlError;

/// Request/response primitives offered by the daemon.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn list_portals(&self) -> Result<PortalListing, ControlError>;

    /// Cheap change detector for the listing
    async fn listing_hash(&self) -> Result<String, ControlError>;

    async fn delete_portal(&self, id: &PortalId) -> Result<(), ControlError>;

    async fn create_invite(&self, id: &PortalId) -> Result<InviteToken, ControlError>;

    async fn create_portal(&self, new: &NewPortal) -> Result<VersionedPortal, ControlError>;
}

/// Control channel over the daemon's HTTP API
pub struct HttpControlChannel {
    client: reqwest::Client,
    base: Url,
}

impl HttpControlChannel {
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .with_context(|| format!("Invalid daemon url: {}", config.url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Daemon url cannot carry a path: {}", config.url);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ControlError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ControlError::Rejected(format!("daemon url cannot carry a path: {}", self.base))
            })?
            .pop_if_empty()
            .push(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ControlError> {
        let response = check(request.send().await.map_err(transport)?).await?;
        response.json::<T>().await.map_err(transport)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ControlError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => ControlError::NotFound,
        StatusCode::CONFLICT => ControlError::Conflict(body),
        _ if body.is_empty() => ControlError::Rejected(status.to_string()),
        _ => ControlError::Rejected(format!("{}: {}", status, body)),
    })
}

fn transport(e: reqwest::Error) -> ControlError {
    if e.is_decode() {
        ControlError::Rejected(format!("malformed daemon response: {}", e))
    } else {
        ControlError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl ControlChannel for HttpControlChannel {
    async fn list_portals(&self) -> Result<PortalListing, ControlError> {
        let url = self.endpoint(&[PORTALS_SEGMENT])?;
        self.json(self.client.get(url)).await
    }

    async fn listing_hash(&self) -> Result<String, ControlError> {
        let url = self.endpoint(&[PORTALS_SEGMENT, HASH_SEGMENT])?;
        let response = check(self.client.get(url).send().await.map_err(transport)?).await?;
        response.text().await.map_err(transport)
    }

    async fn delete_portal(&self, id: &PortalId) -> Result<(), ControlError> {
        let url = self.endpoint(&[PORTALS_SEGMENT, id.as_str()])?;
        check(self.client.delete(url).send().await.map_err(transport)?).await?;
        Ok(())
    }

    async fn create_invite(&self, id: &PortalId) -> Result<InviteToken, ControlError> {
        let url = self.endpoint(&[PORTALS_SEGMENT, id.as_str(), INVITES_SEGMENT])?;
        self.json(self.client.post(url)).await
    }

    async fn create_portal(&self, new: &NewPortal) -> Result<VersionedPortal, ControlError> {
        let url = self.endpoint(&[PORTALS_SEGMENT])?;
        self.json(self.client.post(url).json(new)).await
    }
}
