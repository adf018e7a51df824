//! Control plane sources.
//!
//! The engine only sees [`ControlPlaneSource`]. The bundled
//! [`HttpControlPlaneSource`] reads JSON over HTTP:
//!
//! ```text
//! GET {base}/sync/{type}/events?from={from}&to={to}   → EventBatch
//! GET {base}/sync/{type}/state                        → FullState
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::config::SyncConfig;
use crate::sync::event::{EventBatch, FullState, RegistryType};
use crate::sync::SyncError;

#[async_trait]
pub trait ControlPlaneSource: Send + Sync {
    /// Events of `registry_type` with a timestamp in `(from, to]`, ascending.
    async fn fetch_events(&self, registry_type: RegistryType, from: i64, to: i64) -> Result<EventBatch, SyncError>;

    /// Every deployed object of `registry_type`.
    async fn fetch_full_state(&self, registry_type: RegistryType) -> Result<FullState, SyncError>;
}

pub struct HttpControlPlaneSource {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpControlPlaneSource {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let base = Url::parse(&config.control_plane_url)
            .map_err(|e| SyncError::InvalidResponse(format!("control plane url: {e}")))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SyncError::SourceUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base,
            token: config.token.clone(),
        })
    }

    fn url(&self, registry_type: RegistryType, leaf: &str) -> Result<Url, SyncError> {
        let path = format!("sync/{}/{leaf}", registry_type.path_segment());
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join(&path)
            .map_err(|e| SyncError::InvalidResponse(format!("control plane url: {e}")))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, SyncError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::SourceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::SourceUnavailable(format!("{url} returned {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ControlPlaneSource for HttpControlPlaneSource {
    async fn fetch_events(&self, registry_type: RegistryType, from: i64, to: i64) -> Result<EventBatch, SyncError> {
        let mut url = self.url(registry_type, "events")?;
        url.query_pairs_mut()
            .append_pair("from", &from.to_string())
            .append_pair("to", &to.to_string());
        self.get(url).await
    }

    async fn fetch_full_state(&self, registry_type: RegistryType) -> Result<FullState, SyncError> {
        let url = self.url(registry_type, "state")?;
        self.get(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base: &str) -> HttpControlPlaneSource {
        let config = SyncConfig {
            control_plane_url: base.to_string(),
            ..SyncConfig::default()
        };
        HttpControlPlaneSource::new(&config).unwrap()
    }

    #[test]
    fn test_urls_keep_base_path() {
        let source = source("http://cp.internal:8083/management");
        let url = source.url(RegistryType::ApiKey, "events").unwrap();
        assert_eq!(url.as_str(), "http://cp.internal:8083/management/sync/api-keys/events");

        let root = source_root();
        assert_eq!(
            root.url(RegistryType::Api, "state").unwrap().as_str(),
            "http://cp.internal:8083/sync/apis/state"
        );
    }

    fn source_root() -> HttpControlPlaneSource {
        source("http://cp.internal:8083")
    }

    #[tokio::test]
    async fn test_unreachable_source_is_unavailable() {
        let source = source("http://127.0.0.1:1");
        let err = source.fetch_full_state(RegistryType::Api).await.unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable(_)));
    }
}
