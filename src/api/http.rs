use super::Channel;
use crate::error::{Error, Result};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<ApiClient> {
        let invalid = |reason: String| Error::InvalidBaseUrl {
            url: base_url.to_owned(),
            reason,
        };
        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("URL cannot have path segments".to_owned()));
        }

        let mut builder = ClientBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(Error::Client)?;

        Ok(ApiClient {
            client,
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends one path segment to the base URL. A trailing slash on the base
    /// doesn't produce an empty segment.
    pub fn endpoint(&self, segment: &str) -> Url {
        let mut url = self.base_url.clone();
        // new() rejected cannot-be-a-base URLs, so this always succeeds
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        url
    }

    pub async fn get_json(&self, segment: &str) -> Result<Value> {
        let url = self.endpoint(segment);
        debug!(%url, "GET");

        let res = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| Error::Transport {
                url: url.to_string(),
                source,
            })?;
        if !res.status().is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status: res.status(),
            });
        }

        let body = res.bytes().await.map_err(|source| Error::Transport {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn fetch_channels(&self) -> Result<Vec<Channel>> {
        let mut json = self.get_json("channels").await?;
        let jchannels = json
            .get_mut("channels")
            .map(Value::take)
            .unwrap_or(Value::Null);
        if jchannels.is_null() {
            return Ok(Vec::new());
        }

        serde_json::from_value(jchannels).map_err(|source| Error::Decode {
            url: self.endpoint("channels").to_string(),
            source,
        })
    }
}
