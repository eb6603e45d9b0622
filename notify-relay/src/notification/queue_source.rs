//! HTTP-backed approval queue reader.
//!
//! Expects an endpoint answering `GET <url>?limit=N[&cursor=C]` with a JSON page:
//! `{"items": [...], "total_count": 42, "next_cursor": "abc"}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::approval::{QueuePage, QueueStatusSource};
use crate::utils::http_client;
use crate::{Error, Result};

/// Reads pending approval items from an HTTP endpoint.
pub struct HttpQueueStatusSource {
    endpoint: Url,
    client: Client,
}

impl HttpQueueStatusSource {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid queue endpoint: {}", e)))?;
        Ok(Self {
            endpoint,
            client: http_client::build_client(timeout),
        })
    }

    fn page_url(&self, limit: usize, cursor: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }
        url
    }
}

#[async_trait]
impl QueueStatusSource for HttpQueueStatusSource {
    async fn get_pending_items(&self, limit: usize, cursor: Option<&str>) -> Result<QueuePage> {
        let url = self.page_url(limit, cursor);
        debug!(url = %url, "Fetching approval queue page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Source(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Source(format!("queue endpoint returned {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Source(format!("failed to read body: {}", e)))?;
        Ok(serde_json::from_str(&body)?)
    }
}
