//! HTTP client for the upstream case repository
//!
//! Walks a cursor-paginated JSON API. Each page carries records with stable
//! identifiers and last-modified timestamps; the server returns an opaque
//! cursor until the window is exhausted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::error::SyncError;
use crate::types::CaseRecord;

use super::{CasePage, CaseSource};

/// HTTP-based case repository client
pub struct HttpCaseSource {
    client: reqwest::Client,
    endpoint: String,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    records: Vec<CaseRecord>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl HttpCaseSource {
    /// Create a client from the source configuration
    pub fn new(config: &SourceConfig) -> Result<Self, SyncError> {
        info!("Initializing case source client: {}", config.endpoint);

        let mut headers = HeaderMap::new();
        let token = config
            .api_token
            .clone()
            .or_else(|| std::env::var("CASEDEX_SOURCE_TOKEN").ok());
        if let Some(token) = token {
            let value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value)
                    .map_err(|e| SyncError::Config(format!("Invalid API token format: {}", e)))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            page_size: config.page_size,
        })
    }
}

#[async_trait]
impl CaseSource for HttpCaseSource {
    async fn fetch_page(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cursor: Option<String>,
    ) -> Result<CasePage, SyncError> {
        let url = format!("{}/cases", self.endpoint);
        let mut query: Vec<(&str, String)> = vec![
            ("modified_from", from.to_rfc3339()),
            ("modified_to", to.to_rfc3339()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        debug!("Fetching case page from {} ({} .. {})", url, from, to);

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| SyncError::Extraction(format!("case repository unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Extraction(format!(
                "case repository error ({}): {}",
                status, body
            )));
        }

        let page: PageResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Extraction(format!("malformed page response: {}", e)))?;

        debug!(
            "Fetched {} records, next_cursor={}",
            page.records.len(),
            page.next_cursor.is_some()
        );

        Ok(CasePage {
            records: page.records,
            next_cursor: page.next_cursor,
        })
    }

    async fn probe(&self) -> Result<(), SyncError> {
        let url = format!("{}/health", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Extraction(format!("probe failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::Extraction(format!(
                "probe returned {}",
                response.status()
            )))
        }
    }
}
