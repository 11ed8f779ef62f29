//! HTTP work handle
//!
//! Implements [`WorkHandle`] over the query service's REST API
//! (`POST /v1/vector/search`), which lets the binary monitor a deployment
//! without an RPC client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::handle::{HandleError, Hit, SearchRequest, SearchResponse, Status, WorkHandle};

/// Search route relative to the base URL
pub const SEARCH_PATH: &str = "/v1/vector/search";

/// REST code meaning success
const REST_OK: i32 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RestSearchBody<'a> {
    collection_name: &'a str,
    anns_field: &'a str,
    vector: &'a [f32],
    limit: usize,
    metric_type: &'a str,
    round_decimal: i32,
    consistency_level: &'a str,
    #[serde(skip_serializing_if = "no_params")]
    params: &'a BTreeMap<String, String>,
}

fn no_params(params: &&BTreeMap<String, String>) -> bool {
    params.is_empty()
}

#[derive(Debug, Deserialize)]
struct RestSearchReply {
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Vec<Hit>,
}

/// [`WorkHandle`] speaking the REST search API of one endpoint
#[derive(Debug, Clone)]
pub struct RestWorkHandle {
    client: Client,
    base_url: String,
}

impl RestWorkHandle {
    /// Create a handle for `base_url` (e.g. `http://10.0.0.1:19530`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing client (connection pool shared across endpoints)
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn search_one(
        &self,
        request: &SearchRequest,
        vector: &[f32],
    ) -> Result<Vec<Hit>, HandleError> {
        let body = RestSearchBody {
            collection_name: &request.collection_name,
            anns_field: &request.vector_field,
            vector,
            limit: request.top_k,
            metric_type: &request.metric_type,
            round_decimal: request.round_decimal,
            consistency_level: request.consistency_level.as_str(),
            params: &request.params,
        };

        let response = self
            .client
            .post(format!("{}{}", self.base_url, SEARCH_PATH))
            .json(&body)
            .send()
            .await
            .map_err(|e| HandleError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HandleError::Status {
                code: i32::from(response.status().as_u16()),
                reason: response
                    .status()
                    .canonical_reason()
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        let reply: RestSearchReply = response
            .json()
            .await
            .map_err(|e| HandleError::Decode(e.to_string()))?;

        if reply.code != REST_OK && reply.code != 0 {
            return Err(HandleError::Status {
                code: reply.code,
                reason: reply.message,
            });
        }

        Ok(reply.data)
    }
}

#[async_trait]
impl WorkHandle for RestWorkHandle {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, HandleError> {
        // The REST route takes one vector per call
        let mut results = Vec::with_capacity(request.vectors.len());
        for vector in &request.vectors {
            results.push(self.search_one(request, vector).await?);
        }

        Ok(SearchResponse {
            status: Status::success(),
            results,
        })
    }
}
