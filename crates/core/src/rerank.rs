use crate::traits::Reranker;
use crate::{RerankDocument, RerankedItem, SearchError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RerankRow>,
}

#[derive(Debug, Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f64,
}

/// Client for a Cohere-style `/rerank` endpoint. The service answers with
/// document indices, which are mapped back to ids here.
pub struct HttpReranker {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpReranker {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, SearchError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client: Client::new(),
        })
    }
}

fn map_rows(rows: Vec<RerankRow>, documents: &[RerankDocument], top_n: usize) -> Vec<RerankedItem> {
    let mut items: Vec<RerankedItem> = rows
        .into_iter()
        .filter_map(|row| {
            documents.get(row.index).map(|document| RerankedItem {
                id: document.id.clone(),
                score: row.relevance_score,
            })
        })
        .collect();
    items.sort_by(|left, right| right.score.total_cmp(&left.score));
    items.truncate(top_n);
    items
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_n: usize,
    ) -> Result<Vec<RerankedItem>, SearchError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(format!("{}/rerank", self.endpoint))
            .json(&RerankRequest {
                model: &self.model,
                query,
                documents: documents.iter().map(|document| document.text.as_str()).collect(),
                top_n,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "rerank".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: RerankResponse = response.json().await?;
        Ok(map_rows(parsed.results, documents, top_n))
    }
}
