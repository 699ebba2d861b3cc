use crate::traits::VectorIndex;
use crate::{DrawingMetadata, IndexCandidate, QueryFilters, SearchError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Distance metric the collection was created with. Qdrant reports a
/// similarity (higher is better) for cosine and dot collections and a raw
/// distance (lower is better) for euclid and manhattan ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QdrantDistance {
    #[default]
    Cosine,
    Dot,
    Euclid,
    Manhattan,
}

impl QdrantDistance {
    pub fn as_str(&self) -> &'static str {
        match self {
            QdrantDistance::Cosine => "cosine",
            QdrantDistance::Dot => "dot",
            QdrantDistance::Euclid => "euclid",
            QdrantDistance::Manhattan => "manhattan",
        }
    }

    /// Maps a Qdrant hit score onto a distance where lower is better.
    pub fn to_distance(&self, score: f64) -> f64 {
        match self {
            QdrantDistance::Cosine | QdrantDistance::Dot => 1.0 - score,
            QdrantDistance::Euclid | QdrantDistance::Manhattan => score,
        }
    }
}

impl fmt::Display for QdrantDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QdrantDistance {
    type Err = SearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "cosine" => Ok(QdrantDistance::Cosine),
            "dot" => Ok(QdrantDistance::Dot),
            "euclid" | "euclidean" => Ok(QdrantDistance::Euclid),
            "manhattan" => Ok(QdrantDistance::Manhattan),
            other => Err(SearchError::Request(format!(
                "unknown qdrant distance `{other}`"
            ))),
        }
    }
}

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    distance: QdrantDistance,
}

impl QdrantStore {
    /// Assumes a cosine collection; use [`QdrantStore::with_distance`] for
    /// any other metric.
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            distance: QdrantDistance::default(),
        }
    }

    pub fn with_distance(mut self, distance: QdrantDistance) -> Self {
        self.distance = distance;
        self
    }

    fn search_url(&self) -> Result<url::Url, SearchError> {
        let base = url::Url::parse(&format!("{}/", self.endpoint))?;
        Ok(base.join(&format!("collections/{}/points/search", self.collection))?)
    }
}

pub(crate) fn filter_body(filters: &QueryFilters) -> Option<Value> {
    if filters.is_empty() {
        return None;
    }
    let must = filters
        .equality_pairs()
        .into_iter()
        .map(|(field, value)| json!({ "key": field, "match": { "value": value } }))
        .collect::<Vec<_>>();
    Some(json!({ "must": must }))
}

/// Converts a Qdrant search response into candidates, turning each hit score
/// into a lower-is-better distance for `metric`.
pub(crate) fn candidates_from_response(
    parsed: &Value,
    metric: QdrantDistance,
) -> Vec<IndexCandidate> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let payload_str = |hit: &Value, field: &str| {
        hit.pointer(&format!("/payload/{field}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    hits.iter()
        .map(|hit| {
            let id = match hit.pointer("/id") {
                Some(Value::Number(number)) => number.to_string(),
                Some(Value::String(text)) => text.clone(),
                _ => String::new(),
            };
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

            IndexCandidate {
                id,
                text: payload_str(hit, "text"),
                metadata: DrawingMetadata {
                    project: payload_str(hit, "project"),
                    discipline: payload_str(hit, "discipline"),
                    drawing_type: payload_str(hit, "drawing_type"),
                    drawing_number: payload_str(hit, "drawing_number"),
                },
                distance: metric.to_distance(score),
            }
        })
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn query(
        &self,
        vector: &[f32],
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<IndexCandidate>, SearchError> {
        if vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter_body(filters) {
            body["filter"] = filter;
        }

        let response = self.client.post(self.search_url()?).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let candidates = candidates_from_response(&parsed, self.distance);
        debug!(limit, returned = candidates.len(), distance = %self.distance, "qdrant search");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_present_filters_are_pushed_down() {
        assert_eq!(filter_body(&QueryFilters::default()), None);

        let filters = QueryFilters {
            discipline: Some("Structural".to_string()),
            drawing_type: None,
            project: Some("tower".to_string()),
        };
        assert_eq!(
            filter_body(&filters),
            Some(json!({
                "must": [
                    { "key": "discipline", "match": { "value": "Structural" } },
                    { "key": "project", "match": { "value": "tower" } },
                ]
            }))
        );
    }

    #[test]
    fn response_rows_become_candidates() {
        let response = json!({
            "result": [
                {
                    "id": 42,
                    "score": 0.75,
                    "payload": {
                        "text": "W18x106 (QTY:2)",
                        "project": "tower",
                        "discipline": "Structural",
                        "drawing_type": "Plan",
                        "drawing_number": "S2.1"
                    }
                },
                { "id": "c0ffee", "score": 0.5, "payload": {} }
            ]
        });

        let candidates = candidates_from_response(&response, QdrantDistance::Cosine);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, "42");
        assert_eq!(candidates[0].metadata.drawing_number, "S2.1");
        assert!((candidates[0].distance - 0.25).abs() < 1e-9);
        assert_eq!(candidates[1].id, "c0ffee");
        assert_eq!(candidates[1].text, "");
    }

    #[test]
    fn malformed_response_yields_no_candidates() {
        assert!(candidates_from_response(&json!({ "status": "error" }), QdrantDistance::Cosine).is_empty());
    }

    #[test]
    fn euclid_scores_are_already_distances() {
        let response = json!({
            "result": [
                { "id": 1, "score": 0.2, "payload": {} },
                { "id": 2, "score": 1.4, "payload": {} }
            ]
        });

        let candidates = candidates_from_response(&response, QdrantDistance::Euclid);
        assert!((candidates[0].distance - 0.2).abs() < 1e-9);
        assert!(candidates[0].distance < candidates[1].distance);

        let cosine = candidates_from_response(&response, QdrantDistance::Cosine);
        assert!((cosine[0].distance - 0.8).abs() < 1e-9);
    }

    #[test]
    fn distance_names_parse_leniently() {
        assert_eq!("Euclid".parse::<QdrantDistance>().ok(), Some(QdrantDistance::Euclid));
        assert_eq!(" dot ".parse::<QdrantDistance>().ok(), Some(QdrantDistance::Dot));
        assert!("hamming".parse::<QdrantDistance>().is_err());
    }

    #[tokio::test]
    async fn mismatched_query_vector_is_rejected_before_any_request() {
        let store = QdrantStore::new("http://127.0.0.1:9", "drawings", 4);
        let result = store.query(&[0.0; 3], &QueryFilters::default(), 10).await;
        assert!(matches!(result, Err(SearchError::Request(_))));
    }

    #[test]
    fn search_url_is_built_from_endpoint() {
        let store = QdrantStore::new("http://localhost:6333/", "drawings", 128);
        let url = store.search_url().expect("valid url");
        assert_eq!(
            url.as_str(),
            "http://localhost:6333/collections/drawings/points/search"
        );
    }
}
