use crate::traits::EmbeddingProvider;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Character budgets tried after the full text is rejected.
pub const TRUNCATION_CASCADE: [usize; 2] = [1_000, 500];

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic local embedder: lowercase character trigrams hashed into
/// `dimensions` buckets, L2-normalized. It needs no service, but its vectors
/// only match a collection that was indexed with the same embedder.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

fn trigram_bucket(trigram: &[char], buckets: usize) -> usize {
    let mut utf8 = [0u8; 4];
    let hash = trigram.iter().fold(FNV_OFFSET_BASIS, |hash, c| {
        c.encode_utf8(&mut utf8)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    });
    (hash % buckets as u64) as usize
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let mut counts = vec![0f32; buckets];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for trigram in chars.windows(3) {
            counts[trigram_bucket(trigram, buckets)] += 1.0;
        }

        let norm = counts.iter().map(|count| count * count).sum::<f32>().sqrt();
        if norm > 0.0 {
            counts.iter_mut().for_each(|count| *count /= norm);
        }
        counts
    }
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(self.embed(text))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpEmbedder {
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

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_context_length_rejection(status, &body) {
                return Err(SearchError::ContextLength {
                    provider: "embeddings".to_string(),
                    chars: texts.iter().map(|text| text.chars().count()).max().unwrap_or(0),
                });
            }
            return Err(SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(SearchError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }
        parsed.data.sort_by_key(|row| row.index.unwrap_or(usize::MAX));
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }
}

fn is_context_length_rejection(status: StatusCode, body: &str) -> bool {
    if status != StatusCode::BAD_REQUEST && status != StatusCode::PAYLOAD_TOO_LARGE {
        return false;
    }
    let lowered = body.to_lowercase();
    lowered.contains("context length")
        || lowered.contains("context_length")
        || lowered.contains("maximum context")
        || lowered.contains("too many tokens")
        || status == StatusCode::PAYLOAD_TOO_LARGE
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SearchError::BackendResponse {
            backend: "embeddings".to_string(),
            details: "empty embedding response".to_string(),
        })
    }

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Embeds `text`, retrying with truncated input while the provider reports a
/// context-length error. Any other error is returned immediately.
pub async fn embed_query_with_fallback<E>(embedder: &E, text: &str) -> Result<Vec<f32>, SearchError>
where
    E: EmbeddingProvider + Sync + ?Sized,
{
    let mut last_error = match embedder.embed_query(text).await {
        Ok(vector) => return Ok(vector),
        Err(error) if error.is_context_length() => error,
        Err(error) => return Err(error),
    };

    let total_chars = text.chars().count();
    for limit in TRUNCATION_CASCADE {
        if limit >= total_chars {
            continue;
        }
        let truncated: String = text.chars().take(limit).collect();
        debug!(limit, total_chars, "retrying embedding with truncated input");
        match embedder.embed_query(&truncated).await {
            Ok(vector) => return Ok(vector),
            Err(error) if error.is_context_length() => last_error = error,
            Err(error) => return Err(error),
        }
    }

    warn!(total_chars, "embedding input still too long after truncation");
    Err(last_error)
}
