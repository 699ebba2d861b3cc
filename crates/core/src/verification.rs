use crate::cache::VerificationCache;
use crate::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub confidence: f64,
}

impl VerificationOutcome {
    pub fn empty() -> Self {
        Self {
            success: false,
            data: Value::Null,
            confidence: 0.0,
        }
    }

    /// Parses a verifier reply. Replies often wrap the JSON object in prose or
    /// a fenced block; the first `{ ... }` span is used. Anything unparseable
    /// yields [`VerificationOutcome::empty`].
    pub fn from_payload(raw: &str) -> Self {
        let Some(candidate) = json_object_span(raw) else {
            warn!(chars = raw.len(), "verification payload has no JSON object");
            return Self::empty();
        };

        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => {
                let success = map.get("success").and_then(Value::as_bool).unwrap_or(false);
                let confidence = map
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .map(|value| value.clamp(0.0, 1.0))
                    .unwrap_or(0.0);
                let data = map.get("data").cloned().unwrap_or(Value::Null);
                Self {
                    success,
                    data,
                    confidence,
                }
            }
            Ok(_) => Self::empty(),
            Err(error) => {
                warn!(%error, "verification payload is not valid JSON");
                Self::empty()
            }
        }
    }
}

fn json_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// A member designation or sheet number checked against the drawings by an
/// external (usually vision-model) subsystem.
#[async_trait]
pub trait Verifier {
    async fn verify(&self, subject: &str) -> Result<VerificationOutcome, SearchError>;
}

pub struct CachedVerifier<V> {
    inner: V,
    cache: VerificationCache<VerificationOutcome>,
}

impl<V> CachedVerifier<V>
where
    V: Verifier + Send + Sync,
{
    pub fn new(inner: V, cache: VerificationCache<VerificationOutcome>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &VerificationCache<VerificationOutcome> {
        &self.cache
    }
}

#[async_trait]
impl<V> Verifier for CachedVerifier<V>
where
    V: Verifier + Send + Sync,
{
    async fn verify(&self, subject: &str) -> Result<VerificationOutcome, SearchError> {
        let key = subject.trim().to_uppercase();
        let inner = &self.inner;
        self.cache
            .get_or_try_insert_with(&key, move || async move {
                debug!(subject, "running verification");
                inner.verify(subject).await
            })
            .await
    }
}
