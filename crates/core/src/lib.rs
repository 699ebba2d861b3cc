pub mod cache;
pub mod checkpoint;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod extraction;
pub mod intent;
pub mod models;
pub mod orchestrator;
pub mod rerank;
pub mod stores;
pub mod takeoff;
pub mod text;
pub mod traits;
pub mod verification;

pub use cache::{CacheStats, VerificationCache, DEFAULT_VERIFICATION_TTL};
pub use checkpoint::{run_batch, BatchCheckpoint, BatchOptions, BatchReport, DEFAULT_BATCH_DELAY};
pub use dedup::{deduplicate, deduplicate_with_threshold, DEFAULT_MIN_SCORE};
pub use embeddings::{
    embed_query_with_fallback, CharacterNgramEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::SearchError;
pub use extraction::{RegexCrossReferenceDetector, RegexDimensionExtractor};
pub use intent::{boost_factors, detect_intent, expand_query, BoostTable, Intent};
pub use models::{
    CalculatedArea, CrossReference, Dimension, DrawingMetadata, IndexCandidate, MaterialTakeoff,
    QueryFilters, ReferenceKind, RerankDocument, RerankedItem, SearchQuery, SearchResponse,
    SearchResult, SearchSettings, DEFAULT_TOP_K,
};
pub use orchestrator::SearchCoordinator;
pub use rerank::HttpReranker;
pub use stores::{QdrantDistance, QdrantStore};
pub use takeoff::synthesize;
pub use traits::{
    CrossReferenceDetector, DimensionExtractor, EmbeddingProvider, Reranker, VectorIndex,
};
pub use verification::{CachedVerifier, VerificationOutcome, Verifier};
