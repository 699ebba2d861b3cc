use crate::{
    CalculatedArea, CrossReference, Dimension, IndexCandidate, QueryFilters, RerankDocument,
    RerankedItem, SearchError,
};
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    async fn embed_text(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_query(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
pub trait VectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<IndexCandidate>, SearchError>;
}

#[async_trait]
pub trait Reranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_n: usize,
    ) -> Result<Vec<RerankedItem>, SearchError>;
}

pub trait DimensionExtractor {
    fn extract_dimensions(&self, text: &str) -> Vec<Dimension>;

    fn calculate_areas(&self, text: &str) -> Vec<CalculatedArea>;
}

pub trait CrossReferenceDetector {
    fn detect(&self, text: &str) -> Vec<CrossReference>;
}
