use crate::dedup::deduplicate_with_threshold;
use crate::embeddings::embed_query_with_fallback;
use crate::extraction::{RegexCrossReferenceDetector, RegexDimensionExtractor};
use crate::intent::{boost_factors, detect_intent, expand_query, BoostTable};
use crate::traits::{
    CrossReferenceDetector, DimensionExtractor, EmbeddingProvider, Reranker, VectorIndex,
};
use crate::{
    IndexCandidate, RerankDocument, SearchError, SearchQuery, SearchResponse, SearchResult,
    SearchSettings,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Confidence reported for a boosted distance; higher is better and the
/// mapping is strictly decreasing, so it preserves the ascending-distance order.
pub fn confidence_from_distance(adjusted_distance: f64) -> f64 {
    1000.0 / (1.0 + adjusted_distance.max(0.0))
}

pub fn confidence_from_relevance(relevance: f64) -> f64 {
    relevance * 1000.0
}

pub struct SearchCoordinator<E, V>
where
    E: EmbeddingProvider,
    V: VectorIndex,
{
    embedder: E,
    index: V,
    reranker: Option<Box<dyn Reranker + Send + Sync>>,
    dimensions: Box<dyn DimensionExtractor + Send + Sync>,
    references: Box<dyn CrossReferenceDetector + Send + Sync>,
    settings: SearchSettings,
}

impl<E, V> SearchCoordinator<E, V>
where
    E: EmbeddingProvider + Send + Sync,
    V: VectorIndex + Send + Sync,
{
    pub fn new(embedder: E, index: V) -> Self {
        Self {
            embedder,
            index,
            reranker: None,
            dimensions: Box::new(RegexDimensionExtractor),
            references: Box::new(RegexCrossReferenceDetector::default()),
            settings: SearchSettings::default(),
        }
    }

    pub fn with_reranker(mut self, reranker: impl Reranker + Send + Sync + 'static) -> Self {
        self.reranker = Some(Box::new(reranker));
        self
    }

    pub fn with_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_dimension_extractor(
        mut self,
        extractor: impl DimensionExtractor + Send + Sync + 'static,
    ) -> Self {
        self.dimensions = Box::new(extractor);
        self
    }

    pub fn with_cross_reference_detector(
        mut self,
        detector: impl CrossReferenceDetector + Send + Sync + 'static,
    ) -> Self {
        self.references = Box::new(detector);
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Err(SearchError::Request("top_k must be at least 1".to_string()));
        }

        let intent = detect_intent(&query.text);
        let boosts = boost_factors(intent);
        let expanded_query = expand_query(&query.text);
        info!(%intent, top_k = query.top_k, "drawing search");

        let query_vector = embed_query_with_fallback(&self.embedder, &expanded_query).await?;

        let limit = query
            .top_k
            .saturating_mul(self.settings.over_fetch_factor.max(1));
        let candidates = self.index.query(&query_vector, &query.filters(), limit).await?;
        debug!(limit, fetched = candidates.len(), "over-fetched candidates");

        let (candidates, sheet_filter_fallback) =
            filter_by_sheet_numbers(candidates, &query.sheet_numbers);
        let mut warnings = Vec::new();
        if sheet_filter_fallback {
            warn!(
                sheets = ?query.sheet_numbers,
                "no candidate matched the requested sheets; using unfiltered candidates"
            );
            warnings.push(format!(
                "no results on sheets {}; showing all sheets",
                query.sheet_numbers.join(", ")
            ));
        }

        let (ranked, reranked) = match &self.reranker {
            Some(reranker) if !candidates.is_empty() => {
                let attempt =
                    rerank_candidates(reranker.as_ref(), &query.text, &candidates, query.top_k)
                        .await;
                match attempt {
                    Ok(ranked) => (ranked, true),
                    Err(error) if self.settings.rerank_fallback => {
                        warn!(%error, "re-ranker failed; falling back to boosted ranking");
                        warnings.push(format!("re-ranker unavailable: {error}"));
                        (rank_with_boosts(candidates, &boosts, query.top_k), false)
                    }
                    Err(error) => return Err(error),
                }
            }
            _ => (rank_with_boosts(candidates, &boosts, query.top_k), false),
        };

        let enriched = ranked
            .into_iter()
            .map(|result| self.enrich(result))
            .collect::<Vec<_>>();

        let min_score = if reranked {
            self.settings.rerank_min_score
        } else {
            self.settings.min_score
        };
        let hits =
            deduplicate_with_threshold(enriched, min_score, self.settings.duplicate_similarity);

        Ok(SearchResponse {
            query: query.text.clone(),
            expanded_query,
            intent,
            hits,
            reranked,
            sheet_filter_fallback,
            warnings,
        })
    }

    fn enrich(&self, mut result: SearchResult) -> SearchResult {
        result.dimensions = self.dimensions.extract_dimensions(&result.text);
        result.calculated_areas = self.dimensions.calculate_areas(&result.text);
        let mut references = self.references.detect(&result.text);
        references.truncate(self.settings.max_cross_references);
        result.cross_references = references;
        result
    }
}

/// Keeps candidates whose drawing number equals or contains one of `sheets`
/// (case-insensitive). When nothing matches, the unfiltered set is returned
/// and the flag is `true`.
pub fn filter_by_sheet_numbers(
    candidates: Vec<IndexCandidate>,
    sheets: &[String],
) -> (Vec<IndexCandidate>, bool) {
    let wanted: Vec<String> = sheets
        .iter()
        .map(|sheet| sheet.trim().to_lowercase())
        .filter(|sheet| !sheet.is_empty())
        .collect();
    if wanted.is_empty() || candidates.is_empty() {
        return (candidates, false);
    }

    let matches_sheet = |candidate: &IndexCandidate| {
        let drawing = candidate.metadata.drawing_number.to_lowercase();
        wanted
            .iter()
            .any(|sheet| drawing == *sheet || drawing.contains(sheet.as_str()))
    };

    if !candidates.iter().any(|candidate| matches_sheet(candidate)) {
        return (candidates, true);
    }

    let filtered = candidates
        .into_iter()
        .filter(|candidate| matches_sheet(candidate))
        .collect();
    (filtered, false)
}

/// Divides each distance by its drawing type's boost factor, stable-sorts
/// ascending and keeps the first `top_k`.
pub fn rank_with_boosts(
    candidates: Vec<IndexCandidate>,
    boosts: &BoostTable,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut adjusted: Vec<(f64, IndexCandidate)> = candidates
        .into_iter()
        .map(|candidate| {
            let factor = boosts.factor(&candidate.metadata.drawing_type);
            (candidate.distance / factor, candidate)
        })
        .collect();

    adjusted.sort_by(|(left, _), (right, _)| left.total_cmp(right));

    adjusted
        .into_iter()
        .take(top_k)
        .map(|(distance, candidate)| {
            SearchResult::from_candidate(candidate, confidence_from_distance(distance))
        })
        .collect()
}

async fn rerank_candidates(
    reranker: &(dyn Reranker + Send + Sync),
    query: &str,
    candidates: &[IndexCandidate],
    top_k: usize,
) -> Result<Vec<SearchResult>, SearchError> {
    let documents = candidates
        .iter()
        .map(|candidate| RerankDocument {
            id: candidate.id.clone(),
            text: candidate.text.clone(),
        })
        .collect::<Vec<_>>();

    let reordered = reranker.rerank(query, &documents, top_k).await?;

    let mut by_id: HashMap<&str, &IndexCandidate> = candidates
        .iter()
        .map(|candidate| (candidate.id.as_str(), candidate))
        .collect();

    let mut results = Vec::with_capacity(top_k.min(reordered.len()));
    for item in reordered {
        if results.len() == top_k {
            break;
        }
        // removing the id also drops repeated ids in the re-ranker output
        match by_id.remove(item.id.as_str()) {
            Some(candidate) => results.push(SearchResult::from_candidate(
                candidate.clone(),
                confidence_from_relevance(item.score),
            )),
            None => debug!(id = %item.id, "re-ranker returned an unknown id"),
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::intent::Intent;
    use crate::{DrawingMetadata, QueryFilters, RerankedItem};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn candidate(id: &str, drawing_number: &str, drawing_type: &str, distance: f64) -> IndexCandidate {
        IndexCandidate {
            id: id.to_string(),
            text: format!("{drawing_type} note {id} on {drawing_number}: framing at grid {id}"),
            metadata: DrawingMetadata {
                project: "tower".to_string(),
                discipline: "Structural".to_string(),
                drawing_type: drawing_type.to_string(),
                drawing_number: drawing_number.to_string(),
            },
            distance,
        }
    }

    #[derive(Default)]
    struct FakeIndex {
        hits: Vec<IndexCandidate>,
        requests: Mutex<Vec<(QueryFilters, usize)>>,
    }

    impl FakeIndex {
        fn with_hits(hits: Vec<IndexCandidate>) -> Self {
            Self {
                hits,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn query(
            &self,
            _vector: &[f32],
            filters: &QueryFilters,
            limit: usize,
        ) -> Result<Vec<IndexCandidate>, SearchError> {
            self.requests
                .lock()
                .expect("requests lock")
                .push((filters.clone(), limit));
            Ok(self.hits.iter().take(limit).cloned().collect())
        }
    }

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn query(
            &self,
            _vector: &[f32],
            _filters: &QueryFilters,
            _limit: usize,
        ) -> Result<Vec<IndexCandidate>, SearchError> {
            Err(SearchError::NotReady("index".to_string()))
        }
    }

    struct FakeReranker {
        output: Result<Vec<RerankedItem>, String>,
    }

    #[async_trait]
    impl Reranker for FakeReranker {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[RerankDocument],
            _top_n: usize,
        ) -> Result<Vec<RerankedItem>, SearchError> {
            self.output.clone().map_err(SearchError::Request)
        }
    }

    fn many_candidates(count: usize) -> Vec<IndexCandidate> {
        (0..count)
            .map(|index| {
                candidate(
                    &format!("c{index}"),
                    &format!("S{index}.1"),
                    "Plan",
                    0.05 + index as f64 * 0.01,
                )
            })
            .collect()
    }

    fn coordinator(index: FakeIndex) -> SearchCoordinator<CharacterNgramEmbedder, FakeIndex> {
        SearchCoordinator::new(CharacterNgramEmbedder { dimensions: 16 }, index)
    }

    #[tokio::test]
    async fn output_never_exceeds_top_k_and_index_is_over_fetched() {
        let search = coordinator(FakeIndex::with_hits(many_candidates(40)));
        let mut query = SearchQuery::new("how many beams");
        query.top_k = 3;

        let response = search.search(&query).await.expect("search should succeed");

        assert_eq!(response.intent, Intent::QuantityTakeoff);
        assert_eq!(response.hits.len(), 3);
        let requests = search.index.requests.lock().expect("requests lock");
        assert_eq!(requests[0].1, 15);
    }

    #[tokio::test]
    async fn equality_filters_are_pushed_down() {
        let search = coordinator(FakeIndex::with_hits(many_candidates(2)));
        let mut query = SearchQuery::new("beam sizes");
        query.discipline = Some("Structural".to_string());
        query.project = Some("  ".to_string());

        search.search(&query).await.expect("search should succeed");

        let requests = search.index.requests.lock().expect("requests lock");
        assert_eq!(requests[0].0.discipline.as_deref(), Some("Structural"));
        assert_eq!(requests[0].0.project, None);
        assert_eq!(requests[0].1, 50);
    }

    #[tokio::test]
    async fn quantity_intent_prefers_plans_over_sections() {
        let search = coordinator(FakeIndex::with_hits(vec![
            candidate("section", "S3.1", "Section", 0.30),
            candidate("plan", "S2.1", "Plan", 0.40),
        ]));

        let response = search
            .search(&SearchQuery::new("total quantity of W18x106"))
            .await
            .expect("search should succeed");

        let ids: Vec<&str> = response.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["plan", "section"]);
        assert!(response.hits[0].score > response.hits[1].score);
    }

    #[tokio::test]
    async fn unmatched_sheet_numbers_fall_back_to_unfiltered_results() {
        let search = coordinator(FakeIndex::with_hits(many_candidates(12)));
        let mut query = SearchQuery::new("beam schedule");
        query.sheet_numbers = vec!["Z9.9".to_string()];

        let response = search.search(&query).await.expect("search should succeed");

        assert!(response.sheet_filter_fallback);
        assert_eq!(response.hits.len(), 10);
        assert!(!response.warnings.is_empty());
    }

    #[tokio::test]
    async fn sheet_numbers_filter_case_insensitively() {
        let search = coordinator(FakeIndex::with_hits(vec![
            candidate("a", "S2.1", "Plan", 0.1),
            candidate("b", "S2.1A", "Plan", 0.2),
            candidate("c", "A1.0", "Plan", 0.05),
        ]));
        let mut query = SearchQuery::new("beam schedule");
        query.sheet_numbers = vec!["s2.1".to_string()];

        let response = search.search(&query).await.expect("search should succeed");

        let ids: Vec<&str> = response.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!response.sheet_filter_fallback);
    }

    #[tokio::test]
    async fn reranker_order_is_mapped_back_onto_metadata() {
        let search = coordinator(FakeIndex::with_hits(many_candidates(4))).with_reranker(
            FakeReranker {
                output: Ok(vec![
                    RerankedItem {
                        id: "c3".to_string(),
                        score: 0.9,
                    },
                    RerankedItem {
                        id: "ghost".to_string(),
                        score: 0.8,
                    },
                    RerankedItem {
                        id: "c1".to_string(),
                        score: 0.6,
                    },
                ]),
            },
        );

        let response = search
            .search(&SearchQuery::new("beam schedule"))
            .await
            .expect("search should succeed");

        assert!(response.reranked);
        let ids: Vec<&str> = response.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c1"]);
        assert_eq!(response.hits[0].drawing_number, "S3.1");
        assert!((response.hits[0].score - 900.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn low_relevance_reranked_hits_use_their_own_floor() {
        let reranked = vec![
            RerankedItem {
                id: "c2".to_string(),
                score: 0.12,
            },
            RerankedItem {
                id: "c0".to_string(),
                score: 0.04,
            },
        ];
        let search = coordinator(FakeIndex::with_hits(many_candidates(3))).with_reranker(
            FakeReranker {
                output: Ok(reranked.clone()),
            },
        );

        let response = search
            .search(&SearchQuery::new("beam schedule"))
            .await
            .expect("search should succeed");
        let ids: Vec<&str> = response.hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c0"]);
        assert!((response.hits[0].score - 120.0).abs() < 1e-9);

        let strict = coordinator(FakeIndex::with_hits(many_candidates(3)))
            .with_reranker(FakeReranker {
                output: Ok(reranked),
            })
            .with_settings(SearchSettings {
                rerank_min_score: 100.0,
                ..SearchSettings::default()
            });
        let response = strict
            .search(&SearchQuery::new("beam schedule"))
            .await
            .expect("search should succeed");
        assert_eq!(response.hits.len(), 1);
    }

    #[tokio::test]
    async fn reranker_failure_falls_back_to_boosting() {
        let search = coordinator(FakeIndex::with_hits(many_candidates(4))).with_reranker(
            FakeReranker {
                output: Err("rerank quota exceeded".to_string()),
            },
        );

        let response = search
            .search(&SearchQuery::new("beam schedule"))
            .await
            .expect("fallback should succeed");

        assert!(!response.reranked);
        assert_eq!(response.hits.len(), 4);
        assert_eq!(response.hits[0].id, "c0");
        assert!(response.warnings[0].contains("re-ranker unavailable"));
    }

    #[tokio::test]
    async fn reranker_failure_propagates_when_fallback_disabled() {
        let settings = SearchSettings {
            rerank_fallback: false,
            ..SearchSettings::default()
        };
        let search = coordinator(FakeIndex::with_hits(many_candidates(4)))
            .with_reranker(FakeReranker {
                output: Err("rerank quota exceeded".to_string()),
            })
            .with_settings(settings);

        let result = search.search(&SearchQuery::new("beam schedule")).await;
        assert!(matches!(result, Err(SearchError::Request(_))));
    }

    #[tokio::test]
    async fn index_errors_fail_the_call() {
        let search = SearchCoordinator::new(CharacterNgramEmbedder::default(), DownIndex);
        let result = search.search(&SearchQuery::new("beam schedule")).await;
        assert!(matches!(result, Err(SearchError::NotReady(_))));
    }

    #[tokio::test]
    async fn empty_query_and_zero_top_k_are_rejected() {
        let search = coordinator(FakeIndex::default());
        assert!(search.search(&SearchQuery::new("   ")).await.is_err());

        let mut query = SearchQuery::new("beam schedule");
        query.top_k = 0;
        assert!(search.search(&query).await.is_err());
    }

    #[tokio::test]
    async fn results_are_enriched_and_deduplicated() {
        let mut first = candidate("a", "S2.1", "Plan", 0.1);
        first.text = r#"BEAM 24'-0" x 12'-0" SEE DETAIL 3/S5.1"#.to_string();
        let mut copy = first.clone();
        copy.id = "b".to_string();
        copy.metadata.drawing_number = "S2.2".to_string();
        let far = candidate("far", "S9.1", "Plan", 5.0);

        let search = coordinator(FakeIndex::with_hits(vec![first, copy, far]));
        let response = search
            .search(&SearchQuery::new("beam schedule"))
            .await
            .expect("search should succeed");

        assert_eq!(response.hits.len(), 1);
        let hit = &response.hits[0];
        assert_eq!(hit.id, "a");
        assert_eq!(hit.dimensions.len(), 2);
        assert_eq!(hit.calculated_areas[0].square_feet, 288);
        assert_eq!(hit.cross_references[0].reference, "3/S5.1");
    }

    #[test]
    fn raising_a_boost_never_worsens_that_drawing_type() {
        let candidates = vec![
            candidate("p1", "S1", "Plan", 0.20),
            candidate("s1", "S2", "Section", 0.25),
            candidate("d1", "S3", "Detail", 0.30),
            candidate("s2", "S4", "Section", 0.45),
            candidate("e1", "S5", "Elevation", 0.50),
        ];
        let position_of = |results: &[SearchResult], id: &str| {
            results
                .iter()
                .position(|result| result.id == id)
                .expect("candidate present")
        };

        let base = boost_factors(Intent::QuantityTakeoff);
        let before = rank_with_boosts(candidates.clone(), &base, 5);

        for factor in [0.8, 1.0, 1.5, 3.0] {
            let mut raised = base.clone();
            raised
                .set("Section", factor)
                .expect("positive factor is accepted");
            let after = rank_with_boosts(candidates.clone(), &raised, 5);
            for id in ["s1", "s2"] {
                assert!(position_of(&after, id) <= position_of(&before, id));
            }
        }
    }

    #[test]
    fn equal_adjusted_distances_keep_index_order() {
        let ranked = rank_with_boosts(
            vec![
                candidate("first", "A1", "Plan", 0.3),
                candidate("second", "A2", "Plan", 0.3),
            ],
            &BoostTable::neutral(),
            2,
        );
        assert_eq!(ranked[0].id, "first");
        assert_eq!(ranked[1].id, "second");
    }

    #[test]
    fn confidence_is_decreasing_in_distance() {
        assert_eq!(confidence_from_distance(0.0), 1000.0);
        assert!(confidence_from_distance(0.2) > confidence_from_distance(0.3));
        assert_eq!(confidence_from_distance(-1.0), 1000.0);
    }
}
