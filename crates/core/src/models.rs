use crate::intent::Intent;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeSet;

pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct QueryFilters {
    pub discipline: Option<String>,
    pub drawing_type: Option<String>,
    pub project: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.discipline.is_none() && self.drawing_type.is_none() && self.project.is_none()
    }

    /// Field name / value pairs for the filters that are set, in a fixed order.
    pub fn equality_pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("discipline", self.discipline.as_deref()),
            ("drawing_type", self.drawing_type.as_deref()),
            ("project", self.project.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|value| (field, value)))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub text: String,
    pub discipline: Option<String>,
    pub drawing_type: Option<String>,
    pub project: Option<String>,
    pub sheet_numbers: Vec<String>,
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            discipline: None,
            drawing_type: None,
            project: None,
            sheet_numbers: Vec::new(),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn filters(&self) -> QueryFilters {
        QueryFilters {
            discipline: non_blank(&self.discipline),
            drawing_type: non_blank(&self.drawing_type),
            project: non_blank(&self.project),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DrawingMetadata {
    pub project: String,
    pub discipline: String,
    pub drawing_type: String,
    pub drawing_number: String,
}

/// A raw hit from the similarity index. `distance` is lower-is-better.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexCandidate {
    pub id: String,
    pub text: String,
    pub metadata: DrawingMetadata,
    pub distance: f64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dimension {
    pub feet: u32,
    pub inches: f64,
    pub total_inches: f64,
    pub original: String,
    pub element: Option<String>,
}

impl Dimension {
    pub fn in_feet(&self) -> f64 {
        self.total_inches / 12.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculatedArea {
    pub length: f64,
    pub width: f64,
    pub square_feet: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Detail,
    Sheet,
    Section,
    Specification,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Detail => "detail",
            ReferenceKind::Sheet => "sheet",
            ReferenceKind::Section => "section",
            ReferenceKind::Specification => "specification",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossReference {
    pub kind: ReferenceKind,
    pub reference: String,
    pub context: String,
}

/// A ranked excerpt. `distance` is the raw index distance, `score` the
/// confidence derived from it (higher is better).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub project: String,
    pub discipline: String,
    pub drawing_type: String,
    pub drawing_number: String,
    pub distance: f64,
    pub score: f64,
    pub dimensions: Vec<Dimension>,
    pub calculated_areas: Vec<CalculatedArea>,
    pub cross_references: Vec<CrossReference>,
}

impl SearchResult {
    pub fn from_candidate(candidate: IndexCandidate, score: f64) -> Self {
        Self {
            id: candidate.id,
            text: candidate.text,
            project: candidate.metadata.project,
            discipline: candidate.metadata.discipline,
            drawing_type: candidate.metadata.drawing_type,
            drawing_number: candidate.metadata.drawing_number,
            distance: candidate.distance,
            score,
            dimensions: Vec::new(),
            calculated_areas: Vec::new(),
            cross_references: Vec::new(),
        }
    }

    pub fn is_drawing_type(&self, drawing_type: &str) -> bool {
        self.drawing_type.eq_ignore_ascii_case(drawing_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub expanded_query: String,
    pub intent: Intent,
    pub hits: Vec<SearchResult>,
    pub reranked: bool,
    pub sheet_filter_fallback: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankDocument {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankedItem {
    pub id: String,
    pub score: f64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialTakeoff {
    pub material: String,
    pub specification: Option<String>,
    pub quantity: Option<u32>,
    pub unit: Option<String>,
    pub area: Option<u64>,
    pub dimensions: Vec<String>,
    pub sources: BTreeSet<String>,
    pub installation: Option<String>,
    pub category: String,
    pub weight: Option<f64>,
}

impl MaterialTakeoff {
    pub fn new(material: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            material: material.into(),
            specification: None,
            quantity: None,
            unit: None,
            area: None,
            dimensions: Vec::new(),
            sources: BTreeSet::new(),
            installation: None,
            category: category.into(),
            weight: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub over_fetch_factor: usize,
    /// Confidence floor for boosted hits (`1000 / (1 + distance)`).
    pub min_score: f64,
    /// Confidence floor for re-ranked hits (`relevance * 1000`). Re-ranker
    /// relevances are not comparable to boosted confidences and are often
    /// well below 0.3, so this floor is separate.
    pub rerank_min_score: f64,
    pub duplicate_similarity: f64,
    pub max_cross_references: usize,
    pub rerank_fallback: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            over_fetch_factor: 5,
            min_score: 300.0,
            rerank_min_score: 0.0,
            duplicate_similarity: 0.8,
            max_cross_references: 5,
            rerank_fallback: true,
        }
    }
}
