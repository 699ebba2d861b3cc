use crate::text::jaccard_similarity;
use crate::SearchResult;
use tracing::debug;

pub const DEFAULT_MIN_SCORE: f64 = 300.0;
pub const DEFAULT_DUPLICATE_SIMILARITY: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    SameDrawingSimilarText,
    IdenticalText,
    ContainedText,
}

/// Drops results below `min_score` and near-duplicates, keeping the first
/// occurrence. Order of the surviving results is unchanged.
pub fn deduplicate(results: Vec<SearchResult>, min_score: f64) -> Vec<SearchResult> {
    deduplicate_with_threshold(results, min_score, DEFAULT_DUPLICATE_SIMILARITY)
}

pub fn deduplicate_with_threshold(
    results: Vec<SearchResult>,
    min_score: f64,
    similarity_threshold: f64,
) -> Vec<SearchResult> {
    let total = results.len();
    let mut below_floor = 0usize;
    let mut duplicates = 0usize;
    let mut accepted: Vec<SearchResult> = Vec::with_capacity(total);

    for result in results {
        // NaN scores never pass the floor
        if !(result.score >= min_score) {
            below_floor += 1;
            continue;
        }

        let duplicate_of = accepted.iter().find_map(|kept| {
            duplicate_reason(kept, &result, similarity_threshold).map(|reason| (kept, reason))
        });

        match duplicate_of {
            Some((kept, reason)) => {
                debug!(
                    dropped = %result.id,
                    kept = %kept.id,
                    ?reason,
                    "duplicate search result discarded"
                );
                duplicates += 1;
            }
            None => accepted.push(result),
        }
    }

    debug!(total, below_floor, duplicates, kept = accepted.len(), "deduplicated results");
    accepted
}

pub fn duplicate_reason(
    kept: &SearchResult,
    candidate: &SearchResult,
    similarity_threshold: f64,
) -> Option<DuplicateReason> {
    let same_drawing = kept.drawing_number == candidate.drawing_number;

    if same_drawing && jaccard_similarity(&kept.text, &candidate.text) > similarity_threshold {
        return Some(DuplicateReason::SameDrawingSimilarText);
    }

    if !same_drawing && kept.text == candidate.text {
        return Some(DuplicateReason::IdenticalText);
    }

    let (shorter, longer) = if kept.text.len() <= candidate.text.len() {
        (&kept.text, &candidate.text)
    } else {
        (&candidate.text, &kept.text)
    };
    if !shorter.is_empty() && longer.contains(shorter.as_str()) {
        return Some(DuplicateReason::ContainedText);
    }

    None
}
