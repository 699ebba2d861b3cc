use std::collections::HashSet;

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Byte range `[start, end)` widened by up to `before` chars on the left and
/// `after` chars on the right, always landing on char boundaries.
pub fn char_window(
    text: &str,
    start: usize,
    end: usize,
    before: usize,
    after: usize,
) -> (usize, usize) {
    let window_start = text[..start]
        .char_indices()
        .rev()
        .take(before)
        .last()
        .map(|(index, _)| index)
        .unwrap_or(start);
    let window_end = text[end..]
        .char_indices()
        .nth(after)
        .map(|(index, _)| end + index)
        .unwrap_or(text.len());
    (window_start, window_end)
}

pub fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Jaccard similarity of the lower-cased token sets. Two empty texts are
/// identical.
pub fn jaccard_similarity(left: &str, right: &str) -> f64 {
    let left = token_set(left);
    let right = token_set(right);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}
