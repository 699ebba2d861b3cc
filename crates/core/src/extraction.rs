//! Regex-backed dimension and cross-reference extraction.
//!
//! These are pure functions over excerpt text; the search coordinator only
//! sees them through the [`DimensionExtractor`] and [`CrossReferenceDetector`]
//! traits so they can be replaced independently.

use crate::text::char_window;
use crate::traits::{CrossReferenceDetector, DimensionExtractor};
use crate::{CalculatedArea, CrossReference, Dimension, ReferenceKind};
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;

const FEET_INCHES_PATTERN: &str = r#"(?:\b(?P<element>[A-Z][A-Za-z0-9\-]+)\s*[:=]?\s*)?\b(?P<feet>\d{1,4})'(?:\s*-?\s*(?P<inches>\d{1,2}(?:\.\d+)?)(?:\s+(?P<frac>\d{1,2}/\d{1,2}))?\s*")?"#;
const INCHES_PATTERN: &str = r#"(?:\b(?P<element>[A-Z][A-Za-z0-9\-]+)\s*[:=]?\s*)?\b(?:(?P<inches>\d{1,3}(?:\.\d+)?)(?:\s+(?P<frac>\d{1,2}/\d{1,2}))?|(?P<bare>\d{1,2}/\d{1,2}))\s*""#;

struct DimensionPatterns {
    feet_inches: Regex,
    inches: Regex,
}

fn dimension_patterns() -> Option<&'static DimensionPatterns> {
    static PATTERNS: OnceLock<Option<DimensionPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(DimensionPatterns {
                feet_inches: Regex::new(FEET_INCHES_PATTERN).ok()?,
                inches: Regex::new(INCHES_PATTERN).ok()?,
            })
        })
        .as_ref()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexDimensionExtractor;

impl RegexDimensionExtractor {
    fn located_dimensions(&self, text: &str) -> Vec<(usize, Dimension)> {
        let Some(patterns) = dimension_patterns() else {
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut claimed: Vec<(usize, usize)> = Vec::new();

        for capture in patterns.feet_inches.captures_iter(text) {
            let Some(whole) = capture.get(0) else {
                continue;
            };
            let feet = capture
                .name("feet")
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);
            let inches = parse_inches(&capture);
            let number_start = capture.name("feet").map(|m| m.start()).unwrap_or(whole.start());
            claimed.push((number_start, whole.end()));
            found.push((number_start, build_dimension(&capture, text, number_start, feet, inches)));
        }

        for capture in patterns.inches.captures_iter(text) {
            let Some(whole) = capture.get(0) else {
                continue;
            };
            let number_start = capture
                .name("inches")
                .or_else(|| capture.name("bare"))
                .map(|m| m.start())
                .unwrap_or(whole.start());
            let overlaps = claimed
                .iter()
                .any(|(start, end)| number_start < *end && whole.end() > *start);
            if overlaps {
                continue;
            }
            let inches = parse_inches(&capture);
            found.push((number_start, build_dimension(&capture, text, number_start, 0, inches)));
        }

        found.sort_by_key(|(position, _)| *position);
        found
    }
}

fn parse_inches(capture: &Captures<'_>) -> f64 {
    let whole = capture
        .name("inches")
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    // `bare` is a fraction with no whole part, e.g. `5/8"`
    let fraction = capture
        .name("frac")
        .or_else(|| capture.name("bare"))
        .and_then(|m| parse_fraction(m.as_str()))
        .unwrap_or(0.0);
    whole + fraction
}

fn parse_fraction(token: &str) -> Option<f64> {
    let (numerator, denominator) = token.split_once('/')?;
    let numerator = numerator.parse::<f64>().ok()?;
    let denominator = denominator.parse::<f64>().ok()?;
    (denominator > 0.0).then(|| numerator / denominator)
}

fn build_dimension(
    capture: &Captures<'_>,
    text: &str,
    number_start: usize,
    feet: u32,
    inches: f64,
) -> Dimension {
    let end = capture.get(0).map(|m| m.end()).unwrap_or(number_start);
    Dimension {
        feet,
        inches,
        total_inches: feet as f64 * 12.0 + inches,
        original: text[number_start..end].trim().to_string(),
        element: capture.name("element").map(|m| m.as_str().to_string()),
    }
}

impl DimensionExtractor for RegexDimensionExtractor {
    fn extract_dimensions(&self, text: &str) -> Vec<Dimension> {
        self.located_dimensions(text)
            .into_iter()
            .map(|(_, dimension)| dimension)
            .collect()
    }

    /// Pairs dimensions two at a time in reading order (`12'-0" x 10'-0"`).
    /// Only tokens with a feet part are sides; inch-only tokens are
    /// thicknesses and sizes (`5/8" GYP BD`) and would shift the pairing.
    /// Pairs whose sides have the same magnitude, or a zero side, are skipped.
    fn calculate_areas(&self, text: &str) -> Vec<CalculatedArea> {
        let sides: Vec<Dimension> = self
            .extract_dimensions(text)
            .into_iter()
            .filter(|dimension| dimension.feet > 0)
            .collect();
        sides
            .chunks_exact(2)
            .filter_map(|pair| {
                let (first, second) = (&pair[0], &pair[1]);
                if (first.total_inches - second.total_inches).abs() < f64::EPSILON {
                    return None;
                }
                if first.total_inches <= 0.0 || second.total_inches <= 0.0 {
                    return None;
                }
                let length = first.in_feet();
                let width = second.in_feet();
                Some(CalculatedArea {
                    length,
                    width,
                    square_feet: (length * width).round() as u64,
                })
            })
            .collect()
    }
}

const REFERENCE_PATTERNS: [(ReferenceKind, &str); 4] = [
    (
        ReferenceKind::Detail,
        r"(?:(?i:detail|det\.?)\s*)?\b(?P<ref>\d{1,2}\s*/\s*[A-Z]{1,2}-?\d{1,3}(?:\.\d{1,2})?)\b",
    ),
    (
        ReferenceKind::Sheet,
        r"(?i:see|refer\s+to|ref\.?)\s+(?i:sheet|dwg\.?|drawing)?\s*(?P<ref>[A-Z]{1,2}-?\d{1,3}(?:\.\d{1,2})?)\b",
    ),
    (
        ReferenceKind::Section,
        r"\b(?i:section)\s+(?P<ref>[A-Z]\s*-\s*[A-Z])\b",
    ),
    (
        ReferenceKind::Specification,
        r"\b(?i:spec(?:ification)?\.?\s+section)\s+(?P<ref>\d{2}\s?\d{2}\s?\d{2})\b",
    ),
];

fn reference_patterns() -> &'static [(ReferenceKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(ReferenceKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        REFERENCE_PATTERNS
            .iter()
            .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (*kind, re)))
            .collect()
    })
}

#[derive(Debug, Clone, Copy)]
pub struct RegexCrossReferenceDetector {
    pub max_references: usize,
    pub context_chars: usize,
}

impl Default for RegexCrossReferenceDetector {
    fn default() -> Self {
        Self {
            max_references: 5,
            context_chars: 30,
        }
    }
}

impl CrossReferenceDetector for RegexCrossReferenceDetector {
    fn detect(&self, text: &str) -> Vec<CrossReference> {
        let mut located = Vec::new();
        for (kind, pattern) in reference_patterns() {
            for capture in pattern.captures_iter(text) {
                let (Some(whole), Some(reference)) = (capture.get(0), capture.name("ref")) else {
                    continue;
                };
                let normalized = reference
                    .as_str()
                    .chars()
                    .filter(|c| !c.is_whitespace() || *kind == ReferenceKind::Specification)
                    .collect::<String>();
                let (from, to) = char_window(
                    text,
                    whole.start(),
                    whole.end(),
                    self.context_chars,
                    self.context_chars,
                );
                located.push((
                    whole.start(),
                    CrossReference {
                        kind: *kind,
                        reference: normalized,
                        context: text[from..to].trim().to_string(),
                    },
                ));
            }
        }

        located.sort_by_key(|(position, _)| *position);

        let mut seen = HashSet::new();
        located
            .into_iter()
            .map(|(_, reference)| reference)
            .filter(|reference| {
                seen.insert(format!("{}:{}", reference.kind.as_str(), reference.reference))
            })
            .take(self.max_references)
            .collect()
    }
}
