//! Material takeoff synthesis.
//!
//! Two passes run over every result and feed one keyed accumulator:
//! coded structural members (`W18x106`, `HSS6x6x1/4`, ...) and a fixed
//! vocabulary of generic materials. Quantities add up per key, list fields
//! are unions with a cap, and scalar fields keep the first value seen.

use crate::text::{char_window, normalize_whitespace};
use crate::{MaterialTakeoff, SearchResult};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

pub const MAX_TAKEOFF_DIMENSIONS: usize = 10;
const MEMBER_CONTEXT_BEFORE: usize = 50;
const MEMBER_CONTEXT_AFTER: usize = 80;

const MEMBER_PATTERN: &str = r"\b(?:(?i:WT|MC|W|C)\d{1,2}(?:\.\d+)?[xX]\d{1,3}(?:\.\d+)?|(?i:HSS)\d{1,2}(?:\.\d+)?[xX]\d{1,2}(?:\.\d+)?(?:[xX](?:\d{1,2}/\d{1,2}|\d*\.\d+))?|(?i:L)\d{1,2}(?:\.\d+)?[xX]\d{1,2}(?:\.\d+)?[xX](?:\d{1,2}/\d{1,2}|\d*\.\d+))";
const QUANTITY_AFTER_PATTERN: &str = r"\b(?i:qty|quantity)\s*[:=.]?\s*(?P<qty>\d{1,4})\b";
const QUANTITY_BEFORE_PATTERN: &str = r"(?:\((?P<paren>\d{1,4})\)\s*|\b(?P<dash>\d{1,3})-)$";
const LENGTH_PATTERN: &str = r#"\b\d{1,3}'(?:\s*-?\s*\d{1,2}(?:\s+\d{1,2}/\d{1,2})?")?"#;
const MATERIAL_PATTERN: &str = r"(?i)\b(?:concrete|rebar|grout|masonry|cmu|brick|mortar|steel|deck|joists?|lumber|plywood|timber|glulam|sheathing|gypsum|drywall|insulation|membrane|roofing|sealant|flashing|paint|tile|carpet|doors?|windows?|glazing|glass|ductwork|ducts?|piping|pipes?|conduit|sprinklers?)\b";
const INSTALLATION_PATTERN: &str = r"(?i)[^.\n]*\b(?:install|fasten|attach|anchor|weld|bolt|screw|nail|secure|embed)\w*\b[^.\n]*";

const MAX_PHRASE_WORDS: usize = 2;
const LEADING_STOPWORDS: [&str; 14] = [
    "the", "a", "an", "and", "or", "of", "with", "to", "for", "in", "on", "at", "all", "per",
];

// Checked in order; the first category with a matching keyword wins.
const CATEGORY_TABLE: [(&str, &[&str]); 6] = [
    ("Concrete", &["concrete", "rebar", "reinforcing", "grout", "footing", "slab"]),
    (
        "Structural Steel",
        &["steel", "joist", "deck", "beam", "column", "girder", "hss"],
    ),
    ("Wood", &["wood", "lumber", "plywood", "timber", "glulam", "sheathing"]),
    (
        "Openings",
        &["door", "window", "glazing", "glass", "hardware", "storefront"],
    ),
    (
        "MEP",
        &["duct", "pipe", "piping", "conduit", "sprinkler", "plumbing", "hvac"],
    ),
    (
        "Finishes",
        &["gypsum", "drywall", "paint", "tile", "carpet", "ceiling", "insulation"],
    ),
];

struct TakeoffPatterns {
    member: Regex,
    quantity_after: Regex,
    quantity_before: Regex,
    length: Regex,
    material: Regex,
    installation: Regex,
}

fn takeoff_patterns() -> Option<&'static TakeoffPatterns> {
    static PATTERNS: OnceLock<Option<TakeoffPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(TakeoffPatterns {
                member: Regex::new(MEMBER_PATTERN).ok()?,
                quantity_after: Regex::new(QUANTITY_AFTER_PATTERN).ok()?,
                quantity_before: Regex::new(QUANTITY_BEFORE_PATTERN).ok()?,
                length: Regex::new(LENGTH_PATTERN).ok()?,
                material: Regex::new(MATERIAL_PATTERN).ok()?,
                installation: Regex::new(INSTALLATION_PATTERN).ok()?,
            })
        })
        .as_ref()
}

#[derive(Debug, Default)]
struct TakeoffAccumulator {
    entries: Vec<MaterialTakeoff>,
    positions: HashMap<String, usize>,
}

impl TakeoffAccumulator {
    fn entry(
        &mut self,
        key: &str,
        create: impl FnOnce() -> MaterialTakeoff,
    ) -> &mut MaterialTakeoff {
        let position = match self.positions.get(key) {
            Some(position) => *position,
            None => {
                self.entries.push(create());
                let position = self.entries.len() - 1;
                self.positions.insert(key.to_string(), position);
                position
            }
        };
        &mut self.entries[position]
    }

    fn into_entries(self) -> Vec<MaterialTakeoff> {
        self.entries
    }
}

/// Aggregates results into one entry per material key, in order of first
/// occurrence. A result that appears more than once in `results` is counted
/// once.
pub fn synthesize(results: &[SearchResult]) -> Vec<MaterialTakeoff> {
    let Some(patterns) = takeoff_patterns() else {
        return Vec::new();
    };

    let mut accumulator = TakeoffAccumulator::default();
    let mut processed = HashSet::new();

    for result in results {
        if !processed.insert(excerpt_identity(result)) {
            debug!(id = %result.id, "excerpt already counted; skipping");
            continue;
        }
        collect_members(patterns, result, &mut accumulator);
        collect_materials(patterns, result, &mut accumulator);
    }

    accumulator.into_entries()
}

fn excerpt_identity(result: &SearchResult) -> String {
    if !result.id.is_empty() {
        return result.id.clone();
    }
    let mut hasher = Sha256::new();
    hasher.update(result.drawing_number.as_bytes());
    hasher.update([0u8]);
    hasher.update(result.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn normalize_member_code(code: &str) -> String {
    code.to_uppercase().replace('X', "x")
}

/// Nominal weight per foot for shapes whose designator carries it.
pub fn nominal_weight(code: &str) -> Option<f64> {
    let normalized = normalize_member_code(code);
    let is_weighted = ["WT", "MC", "W", "C"]
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
        && !normalized.starts_with("HSS");
    if !is_weighted {
        return None;
    }
    normalized
        .split_once('x')
        .and_then(|(_, weight)| weight.parse::<f64>().ok())
}

fn collect_members(
    patterns: &TakeoffPatterns,
    result: &SearchResult,
    accumulator: &mut TakeoffAccumulator,
) {
    let text = result.text.as_str();
    let matches: Vec<_> = patterns.member.find_iter(text).collect();

    for (position, found) in matches.iter().enumerate() {
        let code = normalize_member_code(found.as_str());
        let (window_start, window_end) = char_window(
            text,
            found.start(),
            found.end(),
            MEMBER_CONTEXT_BEFORE,
            MEMBER_CONTEXT_AFTER,
        );
        let after_end = matches
            .get(position + 1)
            .map(|next| next.start().min(window_end))
            .unwrap_or(window_end)
            .max(found.end());
        let before = &text[window_start..found.start()];
        let after = &text[found.end()..after_end];

        let quantity = member_quantity(patterns, before, after);
        let length = patterns
            .length
            .find(after)
            .map(|token| normalize_whitespace(token.as_str()));

        let entry = accumulator.entry(&code, || {
            let mut takeoff = MaterialTakeoff::new(code.clone(), "Structural Steel");
            takeoff.unit = Some("EA".to_string());
            takeoff
        });
        entry.quantity = Some(entry.quantity.unwrap_or(0).saturating_add(quantity));
        if entry.weight.is_none() {
            entry.weight = nominal_weight(&code);
        }
        add_source(entry, result);
        if let Some(length) = length {
            let has_room = entry.dimensions.len() < MAX_TAKEOFF_DIMENSIONS;
            if has_room && !entry.dimensions.contains(&length) {
                entry.dimensions.push(length);
            }
        }
    }
}

fn member_quantity(patterns: &TakeoffPatterns, before: &str, after: &str) -> u32 {
    if let Some(quantity) = patterns
        .quantity_after
        .captures(after)
        .and_then(|capture| capture.name("qty"))
        .and_then(|m| m.as_str().parse::<u32>().ok())
    {
        return quantity;
    }

    patterns
        .quantity_before
        .captures(before)
        .and_then(|capture| capture.name("paren").or_else(|| capture.name("dash")))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(1)
}

fn collect_materials(
    patterns: &TakeoffPatterns,
    result: &SearchResult,
    accumulator: &mut TakeoffAccumulator,
) {
    let text = result.text.as_str();
    let is_schedule = result.is_drawing_type("Schedule");
    let is_assembly = text.to_lowercase().contains("assembly");
    let is_detail = result.is_drawing_type("Detail");
    let largest_area = result
        .calculated_areas
        .iter()
        .map(|area| area.square_feet)
        .max();

    let keywords: Vec<_> = patterns.material.find_iter(text).collect();
    for (position, found) in keywords.iter().enumerate() {
        // "roofing membrane" is one material, named at its last keyword
        let continues_phrase = keywords.get(position + 1).is_some_and(|next| {
            let gap = &text[found.end()..next.start()];
            !gap.is_empty() && gap.chars().all(|c| c == ' ' || c == '\t')
        });
        if continues_phrase {
            continue;
        }
        let Some(material) = material_phrase(patterns, text, found.start(), found.end()) else {
            continue;
        };
        let key = material.to_lowercase();

        let entry = accumulator.entry(&key, || {
            MaterialTakeoff::new(material.clone(), categorize(&key))
        });
        add_source(entry, result);

        if entry.specification.is_none() && (is_schedule || is_assembly) {
            entry.specification = specification_excerpt(text, found.start());
        }
        if entry.area.is_none() {
            if let Some(area) = largest_area {
                entry.area = Some(area);
                entry.unit.get_or_insert_with(|| "SF".to_string());
            }
        }
        if entry.installation.is_none() && is_detail {
            entry.installation = patterns
                .installation
                .find(text)
                .map(|m| normalize_whitespace(m.as_str()))
                .filter(|sentence| !sentence.is_empty());
        }
    }
}

/// The keyword plus up to two plain words before it on the same line, minus
/// leading stopwords and member designators.
fn material_phrase(
    patterns: &TakeoffPatterns,
    text: &str,
    start: usize,
    end: usize,
) -> Option<String> {
    let line_start = text[..start].rfind('\n').map(|index| index + 1).unwrap_or(0);
    let mut preceding: Vec<&str> = text[line_start..start]
        .split_whitespace()
        .rev()
        .take_while(|word| word.chars().all(|c| c.is_alphanumeric() || c == '-'))
        .take(MAX_PHRASE_WORDS)
        .collect();
    preceding.reverse();

    let phrase: Vec<&str> = preceding
        .into_iter()
        .skip_while(|word| LEADING_STOPWORDS.contains(&word.to_lowercase().as_str()))
        .filter(|word| !patterns.member.is_match(word))
        .chain(std::iter::once(&text[start..end]))
        .collect();
    let phrase = phrase.join(" ");
    (!phrase.trim().is_empty()).then_some(phrase)
}

fn specification_excerpt(text: &str, offset: usize) -> Option<String> {
    let line_start = text[..offset].rfind('\n').map(|index| index + 1).unwrap_or(0);
    let excerpt = text[line_start..]
        .lines()
        .take(3)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!excerpt.is_empty()).then_some(excerpt)
}

pub fn categorize(material: &str) -> &'static str {
    let lowered = material.to_lowercase();
    CATEGORY_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(category, _)| *category)
        .unwrap_or("General")
}

fn add_source(entry: &mut MaterialTakeoff, result: &SearchResult) {
    let source = if result.drawing_number.trim().is_empty() {
        result.id.trim()
    } else {
        result.drawing_number.trim()
    };
    if !source.is_empty() {
        entry.sources.insert(source.to_string());
    }
}
