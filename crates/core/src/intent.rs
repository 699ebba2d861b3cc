use crate::SearchError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    QuantityTakeoff,
    Specifications,
    Details,
    Dimensions,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::QuantityTakeoff => "quantity_takeoff",
            Intent::Specifications => "specifications",
            Intent::Details => "details",
            Intent::Dimensions => "dimensions",
            Intent::General => "general",
        }
    }

    /// Unknown labels map to `General`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label
            .trim()
            .to_lowercase()
            .replace(|c: char| c == '-' || c == ' ', "_");
        match normalized.as_str() {
            "quantity_takeoff" | "quantitytakeoff" | "quantity" | "takeoff" => {
                Intent::QuantityTakeoff
            }
            "specifications" | "specification" | "specs" => Intent::Specifications,
            "details" | "detail" => Intent::Details,
            "dimensions" | "dimension" => Intent::Dimensions,
            _ => Intent::General,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Evaluated in order; the first match wins.
const INTENT_PATTERNS: [(Intent, &str); 4] = [
    (
        Intent::QuantityTakeoff,
        r"(?i)\b(how many|how much|quantity|quantities|qty|count|total|takeoff|take-off|number of|amount of)\b",
    ),
    (
        Intent::Specifications,
        r"(?i)\b(spec|specs|specification|specifications|grade|astm|strength|psi|material|rating|type of)\b",
    ),
    (
        Intent::Details,
        r"(?i)\b(detail|details|connection|connections|connect|install|installation|installed|attach|attachment|fasten|fastener|weld|welded|bolt|bolted|anchor)\b",
    ),
    (
        Intent::Dimensions,
        r"(?i)\b(dimension|dimensions|size|sizes|length|width|height|depth|area|square feet|sq ft|sf|thick|thickness|span|clearance)\b",
    ),
];

fn intent_patterns() -> &'static [(Intent, Regex)] {
    static PATTERNS: OnceLock<Vec<(Intent, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        INTENT_PATTERNS
            .iter()
            .filter_map(|(intent, pattern)| Regex::new(pattern).ok().map(|re| (*intent, re)))
            .collect()
    })
}

pub fn detect_intent(query: &str) -> Intent {
    intent_patterns()
        .iter()
        .find(|(_, pattern)| pattern.is_match(query))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}

const SYNONYM_HINTS: [(&str, &str); 14] = [
    ("beam", "girder joist W-shape"),
    ("column", "post pier HSS"),
    ("rebar", "reinforcing bar reinforcement"),
    ("footing", "foundation pier"),
    ("slab", "concrete deck slab-on-grade"),
    ("wall", "partition assembly"),
    ("door", "opening frame hardware"),
    ("window", "glazing opening"),
    ("stud", "framing metal stud"),
    ("bolt", "anchor fastener"),
    ("weld", "welded connection fillet"),
    ("duct", "hvac ductwork"),
    ("pipe", "piping plumbing"),
    ("roof", "roofing membrane"),
];

/// Appends synonym hints for vocabulary found in the query. Hint words
/// already present in the query are not repeated.
pub fn expand_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|word| !word.is_empty())
        .collect();

    let mut hints: Vec<&str> = Vec::new();
    for (term, synonyms) in SYNONYM_HINTS {
        let mentioned = words
            .iter()
            .any(|word| *word == term || word.strip_suffix('s') == Some(term));
        if !mentioned {
            continue;
        }
        for hint in synonyms.split_whitespace() {
            let hint_lower = hint.to_lowercase();
            if !words.contains(&hint_lower.as_str()) && !hints.contains(&hint) {
                hints.push(hint);
            }
        }
    }

    if hints.is_empty() {
        query.to_string()
    } else {
        format!("{} {}", query.trim_end(), hints.join(" "))
    }
}

/// Per-drawing-type multipliers. Lookups are case-insensitive and unknown
/// drawing types resolve to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostTable {
    entries: Vec<(String, f64)>,
}

impl BoostTable {
    pub fn neutral() -> Self {
        Self::from_static(&[
            ("Plan", 1.0),
            ("Section", 1.0),
            ("Detail", 1.0),
            ("Elevation", 1.0),
            ("Schedule", 1.0),
        ])
    }

    fn from_static(entries: &[(&str, f64)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(drawing_type, factor)| ((*drawing_type).to_string(), *factor))
                .collect(),
        }
    }

    pub fn factor(&self, drawing_type: &str) -> f64 {
        self.entries
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(drawing_type.trim()))
            .map(|(_, factor)| *factor)
            .unwrap_or(1.0)
    }

    pub fn set(&mut self, drawing_type: &str, factor: f64) -> Result<(), SearchError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(SearchError::InvalidBoost {
                drawing_type: drawing_type.to_string(),
                factor,
            });
        }

        match self
            .entries
            .iter_mut()
            .find(|(known, _)| known.eq_ignore_ascii_case(drawing_type.trim()))
        {
            Some(entry) => entry.1 = factor,
            None => self.entries.push((drawing_type.trim().to_string(), factor)),
        }
        Ok(())
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }
}

pub fn boost_factors(intent: Intent) -> BoostTable {
    match intent {
        Intent::QuantityTakeoff => BoostTable::from_static(&[
            ("Plan", 1.5),
            ("Schedule", 1.4),
            ("Elevation", 1.0),
            ("Detail", 0.8),
            ("Section", 0.7),
        ]),
        Intent::Specifications => BoostTable::from_static(&[
            ("Schedule", 1.5),
            ("Detail", 1.3),
            ("Section", 1.1),
            ("Plan", 0.9),
            ("Elevation", 0.8),
        ]),
        Intent::Details => BoostTable::from_static(&[
            ("Detail", 1.6),
            ("Section", 1.3),
            ("Elevation", 0.9),
            ("Plan", 0.8),
            ("Schedule", 0.7),
        ]),
        Intent::Dimensions => BoostTable::from_static(&[
            ("Plan", 1.4),
            ("Elevation", 1.3),
            ("Section", 1.2),
            ("Detail", 1.1),
            ("Schedule", 0.8),
        ]),
        Intent::General => BoostTable::neutral(),
    }
}

pub fn boost_factors_for_label(label: &str) -> BoostTable {
    boost_factors(Intent::from_label(label))
}
