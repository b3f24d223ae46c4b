use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const FALLBACK_RATIO: &str = "1:1";

/// Ratios the fixed-enumeration provider accepts, in its documented order.
pub const ENUMERATED_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];

const RATIO_LABELS: &[(&str, &str)] = &[
    ("1:1", "Square"),
    ("2:3", "Portrait 2:3"),
    ("3:2", "Landscape 3:2"),
    ("3:4", "Portrait 3:4"),
    ("4:3", "Landscape 4:3"),
    ("4:5", "Portrait 4:5"),
    ("5:4", "Landscape 5:4"),
    ("9:16", "Story 9:16"),
    ("16:9", "Widescreen 16:9"),
    ("21:9", "Cinematic 21:9"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatioOption {
    pub id: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioPolicy {
    Unrestricted,
    Enumerated(&'static [&'static str]),
}

/// Compile-time constraint table. Providers not listed here accept any
/// syntactically valid ratio.
pub fn ratio_policy(provider_id: &str) -> RatioPolicy {
    match provider_id {
        "imagen" => RatioPolicy::Enumerated(ENUMERATED_RATIOS),
        _ => RatioPolicy::Unrestricted,
    }
}

pub fn normalize_ratio(value: &str) -> String {
    value.chars().filter(|ch| !ch.is_whitespace()).collect()
}

/// Numeric width/height quotient, or `None` when either side is missing,
/// non-finite, or not positive.
pub fn parse_ratio(value: &str) -> Option<f64> {
    let (left, right) = value.split_once(':')?;
    let width = left.trim().parse::<f64>().ok()?;
    let height = right.trim().parse::<f64>().ok()?;
    if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(width / height)
}

pub fn default_ratio_options() -> Vec<AspectRatioOption> {
    RATIO_LABELS
        .iter()
        .map(|(value, label)| system_option(value, label))
        .collect()
}

/// The working set of ratio options for one provider. Unrestricted
/// providers keep the caller's options (deduplicated by normalized value,
/// first occurrence wins); enumerated providers get exactly their
/// allow-list in fixed order, reusing a caller option when one matches.
pub fn ratios_for_provider(
    provider_id: &str,
    candidates: &[AspectRatioOption],
) -> Vec<AspectRatioOption> {
    match ratio_policy(provider_id) {
        RatioPolicy::Unrestricted => {
            let mut deduped: IndexMap<String, AspectRatioOption> = IndexMap::new();
            for option in candidates {
                deduped
                    .entry(normalize_ratio(&option.value))
                    .or_insert_with(|| option.clone());
            }
            if deduped.is_empty() {
                return default_ratio_options();
            }
            deduped.into_values().collect()
        }
        RatioPolicy::Enumerated(allowed) => allowed
            .iter()
            .copied()
            .map(|value| {
                candidates
                    .iter()
                    .find(|option| normalize_ratio(&option.value) == value)
                    .cloned()
                    .unwrap_or_else(|| system_option(value, canonical_label(value)))
            })
            .collect(),
    }
}

/// Resolve a requested ratio to one the provider accepts. Exact allow-list
/// matches pass through unchanged; anything else snaps to the nearest
/// allowed ratio by numeric distance, first candidate winning ties. Empty
/// or unparseable requests degrade to the first allowed value. Never
/// panics; the absolute fallback is `1:1`.
pub fn resolve_safe_ratio(
    provider_id: &str,
    requested: &str,
    candidates: &[AspectRatioOption],
) -> String {
    let normalized = normalize_ratio(requested);
    match ratio_policy(provider_id) {
        RatioPolicy::Unrestricted => {
            if !normalized.is_empty() {
                return normalized;
            }
            candidates
                .first()
                .map(|option| normalize_ratio(&option.value))
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| FALLBACK_RATIO.to_string())
        }
        RatioPolicy::Enumerated(allowed) => {
            let Some(first) = allowed.first() else {
                return FALLBACK_RATIO.to_string();
            };
            if allowed.contains(&normalized.as_str()) {
                return normalized;
            }
            let Some(target) = parse_ratio(&normalized) else {
                return (*first).to_string();
            };
            let mut best = *first;
            let mut best_delta = f64::MAX;
            for value in allowed.iter().copied() {
                let Some(ratio) = parse_ratio(value) else {
                    continue;
                };
                let delta = (target - ratio).abs();
                if delta < best_delta {
                    best = value;
                    best_delta = delta;
                }
            }
            best.to_string()
        }
    }
}

fn system_option(value: &str, label: &str) -> AspectRatioOption {
    AspectRatioOption {
        id: format!("ratio-{}", value.replace(':', "x")),
        label: label.to_string(),
        value: value.to_string(),
    }
}

fn canonical_label(value: &'static str) -> &'static str {
    RATIO_LABELS
        .iter()
        .find(|(candidate, _)| *candidate == value)
        .map(|(_, label)| *label)
        .unwrap_or(value)
}
