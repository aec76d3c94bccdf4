//! Program identity: name/location normalization, deterministic IDs, fuzzy matching.
//!
//! Two distinct programs discovered on different runs must converge on the same
//! cache row, and the same program described with slightly different wording must
//! fuzzy-match an existing row instead of duplicating it. Both depend on the
//! normalization rules in this module, so callers should never hash or compare raw
//! program names/locations directly.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Acronyms expanded before fuzzy comparison, so "WOTC" and "Work Opportunity Tax
/// Credit" normalize to the same string. Order doesn't matter; patterns are
/// word-boundary-anchored and mutually exclusive.
const ACRONYM_MAP: &[(&str, &str)] = &[
    (r"\bwotc\b", "work opportunity tax credit"),
    (r"\bojt\b", "on the job training"),
    (r"\bwioa\b", "workforce innovation and opportunity act"),
    (r"\btanf\b", "temporary assistance for needy families"),
    (r"\bsnap\b", "supplemental nutrition assistance program"),
    (r"\bedge\b", "economic development for a growing economy"),
    (r"\bez\b", "enterprise zone"),
    (r"\bnpwe\b", "non paid work experience"),
    (r"\bsei\b", "special employer incentives"),
    (r"\bvra\b", "vocational rehabilitation"),
    (r"\bvr&e\b", "vocational rehabilitation and employment"),
    (r"\bhire\b", "hiring incentives to restore employment"),
    (r"\bcte\b", "career and technical education"),
];

#[allow(clippy::unwrap_used)]
fn acronym_patterns() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ACRONYM_MAP
            .iter()
            .map(|(pattern, expansion)| (Regex::new(pattern).unwrap(), *expansion))
            .collect()
    })
}

#[allow(clippy::unwrap_used)]
fn non_word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\w\s]").unwrap())
}

#[allow(clippy::unwrap_used)]
fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Canonical population name, keyed by every raw spelling the extractor has been
/// observed to produce.
fn population_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| HashMap::from([
        ("veterans", "veterans"),
        ("veteran", "veterans"),
        ("people with disabilities", "people with disabilities"),
        ("disabled", "people with disabilities"),
        ("disabilities", "people with disabilities"),
        ("ex-offenders", "ex-offenders"),
        ("ex-felons", "ex-offenders"),
        ("returning citizens", "returning citizens"),
        ("formerly incarcerated", "returning citizens"),
        ("tanf recipients", "TANF recipients"),
        ("tanf", "TANF recipients"),
        ("snap recipients", "SNAP recipients"),
        ("snap", "SNAP recipients"),
        ("ssi recipients", "SSI recipients"),
        ("ssi", "SSI recipients"),
        ("youth", "youth (18-24)"),
        ("youth (18-24)", "youth (18-24)"),
        ("long-term unemployed", "long-term unemployed"),
        ("dislocated workers", "dislocated workers"),
        ("people in recovery", "people in recovery"),
        ("those with poor credit", "those with poor credit"),
        ("poor credit", "those with poor credit"),
        ("low-income adults", "low-income adults"),
        ("low-income", "low-income adults"),
    ]))
}

/// Minimum combined fuzzy score (0-100) for two extractor outputs to be treated as
/// the same cached program. See [`fuzzy_match_program`].
pub const CACHE_MATCH_THRESHOLD: f64 = 80.0;

/// Lowercase, expand acronyms, strip punctuation, collapse whitespace.
pub fn normalize_program_name(name: &str) -> String {
    if name.trim().is_empty() {
        return String::new();
    }
    let mut normalized = name.to_lowercase().trim().to_string();
    for (pattern, expansion) in acronym_patterns().iter() {
        normalized = pattern.replace_all(&normalized, *expansion).into_owned();
    }
    normalized = non_word_pattern().replace_all(&normalized, " ").into_owned();
    normalized = whitespace_pattern().replace_all(&normalized, " ").into_owned();
    normalized.trim().to_string()
}

fn slug(s: &str) -> String {
    s.to_lowercase().trim().replace(' ', "_")
}

/// Canonical location key used to partition the cache by government level.
pub fn normalize_location(level: &str, state_name: &str, county_name: &str, city_name: &str) -> String {
    match level {
        "federal" => "federal".to_string(),
        "state" => slug(state_name),
        "county" => format!("{}_{}", slug(county_name), slug(state_name)),
        "city" => format!("{}_{}", slug(city_name), slug(state_name)),
        _ => slug(state_name),
    }
}

/// Deterministic program ID: SHA-256 of `name|level|location`, truncated to 16 hex
/// chars. Stable across runs so repeated discoveries of the same program collapse
/// to one cache row instead of accumulating duplicates.
pub fn compute_program_id(normalized_name: &str, level: &str, location_key: &str) -> String {
    let raw = format!("{normalized_name}|{level}|{location_key}");
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// A minimal view of a program used for fuzzy comparison, independent of which
/// concrete record type (freshly extracted vs. cached row) it came from.
pub struct FuzzyCandidate<'a> {
    pub program_name: &'a str,
    pub program_name_normalized: Option<&'a str>,
    pub agency: &'a str,
}

/// Weighted token-set-ratio similarity: name carries 70% of the score, agency 30%.
/// When either side lacks an agency string the agency term defaults to 50 (neutral)
/// rather than 0, so two programs with identical names but one missing an agency
/// field don't get unfairly penalized.
pub fn similarity_score(new: &FuzzyCandidate, other: &FuzzyCandidate) -> f64 {
    let new_name = normalize_program_name(new.program_name);
    let other_name = other
        .program_name_normalized
        .map(str::to_string)
        .unwrap_or_else(|| normalize_program_name(other.program_name));

    let new_agency = new.agency.to_lowercase().trim().to_string();
    let other_agency = other.agency.to_lowercase().trim().to_string();

    let name_score = token_set_ratio(&new_name, &other_name);
    let agency_score = if new_agency.is_empty() || other_agency.is_empty() {
        50.0
    } else {
        token_set_ratio(&new_agency, &other_agency)
    };

    name_score * 0.7 + agency_score * 0.3
}

/// Find the best-matching candidate whose combined score meets `threshold`
/// (0-100), or `None` if nothing clears the bar.
pub fn fuzzy_match_program<'a, T>(
    new: &FuzzyCandidate,
    cached: &'a [T],
    threshold: f64,
    to_candidate: impl Fn(&'a T) -> FuzzyCandidate<'a>,
) -> Option<&'a T> {
    if normalize_program_name(new.program_name).is_empty() {
        return None;
    }

    let mut best: Option<(&'a T, f64)> = None;
    for item in cached {
        let candidate = to_candidate(item);
        let score = similarity_score(new, &candidate);
        if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
            best = Some((item, score));
        }
    }

    best.filter(|(_, score)| *score >= threshold).map(|(item, _)| item)
}

/// Token-set ratio: splits both strings into unique word sets, then scores the
/// Sorensen-Dice coefficient over the space-joined sorted sets. This approximates
/// rapidfuzz's `token_set_ratio` closely enough for cache-matching purposes: word
/// order and repeated words don't affect the score, only the set of distinct words.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let sorted_join = |s: &str| -> String {
        let mut words: Vec<&str> = s.split_whitespace().collect();
        words.sort_unstable();
        words.dedup();
        words.join(" ")
    };

    let a_sorted = sorted_join(a);
    let b_sorted = sorted_join(b);

    (strsim::sorensen_dice(&a_sorted, &b_sorted) * 100.0).clamp(0.0, 100.0)
}

/// Map a raw population string to its canonical name, or `None` if unrecognized.
pub fn canonicalize_population(pop: &str) -> Option<&'static str> {
    population_map().get(pop.to_lowercase().trim()).copied()
}
