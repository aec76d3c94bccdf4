//! Determines which government levels likely have incentive programs for a given
//! business address, and extracts city/county/state names to discover at.
//!
//! The LLM analysis is the primary path; a regex-based address parser is the
//! fallback both when the LLM call fails and when its response is missing the
//! state name. Federal and state are always included in the result regardless of
//! which path produced it — per [`crate::error::RouterError::NoStateDeterminable`],
//! only a configured default state being absent as well as both parse strategies
//! failing would leave the router with nothing to return, and the configured
//! default (see [`crate::config::Settings::default_state`]) makes that practically
//! unreachable.

use crate::extractor::LlmClient;
use std::collections::HashMap;
use std::sync::OnceLock;

fn state_codes() -> &'static HashMap<&'static str, &'static str> {
    static CODES: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    CODES.get_or_init(|| {
        HashMap::from([
            ("AL", "Alabama"), ("AK", "Alaska"), ("AZ", "Arizona"), ("AR", "Arkansas"),
            ("CA", "California"), ("CO", "Colorado"), ("CT", "Connecticut"), ("DE", "Delaware"),
            ("FL", "Florida"), ("GA", "Georgia"), ("HI", "Hawaii"), ("ID", "Idaho"),
            ("IL", "Illinois"), ("IN", "Indiana"), ("IA", "Iowa"), ("KS", "Kansas"),
            ("KY", "Kentucky"), ("LA", "Louisiana"), ("ME", "Maine"), ("MD", "Maryland"),
            ("MA", "Massachusetts"), ("MI", "Michigan"), ("MN", "Minnesota"), ("MS", "Mississippi"),
            ("MO", "Missouri"), ("MT", "Montana"), ("NE", "Nebraska"), ("NV", "Nevada"),
            ("NH", "New Hampshire"), ("NJ", "New Jersey"), ("NM", "New Mexico"), ("NY", "New York"),
            ("NC", "North Carolina"), ("ND", "North Dakota"), ("OH", "Ohio"), ("OK", "Oklahoma"),
            ("OR", "Oregon"), ("PA", "Pennsylvania"), ("RI", "Rhode Island"), ("SC", "South Carolina"),
            ("SD", "South Dakota"), ("TN", "Tennessee"), ("TX", "Texas"), ("UT", "Utah"),
            ("VT", "Vermont"), ("VA", "Virginia"), ("WA", "Washington"), ("WV", "West Virginia"),
            ("WI", "Wisconsin"), ("WY", "Wyoming"), ("DC", "District of Columbia"),
        ])
    })
}

fn zip_anchored_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"\b([A-Z]{2})\s+\d{5}").unwrap())
}

fn comma_anchored_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r",\s*([A-Z]{2})\b").unwrap())
}

/// Extract a state name from a raw address via regex, without any LLM call.
/// Tries the zip-anchored form first ("Chicago, IL 60601"), then falls back to the
/// last comma-anchored two-letter code found, since a street address can contain
/// other two-letter tokens before the actual state code.
pub fn parse_state_from_address(address: &str) -> Option<&'static str> {
    let upper = address.to_uppercase();
    let codes = state_codes();

    if let Some(caps) = zip_anchored_pattern().captures(&upper) {
        if let Some(name) = codes.get(&caps[1]) {
            return Some(name);
        }
    }

    // Walk matches in reverse: a street address can contain other comma-anchored
    // two-letter tokens before the real state code near the end of the address.
    for caps in comma_anchored_pattern().captures_iter(&upper).collect::<Vec<_>>().into_iter().rev() {
        let code = &caps[1];
        if let Some(name) = codes.get(code) {
            return Some(name);
        }
    }

    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub city_name: Option<String>,
    pub county_name: Option<String>,
    pub state_name: String,
    pub government_levels: Vec<String>,
}

/// Insert "federal" and "state" at the front if missing, then dedupe while
/// preserving the first occurrence of every level.
fn enforce_required_levels(levels: Vec<String>) -> Vec<String> {
    let mut levels = levels;
    for required in ["federal", "state"] {
        if !levels.iter().any(|l| l == required) {
            levels.insert(0, required.to_string());
        }
    }
    let mut seen = std::collections::HashSet::new();
    levels.into_iter().filter(|l| seen.insert(l.clone())).collect()
}

#[derive(serde::Deserialize)]
struct RawRoutingResult {
    #[serde(default)]
    city_name: Option<String>,
    #[serde(default)]
    county_name: Option<String>,
    #[serde(default)]
    state_name: Option<String>,
    #[serde(default)]
    government_levels: Option<Vec<String>>,
}

fn build_prompt(address: &str, legal_entity_type: &str, industry_code: &str) -> String {
    format!(
        "You are an expert at analyzing business addresses and determining which government levels \
likely have hiring incentive programs.\n\n\
Given this business information:\n\
- Address: {address}\n\
- Legal Entity Type: {legal_entity_type}\n\
- Industry Code: {industry_code}\n\n\
Analyze the address and determine:\n\
1. The city name (if identifiable)\n\
2. The county name (if identifiable)\n\
3. The state name (required)\n\
4. Which government levels likely have incentive programs for this business\n\n\
Consider:\n\
- Federal programs (WOTC, Federal Bonding, WIOA OJT) apply to ALL businesses\n\
- State programs vary by state - all states have some programs\n\
- County programs exist mainly in larger counties (pop > 500k)\n\
- City programs exist mainly in major metros (pop > 250k)\n\n\
Return ONLY valid JSON (no markdown, no explanation):\n\
{{\"city_name\": \"city name or null\", \"county_name\": \"county name or null\", \
\"state_name\": \"full state name\", \"government_levels\": [\"federal\", \"state\", ...]}}\n\n\
Note: government_levels should ALWAYS include \"federal\" and \"state\". \
Only include \"county\" and \"city\" if those entities likely have programs."
    )
}

fn fallback_decision(address: &str, default_state: &str) -> RoutingDecision {
    let state_name = parse_state_from_address(address)
        .map(str::to_string)
        .unwrap_or_else(|| default_state.to_string());
    RoutingDecision {
        city_name: None,
        county_name: None,
        state_name,
        government_levels: vec!["federal".to_string(), "state".to_string()],
    }
}

/// Determine routing for `address`, trying the LLM first and falling back to a
/// pure regex parse on any failure (malformed JSON, missing state, request error).
pub async fn analyze(
    llm: &dyn LlmClient,
    address: &str,
    legal_entity_type: &str,
    industry_code: &str,
    default_state: &str,
) -> RoutingDecision {
    let prompt = build_prompt(address, legal_entity_type, industry_code);

    let llm_result = llm.complete("", &prompt).await.ok().and_then(|text| {
        let cleaned = text.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```");
        serde_json::from_str::<RawRoutingResult>(cleaned.trim()).ok()
    });

    match llm_result {
        Some(raw) => {
            let state_name = raw
                .state_name
                .filter(|s| !s.trim().is_empty())
                .or_else(|| parse_state_from_address(address).map(str::to_string))
                .unwrap_or_else(|| default_state.to_string());
            RoutingDecision {
                city_name: raw.city_name,
                county_name: raw.county_name,
                state_name,
                government_levels: enforce_required_levels(raw.government_levels.unwrap_or_default()),
            }
        }
        None => fallback_decision(address, default_state),
    }
}
