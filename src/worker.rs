//! Per-(government level, location) discovery: cache-first, search-as-delta.
//!
//! Every search starts from the cache's existing view of the (level, location)
//! partition, treats the web search as an additive delta on top of it, and writes
//! back so later runs are cheaper and more stable. The worker does this write-back
//! itself (rather than leaving it to the join stage) because miss-count bookkeeping
//! is scoped per (level, location) and must be applied exactly once per search —
//! co-locating the write with "what was searched" is the only place that's true.

use crate::cache::{Confidence, LocationContext, NewProgram, Program, ProgramCache};
use crate::extractor::{extract_programs, ExtractionContext, LlmClient};
use crate::identity::{compute_program_id, fuzzy_match_program, normalize_program_name, FuzzyCandidate, CACHE_MATCH_THRESHOLD};
use crate::join::LeveledProgram;
use crate::search::{RetryingSearchClient, SearchProvider};
use std::collections::HashSet;
use std::time::Duration;

/// The six worker-specific populations queried individually at the state level,
/// beyond the generic program-discovery queries.
const STANDARD_POPULATIONS: &[&str] = &[
    "veterans",
    "people with disabilities",
    "ex-offenders/returning citizens",
    "TANF/SNAP recipients",
    "youth (18-24)",
    "long-term unemployed",
];

/// Well-known federal programs, seeded without a search since their existence and
/// terms are stable and nationally uniform.
pub fn federal_seed_programs() -> Vec<NewProgram> {
    vec![
        NewProgram {
            program_name: "Work Opportunity Tax Credit (WOTC)".to_string(),
            agency: "U.S. Department of Labor / IRS".to_string(),
            benefit_type: "tax_credit".to_string(),
            jurisdiction: "United States".to_string(),
            max_value: "$2,400 - $9,600 per hire".to_string(),
            target_populations: vec![
                "veterans".to_string(),
                "TANF recipients".to_string(),
                "ex-felons".to_string(),
                "SSI recipients".to_string(),
                "long-term unemployed".to_string(),
                "youth".to_string(),
            ],
            description: "Federal tax credit for hiring individuals from targeted groups who face barriers to employment.".to_string(),
            source_url: "https://www.dol.gov/agencies/eta/wotc".to_string(),
            confidence: Confidence::High,
        },
        NewProgram {
            program_name: "Federal Bonding Program".to_string(),
            agency: "U.S. Department of Labor".to_string(),
            benefit_type: "bonding".to_string(),
            jurisdiction: "United States".to_string(),
            max_value: "$5,000 - $25,000 fidelity bond".to_string(),
            target_populations: vec![
                "ex-offenders".to_string(),
                "people in recovery".to_string(),
                "those with poor credit".to_string(),
            ],
            description: "Free fidelity bonds for at-risk job seekers, covering employer losses from theft.".to_string(),
            source_url: "https://bonds4jobs.com/".to_string(),
            confidence: Confidence::High,
        },
        NewProgram {
            program_name: "WIOA On-the-Job Training (OJT)".to_string(),
            agency: "U.S. Department of Labor".to_string(),
            benefit_type: "wage_subsidy".to_string(),
            jurisdiction: "United States".to_string(),
            max_value: "50-75% wage reimbursement during training".to_string(),
            target_populations: vec![
                "dislocated workers".to_string(),
                "low-income adults".to_string(),
                "youth".to_string(),
            ],
            description: "Wage subsidy for employers who train eligible workers, covering 50-75% of wages during training period.".to_string(),
            source_url: "https://www.dol.gov/agencies/eta/wioa".to_string(),
            confidence: Confidence::High,
        },
    ]
}

/// Input location context a worker needs to build queries and the extraction
/// prompt, independent of which government level it's running at.
pub struct WorkerLocation<'a> {
    pub state_name: &'a str,
    pub county_name: Option<&'a str>,
    pub city_name: Option<&'a str>,
    pub legal_entity_type: &'a str,
    pub industry_code: &'a str,
}

fn location_name(level: &str, location: &WorkerLocation) -> String {
    match level {
        "city" => location.city_name.unwrap_or(location.state_name).to_string(),
        "county" => location.county_name.unwrap_or(location.state_name).to_string(),
        _ => location.state_name.to_string(),
    }
}

/// Build the level-specific query set. Federal queries are generic and don't
/// mention a location; state queries add the top 3 standard populations; county
/// and city queries are fewer and simpler since the surface area of local programs
/// is small.
pub fn build_search_queries(level: &str, location: &WorkerLocation) -> Vec<String> {
    match level {
        "federal" => vec![
            "federal employer hiring tax credits incentives".to_string(),
            "WOTC work opportunity tax credit requirements".to_string(),
            "federal bonding program employers".to_string(),
        ],
        "state" => {
            let loc = location_name(level, location);
            let mut queries = vec![
                format!("{loc} state employer hiring incentives tax credits"),
                format!("{loc} workforce development employer programs"),
                format!("{loc} enterprise zone hiring credits"),
            ];
            for pop in STANDARD_POPULATIONS.iter().take(3) {
                queries.push(format!("{loc} {pop} employer hiring incentives"));
            }
            queries
        }
        "county" => {
            let county = location
                .county_name
                .map(String::from)
                .unwrap_or_else(|| format!("{} County", location.state_name));
            let state = location.state_name;
            vec![
                format!("{county} {state} employer hiring incentives"),
                format!("{county} {state} workforce development business programs"),
            ]
        }
        "city" => {
            let city = location.city_name.unwrap_or(location.state_name);
            let state = location.state_name;
            vec![
                format!("{city} {state} employer hiring incentives programs"),
                format!("{city} {state} economic development hiring credits"),
            ]
        }
        _ => Vec::new(),
    }
}

fn program_to_new(p: &Program) -> NewProgram {
    NewProgram {
        program_name: p.program_name.clone(),
        agency: p.agency.clone(),
        benefit_type: p.benefit_type.clone(),
        jurisdiction: p.jurisdiction.clone(),
        max_value: p.max_value.clone(),
        target_populations: p.target_populations.clone(),
        description: p.description.clone(),
        source_url: p.source_url.clone(),
        confidence: p.confidence,
    }
}

fn leveled(level: &str, cache_key: String, program: NewProgram) -> LeveledProgram {
    LeveledProgram {
        program,
        government_level: level.to_string(),
        cache_key,
    }
}

/// Fallback id when a cache write fails: the same formula `upsert_program`
/// would have used, so a transient write failure never produces a record the
/// shortlist stage can't re-derive a stable id for.
fn fallback_key(level: &str, location_key: &str, program_name: &str) -> String {
    compute_program_id(&normalize_program_name(program_name), level, location_key)
}

/// Search, then extract, for a single (level, location), reconciling the result
/// against the cache's existing view of that partition.
///
/// Federal runs also seed the well-known programs directly into the cache, so a
/// federal search failure never leaves federal programs entirely unrepresented.
/// Every extracted program is fuzzy-matched against the cached baseline: a match
/// confirms the existing row (resetting its miss count) instead of minting a
/// duplicate, and anything unmatched is upserted as new. Cached programs the
/// search pass fails to re-find get their miss count bumped instead of being
/// dropped, so a single bad search doesn't erase history.
pub async fn discover<P: SearchProvider>(
    cache: &dyn ProgramCache,
    level: &str,
    location: &WorkerLocation<'_>,
    location_key: &str,
    ttl_days: i64,
    search_client: &RetryingSearchClient<P>,
    llm: &dyn LlmClient,
    inter_query_delay: Duration,
) -> Vec<LeveledProgram> {
    let loc_ctx = LocationContext {
        state_name: location.state_name,
        county_name: location.county_name.unwrap_or(""),
        city_name: location.city_name.unwrap_or(""),
    };

    let (fresh, stale) = cache
        .get_cached_programs(level, location_key, ttl_days)
        .await
        .unwrap_or_default();
    let baseline: Vec<&Program> = fresh.iter().chain(stale.iter()).collect();

    let mut programs = Vec::new();
    let mut found_keys: HashSet<String> = HashSet::new();

    if level == "federal" {
        for seed in federal_seed_programs() {
            let key = match cache.upsert_program(&seed, level, location_key, &loc_ctx).await {
                Ok(key) => {
                    found_keys.insert(key.clone());
                    key
                }
                Err(_) => fallback_key(level, location_key, &seed.program_name),
            };
            programs.push(leveled(level, key, seed));
        }
    }

    let queries = build_search_queries(level, location);
    let search_results = search_client.search_all(&queries, inter_query_delay).await;

    let location_label = location_name(level, location);
    let ctx = ExtractionContext {
        level,
        location: &location_label,
        legal_entity_type: location.legal_entity_type,
        industry_code: location.industry_code,
    };
    let mut extracted = extract_programs(llm, &search_results, &ctx).await;
    for program in extracted.iter_mut() {
        if program.jurisdiction.is_empty() {
            program.jurisdiction = location_label.clone();
        }
    }

    for program in extracted {
        let candidate = FuzzyCandidate {
            program_name: &program.program_name,
            program_name_normalized: None,
            agency: &program.agency,
        };
        let matched = fuzzy_match_program(&candidate, &baseline, CACHE_MATCH_THRESHOLD, |p| {
            FuzzyCandidate {
                program_name: &p.program_name,
                program_name_normalized: Some(&p.program_name_normalized),
                agency: &p.agency,
            }
        })
        .map(|p| p.cache_key.clone());

        match matched {
            Some(cache_key) => {
                let _ = cache.confirm_program(&cache_key).await;
                found_keys.insert(cache_key.clone());
                programs.push(leveled(level, cache_key, program));
            }
            None => {
                let key = match cache.upsert_program(&program, level, location_key, &loc_ctx).await {
                    Ok(key) => {
                        found_keys.insert(key.clone());
                        key
                    }
                    Err(_) => fallback_key(level, location_key, &program.program_name),
                };
                programs.push(leveled(level, key, program));
            }
        }
    }

    for cached in baseline.iter() {
        if !found_keys.contains(&cached.cache_key) {
            let carried = program_to_new(cached);
            programs.push(leveled(level, cached.cache_key.clone(), carried));
        }
    }

    let _ = cache
        .increment_miss_count(level, location_key, &found_keys)
        .await;
    let _ = cache
        .log_search(level, location_key, &queries, programs.len())
        .await;

    programs
}
