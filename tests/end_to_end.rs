//! Black-box scenarios exercising the crate's public API end to end: a
//! discovery worker against a real SQLite cache, the join/classifier stages
//! on their own, the ROI refinement cycle, and the rate limiter's denial path.

use async_trait::async_trait;
use incentive_finder::cache::sqlite::SqliteCache;
use incentive_finder::cache::{Confidence, LocationContext, NewProgram, ProgramCache};
use incentive_finder::classifier::{classify_program, ClassificationInput, KnownProgram, StatusTag};
use incentive_finder::config::RateLimits;
use incentive_finder::extractor::{self, Result as ExtractResult};
use incentive_finder::join::{join_programs, LeveledProgram};
use incentive_finder::rate_limiter::RateLimiter;
use incentive_finder::roi::{analyze_round, refine, ShortlistedProgram};
use incentive_finder::search::{Result as SearchResult_, SearchProvider, SearchResult};
use incentive_finder::worker::{discover, WorkerLocation};
use std::collections::HashMap;
use std::time::Duration;

struct EmptyProvider;

#[async_trait]
impl SearchProvider for EmptyProvider {
    async fn search_once(&self, _query: &str) -> SearchResult_<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}

struct EmptyLlm;

#[async_trait]
impl extractor::LlmClient for EmptyLlm {
    async fn complete(&self, _system: &str, _user: &str) -> ExtractResult<String> {
        Ok("[]".to_string())
    }
}

fn illinois() -> WorkerLocation<'static> {
    WorkerLocation {
        state_name: "Illinois",
        county_name: None,
        city_name: None,
        legal_entity_type: "LLC",
        industry_code: "54",
    }
}

/// Scenario 1: a fresh federal partition always contains the three well-known
/// programs, and re-running against a search provider that finds nothing
/// still returns them from cache with `discovery_count` bumped.
#[tokio::test]
async fn cache_miss_then_hit_preserves_federal_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let cache = SqliteCache::new(dir.path().join("programs.db")).await.unwrap();
    let search = incentive_finder::search::RetryingSearchClient::new(EmptyProvider, "federal");
    let llm = EmptyLlm;
    let location = illinois();

    let first = discover(&cache, "federal", &location, "federal", 30, &search, &llm, Duration::from_millis(0)).await;
    assert_eq!(first.len(), 3);
    let names: Vec<&str> = first.iter().map(|p| p.program.program_name.as_str()).collect();
    assert!(names.iter().any(|n| n.contains("WOTC")));
    assert!(names.iter().any(|n| n.contains("Bonding")));
    assert!(names.iter().any(|n| n.contains("OJT")));

    let _ = discover(&cache, "federal", &location, "federal", 30, &search, &llm, Duration::from_millis(0)).await;
    let (fresh, _stale) = cache.get_cached_programs("federal", "federal", 30).await.unwrap();
    assert_eq!(fresh.len(), 3);
    assert!(fresh.iter().all(|p| p.discovery_count >= 2));
}

/// Scenario 2: joining retains same-named programs at different government
/// levels, but merges same-level restatements, keeping the higher-confidence,
/// longer-description record.
#[tokio::test]
async fn join_retains_cross_level_but_merges_same_level_duplicates() {
    let leveled = |name: &str, level: &str, confidence: Confidence, description: &str| LeveledProgram {
        program: NewProgram {
            program_name: name.to_string(),
            confidence,
            description: description.to_string(),
            ..Default::default()
        },
        government_level: level.to_string(),
        cache_key: format!("{level}-{name}"),
    };

    let cross_level = join_programs(vec![
        leveled("Enterprise Zone Credit", "state", Confidence::High, ""),
        leveled("Enterprise Zone Credit", "city", Confidence::High, ""),
    ]);
    assert_eq!(cross_level.len(), 2);

    let same_level = join_programs(vec![
        leveled("Work Opportunity Tax Credit", "federal", Confidence::Medium, "short"),
        leveled("Work Opportunity Tax Credit (WOTC)", "federal", Confidence::High, "a much longer restatement"),
    ]);
    assert_eq!(same_level.len(), 1);
    assert_eq!(same_level[0].program.confidence, Confidence::High);
    assert!(same_level[0].program.description.len() > 5);
}

/// Scenario 3: an extracted program whose fuzzy score against a cached entry
/// clears the cache-match threshold confirms the existing row (bumping its
/// discovery count) instead of minting a second one.
#[tokio::test]
async fn fuzzy_match_across_runs_confirms_existing_cache_row() {
    let dir = tempfile::tempdir().unwrap();
    let cache = SqliteCache::new(dir.path().join("programs.db")).await.unwrap();
    let location = illinois();

    let seed = NewProgram {
        program_name: "Work Opportunity Tax Credit (WOTC)".to_string(),
        agency: "U.S. Department of Labor".to_string(),
        confidence: Confidence::High,
        ..Default::default()
    };
    cache.upsert_program(&seed, "state", "illinois", &LocationContext::default()).await.unwrap();

    struct OneHitProvider;
    #[async_trait]
    impl SearchProvider for OneHitProvider {
        async fn search_once(&self, _query: &str) -> SearchResult_<Vec<SearchResult>> {
            Ok(vec![SearchResult {
                url: "https://illinois.gov/wotc".to_string(),
                title: "WOTC".to_string(),
                content: "Illinois participates in the federal WOTC program.".to_string(),
            }])
        }
    }
    struct WotcLlm;
    #[async_trait]
    impl extractor::LlmClient for WotcLlm {
        async fn complete(&self, _system: &str, _user: &str) -> ExtractResult<String> {
            Ok(r#"[{"program_name":"WOTC","agency":"US Dept of Labor","benefit_type":"tax_credit"}]"#.to_string())
        }
    }

    let search = incentive_finder::search::RetryingSearchClient::new(OneHitProvider, "state");
    let _ = discover(&cache, "state", &location, "illinois", 30, &search, &WotcLlm, Duration::from_millis(0)).await;

    let (fresh, _) = cache.get_cached_programs("state", "illinois", 30).await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].discovery_count, 2);
}

/// Scenario 4: a program upserted once and then missed three search passes in
/// a row (with nothing re-found) drops out of `get_cached_programs`; a fresh
/// upsert rescues it.
#[tokio::test]
async fn hallucination_suppression_and_rescue() {
    let dir = tempfile::tempdir().unwrap();
    let cache = SqliteCache::new(dir.path().join("programs.db")).await.unwrap();

    let program = NewProgram {
        program_name: "Questionable Program".to_string(),
        ..Default::default()
    };
    let key = cache.upsert_program(&program, "state", "illinois", &LocationContext::default()).await.unwrap();

    let empty = Default::default();
    for _ in 0..3 {
        cache.increment_miss_count("state", "illinois", &empty).await.unwrap();
    }
    let (fresh, stale) = cache.get_cached_programs("state", "illinois", 30).await.unwrap();
    assert!(fresh.is_empty() && stale.is_empty());

    cache.upsert_program(&program, "state", "illinois", &LocationContext::default()).await.unwrap();
    let (fresh, _) = cache.get_cached_programs("state", "illinois", 30).await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].cache_key, key);
    assert_eq!(fresh[0].miss_count, 0);
}

/// Scenario 5: one shortlisted program with a known per-hire range and a
/// `num_hires` answer of 5 refines to a $30,000 total within a single round.
#[tokio::test]
async fn roi_refinement_completes_within_one_round() {
    struct WotcAnalystLlm;
    #[async_trait]
    impl extractor::LlmClient for WotcAnalystLlm {
        async fn complete(&self, _system: &str, _user: &str) -> ExtractResult<String> {
            Ok(r#"{"estimated_value_per_hire":"$2,400 - $9,600","qualification_rate":"40%","complexity":"medium","time_to_benefit":"6 months","confidence":"high","needs_more_info":["number of hires"]}"#.to_string())
        }
    }

    let program = ShortlistedProgram {
        id: "p1".to_string(),
        program_name: "Work Opportunity Tax Credit".to_string(),
        benefit_type: "tax_credit".to_string(),
        max_value: "$2,400 - $9,600 per hire".to_string(),
        target_populations: vec!["veterans".to_string()],
    };

    let calculations = analyze_round(&WotcAnalystLlm, &[program], &HashMap::new()).await;
    assert!(calculations[0].needs_refinement);

    let mut answers = HashMap::new();
    answers.insert("p1_num_hires".to_string(), "5".to_string());
    let outcome = refine(calculations, &answers, 0, 3);

    assert!(outcome.is_complete);
    assert_eq!(outcome.calculations[0].refined_total_roi.as_deref(), Some("$30,000"));
    assert_eq!(outcome.calculations[0].num_hires_used, Some(5));
}

/// Scenario 6: with `max_concurrent_sessions = 1`, a second overlapping
/// session start is denied with a typed error rather than silently admitted.
#[test]
fn rate_limiter_denies_second_concurrent_session() {
    let limits = RateLimits {
        max_concurrent_sessions: 1,
        max_sessions_per_day: 50,
        max_search_calls_per_session: 20,
        max_llm_calls_per_session: 10,
    };
    let limiter = RateLimiter::from_config(&limits);

    assert!(limiter.can_start_session().is_ok());
    limiter.start_session("session-a");

    let denial = limiter.can_start_session();
    assert!(denial.is_err());
    assert!(denial.unwrap_err().0.contains("concurrent"));

    limiter.end_session("session-a");
    assert!(limiter.can_start_session().is_ok());
}

/// Scenario 7: a DOL-administered program with a valid URL and no duplicate
/// match is tagged FEDERAL, not ACTIVE, because federal detection runs before
/// the active fallthrough in the decision tree.
#[test]
fn classifier_tags_federal_program_before_active_fallthrough() {
    let input = ClassificationInput {
        program_name: "Work Opportunity Tax Credit",
        agency: "U.S. Department of Labor",
        source_url: "https://www.dol.gov/agencies/eta/wotc",
        program_type: "tax_credit",
        max_value: "$2,400 - $9,600 per hire",
        ..Default::default()
    };
    let known: [KnownProgram; 0] = [];
    let today = chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

    let result = classify_program(&input, &known, today);
    assert_eq!(result.status_tag, StatusTag::Federal);
    assert_ne!(result.status_tag, StatusTag::Active);
}
