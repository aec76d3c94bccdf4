//! Program knowledge base: the persistent record of every hiring-incentive program
//! ever discovered.
//!
//! Two backends implement the same [`ProgramCache`] trait: [`sqlite::SqliteCache`]
//! for local/embedded deployments and [`postgres::PostgresCache`] for a shared,
//! networked deployment with proper jurisdiction hierarchy. Callers (the worker and
//! join stages) depend only on the trait, never on a concrete backend.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(String),

    #[error("failed to initialize schema: {0}")]
    Schema(String),

    #[error("unknown government level: {0}")]
    UnknownLevel(String),

    #[error("connection pool exhausted or closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Confidence in a program's correctness, monotonic under the upsert ratchet rule:
/// a later upsert may raise confidence but never lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }

    /// The higher of `self` and `incoming` — the ratchet never downgrades.
    pub fn ratchet(self, incoming: Confidence) -> Confidence {
        self.max(incoming)
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Confidence::Low
    }
}

/// A hiring-incentive program record, as stored in and retrieved from the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub cache_key: String,
    pub program_name: String,
    pub program_name_normalized: String,
    pub agency: String,
    pub benefit_type: String,
    pub jurisdiction: String,
    pub max_value: String,
    pub target_populations: Vec<String>,
    pub description: String,
    pub source_url: String,
    pub confidence: Confidence,
    pub government_level: String,
    pub location_key: String,
    pub first_discovered_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
    pub discovery_count: i64,
    pub miss_count: i64,
}

/// A freshly extracted program, prior to being assigned a cache key or timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewProgram {
    pub program_name: String,
    pub agency: String,
    pub benefit_type: String,
    pub jurisdiction: String,
    pub max_value: String,
    pub target_populations: Vec<String>,
    pub description: String,
    pub source_url: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_programs: i64,
    pub by_level: HashMap<String, i64>,
    pub total_searches: i64,
}

/// Jurisdiction context threaded through upserts so the Postgres backend can
/// resolve/create the correct row in its `jurisdictions` hierarchy; the SQLite
/// backend ignores the parts it doesn't need.
#[derive(Debug, Clone, Default)]
pub struct LocationContext<'a> {
    pub state_name: &'a str,
    pub county_name: &'a str,
    pub city_name: &'a str,
}

/// Backend-independent program knowledge base.
///
/// Read-time filtering applies the hallucination-suppression rule
/// (`miss_count >= 3 AND discovery_count <= 1` rows are excluded, never deleted)
/// uniformly across backends — it is implemented once per backend's query, not in
/// a shared wrapper, to keep each backend's SQL self-contained and reviewable.
#[async_trait]
pub trait ProgramCache: Send + Sync {
    /// Split cached programs for (level, location_key) into fresh (within `ttl_days`
    /// of `last_verified_at`) and stale.
    async fn get_cached_programs(
        &self,
        level: &str,
        location_key: &str,
        ttl_days: i64,
    ) -> Result<(Vec<Program>, Vec<Program>)>;

    /// Insert a new program or merge into an existing one keyed by its deterministic
    /// content-addressed ID. Returns the cache key.
    async fn upsert_program(
        &self,
        program: &NewProgram,
        level: &str,
        location_key: &str,
        location: &LocationContext<'_>,
    ) -> Result<String>;

    /// Touch `last_verified_at`, bump `discovery_count`, reset `miss_count` to 0.
    async fn confirm_program(&self, cache_key: &str) -> Result<()>;

    /// Bump `miss_count` for every cached program at (level, location_key) whose
    /// cache key is not in `found_keys` — i.e. programs the latest search pass
    /// failed to re-find.
    async fn increment_miss_count(
        &self,
        level: &str,
        location_key: &str,
        found_keys: &HashSet<String>,
    ) -> Result<()>;

    /// Record a search pass for observability (SQLite only; Postgres relies on
    /// separate analytics tables and treats this as a no-op).
    async fn log_search(
        &self,
        level: &str,
        location_key: &str,
        queries: &[String],
        programs_found: usize,
    ) -> Result<()>;

    /// Idempotently seed the well-known federal programs.
    async fn seed_federal_programs(&self, programs: &[NewProgram]) -> Result<()> {
        for program in programs {
            self.upsert_program(
                program,
                "federal",
                "federal",
                &LocationContext {
                    state_name: "United States",
                    ..Default::default()
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn get_stats(&self) -> Result<CacheStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_ratchet_never_downgrades() {
        assert_eq!(Confidence::High.ratchet(Confidence::Low), Confidence::High);
        assert_eq!(Confidence::Low.ratchet(Confidence::High), Confidence::High);
        assert_eq!(Confidence::Medium.ratchet(Confidence::Medium), Confidence::Medium);
    }

    #[test]
    fn confidence_parse_defaults_to_low() {
        assert_eq!(Confidence::parse("bogus"), Confidence::Low);
        assert_eq!(Confidence::parse("high"), Confidence::High);
    }

    #[test]
    fn confidence_ordering_is_low_medium_high() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }
}
