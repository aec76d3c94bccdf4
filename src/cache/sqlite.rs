//! Embedded SQLite backend for [`super::ProgramCache`].
//!
//! Unlike a dedicated-worker-thread design, every operation here opens its own
//! short-lived connection inside [`tokio::task::spawn_blocking`]. WAL mode plus a
//! generous busy timeout make concurrent opens safe, and the simplicity matches the
//! reference implementation's per-call-connect style more closely than a persistent
//! worker would. For the read/write volumes a single-operator discovery session
//! produces, connection setup cost is not a bottleneck.

use super::{CacheError, CacheStats, LocationContext, NewProgram, Program, ProgramCache, Result};
use crate::identity::{compute_program_id, normalize_program_name};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;

pub struct SqliteCache {
    path: PathBuf,
}

impl SqliteCache {
    /// Open (creating if needed) the database at `path` and ensure its schema exists.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = Self { path };
        cache.ensure_schema().await?;
        Ok(cache)
    }

    fn connect(path: &PathBuf) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CacheError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| CacheError::Database(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=10000;")
            .map_err(|e| CacheError::Database(e.to_string()))?;
        Ok(conn)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Self::connect(&path)?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS programs (
                    cache_key               TEXT PRIMARY KEY,
                    program_name            TEXT NOT NULL,
                    program_name_normalized TEXT NOT NULL,
                    agency                  TEXT DEFAULT '',
                    benefit_type            TEXT DEFAULT '',
                    jurisdiction            TEXT DEFAULT '',
                    max_value               TEXT DEFAULT '',
                    target_populations      TEXT DEFAULT '[]',
                    description             TEXT DEFAULT '',
                    source_url              TEXT DEFAULT '',
                    confidence              TEXT DEFAULT 'low',
                    government_level        TEXT NOT NULL,
                    location_key            TEXT NOT NULL,
                    first_discovered_at     TEXT NOT NULL,
                    last_verified_at        TEXT NOT NULL,
                    discovery_count         INTEGER DEFAULT 1,
                    miss_count              INTEGER DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_programs_level_location
                ON programs(government_level, location_key);
                CREATE TABLE IF NOT EXISTS search_log (
                    id                INTEGER PRIMARY KEY AUTOINCREMENT,
                    government_level  TEXT NOT NULL,
                    location_key      TEXT NOT NULL,
                    search_queries    TEXT DEFAULT '[]',
                    programs_found    INTEGER DEFAULT 0,
                    searched_at       TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| CacheError::Schema(e.to_string()))
        })
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?
    }

    fn row_to_program(row: &rusqlite::Row) -> rusqlite::Result<Program> {
        let target_populations_json: String = row.get("target_populations")?;
        let target_populations: Vec<String> =
            serde_json::from_str(&target_populations_json).unwrap_or_default();
        let first_discovered_at: String = row.get("first_discovered_at")?;
        let last_verified_at: String = row.get("last_verified_at")?;
        let confidence_str: String = row.get("confidence")?;

        Ok(Program {
            cache_key: row.get("cache_key")?,
            program_name: row.get("program_name")?,
            program_name_normalized: row.get("program_name_normalized")?,
            agency: row.get("agency")?,
            benefit_type: row.get("benefit_type")?,
            jurisdiction: row.get("jurisdiction")?,
            max_value: row.get("max_value")?,
            target_populations,
            description: row.get("description")?,
            source_url: row.get("source_url")?,
            confidence: super::Confidence::parse(&confidence_str),
            government_level: row.get("government_level")?,
            location_key: row.get("location_key")?,
            first_discovered_at: parse_timestamp(&first_discovered_at),
            last_verified_at: parse_timestamp(&last_verified_at),
            discovery_count: row.get("discovery_count")?,
            miss_count: row.get("miss_count")?,
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl ProgramCache for SqliteCache {
    async fn get_cached_programs(
        &self,
        level: &str,
        location_key: &str,
        ttl_days: i64,
    ) -> Result<(Vec<Program>, Vec<Program>)> {
        let path = self.path.clone();
        let level = level.to_string();
        let location_key = location_key.to_string();

        tokio::task::spawn_blocking(move || -> Result<(Vec<Program>, Vec<Program>)> {
            let conn = Self::connect(&path)?;
            let cutoff = Utc::now() - ChronoDuration::days(ttl_days);

            let mut stmt = conn
                .prepare(
                    "SELECT * FROM programs
                     WHERE government_level = ?1 AND location_key = ?2
                       AND NOT (miss_count >= 3 AND discovery_count <= 1)",
                )
                .map_err(|e| CacheError::Database(e.to_string()))?;

            let rows = stmt
                .query_map([&level, &location_key], Self::row_to_program)
                .map_err(|e| CacheError::Database(e.to_string()))?;

            let mut fresh = Vec::new();
            let mut stale = Vec::new();
            for row in rows {
                let program = row.map_err(|e| CacheError::Database(e.to_string()))?;
                if program.last_verified_at >= cutoff {
                    fresh.push(program);
                } else {
                    stale.push(program);
                }
            }
            Ok((fresh, stale))
        })
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?
    }

    async fn upsert_program(
        &self,
        program: &NewProgram,
        level: &str,
        location_key: &str,
        _location: &LocationContext<'_>,
    ) -> Result<String> {
        let path = self.path.clone();
        let level = level.to_string();
        let location_key = location_key.to_string();
        let program = program.clone_owned();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let conn = Self::connect(&path)?;
            let normalized = normalize_program_name(&program.program_name);
            let cache_key = compute_program_id(&normalized, &level, &location_key);
            let now = Utc::now().to_rfc3339();
            let target_pops_json =
                serde_json::to_string(&program.target_populations).unwrap_or_else(|_| "[]".to_string());

            let existing: Option<String> = conn
                .query_row(
                    "SELECT cache_key FROM programs WHERE cache_key = ?1",
                    [&cache_key],
                    |row| row.get(0),
                )
                .ok();

            if existing.is_some() {
                conn.execute(
                    "UPDATE programs SET
                        last_verified_at = ?1,
                        discovery_count = discovery_count + 1,
                        miss_count = 0,
                        agency = COALESCE(NULLIF(?2, ''), agency),
                        benefit_type = COALESCE(NULLIF(?3, ''), benefit_type),
                        max_value = COALESCE(NULLIF(?4, ''), max_value),
                        target_populations = CASE WHEN length(?5) > length(target_populations)
                            THEN ?5 ELSE target_populations END,
                        description = CASE WHEN length(?6) > length(description)
                            THEN ?6 ELSE description END,
                        source_url = COALESCE(NULLIF(?7, ''), source_url),
                        confidence = CASE
                            WHEN ?8 = 'high' THEN 'high'
                            WHEN ?8 = 'medium' AND confidence != 'high' THEN 'medium'
                            ELSE confidence END
                    WHERE cache_key = ?9",
                    rusqlite::params![
                        now,
                        program.agency,
                        program.benefit_type,
                        program.max_value,
                        target_pops_json,
                        program.description,
                        program.source_url,
                        program.confidence.as_str(),
                        cache_key,
                    ],
                )
                .map_err(|e| CacheError::Database(e.to_string()))?;
            } else {
                conn.execute(
                    "INSERT INTO programs (
                        cache_key, program_name, program_name_normalized, agency,
                        benefit_type, jurisdiction, max_value, target_populations,
                        description, source_url, confidence, government_level,
                        location_key, first_discovered_at, last_verified_at,
                        discovery_count, miss_count
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?14,1,0)",
                    rusqlite::params![
                        cache_key,
                        program.program_name,
                        normalized,
                        program.agency,
                        program.benefit_type,
                        program.jurisdiction,
                        program.max_value,
                        target_pops_json,
                        program.description,
                        program.source_url,
                        program.confidence.as_str(),
                        level,
                        location_key,
                        now,
                    ],
                )
                .map_err(|e| CacheError::Database(e.to_string()))?;
            }

            Ok(cache_key)
        })
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?
    }

    async fn confirm_program(&self, cache_key: &str) -> Result<()> {
        let path = self.path.clone();
        let cache_key = cache_key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Self::connect(&path)?;
            conn.execute(
                "UPDATE programs SET last_verified_at = ?1, discovery_count = discovery_count + 1, miss_count = 0
                 WHERE cache_key = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), cache_key],
            )
            .map_err(|e| CacheError::Database(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?
    }

    async fn increment_miss_count(
        &self,
        level: &str,
        location_key: &str,
        found_keys: &HashSet<String>,
    ) -> Result<()> {
        let path = self.path.clone();
        let level = level.to_string();
        let location_key = location_key.to_string();
        let found_keys = found_keys.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Self::connect(&path)?;
            let mut stmt = conn
                .prepare("SELECT cache_key FROM programs WHERE government_level = ?1 AND location_key = ?2")
                .map_err(|e| CacheError::Database(e.to_string()))?;
            let keys: Vec<String> = stmt
                .query_map([&level, &location_key], |row| row.get(0))
                .map_err(|e| CacheError::Database(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();

            for key in keys {
                if !found_keys.contains(&key) {
                    conn.execute(
                        "UPDATE programs SET miss_count = miss_count + 1 WHERE cache_key = ?1",
                        [&key],
                    )
                    .map_err(|e| CacheError::Database(e.to_string()))?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?
    }

    async fn log_search(
        &self,
        level: &str,
        location_key: &str,
        queries: &[String],
        programs_found: usize,
    ) -> Result<()> {
        let path = self.path.clone();
        let level = level.to_string();
        let location_key = location_key.to_string();
        let queries_json = serde_json::to_string(queries).unwrap_or_else(|_| "[]".to_string());

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Self::connect(&path)?;
            conn.execute(
                "INSERT INTO search_log (government_level, location_key, search_queries, programs_found, searched_at)
                 VALUES (?1,?2,?3,?4,?5)",
                rusqlite::params![level, location_key, queries_json, programs_found as i64, Utc::now().to_rfc3339()],
            )
            .map_err(|e| CacheError::Database(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?
    }

    async fn get_stats(&self) -> Result<CacheStats> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<CacheStats> {
            let conn = Self::connect(&path)?;
            let total_programs: i64 = conn
                .query_row("SELECT COUNT(*) FROM programs", [], |row| row.get(0))
                .map_err(|e| CacheError::Database(e.to_string()))?;

            let mut by_level = HashMap::new();
            let mut stmt = conn
                .prepare("SELECT government_level, COUNT(*) FROM programs GROUP BY government_level")
                .map_err(|e| CacheError::Database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| CacheError::Database(e.to_string()))?;
            for row in rows {
                let (level, count) = row.map_err(|e| CacheError::Database(e.to_string()))?;
                by_level.insert(level, count);
            }

            let total_searches: i64 = conn
                .query_row("SELECT COUNT(*) FROM search_log", [], |row| row.get(0))
                .map_err(|e| CacheError::Database(e.to_string()))?;

            Ok(CacheStats {
                total_programs,
                by_level,
                total_searches,
            })
        })
        .await
        .map_err(|e| CacheError::Database(e.to_string()))?
    }
}

impl NewProgram {
    fn clone_owned(&self) -> Self {
        self.clone()
    }
}
