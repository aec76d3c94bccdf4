//! Networked Postgres backend for [`super::ProgramCache`], with a normalized
//! `jurisdictions` hierarchy (federal → state → county → city) instead of the flat
//! `location_key` string the SQLite backend partitions by directly.
//!
//! Jurisdiction rows are found-or-created on every upsert (`_resolve_jurisdiction_id`
//! in the originating implementation); the parent chain is walked recursively so a
//! city upsert also ensures its state (and, if given, county) exist.

use super::{CacheError, CacheStats, LocationContext, NewProgram, Program, ProgramCache, Result};
use crate::identity::{canonicalize_population, compute_program_id, normalize_program_name};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::collections::HashSet;
use tokio_postgres::{Client, NoTls};

pub struct PostgresCache {
    client: Client,
}

impl PostgresCache {
    /// Connect and verify the expected schema (migrations are applied out-of-band,
    /// not by this crate — a `jurisdictions` row count of zero is still a valid,
    /// freshly-migrated database).
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection terminated");
            }
        });

        client
            .query_one("SELECT COUNT(*) FROM jurisdictions", &[])
            .await
            .map_err(|e| CacheError::Schema(e.to_string()))?;

        Ok(Self { client })
    }

    /// Find or create a jurisdiction row, walking the parent chain as needed.
    /// Returns the jurisdiction id.
    async fn resolve_jurisdiction_id(&self, level: &str, location: &LocationContext<'_>) -> Result<i64> {
        match level {
            "federal" => {
                if let Some(row) = self
                    .client
                    .query_opt("SELECT id FROM jurisdictions WHERE level = 'federal' LIMIT 1", &[])
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?
                {
                    return Ok(row.get(0));
                }
                let row = self
                    .client
                    .query_one(
                        "INSERT INTO jurisdictions (name, level) VALUES ('United States', 'federal') RETURNING id",
                        &[],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?;
                Ok(row.get(0))
            }
            "state" => {
                let state_clean = location.state_name.trim();
                let state_code = state_clean.to_uppercase().chars().take(2).collect::<String>();
                if let Some(row) = self
                    .client
                    .query_opt(
                        "SELECT id FROM jurisdictions WHERE level = 'state' AND (name ILIKE $1 OR state_code = $2) LIMIT 1",
                        &[&state_clean, &state_code],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?
                {
                    return Ok(row.get(0));
                }
                if let Some(row) = self
                    .client
                    .query_opt(
                        "INSERT INTO jurisdictions (name, level, state_code, parent_id) VALUES ($1, 'state', $2, 1)
                         ON CONFLICT DO NOTHING RETURNING id",
                        &[&state_clean, &state_code],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?
                {
                    return Ok(row.get(0));
                }
                let row = self
                    .client
                    .query_one(
                        "SELECT id FROM jurisdictions WHERE level = 'state' AND name ILIKE $1 LIMIT 1",
                        &[&state_clean],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?;
                Ok(row.get(0))
            }
            "county" => {
                let state_id = Box::pin(self.resolve_jurisdiction_id(
                    "state",
                    &LocationContext {
                        state_name: location.state_name,
                        ..Default::default()
                    },
                ))
                .await?;
                let county_clean = location.county_name.trim();
                if let Some(row) = self
                    .client
                    .query_opt(
                        "SELECT id FROM jurisdictions WHERE level = 'county' AND name ILIKE $1 AND parent_id = $2 LIMIT 1",
                        &[&county_clean, &state_id],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?
                {
                    return Ok(row.get(0));
                }
                if let Some(row) = self
                    .client
                    .query_opt(
                        "INSERT INTO jurisdictions (name, level, parent_id) VALUES ($1, 'county', $2)
                         ON CONFLICT DO NOTHING RETURNING id",
                        &[&county_clean, &state_id],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?
                {
                    return Ok(row.get(0));
                }
                let row = self
                    .client
                    .query_one(
                        "SELECT id FROM jurisdictions WHERE level = 'county' AND name ILIKE $1 AND parent_id = $2 LIMIT 1",
                        &[&county_clean, &state_id],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?;
                Ok(row.get(0))
            }
            "city" => {
                let state_id = Box::pin(self.resolve_jurisdiction_id(
                    "state",
                    &LocationContext {
                        state_name: location.state_name,
                        ..Default::default()
                    },
                ))
                .await?;
                let county_id: Option<i64> = if !location.county_name.trim().is_empty() {
                    Box::pin(self.resolve_jurisdiction_id(
                        "county",
                        &LocationContext {
                            state_name: location.state_name,
                            county_name: location.county_name,
                            ..Default::default()
                        },
                    ))
                    .await
                    .ok()
                } else {
                    None
                };

                let city_clean = location.city_name.trim();
                if let Some(row) = self
                    .client
                    .query_opt(
                        "SELECT id FROM jurisdictions WHERE level = 'city' AND name ILIKE $1 AND parent_id = $2 LIMIT 1",
                        &[&city_clean, &state_id],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?
                {
                    let id: i64 = row.get(0);
                    if let Some(county_id) = county_id {
                        self.client
                            .execute(
                                "UPDATE jurisdictions SET county_id = $1 WHERE id = $2 AND county_id IS NULL",
                                &[&county_id, &id],
                            )
                            .await
                            .map_err(|e| CacheError::Database(e.to_string()))?;
                    }
                    return Ok(id);
                }
                if let Some(row) = self
                    .client
                    .query_opt(
                        "INSERT INTO jurisdictions (name, level, parent_id, county_id) VALUES ($1, 'city', $2, $3)
                         ON CONFLICT DO NOTHING RETURNING id",
                        &[&city_clean, &state_id, &county_id],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?
                {
                    return Ok(row.get(0));
                }
                let row = self
                    .client
                    .query_one(
                        "SELECT id FROM jurisdictions WHERE level = 'city' AND name ILIKE $1 AND parent_id = $2 LIMIT 1",
                        &[&city_clean, &state_id],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?;
                Ok(row.get(0))
            }
            other => Err(CacheError::UnknownLevel(other.to_string())),
        }
    }

    async fn link_populations(&self, program_id: &str, populations: &[String]) -> Result<()> {
        self.client
            .execute("DELETE FROM program_populations WHERE program_id = $1", &[&program_id])
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        for raw in populations {
            let Some(canonical) = canonicalize_population(raw) else {
                continue;
            };
            if let Some(row) = self
                .client
                .query_opt("SELECT id FROM target_populations WHERE name = $1", &[&canonical])
                .await
                .map_err(|e| CacheError::Database(e.to_string()))?
            {
                let population_id: i64 = row.get(0);
                self.client
                    .execute(
                        "INSERT INTO program_populations (program_id, population_id) VALUES ($1, $2)
                         ON CONFLICT DO NOTHING",
                        &[&program_id, &population_id],
                    )
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProgramCache for PostgresCache {
    async fn get_cached_programs(
        &self,
        level: &str,
        _location_key: &str,
        ttl_days: i64,
    ) -> Result<(Vec<Program>, Vec<Program>)> {
        let cutoff = Utc::now() - ChronoDuration::days(ttl_days);

        let rows = self
            .client
            .query(
                "SELECT p.id, p.name, p.name_normalized, p.agency, p.benefit_type, j.name,
                        p.max_value, p.description, p.source_url, p.confidence, j.level,
                        p.first_discovered_at, p.last_verified_at, p.discovery_count, p.miss_count,
                        COALESCE(array_agg(tp.name) FILTER (WHERE tp.name IS NOT NULL), '{}') AS target_populations
                 FROM programs p
                 JOIN jurisdictions j ON p.jurisdiction_id = j.id
                 LEFT JOIN program_populations pp ON pp.program_id = p.id
                 LEFT JOIN target_populations tp ON tp.id = pp.population_id
                 WHERE j.level = $1
                   AND NOT (p.miss_count >= 3 AND p.discovery_count <= 1)
                 GROUP BY p.id, p.name, p.name_normalized, p.agency, p.benefit_type,
                          j.name, p.max_value, p.description, p.source_url, p.confidence,
                          j.level, p.first_discovered_at, p.last_verified_at,
                          p.discovery_count, p.miss_count",
                &[&level],
            )
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        let mut fresh = Vec::new();
        let mut stale = Vec::new();
        for row in rows {
            let cache_key: String = row.get(0);
            let last_verified_at: DateTime<Utc> = row.get(12);
            let government_level: String = row.get(10);
            let program = Program {
                cache_key: cache_key.clone(),
                program_name: row.get(1),
                program_name_normalized: row.get(2),
                agency: row.get(3),
                benefit_type: row.get(4),
                jurisdiction: row.get(5),
                max_value: row.get(6),
                target_populations: row.get(15),
                description: row.get(7),
                source_url: row.get(8),
                confidence: super::Confidence::parse(row.get::<_, String>(9).as_str()),
                government_level,
                location_key: cache_key,
                first_discovered_at: row.get(11),
                last_verified_at,
                discovery_count: row.get(13),
                miss_count: row.get(14),
            };
            if program.last_verified_at >= cutoff {
                fresh.push(program);
            } else {
                stale.push(program);
            }
        }
        Ok((fresh, stale))
    }

    async fn upsert_program(
        &self,
        program: &NewProgram,
        level: &str,
        location_key: &str,
        location: &LocationContext<'_>,
    ) -> Result<String> {
        let normalized = normalize_program_name(&program.program_name);
        let cache_key = compute_program_id(&normalized, level, location_key);
        let jurisdiction_id = self.resolve_jurisdiction_id(level, location).await?;
        let now = Utc::now();

        self.client
            .execute(
                "INSERT INTO programs (id, jurisdiction_id, name, name_normalized, agency,
                    benefit_type, max_value, description, source_url, confidence,
                    status, first_discovered_at, last_verified_at, discovery_count, miss_count)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,'active',$11,$11,1,0)
                 ON CONFLICT (id) DO UPDATE SET
                    last_verified_at = EXCLUDED.last_verified_at,
                    discovery_count = programs.discovery_count + 1,
                    miss_count = 0,
                    agency = COALESCE(NULLIF(EXCLUDED.agency, ''), programs.agency),
                    benefit_type = COALESCE(NULLIF(EXCLUDED.benefit_type, ''), programs.benefit_type),
                    max_value = COALESCE(NULLIF(EXCLUDED.max_value, ''), programs.max_value),
                    description = CASE WHEN length(EXCLUDED.description) > length(programs.description)
                                       THEN EXCLUDED.description ELSE programs.description END,
                    source_url = COALESCE(NULLIF(EXCLUDED.source_url, ''), programs.source_url),
                    confidence = CASE
                        WHEN EXCLUDED.confidence = 'high' THEN 'high'
                        WHEN EXCLUDED.confidence = 'medium' AND programs.confidence != 'high' THEN 'medium'
                        ELSE programs.confidence END",
                &[
                    &cache_key,
                    &jurisdiction_id,
                    &program.program_name,
                    &normalized,
                    &program.agency,
                    &program.benefit_type,
                    &program.max_value,
                    &program.description,
                    &program.source_url,
                    &program.confidence.as_str(),
                    &now,
                ],
            )
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        if !program.target_populations.is_empty() {
            self.link_populations(&cache_key, &program.target_populations).await?;
        }

        Ok(cache_key)
    }

    async fn confirm_program(&self, cache_key: &str) -> Result<()> {
        self.client
            .execute(
                "UPDATE programs SET last_verified_at = $1, discovery_count = discovery_count + 1, miss_count = 0
                 WHERE id = $2",
                &[&Utc::now(), &cache_key],
            )
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;
        Ok(())
    }

    async fn increment_miss_count(
        &self,
        level: &str,
        _location_key: &str,
        found_keys: &HashSet<String>,
    ) -> Result<()> {
        let rows = self
            .client
            .query(
                "SELECT p.id FROM programs p JOIN jurisdictions j ON p.jurisdiction_id = j.id WHERE j.level = $1",
                &[&level],
            )
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        for row in rows {
            let id: String = row.get(0);
            if !found_keys.contains(&id) {
                self.client
                    .execute("UPDATE programs SET miss_count = miss_count + 1 WHERE id = $1", &[&id])
                    .await
                    .map_err(|e| CacheError::Database(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Postgres deployments rely on external analytics tables for search history;
    /// this backend treats search logging as a no-op rather than duplicating it.
    async fn log_search(
        &self,
        _level: &str,
        _location_key: &str,
        _queries: &[String],
        _programs_found: usize,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_stats(&self) -> Result<CacheStats> {
        let total_programs: i64 = self
            .client
            .query_one("SELECT COUNT(*) FROM programs", &[])
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?
            .get(0);

        let rows = self
            .client
            .query(
                "SELECT j.level, COUNT(*) FROM programs p JOIN jurisdictions j ON p.jurisdiction_id = j.id
                 GROUP BY j.level",
                &[],
            )
            .await
            .map_err(|e| CacheError::Database(e.to_string()))?;

        let mut by_level = HashMap::new();
        for row in rows {
            let level: String = row.get(0);
            let count: i64 = row.get(1);
            by_level.insert(level, count);
        }

        Ok(CacheStats {
            total_programs,
            by_level,
            total_searches: 0,
        })
    }
}
