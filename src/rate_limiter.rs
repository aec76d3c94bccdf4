//! Global safety ceilings on session/search/LLM volume.
//!
//! This is not per-user throttling — discovery runs as an internal tool — just a
//! process-wide guard so a runaway loop or misbehaving client can't burn through
//! the search/LLM budget in one afternoon. All state lives behind a single mutex;
//! the counters are small and held only briefly, so lock contention isn't a concern
//! at the concurrency levels this tool runs at.

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct SessionCounters {
    search_calls: u32,
    llm_calls: u32,
}

struct Inner {
    active_sessions: HashSet<String>,
    daily_sessions: u32,
    daily_date: NaiveDate,
    session_counters: HashMap<String, SessionCounters>,
}

/// Why a rate-limit check failed, suitable for surfacing directly to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDenial(pub String);

impl std::fmt::Display for RateLimitDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub active_sessions: usize,
    pub daily_sessions: u32,
    pub max_concurrent: usize,
    pub max_daily: usize,
    pub max_search_per_session: usize,
    pub max_llm_per_session: usize,
}

pub struct RateLimiter {
    inner: Mutex<Inner>,
    max_concurrent_sessions: usize,
    max_sessions_per_day: usize,
    max_search_calls_per_session: usize,
    max_llm_calls_per_session: usize,
}

impl RateLimiter {
    pub fn new(
        max_concurrent_sessions: usize,
        max_sessions_per_day: usize,
        max_search_calls_per_session: usize,
        max_llm_calls_per_session: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                active_sessions: HashSet::new(),
                daily_sessions: 0,
                daily_date: Local::now().date_naive(),
                session_counters: HashMap::new(),
            }),
            max_concurrent_sessions,
            max_sessions_per_day,
            max_search_calls_per_session,
            max_llm_calls_per_session,
        }
    }

    pub fn from_config(limits: &crate::config::RateLimits) -> Self {
        Self::new(
            limits.max_concurrent_sessions,
            limits.max_sessions_per_day,
            limits.max_search_calls_per_session,
            limits.max_llm_calls_per_session,
        )
    }

    fn reset_daily_if_needed(inner: &mut Inner) {
        let today = Local::now().date_naive();
        if today != inner.daily_date {
            inner.daily_date = today;
            inner.daily_sessions = 0;
        }
    }

    /// Check whether a new session may start, without registering it.
    pub fn can_start_session(&self) -> Result<(), RateLimitDenial> {
        let mut inner = self.inner.lock();
        Self::reset_daily_if_needed(&mut inner);

        if inner.active_sessions.len() >= self.max_concurrent_sessions {
            return Err(RateLimitDenial(format!(
                "max concurrent sessions ({}) reached. try again later.",
                self.max_concurrent_sessions
            )));
        }
        if inner.daily_sessions as usize >= self.max_sessions_per_day {
            return Err(RateLimitDenial(format!(
                "daily session limit ({}) reached. resets at midnight.",
                self.max_sessions_per_day
            )));
        }
        Ok(())
    }

    pub fn start_session(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        Self::reset_daily_if_needed(&mut inner);
        inner.active_sessions.insert(session_id.to_string());
        inner.daily_sessions += 1;
        inner.session_counters.insert(session_id.to_string(), SessionCounters::default());
    }

    pub fn end_session(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        inner.active_sessions.remove(session_id);
        inner.session_counters.remove(session_id);
    }

    pub fn check_search(&self, session_id: &str) -> Result<(), RateLimitDenial> {
        let inner = self.inner.lock();
        let Some(counters) = inner.session_counters.get(session_id) else {
            return Ok(());
        };
        if counters.search_calls >= self.max_search_calls_per_session as u32 {
            return Err(RateLimitDenial(format!(
                "search query limit ({}) reached for this session.",
                self.max_search_calls_per_session
            )));
        }
        Ok(())
    }

    pub fn increment_search(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(counters) = inner.session_counters.get_mut(session_id) {
            counters.search_calls += 1;
        }
    }

    pub fn check_llm(&self, session_id: &str) -> Result<(), RateLimitDenial> {
        let inner = self.inner.lock();
        let Some(counters) = inner.session_counters.get(session_id) else {
            return Ok(());
        };
        if counters.llm_calls >= self.max_llm_calls_per_session as u32 {
            return Err(RateLimitDenial(format!(
                "LLM call limit ({}) reached for this session.",
                self.max_llm_calls_per_session
            )));
        }
        Ok(())
    }

    pub fn increment_llm(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(counters) = inner.session_counters.get_mut(session_id) {
            counters.llm_calls += 1;
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let mut inner = self.inner.lock();
        Self::reset_daily_if_needed(&mut inner);
        RateLimiterStats {
            active_sessions: inner.active_sessions.len(),
            daily_sessions: inner.daily_sessions,
            max_concurrent: self.max_concurrent_sessions,
            max_daily: self.max_sessions_per_day,
            max_search_per_session: self.max_search_calls_per_session,
            max_llm_per_session: self.max_llm_calls_per_session,
        }
    }
}
