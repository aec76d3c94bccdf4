//! In-memory tracking of discovery sessions.
//!
//! A session is created before the orchestrator graph runs and updated as
//! [`crate::graph::GraphEvent`]s arrive off [`crate::graph::CompiledGraph::stream`],
//! so a caller polling `GET /incentives/{id}/status` sees live progress without
//! having to wait for the whole graph to finish. Storage is a single process-wide
//! [`DashMap`] — moving this behind a shared store is a multi-process concern this
//! crate does not need to solve.

use crate::graph::GraphEvent;
use crate::orchestrator::DiscoveryState;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Coarse lifecycle phase, surfaced at the HTTP boundary as `status`.
///
/// `Completed` and `Complete` are deliberately distinct: `Completed` marks the
/// point right after classification, before the user has seen a shortlist or
/// answered any ROI questions; `Complete` marks the final report, after the
/// ROI cycle has actually run. Collapsing them loses the ability to tell "the
/// data is ready" apart from "the whole session is done."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Started,
    Routing,
    Discovering,
    Searching,
    Merging,
    Validating,
    Completed,
    RoiCycle,
    Complete,
    Failed,
}

impl SessionStatus {
    /// Status implied purely by a node's *name*, independent of which of its
    /// siblings have finished. `worker_*` nodes are handled separately in
    /// [`Session::apply_event`] since their status depends on the other
    /// fan-out branches, not just this one completing.
    fn from_node(node: &str) -> Option<Self> {
        match node {
            "router" => Some(Self::Discovering),
            "join" => Some(Self::Merging),
            "validator" => Some(Self::Validating),
            "classifier" => Some(Self::Completed),
            "roi_cycle" => Some(Self::RoiCycle),
            "final_report" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Per-government-level worker progress, keyed by level name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerProgress {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: u64,
    pub address: String,
    pub legal_entity_type: String,
    pub industry_code: String,
    pub status: SessionStatus,
    pub current_step: String,
    pub search_progress: std::collections::HashMap<String, WorkerProgress>,
    pub programs_found: usize,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub state: Option<DiscoveryState>,
}

impl Session {
    fn new(session_id: String, address: String, legal_entity_type: String, industry_code: String) -> Self {
        Self {
            session_id,
            created_at: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
            address,
            legal_entity_type,
            industry_code,
            status: SessionStatus::Started,
            current_step: "started".to_string(),
            search_progress: std::collections::HashMap::new(),
            programs_found: 0,
            errors: Vec::new(),
            state: None,
        }
    }

    fn apply_event(&mut self, event: &GraphEvent<DiscoveryState>) {
        match event {
            GraphEvent::NodeStart { node } => {
                if node == "router" {
                    self.status = SessionStatus::Routing;
                } else if let Some(level) = node.strip_prefix("worker_") {
                    self.search_progress.insert(level.to_string(), WorkerProgress::Running);
                }
            }
            GraphEvent::NodeDone { node, state } => {
                if let Some(level) = node.strip_prefix("worker_") {
                    self.search_progress.insert(level.to_string(), WorkerProgress::Completed);
                    // A worker finishing doesn't mean the fan-in is ready: only once
                    // every government level this session is searching has reported
                    // in does the status advance past "searching" to "merging".
                    let all_done = state
                        .government_levels
                        .iter()
                        .all(|lvl| matches!(self.search_progress.get(lvl.as_str()), Some(WorkerProgress::Completed)));
                    self.status = if all_done { SessionStatus::Merging } else { SessionStatus::Searching };
                } else if let Some(status) = SessionStatus::from_node(node) {
                    self.status = status;
                }
                self.current_step = state.current_step.clone();
                self.programs_found = state.validated_programs.len();
                self.errors = state.errors.clone();
                self.state = Some(state.clone());
            }
            GraphEvent::Done { state, .. } => {
                self.status = SessionStatus::Complete;
                self.current_step = state.current_step.clone();
                self.programs_found = state.validated_programs.len();
                self.errors = state.errors.clone();
                self.state = Some(state.clone());
            }
            GraphEvent::ParallelStart { .. } | GraphEvent::ParallelEnd { .. } => {}
        }
    }

    fn mark_failed(&mut self, message: String) {
        self.status = SessionStatus::Failed;
        self.errors.push(message);
    }
}

/// Process-wide session registry. Cheap to clone; internally an `Arc<DashMap<_>>`.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { sessions: Arc::new(DashMap::new()) }
    }

    /// Register a new session with a freshly generated id and return it.
    pub fn create(&self, address: impl Into<String>, legal_entity_type: impl Into<String>, industry_code: impl Into<String>) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(session_id.clone(), address.into(), legal_entity_type.into(), industry_code.into());
        self.sessions.insert(session_id.clone(), session);
        session_id
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Fold one graph event into the session's tracked state.
    pub fn record_event(&self, session_id: &str, event: &GraphEvent<DiscoveryState>) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.apply_event(event);
        }
    }

    pub fn record_failure(&self, session_id: &str, message: impl Into<String>) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.mark_failed(message.into());
        }
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::DiscoveryState;

    #[test]
    fn create_registers_session_with_started_status() {
        let store = SessionStore::new();
        let id = store.create("123 Main St", "LLC", "54");
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Started);
        assert_eq!(session.address, "123 Main St");
    }

    #[test]
    fn node_start_marks_worker_running_and_node_done_marks_completed() {
        let store = SessionStore::new();
        let id = store.create("addr", "LLC", "54");

        store.record_event(&id, &GraphEvent::NodeStart { node: "worker_state".to_string() });
        let session = store.get(&id).unwrap();
        assert_eq!(session.search_progress.get("state"), Some(&WorkerProgress::Running));

        let mut state = DiscoveryState::new("addr", "LLC", "54");
        state.current_step = "discovering".to_string();
        store.record_event(&id, &GraphEvent::NodeDone { node: "worker_state".to_string(), state });
        let session = store.get(&id).unwrap();
        assert_eq!(session.search_progress.get("state"), Some(&WorkerProgress::Completed));
        assert_eq!(session.current_step, "discovering");
    }

    #[test]
    fn router_node_start_marks_routing() {
        let store = SessionStore::new();
        let id = store.create("addr", "LLC", "54");
        store.record_event(&id, &GraphEvent::NodeStart { node: "router".to_string() });
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Routing);
    }

    #[test]
    fn worker_done_is_searching_until_every_level_reports_in_then_merging() {
        let store = SessionStore::new();
        let id = store.create("addr", "LLC", "54");

        let mut state = DiscoveryState::new("addr", "LLC", "54");
        state.government_levels = vec!["federal".to_string(), "state".to_string()];

        store.record_event(&id, &GraphEvent::NodeDone { node: "worker_federal".to_string(), state: state.clone() });
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Searching);

        store.record_event(&id, &GraphEvent::NodeDone { node: "worker_state".to_string(), state });
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Merging);
    }

    #[test]
    fn classifier_done_marks_completed_distinct_from_final_complete() {
        let store = SessionStore::new();
        let id = store.create("addr", "LLC", "54");
        let state = DiscoveryState::new("addr", "LLC", "54");
        store.record_event(&id, &GraphEvent::NodeDone { node: "classifier".to_string(), state });
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_ne!(session.status, SessionStatus::Complete);
    }

    #[test]
    fn done_event_marks_complete_and_records_program_count() {
        let store = SessionStore::new();
        let id = store.create("addr", "LLC", "54");
        let mut state = DiscoveryState::new("addr", "LLC", "54");
        state.current_step = "complete".to_string();
        store.record_event(&id, &GraphEvent::Done { state, execution_path: vec![] });
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Complete);
    }

    #[test]
    fn record_failure_appends_error_and_marks_failed() {
        let store = SessionStore::new();
        let id = store.create("addr", "LLC", "54");
        store.record_failure(&id, "graph execution failed: node join failed");
        let session = store.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.errors.len(), 1);
    }

    #[test]
    fn remove_drops_session_from_store() {
        let store = SessionStore::new();
        let id = store.create("addr", "LLC", "54");
        assert_eq!(store.active_count(), 1);
        store.remove(&id);
        assert_eq!(store.active_count(), 0);
        assert!(store.get(&id).is_none());
    }
}
