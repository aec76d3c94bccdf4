//! Wires the discovery pipeline into a single compiled graph:
//!
//! ```text
//! router →(fan-out per level)→ {worker_federal, worker_state, worker_county, worker_city}
//!   → join → validator → classifier →(branch to both)→ {admin_notify}
//!                                                        {await_shortlist → roi_cycle → final_report → END}
//! ```
//!
//! Each worker only reads the location fields it needs off [`DiscoveryState`] and
//! returns a clone whose `programs` field holds *only* its own discoveries — the
//! engine's fan-out always clones the pre-dispatch state per branch, so nothing a
//! sibling worker wrote is visible, and [`DiscoveryState::merge`]'s append-only
//! `programs` rule does the rest. The admin-notify and await-shortlist branches
//! follow the same discipline: each clears `programs` on its way out so the merge
//! doesn't double what the join stage already settled.

use crate::cache::{Confidence, ProgramCache};
use crate::classifier::{self, ClassificationInput, ClassificationResult, KnownProgram};
use crate::config::CacheTtlDays;
use crate::extractor::LlmClient;
use crate::graph::{CompiledGraph, StateGraph, END};
use crate::identity::normalize_location;
use crate::join::{self, LeveledProgram, ValidatedProgram, ValidationError};
use crate::roi::{self, RoiCalculation, RoiQuestion, ShortlistedProgram};
use crate::router;
use crate::search::{RetryingSearchClient, SearchProvider};
use crate::state::MergeableState;
use crate::worker::{self, WorkerLocation};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const GOVERNMENT_LEVELS: &[&str] = &["federal", "state", "county", "city"];

/// Summary produced once the ROI cycle settles, independent of any HTTP surface.
#[derive(Debug, Clone, Default)]
pub struct FinalReport {
    pub programs_found: usize,
    pub shortlisted: usize,
    pub total_estimated_roi: Option<String>,
    pub summary: String,
}

/// The state threaded through every node of the graph. Per [`MergeableState`]'s
/// contract, fields a branch doesn't touch are left at their zero value so
/// merging never clobbers a sibling branch's contribution.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryState {
    pub address: String,
    pub legal_entity_type: String,
    pub industry_code: String,

    pub state_name: String,
    pub county_name: Option<String>,
    pub city_name: Option<String>,
    pub government_levels: Vec<String>,

    /// Append-only accumulator: each worker branch replaces this with only its
    /// own discoveries; [`merge`](MergeableState::merge) concatenates.
    pub programs: Vec<LeveledProgram>,

    pub validated_programs: Vec<ValidatedProgram>,
    pub validation_errors: Vec<ValidationError>,
    pub classifications: Vec<ClassificationResult>,

    pub shortlist: Vec<ShortlistedProgram>,
    pub roi_calculations: Vec<RoiCalculation>,
    pub roi_questions: Vec<RoiQuestion>,
    pub refinement_round: u32,

    pub admin_notified: bool,
    pub final_report: Option<FinalReport>,

    pub current_step: String,
    pub errors: Vec<String>,
}

impl DiscoveryState {
    pub fn new(address: impl Into<String>, legal_entity_type: impl Into<String>, industry_code: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            legal_entity_type: legal_entity_type.into(),
            industry_code: industry_code.into(),
            current_step: "started".to_string(),
            ..Default::default()
        }
    }
}

impl MergeableState for DiscoveryState {
    fn merge(&mut self, other: &Self) {
        self.programs.extend(other.programs.iter().cloned());

        if self.state_name.is_empty() {
            self.state_name = other.state_name.clone();
        }
        if self.county_name.is_none() {
            self.county_name = other.county_name.clone();
        }
        if self.city_name.is_none() {
            self.city_name = other.city_name.clone();
        }
        if self.government_levels.is_empty() {
            self.government_levels = other.government_levels.clone();
        }
        if self.validated_programs.is_empty() {
            self.validated_programs = other.validated_programs.clone();
        }
        if self.validation_errors.is_empty() {
            self.validation_errors = other.validation_errors.clone();
        }
        if self.classifications.is_empty() {
            self.classifications = other.classifications.clone();
        }
        if self.shortlist.is_empty() {
            self.shortlist = other.shortlist.clone();
        }
        if self.roi_calculations.is_empty() {
            self.roi_calculations = other.roi_calculations.clone();
        }
        if self.roi_questions.is_empty() {
            self.roi_questions = other.roi_questions.clone();
        }
        if other.refinement_round > self.refinement_round {
            self.refinement_round = other.refinement_round;
        }
        self.admin_notified = self.admin_notified || other.admin_notified;
        if self.final_report.is_none() {
            self.final_report = other.final_report.clone();
        }
        if !other.current_step.is_empty() {
            self.current_step = other.current_step.clone();
        }
        self.errors.extend(other.errors.iter().cloned());
    }
}

/// Everything the graph needs to actually reach external systems, factored out so
/// tests can substitute in-memory/static implementations.
///
/// `llm_factory` is called once per node registration (router, each worker,
/// ROI cycle) rather than sharing one client, matching the rule that workers must
/// not share a single LLM client instance and lazily construct their own.
pub struct OrchestratorDeps<P: SearchProvider + Clone + Send + Sync + 'static> {
    pub cache: Arc<dyn ProgramCache>,
    pub search_provider: P,
    pub llm_factory: Arc<dyn Fn() -> Arc<dyn LlmClient> + Send + Sync>,
    pub cache_ttl: CacheTtlDays,
    pub inter_query_delay: Duration,
    pub max_roi_refinement_rounds: u32,
    pub default_state: String,
}

fn ttl_for_level(ttl: &CacheTtlDays, level: &str) -> i64 {
    match level {
        "federal" => ttl.federal,
        "state" => ttl.state,
        "county" => ttl.county,
        "city" => ttl.city,
        _ => ttl.state,
    }
}

/// Build and compile the discovery graph described in this module's header.
pub fn build_graph<P>(deps: OrchestratorDeps<P>) -> crate::Result<CompiledGraph<DiscoveryState>>
where
    P: SearchProvider + Clone + Send + Sync + 'static,
{
    let mut graph: StateGraph<DiscoveryState> = StateGraph::new();

    let router_llm = (deps.llm_factory)();
    let default_state = deps.default_state.clone();
    graph.add_node_from_fn("router", move |mut state: DiscoveryState| {
        let llm = router_llm.clone();
        let default_state = default_state.clone();
        async move {
            let decision = router::analyze(
                llm.as_ref(),
                &state.address,
                &state.legal_entity_type,
                &state.industry_code,
                &default_state,
            )
            .await;
            state.state_name = decision.state_name;
            state.county_name = decision.county_name;
            state.city_name = decision.city_name;
            state.government_levels = decision.government_levels;
            state.current_step = "routing".to_string();
            Ok(state)
        }
    });
    graph.set_entry_point("router");

    for &level in GOVERNMENT_LEVELS {
        let cache = deps.cache.clone();
        let provider = deps.search_provider.clone();
        let llm = (deps.llm_factory)();
        let ttl_days = ttl_for_level(&deps.cache_ttl, level);
        let inter_query_delay = deps.inter_query_delay;
        let node_name = format!("worker_{level}");

        graph.add_node_from_fn(node_name, move |mut state: DiscoveryState| {
            let cache = cache.clone();
            let provider = provider.clone();
            let llm = llm.clone();
            async move {
                let search_client = RetryingSearchClient::new(provider, level.to_string());
                let location_key = normalize_location(
                    level,
                    &state.state_name,
                    state.county_name.as_deref().unwrap_or(""),
                    state.city_name.as_deref().unwrap_or(""),
                );
                let location = WorkerLocation {
                    state_name: &state.state_name,
                    county_name: state.county_name.as_deref(),
                    city_name: state.city_name.as_deref(),
                    legal_entity_type: &state.legal_entity_type,
                    industry_code: &state.industry_code,
                };
                let discovered = worker::discover(
                    cache.as_ref(),
                    level,
                    &location,
                    &location_key,
                    ttl_days,
                    &search_client,
                    llm.as_ref(),
                    inter_query_delay,
                )
                .await;
                state.programs = discovered;
                state.current_step = "discovering".to_string();
                Ok(state)
            }
        });
    }

    graph.add_conditional_fanout_edges(
        "router",
        |state: &DiscoveryState| {
            state
                .government_levels
                .iter()
                .filter(|l| GOVERNMENT_LEVELS.contains(&l.as_str()))
                .map(|l| format!("worker_{l}"))
                .collect()
        },
        "join",
    );

    graph.add_node_from_fn("join", |mut state: DiscoveryState| async move {
        let programs = std::mem::take(&mut state.programs);
        state.programs = join::join_programs(programs);
        state.current_step = "merging".to_string();
        Ok(state)
    });
    graph.add_edge("join", "validator");

    graph.add_node_from_fn("validator", |mut state: DiscoveryState| async move {
        let programs = std::mem::take(&mut state.programs);
        let (validated, errors) = join::check_errors(programs);
        state.validated_programs = validated;
        state.validation_errors = errors;
        state.current_step = "validating".to_string();
        Ok(state)
    });
    graph.add_edge("validator", "classifier");

    graph.add_node_from_fn("classifier", |mut state: DiscoveryState| async move {
        let today = chrono::Utc::now().date_naive();
        let mut known: Vec<KnownProgram> = Vec::new();
        let mut classifications = Vec::with_capacity(state.validated_programs.len());
        for vp in &state.validated_programs {
            let p = &vp.program.program;
            let input = ClassificationInput {
                program_name: &p.program_name,
                description: &p.description,
                agency: &p.agency,
                source_url: &p.source_url,
                status: "",
                notes: "",
                max_value: &p.max_value,
                program_type: &p.benefit_type,
                explicit_jurisdiction: if p.jurisdiction.is_empty() { None } else { Some(p.jurisdiction.as_str()) },
            };
            classifications.push(classifier::classify_program(&input, &known, today));
            known.push(KnownProgram {
                program_name: &p.program_name,
                agency: &p.agency,
                source_url: &p.source_url,
            });
        }
        state.classifications = classifications;
        state.current_step = "classifying".to_string();
        Ok(state)
    });
    graph.add_parallel_edges(
        "classifier",
        vec!["admin_notify".to_string(), "await_shortlist".to_string()],
    );

    graph.add_node_from_fn("admin_notify", |mut state: DiscoveryState| async move {
        let active = state
            .classifications
            .iter()
            .filter(|c| matches!(c.status_tag, crate::classifier::StatusTag::Active))
            .count();
        tracing::info!(
            total = state.classifications.len(),
            active,
            "discovery session ready for admin review"
        );
        state.programs = Vec::new();
        state.admin_notified = true;
        Ok(state)
    });

    graph.add_node_from_fn("await_shortlist", |mut state: DiscoveryState| async move {
        let shortlist = state
            .validated_programs
            .iter()
            .enumerate()
            .filter(|(i, vp)| {
                let employer_benefit =
                    state.classifications.get(*i).map(|c| c.is_employer_benefit).unwrap_or(true);
                let eligible = vp.validated
                    || matches!(vp.program.program.confidence, Confidence::High | Confidence::Medium);
                employer_benefit && eligible
            })
            .map(|(_, vp)| {
                let p = &vp.program.program;
                ShortlistedProgram {
                    // `cache_key` is the id the discovery worker already resolved this
                    // program to (a fuzzy-matched existing row, or a freshly minted
                    // one) — never recomputed from `jurisdiction`, which is a
                    // human-readable label, not the location_key an id is keyed on.
                    id: vp.program.cache_key.clone(),
                    program_name: p.program_name.clone(),
                    benefit_type: p.benefit_type.clone(),
                    max_value: p.max_value.clone(),
                    target_populations: p.target_populations.clone(),
                }
            })
            .collect();
        state.programs = Vec::new();
        state.shortlist = shortlist;
        Ok(state)
    });
    graph.add_edge("await_shortlist", "roi_cycle");

    let roi_llm = (deps.llm_factory)();
    let max_rounds = deps.max_roi_refinement_rounds;
    graph.add_node_from_fn("roi_cycle", move |mut state: DiscoveryState| {
        let llm = roi_llm.clone();
        async move {
            let no_answers: HashMap<String, String> = HashMap::new();
            let mut calculations = roi::analyze_round(llm.as_ref(), &state.shortlist, &no_answers).await;
            let mut questions = roi::generate_questions(&calculations);
            let mut round = 0u32;
            // No interactive answer channel exists in this run, so refine() never
            // completes a program early; the loop is still bounded by max_rounds.
            loop {
                let outcome = roi::refine(calculations, &no_answers, round, max_rounds);
                calculations = outcome.calculations;
                round = outcome.round_num;
                if outcome.is_complete {
                    break;
                }
                questions = roi::generate_questions(&calculations);
            }
            state.roi_calculations = calculations;
            state.roi_questions = questions;
            state.refinement_round = round;
            Ok(state)
        }
    });
    graph.add_edge("roi_cycle", "final_report");

    graph.add_node_from_fn("final_report", |mut state: DiscoveryState| async move {
        let total: f64 = state
            .roi_calculations
            .iter()
            .filter_map(|c| c.refined_total_roi.as_deref())
            .filter_map(|s| s.trim_start_matches('$').replace(',', "").parse::<f64>().ok())
            .sum();
        let any_refined = state.roi_calculations.iter().any(|c| c.refined_total_roi.is_some());
        let total_estimated_roi = any_refined.then(|| roi::format_whole_dollars(total));

        let summary = format!(
            "Found {} validated program(s), {} shortlisted, estimated total ROI {}",
            state.validated_programs.len(),
            state.shortlist.len(),
            total_estimated_roi.as_deref().unwrap_or("unknown")
        );
        state.final_report = Some(FinalReport {
            programs_found: state.validated_programs.len(),
            shortlisted: state.shortlist.len(),
            total_estimated_roi,
            summary,
        });
        state.current_step = "complete".to_string();
        Ok(state)
    });
    graph.add_edge("final_report", END);

    graph.compile()
}
