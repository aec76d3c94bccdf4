//! Standalone CLI demonstration: run one discovery session end-to-end for a
//! single address, printing streaming progress events as the graph executes.
//!
//! This is the crate's only runnable entry point — there is no HTTP façade in
//! scope. `--demo` swaps in static providers so the whole graph (router
//! through final report) can be exercised without network credentials.

use async_trait::async_trait;
use clap::Parser;
use incentive_finder::cache::postgres::PostgresCache;
use incentive_finder::cache::sqlite::SqliteCache;
use incentive_finder::cache::ProgramCache;
use incentive_finder::config::{CacheBackendConfig, Settings};
use incentive_finder::extractor::{AnthropicClient, LlmClient};
use incentive_finder::graph::GraphEvent;
use incentive_finder::orchestrator::{self, DiscoveryState, OrchestratorDeps};
use incentive_finder::rate_limiter::RateLimiter;
use incentive_finder::search::{SearchProvider, SearchResult, TavilySearchProvider};
use incentive_finder::session::SessionStore;
use std::error::Error;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "discover", about = "Run one hiring-incentive discovery session")]
struct Args {
    /// Business street address, e.g. "123 Main St, Chicago, IL 60601"
    address: String,

    #[arg(long, default_value = "LLC")]
    legal_entity_type: String,

    #[arg(long, default_value = "54")]
    industry_code: String,

    /// Run against static providers instead of real search/LLM backends.
    #[arg(long)]
    demo: bool,
}

/// Always returns no results; federal seeding in `worker::discover` still
/// produces the well-known programs without any network access.
#[derive(Clone)]
struct DemoSearchProvider;

#[async_trait]
impl SearchProvider for DemoSearchProvider {
    async fn search_once(&self, _query: &str) -> incentive_finder::search::Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}

struct DemoLlmClient;

#[async_trait]
impl LlmClient for DemoLlmClient {
    async fn complete(&self, _system: &str, _user: &str) -> incentive_finder::extractor::Result<String> {
        Ok("[]".to_string())
    }
}

/// Either concrete [`SearchProvider`] this binary can wire up. Lets
/// [`OrchestratorDeps`] stay generic over a single concrete type regardless of
/// `--demo`, instead of duplicating the graph-building call per mode.
#[derive(Clone)]
enum AnySearchProvider {
    Tavily(TavilySearchProvider),
    Demo(DemoSearchProvider),
}

#[async_trait]
impl SearchProvider for AnySearchProvider {
    async fn search_once(&self, query: &str) -> incentive_finder::search::Result<Vec<SearchResult>> {
        match self {
            AnySearchProvider::Tavily(p) => p.search_once(query).await,
            AnySearchProvider::Demo(p) => p.search_once(query).await,
        }
    }
}

async fn build_cache(settings: &Settings) -> Result<Arc<dyn ProgramCache>, Box<dyn Error>> {
    match &settings.cache_backend {
        CacheBackendConfig::Sqlite { path } => {
            let cache = SqliteCache::new(path.clone()).await?;
            Ok(Arc::new(cache))
        }
        CacheBackendConfig::Postgres { connection_string } => {
            let cache = PostgresCache::connect(&connection_string.resolve()?).await?;
            Ok(Arc::new(cache))
        }
    }
}

fn print_event(event: &GraphEvent<DiscoveryState>) {
    match event {
        GraphEvent::NodeStart { node } => println!("→ {node}"),
        GraphEvent::NodeDone { node, state } => println!("✓ {node} (step: {})", state.current_step),
        GraphEvent::ParallelStart { nodes } => println!("⇉ parallel start: {}", nodes.join(", ")),
        GraphEvent::ParallelEnd { nodes } => println!("⇇ parallel end: {}", nodes.join(", ")),
        GraphEvent::Done { state, execution_path } => {
            println!("✔ done (path: {})", execution_path.join(" -> "));
            if let Some(report) = &state.final_report {
                println!(
                    "\n{} program(s) found, {} shortlisted, estimated ROI: {}\n{}",
                    report.programs_found,
                    report.shortlisted,
                    report.total_estimated_roi.as_deref().unwrap_or("unknown"),
                    report.summary
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.demo {
        std::env::set_var("DEMO_MODE", "true");
    }
    let settings = Settings::from_env()?;

    let cache = build_cache(&settings).await?;
    let rate_limiter = RateLimiter::from_config(&settings.rate_limits);
    let sessions = SessionStore::new();

    rate_limiter
        .can_start_session()
        .map_err(|e| e.0)?;
    let session_id = sessions.create(args.address.as_str(), args.legal_entity_type.as_str(), args.industry_code.as_str());
    rate_limiter.start_session(&session_id);

    let search_provider = if args.demo {
        AnySearchProvider::Demo(DemoSearchProvider)
    } else {
        AnySearchProvider::Tavily(TavilySearchProvider::new(settings.search_api_key.resolve()?))
    };

    let demo = args.demo;
    let anthropic_key = settings.anthropic_api_key.clone();
    let claude_model = settings.claude_model.clone();
    let llm_factory: Arc<dyn Fn() -> Arc<dyn LlmClient> + Send + Sync> = if demo {
        Arc::new(|| Arc::new(DemoLlmClient) as Arc<dyn LlmClient>)
    } else {
        Arc::new(move || {
            let key = anthropic_key.resolve().unwrap_or_default();
            Arc::new(AnthropicClient::new(key, claude_model.clone())) as Arc<dyn LlmClient>
        })
    };

    let deps = OrchestratorDeps {
        cache,
        search_provider,
        llm_factory,
        cache_ttl: settings.cache_ttl,
        inter_query_delay: settings.inter_query_delay,
        max_roi_refinement_rounds: settings.max_roi_refinement_rounds,
        default_state: settings.default_state.clone(),
    };
    let graph = orchestrator::build_graph(deps)?;

    let initial = DiscoveryState::new(args.address.as_str(), args.legal_entity_type.as_str(), args.industry_code.as_str());
    let mut receiver = graph.stream(initial);
    while let Some(event) = receiver.recv().await {
        sessions.record_event(&session_id, &event);
        print_event(&event);
    }

    rate_limiter.end_session(&session_id);
    Ok(())
}
