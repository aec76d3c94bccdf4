//! Crate-wide error types.
//!
//! Every externally-fallible module (cache, search, router, orchestrator) defines
//! its own `thiserror`-derived enum; each converts into [`Error`] via `#[from]` so
//! callers at the graph boundary can match a single type. Per the degrade-don't-abort
//! principle, most per-call failures are caught and logged at their origin and never
//! reach this type — only fatal session errors, rate-limit denials, and session
//! lookups surface here.

use thiserror::Error;

/// Top-level error type for the discovery pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The program cache could not be reached or initialized.
    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// The router could not produce any routing state at all (both LLM and regex
    /// fallback failed to even reach the configured default — should not normally
    /// happen since the default is infallible, but graph compilation may still fail).
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    /// The orchestration graph failed to compile or run to completion.
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// A session-scoped rate limit denied the request.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// The requested session id does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing an address into jurisdiction context.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouterError {
    /// Neither the LLM strategy nor the regex fallback could determine a state,
    /// and no configured default was available either.
    #[error("could not determine state for address {address:?} and no default configured")]
    NoStateDeterminable { address: String },
}

/// Errors raised by the orchestration graph itself (as opposed to individual nodes,
/// which degrade internally per the error-handling design).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The graph topology is invalid (e.g. an edge references an unregistered node).
    #[error("graph compilation failed: {0}")]
    GraphCompilation(String),

    /// A node reported a failure that the orchestrator has decided is fatal rather
    /// than recoverable (reserved for future use; current nodes never return this).
    #[error("node {node} failed fatally: {reason}")]
    NodeFailed { node: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = Error::RateLimited("max concurrent sessions (5) reached".to_string());
        assert_eq!(
            err.to_string(),
            "rate limit exceeded: max concurrent sessions (5) reached"
        );
    }

    #[test]
    fn session_not_found_display() {
        let err = Error::SessionNotFound("abc-123".to_string());
        assert_eq!(err.to_string(), "session not found: abc-123");
    }

    #[test]
    fn router_error_display() {
        let err = RouterError::NoStateDeterminable {
            address: "???".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "could not determine state for address \"???\" and no default configured"
        );
    }

    #[test]
    fn orchestrator_error_display() {
        let err = OrchestratorError::GraphCompilation("missing entry point".to_string());
        assert_eq!(
            err.to_string(),
            "graph compilation failed: missing entry point"
        );
        let err = OrchestratorError::NodeFailed {
            node: "join".to_string(),
            reason: "panic".to_string(),
        };
        assert_eq!(err.to_string(), "node join failed fatally: panic");
    }

    #[test]
    fn router_error_converts_into_crate_error() {
        let err: Error = RouterError::NoStateDeterminable {
            address: "x".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Router(_)));
    }
}
