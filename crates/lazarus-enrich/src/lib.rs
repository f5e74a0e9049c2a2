//! Threat-intel enrichment for kill events
//!
//! The enricher contract is deliberately forgiving: implementations must be
//! safe to call concurrently and must swallow timeouts and upstream errors
//! into the "unknown" default result. The dispatcher trusts this and adds
//! no timeout of its own.

use async_trait::async_trait;
use std::sync::Arc;

use lazarus_common::config::EnricherConfig;
use lazarus_common::{EnrichmentResult, Error, KillEvent, Result};

mod http;

pub use http::HttpEnricher;

/// Enrichment contract
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Look up threat context for a kill event. Never fails: degraded
    /// lookups return [`EnrichmentResult::default`].
    async fn enrich(&self, event: &KillEvent) -> EnrichmentResult;

    /// Whether the upstream source is reachable.
    async fn health_check(&self) -> bool;
}

/// Degenerate enricher returning the defaults. Selected when no threat
/// intel source is configured.
#[derive(Debug, Default)]
pub struct NoopEnricher;

impl NoopEnricher {
    pub fn new() -> Self {
        NoopEnricher
    }
}

#[async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, _event: &KillEvent) -> EnrichmentResult {
        EnrichmentResult::default()
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Create an enricher from configuration.
pub fn create_enricher(config: &EnricherConfig) -> Result<Arc<dyn Enricher>> {
    match config.backend.as_str() {
        "noop" => Ok(Arc::new(NoopEnricher::new())),
        "http" => Ok(Arc::new(HttpEnricher::new(config)?)),
        other => Err(Error::Configuration(format!(
            "unknown enricher backend: {}",
            other
        ))),
    }
}
