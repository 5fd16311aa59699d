//! Configuration for the memory engine
//!
//! Sensible defaults from `constants`, overridable in production through
//! `ENGRAM_*` environment variables.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::constants::{
    CONFIDENCE_DECAY_RATE, DEFAULT_SEARCH_TIMEOUT_MS, INSIGHT_TTL_SECS, USAGE_TTL_SECS,
};
use crate::ranking::RankingWeights;

/// Engine-wide tunables, grouped per component
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Composite ranking factor weights
    pub ranking: RankingWeights,

    /// Per-day exponential confidence decay rate
    pub confidence_decay_rate: f64,

    /// TTL for cached insights
    pub insight_ttl: Duration,

    /// TTL for per-entity usage counters
    pub usage_ttl: Duration,

    /// Deadline for `search_with_timeout`
    pub search_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ranking: RankingWeights::default(),
            confidence_decay_rate: CONFIDENCE_DECAY_RATE,
            insight_ttl: Duration::from_secs(INSIGHT_TTL_SECS),
            usage_ttl: Duration::from_secs(USAGE_TTL_SECS),
            search_timeout: Duration::from_millis(DEFAULT_SEARCH_TIMEOUT_MS),
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults
    ///
    /// - `ENGRAM_DECAY_RATE` - per-day confidence decay rate (float)
    /// - `ENGRAM_INSIGHT_TTL_SECS` - insight cache TTL
    /// - `ENGRAM_USAGE_TTL_SECS` - usage counter TTL
    /// - `ENGRAM_SEARCH_TIMEOUT_MS` - ranking search deadline
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(rate) = parse_env::<f64>("ENGRAM_DECAY_RATE") {
            if rate > 0.0 {
                config.confidence_decay_rate = rate;
            } else {
                warn!("ENGRAM_DECAY_RATE must be positive, keeping default");
            }
        }
        if let Some(secs) = parse_env::<u64>("ENGRAM_INSIGHT_TTL_SECS") {
            config.insight_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("ENGRAM_USAGE_TTL_SECS") {
            config.usage_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_env::<u64>("ENGRAM_SEARCH_TIMEOUT_MS") {
            config.search_timeout = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = env::var(var).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable {var}={raw}");
            None
        }
    }
}
