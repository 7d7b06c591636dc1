//! Run configuration: the evolution parameters (JSON file) and the
//! process environment (API keys, model ids).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::error::RunError;
use crate::genotype::FitnessScores;

/// Fitness sharing parameters. `sh(d) = 1 - (d/sigma)^alpha` for d < sigma.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NichingConfig {
    pub sigma: f64,
    pub alpha: f64,
}

impl Default for NichingConfig {
    fn default() -> Self {
        Self {
            sigma: 0.5,
            alpha: 1.0,
        }
    }
}

/// Per-call backend timeouts, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub generate_secs: u64,
    pub judge_secs: u64,
    pub engage_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generate_secs: 30,
            judge_secs: 10,
            engage_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn generate(&self) -> Duration {
        Duration::from_secs(self.generate_secs)
    }

    pub fn judge(&self) -> Duration {
        Duration::from_secs(self.judge_secs)
    }

    pub fn engage(&self) -> Duration {
        Duration::from_secs(self.engage_secs)
    }
}

/// Which evaluator the engine is built with. Selected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    Backend,
    Heuristic,
}

/// Which mutation operator the engine is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutatorKind {
    Pool,
    Backend,
}

/// Evolution run parameters. Missing keys fall back to defaults; unknown
/// keys are warned and ignored; weights are renormalized on load.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub generations: usize,
    /// Absent means max(1, population_size / 4).
    pub elite_count: Option<usize>,
    pub group_size: usize,
    pub reply_rounds: usize,
    pub mutation_rate: f64,
    pub tournament_size: usize,
    pub fitness_weights: BTreeMap<String, f64>,
    pub niching: NichingConfig,
    pub topics_per_generation: usize,
    /// Keep the shuffled tail by folding it into the last group instead of
    /// dropping it.
    pub merge_remainder: bool,
    /// Ask the backend for a fresh nickname after reproduction. The
    /// pool-drawn name is always the fallback.
    pub backend_nicknames: bool,
    pub evaluator: EvaluatorKind,
    pub mutator: MutatorKind,
    /// Bound on concurrent episodes and concurrent evaluations.
    pub concurrency: usize,
    /// Seed for the run's RNG. Absent means OS entropy.
    pub rng_seed: Option<u64>,
    /// Wall-clock budget for one generation's episode fan-out. On expiry,
    /// completed groups are persisted and the run exits with the
    /// interrupted code.
    pub generation_timeout_secs: Option<u64>,
    pub timeouts: TimeoutConfig,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_json::Value>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        let mut fitness_weights = BTreeMap::new();
        fitness_weights.insert("engagement".to_string(), 0.35);
        fitness_weights.insert("conversation_quality".to_string(), 0.35);
        fitness_weights.insert("diversity".to_string(), 0.20);
        fitness_weights.insert("persona_fidelity".to_string(), 0.10);

        Self {
            population_size: 10,
            generations: 5,
            elite_count: None,
            group_size: 4,
            reply_rounds: 3,
            mutation_rate: 0.2,
            tournament_size: 3,
            fitness_weights,
            niching: NichingConfig::default(),
            topics_per_generation: 5,
            merge_remainder: false,
            backend_nicknames: true,
            evaluator: EvaluatorKind::Backend,
            mutator: MutatorKind::Pool,
            concurrency: 4,
            rng_seed: None,
            generation_timeout_secs: None,
            timeouts: TimeoutConfig::default(),
            unknown: BTreeMap::new(),
        }
    }
}

impl EvolutionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading evolution config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("parsing evolution config from {}", path.display()))?;
        Ok(config)
    }

    pub fn resolved_elite_count(&self) -> usize {
        self.elite_count
            .unwrap_or_else(|| (self.population_size / 4).max(1))
    }

    /// Warn about ignorable problems, renormalize weights, and reject
    /// configurations the engine cannot run with.
    pub fn validate_and_normalize(&mut self) -> Result<(), RunError> {
        for key in self.unknown.keys() {
            warn!(key, "ignoring unknown evolution config key");
        }
        self.unknown.clear();

        if self.population_size == 0 {
            return Err(RunError::Config("population_size must be at least 1".into()));
        }
        if self.generations == 0 {
            return Err(RunError::Config("generations must be at least 1".into()));
        }
        if self.resolved_elite_count() > self.population_size {
            return Err(RunError::Config(format!(
                "elite_count {} exceeds population_size {}",
                self.resolved_elite_count(),
                self.population_size
            )));
        }
        if self.group_size == 0 || self.group_size > self.population_size {
            return Err(RunError::Config(format!(
                "group_size {} must be in 1..={}",
                self.group_size, self.population_size
            )));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(RunError::Config("mutation_rate must be in [0,1]".into()));
        }
        if self.tournament_size == 0 {
            return Err(RunError::Config("tournament_size must be at least 1".into()));
        }
        if !(self.niching.sigma > 0.0 && self.niching.sigma <= 1.0) {
            return Err(RunError::Config("niching.sigma must be in (0,1]".into()));
        }
        if !(self.niching.alpha > 0.0) {
            return Err(RunError::Config("niching.alpha must be positive".into()));
        }
        if self.concurrency == 0 {
            return Err(RunError::Config("concurrency must be at least 1".into()));
        }

        // Drop weights that name no known dimension, then renormalize.
        let unknown_dims: Vec<String> = self
            .fitness_weights
            .keys()
            .filter(|dim| !FitnessScores::DIMENSIONS.contains(&dim.as_str()))
            .cloned()
            .collect();
        for dim in unknown_dims {
            warn!(dimension = %dim, "dropping fitness weight for unknown dimension");
            self.fitness_weights.remove(&dim);
        }
        let sum: f64 = self.fitness_weights.values().sum();
        if !(sum > 0.0 && sum.is_finite()) {
            return Err(RunError::Config(
                "fitness_weights must sum to a positive finite value".into(),
            ));
        }
        for weight in self.fitness_weights.values_mut() {
            *weight /= sum;
        }

        Ok(())
    }
}

/// Process environment: secrets and model ids. Everything else lives in the
/// JSON evolution config.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub anthropic_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
    pub agent_model: String,
    pub judge_model: String,
}

const DEFAULT_AGENT_MODEL: &str = "claude-haiku-4-5-20251001";
const DEFAULT_JUDGE_MODEL: &str = "claude-sonnet-4-20250514";

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            voyage_api_key: std::env::var("VOYAGE_API_KEY").ok(),
            agent_model: std::env::var("AVIARY_AGENT_MODEL")
                .unwrap_or_else(|_| DEFAULT_AGENT_MODEL.to_string()),
            judge_model: std::env::var("AVIARY_JUDGE_MODEL")
                .unwrap_or_else(|_| DEFAULT_JUDGE_MODEL.to_string()),
        };
        config.log_keys();
        config
    }

    fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => {
                    let n = v.len().min(5);
                    format!("{}...({} chars)", &v[..n], v.len())
                }
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_opt(&self.anthropic_api_key));
        tracing::info!("  VOYAGE_API_KEY: {}", preview_opt(&self.voyage_api_key));
        tracing::info!("  agent model: {}", self.agent_model);
        tracing::info!("  judge model: {}", self.judge_model);
    }
}
