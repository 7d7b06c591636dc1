//! Append-only generation statistics log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use aviary_core::{FitnessScores, Individual};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;

/// Per-agent slice of a generation record.
#[derive(Debug, Serialize)]
pub struct AgentStats {
    pub name: String,
    #[serde(flatten)]
    pub scores: FitnessScores,
    pub raw_fitness: f64,
    pub shared_fitness: f64,
    pub degraded: bool,
}

/// One line of `generation_stats.jsonl`.
#[derive(Debug, Serialize)]
pub struct GenerationStats {
    pub timestamp: DateTime<Utc>,
    pub generation: usize,
    pub population_size: usize,
    pub population_diversity: f64,
    pub fitness_mean: f64,
    pub fitness_max: f64,
    pub fitness_min: f64,
    /// Backend calls that fell back this generation (placeholders, judge
    /// fallbacks, skipped engage decisions).
    pub degraded_calls: u32,
    pub agents: Vec<AgentStats>,
}

impl GenerationStats {
    pub fn from_population(
        generation: usize,
        population: &[Individual],
        population_diversity: f64,
        degraded_calls: u32,
    ) -> Self {
        let fitness: Vec<f64> = population.iter().map(|i| i.raw_fitness).collect();
        let n = fitness.len().max(1) as f64;
        let fitness_mean = fitness.iter().sum::<f64>() / n;
        let fitness_max = fitness.iter().copied().fold(0.0f64, f64::max);
        let fitness_min = fitness
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .min(fitness_max);

        let agents = population
            .iter()
            .map(|individual| AgentStats {
                name: individual.name().to_string(),
                scores: individual.scores.clone(),
                raw_fitness: individual.raw_fitness,
                shared_fitness: individual.shared_fitness,
                degraded: individual.degraded,
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            generation,
            population_size: population.len(),
            population_diversity,
            fitness_mean,
            fitness_max,
            fitness_min,
            degraded_calls,
            agents,
        }
    }
}

/// Append one record as a single JSON line, under an advisory exclusive
/// lock so concurrent observers read whole lines.
pub fn append_stats(path: &Path, record: &GenerationStats) -> Result<()> {
    let line = serde_json::to_string(record)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening stats log {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("locking stats log {}", path.display()))?;
    let result = writeln!(&file, "{line}").context("appending stats record");
    let _ = FileExt::unlock(&file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use aviary_core::Genotype;
    use tempfile::tempdir;

    fn individual(name: &str, raw: f64) -> Individual {
        let mut individual = Individual::new(Genotype::new(name));
        individual.raw_fitness = raw;
        individual.shared_fitness = raw / 2.0;
        individual
    }

    #[test]
    fn records_append_as_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("generation_stats.jsonl");

        let population = vec![individual("Aria", 0.8), individual("Bram", 0.4)];
        for generation in 0..2 {
            let record = GenerationStats::from_population(generation, &population, 0.3, 1);
            append_stats(&path, &record).unwrap();
        }

        let data = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["generation"], 1);
        assert_eq!(parsed["population_size"], 2);
        assert!((parsed["fitness_mean"].as_f64().unwrap() - 0.6).abs() < 1e-9);
        assert!((parsed["fitness_max"].as_f64().unwrap() - 0.8).abs() < 1e-9);
        assert!((parsed["fitness_min"].as_f64().unwrap() - 0.4).abs() < 1e-9);
        // Flattened scores sit beside the fitness fields.
        assert!(parsed["agents"][0]["safety"].as_f64().is_some());
        assert!(parsed["agents"][0]["shared_fitness"].as_f64().is_some());
        assert!(parsed["timestamp"].as_str().is_some());
    }

    #[test]
    fn empty_population_does_not_divide_by_zero() {
        let record = GenerationStats::from_population(0, &[], 0.0, 0);
        assert_eq!(record.fitness_mean, 0.0);
        assert_eq!(record.fitness_min, 0.0);
    }
}
