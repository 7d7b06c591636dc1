//! On-disk run state: per-generation population and transcript files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aviary_core::{Genotype, TranscriptEvent};
use tracing::debug;

/// Owns a run directory. Each generation writes two files:
/// `gen_<N>.json` (the population's genotypes) and
/// `transcripts_gen_<N>.json` (one transcript per group episode).
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating run directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generation_path(&self, generation: usize) -> PathBuf {
        self.dir.join(format!("gen_{generation}.json"))
    }

    pub fn transcripts_path(&self, generation: usize) -> PathBuf {
        self.dir.join(format!("transcripts_gen_{generation}.json"))
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join("generation_stats.jsonl")
    }

    pub fn save_generation(&self, generation: usize, population: &[Genotype]) -> Result<()> {
        let json = serde_json::to_string_pretty(population)?;
        std::fs::write(self.generation_path(generation), json)
            .with_context(|| format!("writing generation {generation}"))?;
        debug!(generation, personas = population.len(), "saved generation");
        Ok(())
    }

    pub fn load_generation(&self, generation: usize) -> Result<Vec<Genotype>> {
        let path = self.generation_path(generation);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let population = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(population)
    }

    pub fn save_transcripts(
        &self,
        generation: usize,
        transcripts: &[Vec<TranscriptEvent>],
    ) -> Result<()> {
        let json = serde_json::to_string_pretty(transcripts)?;
        std::fs::write(self.transcripts_path(generation), json)
            .with_context(|| format!("writing transcripts for generation {generation}"))?;
        debug!(generation, groups = transcripts.len(), "saved transcripts");
        Ok(())
    }

    pub fn load_transcripts(&self, generation: usize) -> Result<Vec<Vec<TranscriptEvent>>> {
        let path = self.transcripts_path(generation);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let transcripts = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(transcripts)
    }

    /// Sorted generation ids that have a population file on disk.
    pub fn list_generations(&self) -> Vec<usize> {
        let mut generations = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return generations;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix("gen_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|id| id.parse::<usize>().ok())
            {
                generations.push(id);
            }
        }
        generations.sort_unstable();
        generations
    }

    /// The resume key: the largest K such that generations 0..=K are all
    /// present. Holes truncate the prefix, so a deleted middle generation
    /// is rebuilt rather than skipped.
    pub fn last_contiguous_generation(&self) -> Option<usize> {
        let generations = self.list_generations();
        let mut last = None;
        for (expected, &actual) in generations.iter().enumerate() {
            if actual != expected {
                break;
            }
            last = Some(actual);
        }
        last
    }
}
