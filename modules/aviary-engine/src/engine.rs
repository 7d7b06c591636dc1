//! The evolutionary controller: generation loop, group assembly, evaluation
//! fan-out, fitness sharing, selection, and reproduction.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use aviary_core::{
    EvolutionConfig, FitnessScores, Genotype, Individual, MutationPools, RunError, TranscriptEvent,
};
use aviary_sim::{
    generate_with_retry, prompt, run_episode, GenerateOptions, SimulationAgent, TextBackend,
    TextEmbedder,
};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::diversity;
use crate::evaluator::{Evaluation, Evaluator};
use crate::operators::{crossover, Mutator};
use crate::stats::{append_stats, GenerationStats};
use crate::store::RunStore;
use crate::topics::generate_topics;

/// The engine's external capabilities, chosen once at construction.
pub struct EngineDeps {
    pub backend: Arc<dyn TextBackend>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub evaluator: Arc<dyn Evaluator>,
    pub mutator: Arc<dyn Mutator>,
}

/// Weighted aggregate of an individual's scores. Weights are normalized at
/// config load, so the result stays in [0,1].
pub fn raw_fitness(weights: &BTreeMap<String, f64>, scores: &FitnessScores) -> f64 {
    let total: f64 = weights
        .iter()
        .map(|(dimension, weight)| weight * scores.get(dimension).unwrap_or(0.0))
        .sum();
    total.clamp(0.0, 1.0)
}

/// Fitness sharing: divide each raw fitness by its niche count
/// `n_i = Σ_j sh(d(i,j))` with `sh(d) = 1 - (d/sigma)^alpha` for d < sigma.
/// `d(i,i) = 0` contributes 1, so the niche count never drops below one.
pub fn apply_fitness_sharing(population: &mut [Individual], sigma: f64, alpha: f64) {
    let n = population.len();
    let mut distances = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = diversity::genotype_distance(&population[i].genotype, &population[j].genotype);
            distances[i][j] = d;
            distances[j][i] = d;
        }
    }
    for i in 0..n {
        let mut niche_count = 0.0;
        for row in distances[i].iter().take(n) {
            if *row < sigma {
                niche_count += 1.0 - (row / sigma).powf(alpha);
            }
        }
        population[i].shared_fitness = population[i].raw_fitness / niche_count.max(1.0);
    }
}

/// Partition shuffled indices into groups of exactly `group_size`. The tail
/// remainder is dropped, or folded into the last group when `merge` is set.
fn partition_into_groups(indices: Vec<usize>, group_size: usize, merge: bool) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = indices
        .chunks(group_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    if let Some(last) = groups.last() {
        if last.len() < group_size && groups.len() > 1 {
            let tail = groups.pop().unwrap_or_default();
            if merge {
                if let Some(target) = groups.last_mut() {
                    target.extend(tail);
                }
            } else {
                debug!(dropped = tail.len(), "dropping group remainder this generation");
            }
        }
    }
    groups
}

pub struct EvolutionEngine {
    config: EvolutionConfig,
    pools: Arc<MutationPools>,
    deps: EngineDeps,
    store: RunStore,
    rng: StdRng,
    population: Vec<Individual>,
}

impl EvolutionEngine {
    pub fn new(
        config: EvolutionConfig,
        pools: Arc<MutationPools>,
        deps: EngineDeps,
        store: RunStore,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            pools,
            deps,
            store,
            rng,
            population: Vec::new(),
        }
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    /// Run the full evolution. On resume, the last contiguous persisted
    /// generation becomes the starting population and the loop continues at
    /// the next index; completed generations are never rewritten.
    pub async fn run(&mut self, seeds: Vec<Genotype>) -> Result<(), RunError> {
        let start = match self.store.last_contiguous_generation() {
            Some(last) if last + 1 >= self.config.generations => {
                info!(last, "run already complete, nothing to resume");
                return Ok(());
            }
            Some(last) => {
                info!(last, "resuming from last persisted generation");
                let genotypes = self
                    .store
                    .load_generation(last)
                    .map_err(RunError::Store)?;
                self.adopt_population(genotypes)?;
                last + 1
            }
            None => {
                self.initialize_population(seeds).await?;
                0
            }
        };

        for generation in start..self.config.generations {
            self.run_generation(generation).await?;
            if generation + 1 < self.config.generations {
                self.population = self.reproduce().await;
            }
        }

        info!(generations = self.config.generations, "evolution complete");
        Ok(())
    }

    /// Seed the initial population: truncate an oversized seed list, or
    /// fill remaining slots by mutating uniformly chosen seeds.
    async fn initialize_population(&mut self, seeds: Vec<Genotype>) -> Result<(), RunError> {
        if seeds.is_empty() {
            return Err(RunError::Config("no seed personas provided".into()));
        }
        let mut names = BTreeSet::new();
        for seed in &seeds {
            if !names.insert(seed.name.clone()) {
                return Err(RunError::Config(format!(
                    "duplicate seed persona name '{}'",
                    seed.name
                )));
            }
        }

        let mut population: Vec<Individual> = seeds
            .iter()
            .take(self.config.population_size)
            .cloned()
            .map(Individual::new)
            .collect();
        let mut used: BTreeSet<String> =
            population.iter().map(|i| i.name().to_string()).collect();

        while population.len() < self.config.population_size {
            let parent = seeds
                .choose(&mut self.rng)
                .cloned()
                .unwrap_or_else(|| seeds[0].clone());
            let mut mutant = self.deps.mutator.mutate(&parent, &mut self.rng).await;
            let name = self.draw_unique_name(&used, &mutant.name);
            mutant.name = name.clone();
            used.insert(name);
            population.push(Individual::new(mutant));
        }

        info!(individuals = population.len(), "population initialized");
        self.population = population;
        Ok(())
    }

    fn adopt_population(&mut self, genotypes: Vec<Genotype>) -> Result<(), RunError> {
        if genotypes.is_empty() {
            return Err(RunError::Config("persisted generation is empty".into()));
        }
        let names: BTreeSet<&str> = genotypes.iter().map(|g| g.name.as_str()).collect();
        if names.len() != genotypes.len() {
            return Err(RunError::Config(
                "persisted generation has duplicate persona names".into(),
            ));
        }
        self.population = genotypes.into_iter().map(Individual::new).collect();
        Ok(())
    }

    /// One generation: episodes, evaluation, niching, persistence.
    async fn run_generation(&mut self, generation: usize) -> Result<(), RunError> {
        info!(generation, individuals = self.population.len(), "starting generation");

        let topics = generate_topics(
            self.deps.backend.as_ref(),
            self.config.topics_per_generation,
            self.config.timeouts.generate(),
        )
        .await;

        let mut indices: Vec<usize> = (0..self.population.len()).collect();
        indices.shuffle(&mut self.rng);
        let groups = partition_into_groups(
            indices,
            self.config.group_size,
            self.config.merge_remainder,
        );

        let (episodes, timed_out) = self.run_episodes(&groups, &topics).await;

        // Map each individual to its group transcript. Individuals outside
        // every completed episode keep no transcript and score zero.
        let mut transcript_of: Vec<Option<Arc<Vec<TranscriptEvent>>>> =
            vec![None; self.population.len()];
        let mut transcripts: Vec<Vec<TranscriptEvent>> = Vec::new();
        let mut degraded_calls = 0u32;
        let mut backend_alive = false;
        for (_, members, outcome) in &episodes {
            degraded_calls += outcome.degraded_calls;
            backend_alive |= outcome.backend_alive;
            let shared = Arc::new(outcome.transcript.clone());
            for &idx in members {
                transcript_of[idx] = Some(Arc::clone(&shared));
            }
            transcripts.push(outcome.transcript.clone());
        }

        if generation == 0 && !timed_out && !groups.is_empty() && !backend_alive {
            return Err(RunError::Backend(
                "every backend call failed during the first generation's episodes".into(),
            ));
        }

        degraded_calls += self.evaluate_population(&transcript_of).await;

        let agent_texts = collect_agent_texts(&transcripts);
        let population_diversity =
            match diversity::population_diversity(self.deps.embedder.as_ref(), &agent_texts).await
            {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "population diversity embedding failed");
                    0.0
                }
            };

        apply_fitness_sharing(
            &mut self.population,
            self.config.niching.sigma,
            self.config.niching.alpha,
        );

        let record = GenerationStats::from_population(
            generation,
            &self.population,
            population_diversity,
            degraded_calls,
        );
        append_stats(&self.store.stats_path(), &record).map_err(RunError::Store)?;

        let genotypes: Vec<Genotype> =
            self.population.iter().map(|i| i.genotype.clone()).collect();
        self.store
            .save_generation(generation, &genotypes)
            .map_err(RunError::Store)?;
        self.store
            .save_transcripts(generation, &transcripts)
            .map_err(RunError::Store)?;

        if timed_out {
            return Err(RunError::Interrupted(format!(
                "generation {generation} hit its timeout; completed groups were persisted"
            )));
        }

        info!(
            generation,
            fitness_mean = record.fitness_mean,
            population_diversity,
            degraded_calls,
            "generation complete"
        );
        Ok(())
    }

    /// Fan episodes out with bounded concurrency. Returns outcomes in group
    /// order plus whether the generation deadline expired first.
    async fn run_episodes(
        &mut self,
        groups: &[Vec<usize>],
        topics: &[String],
    ) -> (
        Vec<(usize, Vec<usize>, aviary_sim::EpisodeOutcome)>,
        bool,
    ) {
        let generate_opts = GenerateOptions::new(self.config.timeouts.generate());
        let engage_opts = GenerateOptions::new(self.config.timeouts.engage());
        let reply_rounds = self.config.reply_rounds;

        let mut tasks = Vec::new();
        for (group_idx, members) in groups.iter().enumerate() {
            let topic = topics
                .choose(&mut self.rng)
                .cloned()
                .unwrap_or_else(|| "General".to_string());
            // Every episode gets its own RNG derived from the master seed,
            // so concurrent groups stay deterministic.
            let episode_seed = self.rng.random::<u64>();
            let genotypes: Vec<Genotype> = members
                .iter()
                .map(|&idx| self.population[idx].genotype.clone())
                .collect();
            let backend = Arc::clone(&self.deps.backend);
            let members = members.clone();
            let generate_opts = generate_opts.clone();
            let engage_opts = engage_opts.clone();
            tasks.push(async move {
                let mut agents: Vec<SimulationAgent> =
                    genotypes.into_iter().map(SimulationAgent::new).collect();
                let mut episode_rng = StdRng::seed_from_u64(episode_seed);
                let outcome = run_episode(
                    &mut agents,
                    backend.as_ref(),
                    &topic,
                    reply_rounds,
                    &generate_opts,
                    &engage_opts,
                    &mut episode_rng,
                )
                .await;
                (group_idx, members, outcome)
            });
        }

        let deadline = self
            .config
            .generation_timeout_secs
            .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

        let mut episodes = Vec::new();
        let mut timed_out = false;
        let mut in_flight = stream::iter(tasks).buffer_unordered(self.config.concurrency);
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, in_flight.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        warn!("generation deadline expired with episodes still running");
                        timed_out = true;
                        None
                    }
                },
                None => in_flight.next().await,
            };
            match next {
                Some(item) => episodes.push(item),
                None => break,
            }
        }
        drop(in_flight);

        episodes.sort_by_key(|(group_idx, _, _)| *group_idx);
        (episodes, timed_out)
    }

    /// Fan per-individual evaluations out with bounded concurrency and fold
    /// the results into the population. Returns the degraded-call count.
    async fn evaluate_population(
        &mut self,
        transcript_of: &[Option<Arc<Vec<TranscriptEvent>>>],
    ) -> u32 {
        let tasks: Vec<_> = self
            .population
            .iter()
            .enumerate()
            .map(|(idx, individual)| {
                let evaluator = Arc::clone(&self.deps.evaluator);
                let genotype = individual.genotype.clone();
                let transcript = transcript_of[idx].clone();
                async move {
                    let evaluation = match &transcript {
                        Some(events) => evaluator.evaluate(&genotype, events).await,
                        None => Evaluation {
                            scores: FitnessScores::default(),
                            degraded: false,
                        },
                    };
                    (idx, evaluation)
                }
            })
            .collect();

        let evaluations: Vec<(usize, Evaluation)> = stream::iter(tasks)
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut degraded_calls = 0u32;
        for (idx, evaluation) in evaluations {
            let has_transcript = transcript_of[idx].is_some();
            let individual = &mut self.population[idx];
            individual.scores = evaluation.scores;
            individual.degraded = evaluation.degraded;
            if evaluation.degraded {
                degraded_calls += 1;
            }
            individual.raw_fitness = if has_transcript {
                raw_fitness(&self.config.fitness_weights, &individual.scores)
            } else {
                0.0
            };
        }
        degraded_calls
    }

    /// Elites carried unchanged, remaining slots filled by tournament
    /// selection, crossover, and (at `mutation_rate`) mutation.
    async fn reproduce(&mut self) -> Vec<Individual> {
        let elite_count = self.config.resolved_elite_count();

        let mut order: Vec<usize> = (0..self.population.len()).collect();
        order.sort_by(|&a, &b| {
            let ia = &self.population[a];
            let ib = &self.population[b];
            ib.shared_fitness
                .partial_cmp(&ia.shared_fitness)
                .unwrap_or(Ordering::Equal)
                .then(
                    ib.raw_fitness
                        .partial_cmp(&ia.raw_fitness)
                        .unwrap_or(Ordering::Equal),
                )
                .then_with(|| ia.genotype.name.cmp(&ib.genotype.name))
        });

        let mut next: Vec<Individual> = order
            .iter()
            .take(elite_count)
            .map(|&idx| Individual::new(self.population[idx].genotype.clone()))
            .collect();
        let mut used: BTreeSet<String> = next.iter().map(|i| i.name().to_string()).collect();

        while next.len() < self.config.population_size {
            let parent_a = self.tournament();
            let parent_b = self.tournament();
            let mut child = crossover(&parent_a, &parent_b, &self.pools, &mut self.rng);
            if self.rng.random::<f64>() < self.config.mutation_rate {
                child = self.deps.mutator.mutate(&child, &mut self.rng).await;
            }

            let mut name = self.draw_unique_name(&used, &child.name);
            if self.config.backend_nicknames {
                if let Some(nickname) = self.backend_nickname(&child).await {
                    if !used.contains(&nickname) {
                        name = nickname;
                    }
                }
            }
            child.name = name.clone();
            used.insert(name);
            next.push(Individual::new(child));
        }

        info!(individuals = next.len(), elites = elite_count, "next generation produced");
        next
    }

    /// Pick `tournament_size` distinct individuals uniformly; the highest
    /// shared fitness wins.
    fn tournament(&mut self) -> Genotype {
        let n = self.population.len();
        let k = self.config.tournament_size.min(n);
        let mut indices: Vec<usize> = (0..n).collect();
        let (sampled, _) = indices.partial_shuffle(&mut self.rng, k);
        let mut best = sampled[0];
        for &candidate in sampled.iter().skip(1) {
            if self.population[candidate].shared_fitness > self.population[best].shared_fitness {
                best = candidate;
            }
        }
        self.population[best].genotype.clone()
    }

    /// A pool name not yet in use, or the fallback base with a numeric
    /// suffix once the pool is exhausted.
    fn draw_unique_name(&mut self, used: &BTreeSet<String>, fallback_base: &str) -> String {
        let available: Vec<&String> = self
            .pools
            .names
            .iter()
            .filter(|name| !used.contains(*name))
            .collect();
        if let Some(&name) = available.choose(&mut self.rng) {
            return name.clone();
        }
        let mut name = fallback_base.to_string();
        while used.contains(&name) {
            name = format!("{}{}", fallback_base, self.rng.random_range(10..100));
        }
        name
    }

    /// Post-reproduction hook: ask the backend for a fresh nickname. Fails
    /// open; the pool-drawn name stands when this returns None.
    async fn backend_nickname(&self, child: &Genotype) -> Option<String> {
        let opts =
            GenerateOptions::new(self.config.timeouts.generate()).with_temperature(0.9);
        let response = generate_with_retry(
            self.deps.backend.as_ref(),
            prompt::nickname_system(),
            &prompt::nickname_user(&child.summary()),
            &opts,
        )
        .await;
        let text = match response {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "nickname generation failed");
                return None;
            }
        };
        let nickname = text.split_whitespace().next()?.to_string();
        let valid = !nickname.is_empty()
            && nickname.len() <= 20
            && nickname
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
        valid.then_some(nickname)
    }
}

/// Gather every agent's authored texts across all group transcripts.
fn collect_agent_texts(transcripts: &[Vec<TranscriptEvent>]) -> BTreeMap<String, Vec<String>> {
    let mut agent_texts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for transcript in transcripts {
        for event in transcript {
            if let Some(content) = event.content() {
                agent_texts
                    .entry(event.author().to_string())
                    .or_default()
                    .push(content.to_string());
            }
        }
    }
    agent_texts
}

#[cfg(test)]
mod tests {
    use super::*;
    use aviary_core::AttrValue;

    fn individual_with(genotype: Genotype, raw: f64) -> Individual {
        let mut individual = Individual::new(genotype);
        individual.raw_fitness = raw;
        individual
    }

    #[test]
    fn niching_halves_clone_fitness() {
        // Two clones plus two distinct personas, all at raw 0.8. With
        // sigma 0.5 the clones see each other at distance 0 (niche 2);
        // the distinct personas stand alone (niche 1).
        let clone = Genotype::new("A1")
            .with("occupation", AttrValue::from("barista"))
            .with("hobbies", AttrValue::List(vec!["chess".into()]));
        let mut clone_b = clone.clone();
        clone_b.name = "A2".to_string();
        let distinct_b = Genotype::new("B")
            .with("occupation", AttrValue::from("pilot"))
            .with("hobbies", AttrValue::List(vec!["gliding".into()]));
        let distinct_c = Genotype::new("C")
            .with("occupation", AttrValue::from("chef"))
            .with("hobbies", AttrValue::List(vec!["foraging".into()]));

        let mut population = vec![
            individual_with(clone, 0.8),
            individual_with(clone_b, 0.8),
            individual_with(distinct_b, 0.8),
            individual_with(distinct_c, 0.8),
        ];
        apply_fitness_sharing(&mut population, 0.5, 1.0);

        assert!((population[0].shared_fitness - 0.4).abs() < 1e-9);
        assert!((population[1].shared_fitness - 0.4).abs() < 1e-9);
        assert!((population[2].shared_fitness - 0.8).abs() < 1e-9);
        assert!((population[3].shared_fitness - 0.8).abs() < 1e-9);
    }

    #[test]
    fn shared_fitness_never_exceeds_raw() {
        let mut population: Vec<Individual> = (0..5)
            .map(|i| {
                individual_with(
                    Genotype::new(format!("P{i}")).with("age", AttrValue::Int(20 + i)),
                    0.6,
                )
            })
            .collect();
        apply_fitness_sharing(&mut population, 1.0, 2.0);
        for individual in &population {
            assert!(individual.shared_fitness <= individual.raw_fitness + 1e-12);
            assert!(individual.shared_fitness >= 0.0);
        }
    }

    #[test]
    fn raw_fitness_is_the_weighted_sum() {
        let mut weights = BTreeMap::new();
        weights.insert("engagement".to_string(), 0.5);
        weights.insert("safety".to_string(), 0.5);
        let scores = FitnessScores {
            engagement: 0.4,
            safety: 1.0,
            ..FitnessScores::default()
        };
        assert!((raw_fitness(&weights, &scores) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn unknown_weight_dimensions_score_zero() {
        let mut weights = BTreeMap::new();
        weights.insert("engagement".to_string(), 0.5);
        weights.insert("charisma".to_string(), 0.5);
        let scores = FitnessScores {
            engagement: 1.0,
            ..FitnessScores::default()
        };
        assert!((raw_fitness(&weights, &scores) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn partition_drops_the_remainder_by_default() {
        let groups = partition_into_groups((0..10).collect(), 4, false);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 4));
    }

    #[test]
    fn partition_can_merge_the_remainder() {
        let groups = partition_into_groups((0..10).collect(), 4, true);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 4);
        assert_eq!(groups[1].len(), 6);
    }

    #[test]
    fn partition_keeps_exact_multiples_intact() {
        let groups = partition_into_groups((0..8).collect(), 4, false);
        assert_eq!(groups.len(), 2);
        let total: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn collect_agent_texts_skips_passes() {
        let transcripts = vec![vec![
            TranscriptEvent::Post {
                author: "Aria".into(),
                content: "p1".into(),
            },
            TranscriptEvent::Pass {
                author: "Bram".into(),
                target_author: "Aria".into(),
            },
            TranscriptEvent::Reply {
                author: "Aria".into(),
                target_author: "Bram".into(),
                content: "r1".into(),
                reply_to: "x".into(),
            },
        ]];
        let texts = collect_agent_texts(&transcripts);
        assert_eq!(texts["Aria"], vec!["p1", "r1"]);
        assert!(!texts.contains_key("Bram"));
    }
}
