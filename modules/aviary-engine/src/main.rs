//! aviary — evolutionary optimization of conversational personas.

use std::path::PathBuf;
use std::sync::Arc;

use aviary_core::{
    AppConfig, EvaluatorKind, EvolutionConfig, MutationPools, MutatorKind, RunError,
};
use aviary_engine::{
    seeds, BackendEvaluator, BackendMutator, EngineDeps, EvolutionEngine, HeuristicEvaluator,
    PoolMutator, RunStore,
};
use aviary_sim::{ClaudeBackend, TextBackend, TextEmbedder, TokenHashEmbedder, VoyageEmbedder};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aviary", about = "Evolve social-media personas through simulated group episodes")]
struct Cli {
    /// Directory for generation files, transcripts, and stats.
    #[arg(long, default_value = "runs/default")]
    run_dir: PathBuf,

    /// Evolution config JSON. Missing keys fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed personas JSON (array of genotypes).
    #[arg(long)]
    seeds: Option<PathBuf>,

    /// Mutation pool overrides JSON.
    #[arg(long)]
    pools: Option<PathBuf>,

    /// Override the configured generation count.
    #[arg(long)]
    generations: Option<usize>,

    /// Override the configured population size.
    #[arg(long)]
    pop_size: Option<usize>,

    /// Override the configured RNG seed.
    #[arg(long)]
    rng_seed: Option<u64>,

    /// Ask the backend to invent seed personas instead of loading a file.
    #[arg(long)]
    generate_seeds: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "run failed");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    info!("aviary starting");

    let mut config = match &cli.config {
        Some(path) => EvolutionConfig::load(path)
            .map_err(|e| RunError::Config(format!("{e:#}")))?,
        None => EvolutionConfig::default(),
    };
    if let Some(generations) = cli.generations {
        config.generations = generations;
    }
    if let Some(pop_size) = cli.pop_size {
        config.population_size = pop_size;
    }
    if let Some(rng_seed) = cli.rng_seed {
        config.rng_seed = Some(rng_seed);
    }
    config.validate_and_normalize()?;

    let pools = match &cli.pools {
        Some(path) => {
            MutationPools::load(path).map_err(|e| RunError::Config(format!("{e:#}")))?
        }
        None => MutationPools::default(),
    };
    let pools = Arc::new(pools);

    let app = AppConfig::from_env();
    let api_key = app
        .anthropic_api_key
        .clone()
        .ok_or_else(|| RunError::Config("ANTHROPIC_API_KEY is not set".into()))?;

    let backend: Arc<dyn TextBackend> =
        Arc::new(ClaudeBackend::new(&api_key, &app.agent_model));
    let judge_backend: Arc<dyn TextBackend> =
        Arc::new(ClaudeBackend::new(&api_key, &app.judge_model));

    let embedder: Arc<dyn TextEmbedder> = match &app.voyage_api_key {
        Some(key) => Arc::new(VoyageEmbedder::new(key)),
        None => {
            warn!("VOYAGE_API_KEY not set, diversity uses the deterministic token-hash embedder");
            Arc::new(TokenHashEmbedder::default())
        }
    };

    let evaluator: Arc<dyn aviary_engine::Evaluator> = match config.evaluator {
        EvaluatorKind::Backend => Arc::new(BackendEvaluator::new(
            Arc::clone(&judge_backend),
            Arc::clone(&embedder),
            config.timeouts.judge(),
        )),
        EvaluatorKind::Heuristic => Arc::new(HeuristicEvaluator::new(Arc::clone(&embedder))),
    };

    let mutator: Arc<dyn aviary_engine::Mutator> = match config.mutator {
        MutatorKind::Pool => Arc::new(PoolMutator::new(Arc::clone(&pools))),
        MutatorKind::Backend => Arc::new(BackendMutator::new(
            Arc::clone(&backend),
            Arc::clone(&pools),
            config.timeouts.generate(),
        )),
    };

    let store = RunStore::new(&cli.run_dir).map_err(RunError::Store)?;
    let resuming = store.last_contiguous_generation().is_some();

    // Seed ladder: backend generation, then the seed file, then built-ins.
    // A resumed run starts from disk and never touches the seeds.
    let seed_personas = if resuming {
        Vec::new()
    } else {
        let mut loaded = None;
        if cli.generate_seeds {
            loaded = seeds::generate_seed_personas(
                backend.as_ref(),
                config.population_size,
                config.timeouts.generate(),
            )
            .await;
        }
        if loaded.is_none() {
            if let Some(path) = &cli.seeds {
                loaded = Some(
                    seeds::load_seed_file(path)
                        .map_err(|e| RunError::Config(format!("{e:#}")))?,
                );
            }
        }
        loaded.unwrap_or_else(|| {
            info!("using built-in seed personas");
            seeds::builtin_seed_population()
        })
    };

    let deps = EngineDeps {
        backend,
        embedder,
        evaluator,
        mutator,
    };
    let mut engine = EvolutionEngine::new(config, pools, deps, store);
    engine.run(seed_personas).await?;

    info!(run_dir = %cli.run_dir.display(), "evolution finished, stats in generation_stats.jsonl");
    Ok(())
}
