//! aviary-core — persona data model, compiler, and configuration.
//!
//! Domain-agnostic with respect to the text backend: nothing in this crate
//! talks to an LLM. The genotype is a dynamic attribute bag so operators and
//! the backend can introduce new traits without a schema change.

pub mod compiler;
pub mod config;
pub mod error;
pub mod genotype;
pub mod pools;
pub mod transcript;

pub use compiler::compile;
pub use config::{AppConfig, EvaluatorKind, EvolutionConfig, MutatorKind, NichingConfig, TimeoutConfig};
pub use error::{RunError, EXIT_BACKEND, EXIT_CONFIG, EXIT_INTERRUPTED, EXIT_OK};
pub use genotype::{AttrValue, FitnessScores, Genotype, Individual, Phenotype};
pub use pools::MutationPools;
pub use transcript::TranscriptEvent;
