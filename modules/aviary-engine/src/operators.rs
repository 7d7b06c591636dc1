//! Genetic operators: pool-based and backend-driven mutation, and
//! field-mixing crossover.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aviary_core::genotype::{AGE_MAX, AGE_MIN};
use aviary_core::{AttrValue, Genotype, MutationPools};
use aviary_sim::{generate_with_retry, prompt, strip_code_fences, GenerateOptions, TextBackend};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use tracing::warn;

/// One-method mutation capability. The concrete variant is selected once at
/// engine construction. Mutators fail open: they always return a genotype.
#[async_trait]
pub trait Mutator: Send + Sync {
    async fn mutate(&self, genotype: &Genotype, rng: &mut StdRng) -> Genotype;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    TraitPerturb,
    ListSwap,
    StyleReplace,
    AgeShift,
    BackstoryEvent,
}

const STRATEGIES: [Strategy; 5] = [
    Strategy::TraitPerturb,
    Strategy::ListSwap,
    Strategy::StyleReplace,
    Strategy::AgeShift,
    Strategy::BackstoryEvent,
];

/// Structural mutator drawing replacement values from the static pools.
pub struct PoolMutator {
    pools: Arc<MutationPools>,
}

impl PoolMutator {
    pub fn new(pools: Arc<MutationPools>) -> Self {
        Self { pools }
    }

    /// Apply 1 or 2 randomly chosen strategies, in order, to a copy.
    pub fn mutate_sync(&self, genotype: &Genotype, rng: &mut StdRng) -> Genotype {
        let mut mutant = genotype.clone();
        let count = rng.random_range(1..=2usize);
        let mut strategies = STRATEGIES;
        let (chosen, _) = strategies.partial_shuffle(rng, count);
        for strategy in chosen.iter() {
            self.apply(*strategy, &mut mutant, rng);
        }
        mutant
    }

    fn apply(&self, strategy: Strategy, mutant: &mut Genotype, rng: &mut StdRng) {
        match strategy {
            Strategy::TraitPerturb => {
                let Some(traits) = mutant.personality_traits() else {
                    return;
                };
                let keys: Vec<String> = traits.keys().cloned().collect();
                let Some(key) = keys.choose(rng).cloned() else {
                    return;
                };
                let mut traits = traits.clone();
                let delta = rng.random_range(-0.15..=0.15);
                let value = (traits[&key] + delta).clamp(0.0, 1.0);
                traits.insert(key, value);
                mutant.set("personality_traits", AttrValue::Traits(traits));
            }
            Strategy::ListSwap => {
                let fields = ["hobbies", "core_values", "goals"];
                let candidates: Vec<&str> = fields
                    .iter()
                    .copied()
                    .filter(|f| mutant.list(f).is_some_and(|l| !l.is_empty()))
                    .collect();
                let Some(&field) = candidates.choose(rng) else {
                    return;
                };
                let pool = match field {
                    "hobbies" => &self.pools.hobbies,
                    "core_values" => &self.pools.core_values,
                    _ => &self.pools.goals,
                };
                let mut items = mutant.list(field).unwrap_or_default().to_vec();
                let drop_idx = rng.random_range(0..items.len());
                items.remove(drop_idx);
                let fresh: Vec<&String> =
                    pool.iter().filter(|v| !items.contains(v)).collect();
                if let Some(&value) = fresh.choose(rng) {
                    items.push(value.clone());
                }
                mutant.set(field, AttrValue::List(items));
            }
            Strategy::StyleReplace => {
                let (field, pool) = if rng.random_bool(0.5) {
                    ("communication_style", &self.pools.communication_styles)
                } else {
                    ("topical_focus", &self.pools.topical_focuses)
                };
                let current = mutant.text(field).map(str::to_string);
                let fresh: Vec<&String> = pool
                    .iter()
                    .filter(|v| Some(v.as_str()) != current.as_deref())
                    .collect();
                if let Some(&value) = fresh.choose(rng) {
                    mutant.set(field, AttrValue::Text(value.clone()));
                }
            }
            Strategy::AgeShift => {
                let Some(age) = mutant.age() else {
                    return;
                };
                let magnitude = rng.random_range(1..=5i64);
                let delta = if rng.random_bool(0.5) {
                    magnitude
                } else {
                    -magnitude
                };
                mutant.set("age", AttrValue::Int((age + delta).clamp(AGE_MIN, AGE_MAX)));
            }
            Strategy::BackstoryEvent => {
                let Some(event) = self.pools.life_events.choose(rng) else {
                    return;
                };
                let backstory = match mutant.text("backstory") {
                    Some(existing) => format!("{existing} {event}"),
                    None => event.clone(),
                };
                mutant.set("backstory", AttrValue::Text(backstory));
            }
        }
    }
}

#[async_trait]
impl Mutator for PoolMutator {
    async fn mutate(&self, genotype: &Genotype, rng: &mut StdRng) -> Genotype {
        self.mutate_sync(genotype, rng)
    }
}

/// Mutator that asks the backend for a coherent variation. Any failure,
/// parse error, or empty response falls back to the pool mutator.
pub struct BackendMutator {
    backend: Arc<dyn TextBackend>,
    fallback: PoolMutator,
    opts: GenerateOptions,
}

impl BackendMutator {
    pub fn new(
        backend: Arc<dyn TextBackend>,
        pools: Arc<MutationPools>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            fallback: PoolMutator::new(pools),
            opts: GenerateOptions::new(timeout).with_temperature(0.9),
        }
    }
}

#[async_trait]
impl Mutator for BackendMutator {
    async fn mutate(&self, genotype: &Genotype, rng: &mut StdRng) -> Genotype {
        let json = match serde_json::to_string_pretty(genotype) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "genotype serialization failed, using pool mutation");
                return self.fallback.mutate_sync(genotype, rng);
            }
        };
        let response = generate_with_retry(
            self.backend.as_ref(),
            prompt::mutate_system(),
            &prompt::mutate_user(&json),
            &self.opts,
        )
        .await;
        match response {
            Ok(text) if !text.trim().is_empty() => {
                match serde_json::from_str::<Genotype>(strip_code_fences(&text)) {
                    Ok(mutant) => mutant,
                    Err(e) => {
                        warn!(persona = %genotype.name, error = %e, "backend mutation unparsable, using pool mutation");
                        self.fallback.mutate_sync(genotype, rng)
                    }
                }
            }
            Ok(_) => {
                warn!(persona = %genotype.name, "backend mutation empty, using pool mutation");
                self.fallback.mutate_sync(genotype, rng)
            }
            Err(e) => {
                warn!(persona = %genotype.name, error = %e, "backend mutation failed, using pool mutation");
                self.fallback.mutate_sync(genotype, rng)
            }
        }
    }
}

/// Fields the child always takes from parent A.
const FROM_A: [&str; 4] = ["occupation", "core_values", "personality_traits", "topical_focus"];
/// Fields the child always takes from parent B.
const FROM_B: [&str; 4] = ["backstory", "hobbies", "communication_style", "interaction_policy"];

/// Field-mixing crossover. Pure and deterministic given the RNG; never
/// touches the backend. The child's name is a pool placeholder the engine
/// may replace during reproduction.
pub fn crossover(
    a: &Genotype,
    b: &Genotype,
    pools: &MutationPools,
    rng: &mut StdRng,
) -> Genotype {
    let name = pools
        .names
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| format!("{}-{}", a.name, b.name));
    let mut child = Genotype::new(name);

    // age: 50/50 from either parent.
    let age_source = if rng.random_bool(0.5) { a } else { b };
    if let Some(age) = age_source.get("age") {
        child.set("age", age.clone());
    }

    for field in FROM_A {
        if let Some(value) = a.get(field) {
            child.set(field, value.clone());
        }
    }
    for field in FROM_B {
        if let Some(value) = b.get(field) {
            child.set(field, value.clone());
        }
    }

    // goals: first half of A's list (ceiling split), second half of B's.
    if a.get("goals").is_some() || b.get("goals").is_some() {
        let goals_a = a.list("goals").unwrap_or_default();
        let goals_b = b.list("goals").unwrap_or_default();
        let mut goals: Vec<String> = goals_a[..goals_a.len().div_ceil(2)].to_vec();
        goals.extend_from_slice(&goals_b[goals_b.len() / 2..]);
        child.set("goals", AttrValue::List(goals));
    }

    // Everything else: copied through, A winning when both parents have it.
    let spliced: [&str; 10] = [
        "age",
        "goals",
        "occupation",
        "core_values",
        "personality_traits",
        "topical_focus",
        "backstory",
        "hobbies",
        "communication_style",
        "interaction_policy",
    ];
    for (key, value) in b.attributes.iter().chain(a.attributes.iter()) {
        if spliced.contains(&key.as_str()) {
            continue;
        }
        child.set(key.clone(), value.clone());
    }

    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn pools() -> Arc<MutationPools> {
        Arc::new(MutationPools::default())
    }

    fn full_persona(name: &str) -> Genotype {
        let mut traits = BTreeMap::new();
        traits.insert("openness".to_string(), 0.9);
        Genotype::new(name)
            .with("age", AttrValue::Int(30))
            .with("occupation", "barista".into())
            .with("backstory", "Grew up above the cafe.".into())
            .with("core_values", AttrValue::List(vec!["honesty".into()]))
            .with("hobbies", AttrValue::List(vec!["chess".into()]))
            .with("personality_traits", AttrValue::Traits(traits))
            .with("communication_style", "dry and deadpan".into())
            .with("topical_focus", "local food scenes".into())
            .with("interaction_policy", "ask first".into())
            .with("goals", AttrValue::List(vec!["g1".into(), "g2".into(), "g3".into()]))
    }

    #[test]
    fn pool_mutation_respects_bounds_and_preserves_unknown_keys() {
        let mutator = PoolMutator::new(pools());
        let original = full_persona("Aria").with("quirk", "hums while typing".into());
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let mutant = mutator.mutate_sync(&original, &mut rng);
            let age = mutant.age().unwrap();
            assert!((AGE_MIN..=AGE_MAX).contains(&age));
            for intensity in mutant.personality_traits().unwrap().values() {
                assert!((0.0..=1.0).contains(intensity));
            }
            assert_eq!(mutant.text("quirk"), Some("hums while typing"));
            assert_eq!(mutant.name, "Aria");
        }
    }

    #[test]
    fn pool_mutation_changes_something_eventually() {
        let mutator = PoolMutator::new(pools());
        let original = full_persona("Aria");
        let mut rng = StdRng::seed_from_u64(11);
        let changed = (0..20).any(|_| mutator.mutate_sync(&original, &mut rng) != original);
        assert!(changed);
    }

    #[test]
    fn list_swap_keeps_list_lengths_stable() {
        let mutator = PoolMutator::new(pools());
        let original = full_persona("Aria");
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let mutant = mutator.mutate_sync(&original, &mut rng);
            // Swap removes one element and adds one pool value.
            assert_eq!(mutant.list("hobbies").unwrap().len(), 1);
            assert_eq!(mutant.list("goals").unwrap().len(), 3);
        }
    }

    #[test]
    fn crossover_follows_the_field_table() {
        let a = full_persona("A");
        let b = full_persona("B")
            .with("occupation", AttrValue::from("pilot"))
            .with("backstory", AttrValue::from("Flew cargo for a decade."))
            .with("hobbies", AttrValue::List(vec!["gliding".into()]))
            .with("communication_style", AttrValue::from("terse and punchy"))
            .with("interaction_policy", AttrValue::from("answer with anecdotes"))
            .with("goals", AttrValue::List(vec!["h1".into(), "h2".into(), "h3".into(), "h4".into()]));

        let mut rng = StdRng::seed_from_u64(9);
        let child = crossover(&a, &b, &MutationPools::default(), &mut rng);

        // Always-A fields.
        assert_eq!(child.text("occupation"), Some("barista"));
        assert_eq!(child.text("topical_focus"), Some("local food scenes"));
        // Always-B fields.
        assert_eq!(child.text("backstory"), Some("Flew cargo for a decade."));
        assert_eq!(child.list("hobbies").unwrap(), ["gliding"]);
        assert_eq!(child.text("communication_style"), Some("terse and punchy"));
        // Goals: ceil(3/2)=2 from A, then B[2..].
        assert_eq!(child.list("goals").unwrap(), ["g1", "g2", "h3", "h4"]);
        // Fresh pool name, not a parent name.
        assert_ne!(child.name, "A");
        assert_ne!(child.name, "B");
    }

    #[test]
    fn crossover_passes_through_one_sided_attributes() {
        let a = full_persona("A").with("only_in_a", AttrValue::from("alpha"));
        let b = full_persona("B").with("only_in_b", AttrValue::from("beta"));
        let mut rng = StdRng::seed_from_u64(2);
        let child = crossover(&a, &b, &MutationPools::default(), &mut rng);
        assert_eq!(child.text("only_in_a"), Some("alpha"));
        assert_eq!(child.text("only_in_b"), Some("beta"));
    }

    #[test]
    fn crossover_prefers_a_for_shared_extras() {
        let a = full_persona("A").with("shared", AttrValue::from("from a"));
        let b = full_persona("B").with("shared", AttrValue::from("from b"));
        let mut rng = StdRng::seed_from_u64(2);
        let child = crossover(&a, &b, &MutationPools::default(), &mut rng);
        assert_eq!(child.text("shared"), Some("from a"));
    }

    #[test]
    fn crossover_age_comes_from_a_parent() {
        let a = full_persona("A").with("age", AttrValue::Int(22));
        let b = full_persona("B").with("age", AttrValue::Int(66));
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..20 {
            let child = crossover(&a, &b, &MutationPools::default(), &mut rng);
            let age = child.age().unwrap();
            assert!(age == 22 || age == 66);
        }
    }

    #[tokio::test]
    async fn backend_mutator_falls_back_on_garbage() {
        use aviary_sim::BackendError;

        struct GarbageBackend;

        #[async_trait]
        impl TextBackend for GarbageBackend {
            async fn generate(
                &self,
                _system: &str,
                _user: &str,
                _opts: &GenerateOptions,
            ) -> Result<String, BackendError> {
                Ok("definitely not json".to_string())
            }
        }

        let mutator = BackendMutator::new(
            Arc::new(GarbageBackend),
            pools(),
            Duration::from_secs(5),
        );
        let original = full_persona("Aria");
        let mut rng = StdRng::seed_from_u64(8);
        let mutant = mutator.mutate(&original, &mut rng).await;
        // Fallback is the pool mutator: same name, valid bounds.
        assert_eq!(mutant.name, "Aria");
        assert!((AGE_MIN..=AGE_MAX).contains(&mutant.age().unwrap()));
    }

    #[tokio::test]
    async fn backend_mutator_accepts_valid_genotype_json() {
        use aviary_sim::BackendError;

        struct ValidBackend;

        #[async_trait]
        impl TextBackend for ValidBackend {
            async fn generate(
                &self,
                _system: &str,
                _user: &str,
                _opts: &GenerateOptions,
            ) -> Result<String, BackendError> {
                Ok(r#"```json
{"name": "Nova", "attributes": {"age": 33, "occupation": "pilot"}}
```"#
                    .to_string())
            }
        }

        let mutator =
            BackendMutator::new(Arc::new(ValidBackend), pools(), Duration::from_secs(5));
        let original = full_persona("Aria");
        let mut rng = StdRng::seed_from_u64(8);
        let mutant = mutator.mutate(&original, &mut rng).await;
        assert_eq!(mutant.name, "Nova");
        assert_eq!(mutant.age(), Some(33));
    }
}
