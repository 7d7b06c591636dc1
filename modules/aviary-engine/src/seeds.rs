//! Seed persona sources: backend generation, a JSON file, or the built-in
//! fallback set.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use aviary_core::{AttrValue, Genotype};
use aviary_sim::{generate_with_retry, prompt, strip_code_fences, GenerateOptions, TextBackend};
use tracing::{info, warn};

/// Load seed personas from a JSON array of genotypes.
pub fn load_seed_file(path: &Path) -> Result<Vec<Genotype>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed personas from {}", path.display()))?;
    let seeds: Vec<Genotype> = serde_json::from_str(&data)
        .with_context(|| format!("parsing seed personas from {}", path.display()))?;
    Ok(seeds)
}

/// Ask the backend to invent `count` diverse personas. Returns None on any
/// failure so callers can fall through to the next seed source.
pub async fn generate_seed_personas(
    backend: &dyn TextBackend,
    count: usize,
    timeout: Duration,
) -> Option<Vec<Genotype>> {
    let opts = GenerateOptions::new(timeout).with_temperature(0.9);
    let response = generate_with_retry(
        backend,
        prompt::seeds_system(),
        &prompt::seeds_user(count),
        &opts,
    )
    .await;

    let text = match response {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "seed generation failed");
            return None;
        }
    };

    match serde_json::from_str::<Vec<Genotype>>(strip_code_fences(&text)) {
        Ok(seeds) if !seeds.is_empty() => {
            info!(count = seeds.len(), "backend generated seed personas");
            Some(seeds)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "seed response unparsable");
            None
        }
    }
}

fn traits(pairs: &[(&str, f64)]) -> AttrValue {
    let map: BTreeMap<String, f64> = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    AttrValue::Traits(map)
}

fn list(items: &[&str]) -> AttrValue {
    AttrValue::List(items.iter().map(|s| s.to_string()).collect())
}

/// Last-resort seed population: four personas with deliberately different
/// temperaments so generation zero already has some spread.
pub fn builtin_seed_population() -> Vec<Genotype> {
    vec![
        Genotype::new("Alice")
            .with("age", AttrValue::Int(25))
            .with("occupation", "Digital Artist".into())
            .with("backstory", "Always loved drawing, now exploring generative art.".into())
            .with("core_values", list(&["creativity", "freedom"]))
            .with("hobbies", list(&["sketching", "visiting galleries"]))
            .with("personality_traits", traits(&[("openness", 0.9), ("neuroticism", 0.4)]))
            .with("communication_style", "enthusiastic and visual".into())
            .with("topical_focus", "digital art trends".into())
            .with("interaction_policy", "compliment others' work".into())
            .with("goals", list(&["become famous", "inspire others"])),
        Genotype::new("Bob")
            .with("age", AttrValue::Int(35))
            .with("occupation", "Software Engineer".into())
            .with("backstory", "Coding since childhood, obsessed with clean code.".into())
            .with("core_values", list(&["logic", "efficiency"]))
            .with("hobbies", list(&["coding", "chess"]))
            .with("personality_traits", traits(&[("conscientiousness", 0.9), ("extraversion", 0.2)]))
            .with("communication_style", "concise and technical".into())
            .with("topical_focus", "programming best practices".into())
            .with("interaction_policy", "correct misconceptions".into())
            .with("goals", list(&["teach others", "find bugs"])),
        Genotype::new("Charlie")
            .with("age", AttrValue::Int(22))
            .with("occupation", "Student".into())
            .with("backstory", "Studying philosophy, questions everything.".into())
            .with("core_values", list(&["truth", "skepticism"]))
            .with("hobbies", list(&["reading", "debating"]))
            .with("personality_traits", traits(&[("openness", 0.8), ("agreeableness", 0.4)]))
            .with("communication_style", "inquisitive and verbose".into())
            .with("topical_focus", "ethics of AI".into())
            .with("interaction_policy", "ask deep questions".into())
            .with("goals", list(&["understand the world", "win debates"])),
        Genotype::new("Dana")
            .with("age", AttrValue::Int(40))
            .with("occupation", "Journalist".into())
            .with("backstory", "Investigating the truth behind the headlines.".into())
            .with("core_values", list(&["integrity", "justice"]))
            .with("hobbies", list(&["writing", "travelling"]))
            .with("personality_traits", traits(&[("extraversion", 0.8), ("agreeableness", 0.6)]))
            .with("communication_style", "direct and probing".into())
            .with("topical_focus", "current events".into())
            .with("interaction_policy", "interview others".into())
            .with("goals", list(&["uncover stories", "inform the public"])),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_seeds_have_unique_names_and_full_attributes() {
        let seeds = builtin_seed_population();
        assert_eq!(seeds.len(), 4);
        let names: std::collections::BTreeSet<&str> =
            seeds.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), seeds.len());
        for seed in &seeds {
            assert!(seed.age().is_some());
            assert!(seed.personality_traits().is_some());
            assert!(!seed.list("goals").unwrap().is_empty());
        }
    }
}
