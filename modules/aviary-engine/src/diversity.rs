//! Diversity measures: embedding-based textual diversity and structural
//! genotype distance.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use aviary_core::{AttrValue, Genotype};
use aviary_sim::TextEmbedder;

/// Cosine distance 1 - (u·v)/(‖u‖‖v‖), clamped to [0,1]. A zero vector is
/// maximally distant from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let similarity = (dot / (norm_a * norm_b)) as f64;
    (1.0 - similarity).clamp(0.0, 1.0)
}

fn mean_pairwise_distance(vectors: &[Vec<f32>]) -> f64 {
    let mut distances = Vec::new();
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            distances.push(cosine_distance(&vectors[i], &vectors[j]));
        }
    }
    if distances.is_empty() {
        return 0.0;
    }
    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    mean.clamp(0.0, 1.0)
}

/// Diversity of a set of texts: mean pairwise cosine distance of their
/// embeddings. Fewer than two non-empty texts score 0.
pub async fn textual_diversity(embedder: &dyn TextEmbedder, texts: &[String]) -> Result<f64> {
    let texts: Vec<String> = texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .collect();
    if texts.len() < 2 {
        return Ok(0.0);
    }
    let embeddings = embedder.embed_batch(&texts).await?;
    Ok(mean_pairwise_distance(&embeddings))
}

/// How different agents are from each other: one mean embedding per agent,
/// then mean pairwise cosine distance between agents.
pub async fn population_diversity(
    embedder: &dyn TextEmbedder,
    agent_texts: &BTreeMap<String, Vec<String>>,
) -> Result<f64> {
    let mut means: Vec<Vec<f32>> = Vec::new();
    for texts in agent_texts.values() {
        let texts: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();
        if texts.is_empty() {
            continue;
        }
        let embeddings = embedder.embed_batch(&texts).await?;
        let dims = embeddings[0].len();
        let mut mean = vec![0.0f32; dims];
        for embedding in &embeddings {
            for (slot, value) in mean.iter_mut().zip(embedding.iter()) {
                *slot += value;
            }
        }
        let n = embeddings.len() as f32;
        for slot in &mut mean {
            *slot /= n;
        }
        means.push(mean);
    }
    if means.len() < 2 {
        return Ok(0.0);
    }
    Ok(mean_pairwise_distance(&means))
}

/// Structural distance between two genotypes: the mean of per-field
/// normalized distances over the union of attribute keys. Bounded in [0,1],
/// symmetric, and zero iff the genotypes are attribute-equal.
pub fn genotype_distance(a: &Genotype, b: &Genotype) -> f64 {
    let keys: BTreeSet<&String> = a.attributes.keys().chain(b.attributes.keys()).collect();
    if keys.is_empty() {
        return 0.0;
    }
    let total: f64 = keys
        .iter()
        .map(|key| field_distance(key, a.get(key), b.get(key)))
        .sum();
    total / keys.len() as f64
}

/// Age values are normalized over the [18,80] range; every other scalar is
/// an exact-match comparison.
const AGE_RANGE: f64 = 62.0;

fn field_distance(key: &str, a: Option<&AttrValue>, b: Option<&AttrValue>) -> f64 {
    match (a, b) {
        (Some(AttrValue::List(a)), Some(AttrValue::List(b))) => jaccard_distance(a, b),
        (Some(AttrValue::List(items)), None) | (None, Some(AttrValue::List(items))) => {
            if items.is_empty() {
                0.0
            } else {
                1.0
            }
        }
        (Some(AttrValue::Traits(a)), Some(AttrValue::Traits(b))) => traits_distance(a, b),
        (Some(AttrValue::Traits(map)), None) | (None, Some(AttrValue::Traits(map))) => {
            traits_distance(map, &BTreeMap::new())
        }
        (Some(AttrValue::Int(x)), Some(AttrValue::Int(y))) if key == "age" => {
            ((*x - *y).abs() as f64 / AGE_RANGE).min(1.0)
        }
        (Some(x), Some(y)) => {
            if x == y {
                0.0
            } else {
                1.0
            }
        }
        (Some(_), None) | (None, Some(_)) => 1.0,
        (None, None) => 0.0,
    }
}

/// 1 - |A ∩ B| / |A ∪ B| over the values as sets; two empty lists are
/// identical, not maximally distant.
fn jaccard_distance(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<&String> = a.iter().collect();
    let set_b: BTreeSet<&String> = b.iter().collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    1.0 - intersection as f64 / union as f64
}

/// Mean over the union of trait keys of min(1, |va - vb|); a missing key
/// reads as intensity 0.
fn traits_distance(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    if keys.is_empty() {
        return 0.0;
    }
    let total: f64 = keys
        .iter()
        .map(|key| {
            let va = a.get(*key).copied().unwrap_or(0.0);
            let vb = b.get(*key).copied().unwrap_or(0.0);
            (va - vb).abs().min(1.0)
        })
        .sum();
    total / keys.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use aviary_sim::TokenHashEmbedder;

    fn persona(name: &str, age: i64, hobbies: &[&str]) -> Genotype {
        Genotype::new(name)
            .with("age", AttrValue::Int(age))
            .with(
                "hobbies",
                AttrValue::List(hobbies.iter().map(|s| s.to_string()).collect()),
            )
            .with("occupation", "barista".into())
    }

    #[test]
    fn distance_to_self_is_zero() {
        let g = persona("Aria", 25, &["sketching", "chess"]);
        assert_eq!(genotype_distance(&g, &g), 0.0);
    }

    #[test]
    fn distance_is_symmetric_and_bounded() {
        let a = persona("Aria", 25, &["sketching"]);
        let b = persona("Bram", 70, &["chess", "running"]);
        let d_ab = genotype_distance(&a, &b);
        let d_ba = genotype_distance(&b, &a);
        assert_eq!(d_ab, d_ba);
        assert!((0.0..=1.0).contains(&d_ab));
        assert!(d_ab > 0.0);
    }

    #[test]
    fn clones_with_different_names_are_attribute_equal() {
        let a = persona("Aria", 25, &["sketching"]);
        let mut b = a.clone();
        b.name = "Copy".to_string();
        assert_eq!(genotype_distance(&a, &b), 0.0);
    }

    #[test]
    fn age_distance_is_normalized_over_the_range() {
        let a = persona("A", 18, &[]);
        let b = persona("B", 80, &[]);
        // hobbies both empty (0), occupation equal (0), age maximal (1).
        let expected = 1.0 / 3.0;
        assert!((genotype_distance(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn missing_trait_keys_read_as_zero() {
        let mut traits_a = BTreeMap::new();
        traits_a.insert("openness".to_string(), 0.8);
        let a = Genotype::new("A").with("personality_traits", AttrValue::Traits(traits_a));
        let b = Genotype::new("B").with("personality_traits", AttrValue::Traits(BTreeMap::new()));
        assert!((genotype_distance(&a, &b) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn one_sided_scalar_counts_fully() {
        let a = Genotype::new("A").with("occupation", "barista".into());
        let b = Genotype::new("B");
        assert_eq!(genotype_distance(&a, &b), 1.0);
    }

    #[test]
    fn jaccard_of_two_empty_lists_is_zero() {
        assert_eq!(jaccard_distance(&[], &[]), 0.0);
        assert_eq!(jaccard_distance(&["a".into()], &[]), 1.0);
        assert_eq!(
            jaccard_distance(&["a".into(), "b".into()], &["b".into(), "c".into()]),
            1.0 - 1.0 / 3.0
        );
    }

    #[tokio::test]
    async fn identical_texts_have_zero_diversity() {
        let embedder = TokenHashEmbedder::default();
        let texts = vec!["same post".to_string(), "same post".to_string()];
        let diversity = textual_diversity(&embedder, &texts).await.unwrap();
        assert_eq!(diversity, 0.0);
    }

    #[tokio::test]
    async fn distinct_texts_have_positive_diversity() {
        let embedder = TokenHashEmbedder::default();
        let texts = vec![
            "espresso machines and latte art".to_string(),
            "orbital mechanics for beginners".to_string(),
        ];
        let diversity = textual_diversity(&embedder, &texts).await.unwrap();
        assert!(diversity > 0.0);
    }

    #[tokio::test]
    async fn fewer_than_two_nonempty_texts_score_zero() {
        let embedder = TokenHashEmbedder::default();
        assert_eq!(textual_diversity(&embedder, &[]).await.unwrap(), 0.0);
        let one = vec!["only one".to_string(), "   ".to_string()];
        assert_eq!(textual_diversity(&embedder, &one).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn population_diversity_needs_two_agents_with_content() {
        let embedder = TokenHashEmbedder::default();
        let mut agent_texts = BTreeMap::new();
        agent_texts.insert("Aria".to_string(), vec!["hello world".to_string()]);
        assert_eq!(
            population_diversity(&embedder, &agent_texts).await.unwrap(),
            0.0
        );
        agent_texts.insert(
            "Bram".to_string(),
            vec!["totally different vocabulary".to_string()],
        );
        assert!(
            population_diversity(&embedder, &agent_texts).await.unwrap() > 0.0
        );
    }
}
