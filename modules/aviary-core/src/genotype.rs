//! Persona genotype — the evolvable unit — and its companions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Age bounds enforced by the mutation operators.
pub const AGE_MIN: i64 = 18;
pub const AGE_MAX: i64 = 80;

/// A single attribute value. The genotype admits arbitrary keys, so values
/// are a closed set of shapes rather than named record fields: scalars,
/// ordered string lists, or a trait-intensity map in [0,1].
///
/// `BTreeMap` keeps serialization byte-deterministic across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
    Traits(BTreeMap<String, f64>),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_traits(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            AttrValue::Traits(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(items: Vec<String>) -> Self {
        AttrValue::List(items)
    }
}

/// A structured, evolvable persona definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genotype {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Genotype {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttrValue) {
        self.attributes.insert(key.into(), value);
    }

    /// Builder-style setter used by seeds and tests.
    pub fn with(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn age(&self) -> Option<i64> {
        self.get("age").and_then(AttrValue::as_int)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttrValue::as_text)
    }

    pub fn list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(AttrValue::as_list)
    }

    pub fn personality_traits(&self) -> Option<&BTreeMap<String, f64>> {
        self.get("personality_traits").and_then(AttrValue::as_traits)
    }

    /// One-line summary used in judge and nickname prompts.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if let Some(age) = self.age() {
            parts.push(format!("age {age}"));
        }
        for key in ["occupation", "communication_style", "topical_focus"] {
            if let Some(value) = self.text(key) {
                parts.push(value.to_string());
            }
        }
        parts.join(", ")
    }
}

/// Compiled prompt pair used by the backend at simulation time.
/// Derived purely from the genotype, never mutated independently.
#[derive(Debug, Clone, PartialEq)]
pub struct Phenotype {
    pub system_prompt: String,
    pub policy_instructions: String,
}

/// Multi-layer scorecard for one individual. All scores live in [0,1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessScores {
    pub engagement: f64,
    pub conversation_quality: f64,
    pub diversity: f64,
    pub persona_fidelity: f64,
    pub safety: f64,
    pub social_intelligence: f64,
    pub goal_achievement: f64,
    pub novelty: f64,
}

impl Default for FitnessScores {
    fn default() -> Self {
        Self {
            engagement: 0.0,
            conversation_quality: 0.0,
            diversity: 0.0,
            persona_fidelity: 0.0,
            safety: 1.0,
            social_intelligence: 0.0,
            goal_achievement: 0.0,
            novelty: 0.0,
        }
    }
}

impl FitnessScores {
    /// Every dimension a fitness weight may address.
    pub const DIMENSIONS: [&'static str; 8] = [
        "engagement",
        "conversation_quality",
        "diversity",
        "persona_fidelity",
        "safety",
        "social_intelligence",
        "goal_achievement",
        "novelty",
    ];

    pub fn get(&self, dimension: &str) -> Option<f64> {
        match dimension {
            "engagement" => Some(self.engagement),
            "conversation_quality" => Some(self.conversation_quality),
            "diversity" => Some(self.diversity),
            "persona_fidelity" => Some(self.persona_fidelity),
            "safety" => Some(self.safety),
            "social_intelligence" => Some(self.social_intelligence),
            "goal_achievement" => Some(self.goal_achievement),
            "novelty" => Some(self.novelty),
            _ => None,
        }
    }
}

/// One member of the live population for one generation.
#[derive(Debug, Clone)]
pub struct Individual {
    pub genotype: Genotype,
    pub phenotype: Phenotype,
    pub scores: FitnessScores,
    pub raw_fitness: f64,
    pub shared_fitness: f64,
    /// True when any backend call behind this individual's scores fell back.
    pub degraded: bool,
}

impl Individual {
    pub fn new(genotype: Genotype) -> Self {
        let phenotype = crate::compiler::compile(&genotype);
        Self {
            genotype,
            phenotype,
            scores: FitnessScores::default(),
            raw_fitness: 0.0,
            shared_fitness: 0.0,
            degraded: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.genotype.name
    }
}
