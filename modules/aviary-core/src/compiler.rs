//! Genotype → phenotype compilation.
//!
//! Pure template substitution: the same genotype always renders to
//! byte-identical prompts. Missing recognized attributes are skipped,
//! unrecognized ones land verbatim in an "Additional attributes" section.

use crate::genotype::{AttrValue, Genotype, Phenotype};

/// Keys the identity and policy templates render explicitly. Everything
/// else goes through the additional-attributes section.
const RECOGNIZED: [&str; 10] = [
    "age",
    "occupation",
    "backstory",
    "core_values",
    "hobbies",
    "personality_traits",
    "communication_style",
    "topical_focus",
    "interaction_policy",
    "goals",
];

/// Compile a genotype into its prompt pair.
pub fn compile(genotype: &Genotype) -> Phenotype {
    Phenotype {
        system_prompt: identity_block(genotype),
        policy_instructions: policy_block(genotype),
    }
}

fn identity_block(genotype: &Genotype) -> String {
    let mut lines = vec![
        "You are a user on a social network. Fully embody the following character.".to_string(),
        String::new(),
        format!("## {}", genotype.name),
    ];

    if let Some(age) = genotype.age() {
        lines.push(format!("Age: {age}"));
    }
    if let Some(occupation) = genotype.text("occupation") {
        lines.push(format!("Occupation: {occupation}"));
    }
    if let Some(backstory) = genotype.text("backstory") {
        lines.push(format!("Backstory: {backstory}"));
    }
    if let Some(values) = genotype.list("core_values") {
        lines.push(format!("Core values: {}", values.join(", ")));
    }
    if let Some(hobbies) = genotype.list("hobbies") {
        lines.push(format!("Hobbies: {}", hobbies.join(", ")));
    }
    if let Some(traits) = genotype.personality_traits() {
        let rendered: Vec<String> = traits
            .iter()
            .map(|(name, intensity)| format!("{name} {intensity:.2}"))
            .collect();
        lines.push(format!("Personality: {}", rendered.join(", ")));
    }
    if let Some(style) = genotype.text("communication_style") {
        lines.push(format!("Communication style: {style}"));
    }

    let extras: Vec<String> = genotype
        .attributes
        .iter()
        .filter(|(key, _)| !RECOGNIZED.contains(&key.as_str()))
        .map(|(key, value)| format!("{}: {}", humanize_key(key), render_value(value)))
        .collect();
    if !extras.is_empty() {
        lines.push(String::new());
        lines.push("Additional attributes:".to_string());
        lines.extend(extras);
    }

    lines.push(String::new());
    lines.push("Rules:".to_string());
    lines.push("1. Always stay in character as this person.".to_string());
    lines.push("2. Never reveal that you are an AI.".to_string());
    lines.push(
        "3. Write in a natural SNS style, not too polished and not too formal.".to_string(),
    );
    lines.push(
        "4. Keep posts concise; one to three sentences is typical, the occasional longer post is fine."
            .to_string(),
    );

    lines.join("\n")
}

fn policy_block(genotype: &Genotype) -> String {
    let mut lines = Vec::new();

    if let Some(goals) = genotype.list("goals") {
        if !goals.is_empty() {
            lines.push(format!("Primary goal: {}", goals.join("; ")));
        }
    }
    if let Some(focus) = genotype.text("topical_focus") {
        lines.push(format!("Topical focus: {focus}"));
    }
    if let Some(policy) = genotype.text("interaction_policy") {
        lines.push(format!("Interaction rule: {policy}"));
    }
    lines.push(
        "Consistency rule: keep your opinions, tone, and history consistent with your character across the whole conversation."
            .to_string(),
    );

    lines.join("\n")
}

fn render_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Int(n) => n.to_string(),
        AttrValue::Float(x) => x.to_string(),
        AttrValue::Bool(b) => b.to_string(),
        AttrValue::Text(s) => s.clone(),
        AttrValue::List(items) => items.join(", "),
        AttrValue::Traits(map) => map
            .iter()
            .map(|(name, intensity)| format!("{name} {intensity:.2}"))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// `favorite_quote` → `Favorite Quote`.
fn humanize_key(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
