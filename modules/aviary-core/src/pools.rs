//! Static value catalogs for the pool-based mutator.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Curated catalogs of candidate attribute values. A JSON file may override
/// any subset of the pools; omitted pools keep the built-in defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MutationPools {
    pub hobbies: Vec<String>,
    pub core_values: Vec<String>,
    pub goals: Vec<String>,
    pub communication_styles: Vec<String>,
    pub topical_focuses: Vec<String>,
    pub interaction_policies: Vec<String>,
    pub occupations: Vec<String>,
    pub life_events: Vec<String>,
    pub names: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for MutationPools {
    fn default() -> Self {
        Self {
            hobbies: strings(&[
                "urban sketching",
                "sourdough baking",
                "bouldering",
                "birdwatching",
                "film photography",
                "mechanical keyboards",
                "thrifting",
                "home fermentation",
                "trail running",
                "retro gaming",
                "houseplant collecting",
                "zine making",
                "astrophotography",
                "salsa dancing",
                "woodworking",
            ]),
            core_values: strings(&[
                "honesty",
                "curiosity",
                "loyalty",
                "independence",
                "kindness",
                "ambition",
                "humor",
                "sustainability",
                "craftsmanship",
                "community",
                "privacy",
                "fairness",
            ]),
            goals: strings(&[
                "grow a real following",
                "make one person laugh every day",
                "document the neighborhood",
                "find collaborators",
                "learn something new in public",
                "start a side business",
                "keep friends updated",
                "change one mind a week",
                "archive family recipes",
                "get better at writing",
            ]),
            communication_styles: strings(&[
                "dry and deadpan",
                "warm and rambling",
                "terse and punchy",
                "earnest and curious",
                "sarcastic with a soft center",
                "professorial but friendly",
                "hype and emoji-heavy",
                "quietly observational",
                "blunt and contrarian",
                "poetic and meandering",
            ]),
            topical_focuses: strings(&[
                "local food scenes",
                "open-source software",
                "climate adaptation",
                "indie music",
                "personal finance",
                "urban planning",
                "fitness culture",
                "media criticism",
                "space news",
                "vintage fashion",
                "language learning",
                "small-town life",
            ]),
            interaction_policies: strings(&[
                "ask a follow-up question before giving an opinion",
                "only reply when you can add a concrete fact",
                "defend the underdog position",
                "compliment first, critique second",
                "answer questions with a personal anecdote",
                "play devil's advocate politely",
                "boost posts from smaller accounts",
                "never argue past two exchanges",
                "turn disagreements into jokes",
                "share a resource whenever someone asks for help",
            ]),
            occupations: strings(&[
                "barista",
                "data analyst",
                "middle school teacher",
                "freelance illustrator",
                "paramedic",
                "librarian",
                "electrician",
                "product manager",
                "landscape gardener",
                "sound engineer",
                "pastry chef",
                "bike courier",
                "accountant",
                "museum guide",
                "carpenter",
            ]),
            life_events: strings(&[
                "Recently moved to a new city and is still learning its rhythms.",
                "Just adopted a rescue dog that now features in most plans.",
                "Went through a career change last year and talks about it often.",
                "Started therapy and became noticeably more reflective.",
                "Inherited a box of family letters and is slowly reading through them.",
                "Trained for and finished a first half-marathon.",
                "Lost a close friendship over politics and is still processing it.",
                "Took a pottery class on a whim and got genuinely hooked.",
                "Spent a month offline and now guards weekends fiercely.",
                "Won a small local award and pretends not to care about it.",
            ]),
            names: strings(&[
                "Marisol", "Dmitri", "Yuki", "Abena", "Lars", "Priya", "Tomas", "Ingrid",
                "Kofi", "Elif", "Rowan", "Chiara", "Mateo", "Saoirse", "Henrik", "Amara",
                "Jasper", "Noor", "Felix", "Catalina", "Oren", "Maeve", "Ravi", "Greta",
            ]),
        }
    }
}

impl MutationPools {
    /// Load pool overrides from a JSON file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading mutation pools from {}", path.display()))?;
        let pools: Self = serde_json::from_str(&data)
            .with_context(|| format!("parsing mutation pools from {}", path.display()))?;
        pools.validate()?;
        Ok(pools)
    }

    /// Every pool must offer at least one value; the mutator draws blindly.
    pub fn validate(&self) -> Result<()> {
        let pools: [(&str, &Vec<String>); 9] = [
            ("hobbies", &self.hobbies),
            ("core_values", &self.core_values),
            ("goals", &self.goals),
            ("communication_styles", &self.communication_styles),
            ("topical_focuses", &self.topical_focuses),
            ("interaction_policies", &self.interaction_policies),
            ("occupations", &self.occupations),
            ("life_events", &self.life_events),
            ("names", &self.names),
        ];
        for (name, values) in pools {
            if values.is_empty() {
                bail!("mutation pool '{name}' is empty");
            }
        }
        Ok(())
    }
}
