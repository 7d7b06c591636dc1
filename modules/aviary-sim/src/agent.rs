//! SimulationAgent — a persona participating in episodes.

use aviary_core::{compile, Genotype, Phenotype};
use tracing::debug;

use crate::backend::{generate_with_retry, BackendError, GenerateOptions, TextBackend};
use crate::prompt;

/// Wraps a genotype with its compiled phenotype and a per-episode memory of
/// the agent's own actions. Memory is cleared at episode end and is not fed
/// back into prompts.
pub struct SimulationAgent {
    genotype: Genotype,
    phenotype: Phenotype,
    system_prompt: String,
    memory: Vec<String>,
}

impl SimulationAgent {
    pub fn new(genotype: Genotype) -> Self {
        let phenotype = compile(&genotype);
        let system_prompt = format!(
            "{}\n\n{}",
            phenotype.system_prompt, phenotype.policy_instructions
        );
        Self {
            genotype,
            phenotype,
            system_prompt,
            memory: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.genotype.name
    }

    pub fn genotype(&self) -> &Genotype {
        &self.genotype
    }

    pub fn phenotype(&self) -> &Phenotype {
        &self.phenotype
    }

    /// Generate a new post on the episode topic.
    pub async fn compose_post(
        &self,
        backend: &dyn TextBackend,
        topic: &str,
        opts: &GenerateOptions,
    ) -> Result<String, BackendError> {
        let response =
            generate_with_retry(backend, &self.system_prompt, &prompt::post_user(topic), opts)
                .await?;
        let post = response.trim().to_string();
        debug!(author = self.name(), chars = post.len(), "composed post");
        Ok(post)
    }

    /// Generate a reply to another agent's feed entry.
    pub async fn compose_reply(
        &self,
        backend: &dyn TextBackend,
        target_author: &str,
        content: &str,
        opts: &GenerateOptions,
    ) -> Result<String, BackendError> {
        let response = generate_with_retry(
            backend,
            &self.system_prompt,
            &prompt::reply_user(target_author, content),
            opts,
        )
        .await?;
        let reply = response.trim().to_string();
        debug!(author = self.name(), target = target_author, "composed reply");
        Ok(reply)
    }

    /// Ask whether this persona would reply to a post. Anything without a
    /// clear "yes" counts as "no", which keeps agents selective.
    pub async fn decide_engage(
        &self,
        backend: &dyn TextBackend,
        target_author: &str,
        content: &str,
        opts: &GenerateOptions,
    ) -> Result<bool, BackendError> {
        let response = generate_with_retry(
            backend,
            &self.system_prompt,
            &prompt::engage_user(target_author, content),
            opts,
        )
        .await?;
        let engaged = response.to_lowercase().contains("yes");
        debug!(
            author = self.name(),
            target = target_author,
            engaged,
            "engage decision"
        );
        Ok(engaged)
    }

    pub fn remember(&mut self, action: &str) {
        self.memory.push(action.to_string());
    }

    pub fn memory(&self) -> &[String] {
        &self.memory
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }
}
