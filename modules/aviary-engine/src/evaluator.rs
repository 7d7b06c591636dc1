//! Per-individual fitness evaluation from episode transcripts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aviary_core::{FitnessScores, Genotype, TranscriptEvent};
use aviary_sim::{
    generate_with_retry, prompt, strip_code_fences, GenerateOptions, TextBackend, TextEmbedder,
};
use serde::Deserialize;
use tracing::warn;

use crate::diversity;

/// An evaluator's output. `degraded` marks a fallback path (judge parse
/// failure, embedding failure) so it can be surfaced in the stats.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub scores: FitnessScores,
    pub degraded: bool,
}

/// One-method evaluation capability. Concrete variants never error: a
/// failed evaluation degrades to fallback scores instead.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, genotype: &Genotype, transcript: &[TranscriptEvent]) -> Evaluation;
}

/// Collect the texts an individual authored in a transcript.
fn authored_texts(name: &str, transcript: &[TranscriptEvent]) -> Vec<String> {
    transcript
        .iter()
        .filter(|e| e.author() == name)
        .filter_map(|e| e.content().map(str::to_string))
        .collect()
}

/// Deterministic evaluator from transcript shape alone: activity count,
/// mean content length, and embedding diversity of the agent's own output.
pub struct HeuristicEvaluator {
    embedder: Arc<dyn TextEmbedder>,
}

impl HeuristicEvaluator {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Evaluator for HeuristicEvaluator {
    async fn evaluate(&self, genotype: &Genotype, transcript: &[TranscriptEvent]) -> Evaluation {
        let texts = authored_texts(&genotype.name, transcript);
        let k = texts.len();
        let mean_len = if k == 0 {
            0.0
        } else {
            texts.iter().map(|t| t.chars().count()).sum::<usize>() as f64 / k as f64
        };

        let mut degraded = false;
        let diversity = match diversity::textual_diversity(self.embedder.as_ref(), &texts).await {
            Ok(d) => d,
            Err(e) => {
                warn!(persona = %genotype.name, error = %e, "diversity embedding failed");
                degraded = true;
                0.0
            }
        };

        let scores = FitnessScores {
            engagement: (k as f64 * 0.2).min(1.0),
            conversation_quality: (mean_len / 100.0).min(1.0),
            diversity,
            persona_fidelity: 0.5,
            safety: 1.0,
            ..FitnessScores::default()
        };
        Evaluation { scores, degraded }
    }
}

/// The judge's JSON response. Unknown keys are ignored; missing keys read
/// as zero so a partial response still scores.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct JudgeScores {
    engagement: f64,
    conversation_quality: f64,
    persona_fidelity: f64,
    safety: f64,
}

impl Default for JudgeScores {
    fn default() -> Self {
        Self {
            engagement: 0.0,
            conversation_quality: 0.0,
            persona_fidelity: 0.0,
            safety: 1.0,
        }
    }
}

/// LLM-judge evaluator: one temperature-0 call per individual, scored
/// against the full transcript, with the embedding diversity dimension
/// computed locally.
pub struct BackendEvaluator {
    backend: Arc<dyn TextBackend>,
    embedder: Arc<dyn TextEmbedder>,
    opts: GenerateOptions,
}

impl BackendEvaluator {
    pub fn new(
        backend: Arc<dyn TextBackend>,
        embedder: Arc<dyn TextEmbedder>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            embedder,
            opts: GenerateOptions::new(timeout).with_temperature(0.0),
        }
    }

    fn fallback_scores() -> FitnessScores {
        FitnessScores {
            engagement: 0.1,
            safety: 1.0,
            conversation_quality: 0.0,
            diversity: 0.0,
            persona_fidelity: 0.0,
            ..FitnessScores::default()
        }
    }
}

#[async_trait]
impl Evaluator for BackendEvaluator {
    async fn evaluate(&self, genotype: &Genotype, transcript: &[TranscriptEvent]) -> Evaluation {
        let texts = authored_texts(&genotype.name, transcript);
        if texts.is_empty() {
            // Nothing to judge; scored as absent rather than degraded.
            return Evaluation {
                scores: FitnessScores::default(),
                degraded: false,
            };
        }

        let diversity_score =
            match diversity::textual_diversity(self.embedder.as_ref(), &texts).await {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(persona = %genotype.name, error = %e, "diversity embedding failed");
                    None
                }
            };

        let response = generate_with_retry(
            self.backend.as_ref(),
            prompt::judge_system(),
            &prompt::judge_user(genotype, transcript),
            &self.opts,
        )
        .await;

        let (judged, mut degraded) = match response {
            Ok(text) => match serde_json::from_str::<JudgeScores>(strip_code_fences(&text)) {
                Ok(parsed) => (parsed, false),
                Err(e) => {
                    warn!(persona = %genotype.name, error = %e, "judge response unparsable, using fallback scores");
                    return Evaluation {
                        scores: Self::fallback_scores(),
                        degraded: true,
                    };
                }
            },
            Err(e) => {
                warn!(persona = %genotype.name, error = %e, "judge call failed, using fallback scores");
                return Evaluation {
                    scores: Self::fallback_scores(),
                    degraded: true,
                };
            }
        };

        let scores = FitnessScores {
            engagement: judged.engagement.clamp(0.0, 1.0),
            conversation_quality: judged.conversation_quality.clamp(0.0, 1.0),
            persona_fidelity: judged.persona_fidelity.clamp(0.0, 1.0),
            safety: judged.safety.clamp(0.0, 1.0),
            diversity: diversity_score.unwrap_or(0.0),
            ..FitnessScores::default()
        };
        degraded |= diversity_score.is_none();
        Evaluation { scores, degraded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aviary_sim::{BackendError, TokenHashEmbedder};

    fn transcript_for(name: &str) -> Vec<TranscriptEvent> {
        vec![
            TranscriptEvent::Post {
                author: name.into(),
                content: "a".repeat(60),
            },
            TranscriptEvent::Reply {
                author: name.into(),
                target_author: "Other".into(),
                content: "b".repeat(40),
                reply_to: "x".into(),
            },
            TranscriptEvent::Pass {
                author: name.into(),
                target_author: "Other".into(),
            },
            TranscriptEvent::Post {
                author: "Other".into(),
                content: "not mine".into(),
            },
        ]
    }

    fn embedder() -> Arc<dyn TextEmbedder> {
        Arc::new(TokenHashEmbedder::default())
    }

    #[tokio::test]
    async fn heuristic_formulas_are_exact() {
        let evaluator = HeuristicEvaluator::new(embedder());
        let genotype = Genotype::new("Aria");
        let evaluation = evaluator.evaluate(&genotype, &transcript_for("Aria")).await;

        // Two authored events (post + reply); passes don't count.
        assert!((evaluation.scores.engagement - 0.4).abs() < 1e-9);
        // Mean length (60 + 40) / 2 = 50 chars.
        assert!((evaluation.scores.conversation_quality - 0.5).abs() < 1e-9);
        assert_eq!(evaluation.scores.persona_fidelity, 0.5);
        assert_eq!(evaluation.scores.safety, 1.0);
        assert!(evaluation.scores.diversity > 0.0);
        assert!(!evaluation.degraded);
    }

    #[tokio::test]
    async fn heuristic_engagement_saturates_at_one() {
        let evaluator = HeuristicEvaluator::new(embedder());
        let genotype = Genotype::new("Aria");
        let mut transcript = Vec::new();
        for i in 0..7 {
            transcript.push(TranscriptEvent::Post {
                author: "Aria".into(),
                content: format!("post number {i}"),
            });
        }
        let evaluation = evaluator.evaluate(&genotype, &transcript).await;
        assert_eq!(evaluation.scores.engagement, 1.0);
    }

    #[tokio::test]
    async fn heuristic_with_no_events_scores_zero_activity() {
        let evaluator = HeuristicEvaluator::new(embedder());
        let genotype = Genotype::new("Ghost");
        let evaluation = evaluator.evaluate(&genotype, &transcript_for("Aria")).await;
        assert_eq!(evaluation.scores.engagement, 0.0);
        assert_eq!(evaluation.scores.conversation_quality, 0.0);
        assert_eq!(evaluation.scores.diversity, 0.0);
    }

    struct CannedJudge(&'static str);

    #[async_trait]
    impl TextBackend for CannedJudge {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _opts: &GenerateOptions,
        ) -> Result<String, BackendError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn judge_parses_fenced_json() {
        let backend = Arc::new(CannedJudge(
            "```json\n{\"engagement\": 0.8, \"conversation_quality\": 0.7, \"persona_fidelity\": 0.6, \"safety\": 1.0}\n```",
        ));
        let evaluator = BackendEvaluator::new(backend, embedder(), Duration::from_secs(5));
        let genotype = Genotype::new("Aria");
        let evaluation = evaluator.evaluate(&genotype, &transcript_for("Aria")).await;
        assert!((evaluation.scores.engagement - 0.8).abs() < 1e-9);
        assert!((evaluation.scores.persona_fidelity - 0.6).abs() < 1e-9);
        assert!(!evaluation.degraded);
    }

    #[tokio::test]
    async fn judge_fallback_on_malformed_response() {
        let backend = Arc::new(CannedJudge("I refuse to produce JSON today."));
        let evaluator = BackendEvaluator::new(backend, embedder(), Duration::from_secs(5));
        let genotype = Genotype::new("Aria");
        let evaluation = evaluator.evaluate(&genotype, &transcript_for("Aria")).await;
        assert!((evaluation.scores.engagement - 0.1).abs() < 1e-9);
        assert_eq!(evaluation.scores.safety, 1.0);
        assert_eq!(evaluation.scores.conversation_quality, 0.0);
        assert!(evaluation.degraded);
    }

    #[tokio::test]
    async fn judge_scores_are_clamped() {
        let backend = Arc::new(CannedJudge(
            "{\"engagement\": 1.7, \"conversation_quality\": -0.2, \"persona_fidelity\": 0.5, \"safety\": 1.0}",
        ));
        let evaluator = BackendEvaluator::new(backend, embedder(), Duration::from_secs(5));
        let genotype = Genotype::new("Aria");
        let evaluation = evaluator.evaluate(&genotype, &transcript_for("Aria")).await;
        assert_eq!(evaluation.scores.engagement, 1.0);
        assert_eq!(evaluation.scores.conversation_quality, 0.0);
    }

    #[tokio::test]
    async fn judge_skips_individuals_with_no_contributions() {
        let backend = Arc::new(CannedJudge("{\"engagement\": 0.9}"));
        let evaluator = BackendEvaluator::new(backend, embedder(), Duration::from_secs(5));
        let genotype = Genotype::new("Ghost");
        let evaluation = evaluator.evaluate(&genotype, &transcript_for("Aria")).await;
        assert_eq!(evaluation.scores.engagement, 0.0);
        assert!(!evaluation.degraded);
    }
}
