//! Episode topic generation, with a static fallback.

use std::time::Duration;

use aviary_sim::{generate_with_retry, prompt, strip_code_fences, GenerateOptions, TextBackend};
use tracing::{info, warn};

/// Shipped fallback used whenever topic generation fails.
pub const FALLBACK_TOPICS: [&str; 15] = [
    "AI Technology",
    "Climate Change",
    "Mental Health",
    "Space Exploration",
    "Food Culture",
    "Music and Art",
    "Education Reform",
    "Social Media Impact",
    "Remote Work",
    "Gaming Culture",
    "Science and Innovation",
    "Philosophy",
    "Entrepreneurship",
    "Digital Privacy",
    "Urban Living",
];

fn fallback() -> Vec<String> {
    FALLBACK_TOPICS.iter().map(|t| t.to_string()).collect()
}

/// Ask the backend for `count` distinct trending topics. Any failure falls
/// back to the static list.
pub async fn generate_topics(
    backend: &dyn TextBackend,
    count: usize,
    timeout: Duration,
) -> Vec<String> {
    let opts = GenerateOptions::new(timeout).with_temperature(0.9);
    let response = generate_with_retry(
        backend,
        prompt::topics_system(),
        &prompt::topics_user(count),
        &opts,
    )
    .await;

    let text = match response {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "topic generation failed, using fallback topics");
            return fallback();
        }
    };

    match serde_json::from_str::<Vec<String>>(strip_code_fences(&text)) {
        Ok(topics) if !topics.is_empty() => {
            info!(count = topics.len(), "generated episode topics");
            topics
        }
        Ok(_) => {
            warn!("topic generation returned an empty list, using fallback topics");
            fallback()
        }
        Err(e) => {
            warn!(error = %e, "topic response unparsable, using fallback topics");
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use aviary_sim::BackendError;

    struct CannedBackend(&'static str);

    #[async_trait]
    impl TextBackend for CannedBackend {
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
    async fn parses_a_json_array_of_topics() {
        let backend = CannedBackend(r#"["Fermentation drama", "Transit maps"]"#);
        let topics = generate_topics(&backend, 2, Duration::from_secs(5)).await;
        assert_eq!(topics, vec!["Fermentation drama", "Transit maps"]);
    }

    #[tokio::test]
    async fn garbage_falls_back_to_the_static_list() {
        let backend = CannedBackend("no json here");
        let topics = generate_topics(&backend, 5, Duration::from_secs(5)).await;
        assert_eq!(topics.len(), FALLBACK_TOPICS.len());
        assert_eq!(topics[0], "AI Technology");
    }
}
