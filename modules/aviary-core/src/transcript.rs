//! Transcript events emitted by a group episode.

use serde::{Deserialize, Serialize};

/// One event in an episode transcript.
///
/// A `reply` records both who it answered (`target_author`) and the text it
/// answered (`reply_to`), so transcripts stay readable without the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEvent {
    Post {
        author: String,
        content: String,
    },
    Reply {
        author: String,
        target_author: String,
        content: String,
        reply_to: String,
    },
    Pass {
        author: String,
        target_author: String,
    },
}

impl TranscriptEvent {
    pub fn author(&self) -> &str {
        match self {
            TranscriptEvent::Post { author, .. }
            | TranscriptEvent::Reply { author, .. }
            | TranscriptEvent::Pass { author, .. } => author,
        }
    }

    /// Authored text, if any. Passes carry no content.
    pub fn content(&self) -> Option<&str> {
        match self {
            TranscriptEvent::Post { content, .. } | TranscriptEvent::Reply { content, .. } => {
                Some(content)
            }
            TranscriptEvent::Pass { .. } => None,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, TranscriptEvent::Pass { .. })
    }
}

/// Check the ordering invariant: every reply's target must already have
/// authored a post or reply earlier in the transcript.
pub fn reply_targets_precede(events: &[TranscriptEvent]) -> bool {
    let mut seen: Vec<&str> = Vec::new();
    for event in events {
        if let TranscriptEvent::Reply { target_author, .. } = event {
            if !seen.contains(&target_author.as_str()) {
                return false;
            }
        }
        if !event.is_pass() {
            seen.push(event.author());
        }
    }
    true
}
