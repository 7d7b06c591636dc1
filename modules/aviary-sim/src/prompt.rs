//! Prompt templates for simulation, judging, and persona generation.

use aviary_core::{Genotype, TranscriptEvent};

/// User prompt asking an agent for a new post on a topic.
pub fn post_user(topic: &str) -> String {
    format!(
        "People on your feed are talking about: {topic}\n\n\
         Write a new post in your own voice. It can engage with the topic head-on, \
         take a tangent, or react to the discourse around it.\n\
         Output ONLY the post text."
    )
}

/// User prompt asking an agent to reply to another user's post.
pub fn reply_user(target_author: &str, content: &str) -> String {
    format!(
        "{target_author} posted: \"{content}\"\n\n\
         Write your reply in your own voice. Output ONLY the reply text."
    )
}

/// User prompt for the engage decision. The answer is parsed for "yes".
pub fn engage_user(target_author: &str, content: &str) -> String {
    format!(
        "{target_author} posted: \"{content}\"\n\n\
         Would you reply to this post? Answer only 'yes' or 'no'."
    )
}

pub fn topics_system() -> &'static str {
    "You are a social media trend analyst."
}

pub fn topics_user(count: usize) -> String {
    format!(
        "Generate exactly {count} diverse, specific trending discussion topics \
         that people might debate on social media right now. \
         Cover different domains (tech, culture, science, politics, lifestyle, etc.). \
         Return ONLY a JSON array of strings, e.g. [\"topic1\", \"topic2\"]. \
         No markdown, no explanation."
    )
}

pub fn nickname_system() -> &'static str {
    "You are a creative username generator."
}

pub fn nickname_user(persona_summary: &str) -> String {
    format!(
        "Create a short, creative social-media nickname (one word, no spaces, \
         no special characters) for this person:\n{persona_summary}\n\n\
         Reply with ONLY the nickname, nothing else."
    )
}

pub fn mutate_system() -> &'static str {
    "You are a creative character designer for social media simulations."
}

pub fn mutate_user(genotype_json: &str) -> String {
    format!(
        "Here is a social media persona as JSON:\n\n{genotype_json}\n\n\
         Create a slightly different variation of this persona. Change one or two \
         aspects (a trait, a hobby, their style, a goal) while keeping the overall \
         identity coherent, and give them a fresh unique name.\n\
         Return ONLY valid JSON with the same shape: \
         {{\"name\": \"...\", \"attributes\": {{...}}}}."
    )
}

pub fn seeds_system() -> &'static str {
    "You are an expert character designer for social media simulations."
}

pub fn seeds_user(count: usize) -> String {
    format!(
        "Generate exactly {count} diverse, unique social media user personas.\n\
         Each persona must be a JSON object with a \"name\" string and an \
         \"attributes\" object containing traits like: age, occupation, backstory, \
         core_values (list), hobbies (list), personality_traits (map of trait name \
         to a number in [0,1]), communication_style, topical_focus, \
         interaction_policy, goals (list).\n\n\
         Make the personas feel like REAL users, not idealized characters. Mix \
         ages, backgrounds, motivations, and posting styles. Some very active, \
         some lurkers. Some opinionated, some chill.\n\n\
         Return ONLY a JSON array of {count} objects. No markdown, no explanation."
    )
}

pub fn judge_system() -> &'static str {
    "You are an expert judge of social media content. \
     Evaluate how realistic, engaging, and interesting a user's posts and replies are."
}

/// Build the judge prompt: persona summary, the user's own contributions,
/// and the full conversation for context.
pub fn judge_user(genotype: &Genotype, transcript: &[TranscriptEvent]) -> String {
    let name = &genotype.name;

    let mut posts = Vec::new();
    let mut replies = Vec::new();
    for event in transcript {
        match event {
            TranscriptEvent::Post { author, content } if author == name => {
                posts.push(format!("- {content}"));
            }
            TranscriptEvent::Reply {
                author,
                target_author,
                content,
                ..
            } if author == name => {
                replies.push(format!("- [to {target_author}] {content}"));
            }
            _ => {}
        }
    }

    let conversation: Vec<String> = transcript
        .iter()
        .filter(|e| !e.is_pass())
        .filter_map(|e| e.content().map(|c| format!("{}: {c}", e.author())))
        .collect();

    let posts = if posts.is_empty() {
        "(no posts)".to_string()
    } else {
        posts.join("\n")
    };
    let replies = if replies.is_empty() {
        "(no replies)".to_string()
    } else {
        replies.join("\n")
    };

    format!(
        "**User being evaluated:** {summary}\n\n\
         **Their posts:**\n{posts}\n\n\
         **Their replies:**\n{replies}\n\n\
         **Full conversation context:**\n{conversation}\n\n\
         **Task:**\n\
         Rate this user's content on a 0.0 to 1.0 scale:\n\
         - engagement: how actively did this user participate?\n\
         - conversation_quality: are their posts and replies interesting, natural, \
         and do they add to the discussion?\n\
         - persona_fidelity: do their contributions stay consistent with the \
         persona described above?\n\
         - safety: is the content safe and non-toxic? (1.0 = safe, 0.0 = toxic)\n\n\
         Return JSON only: {{\"engagement\": float, \"conversation_quality\": float, \
         \"persona_fidelity\": float, \"safety\": float}}",
        summary = genotype.summary(),
        conversation = conversation.join("\n"),
    )
}
