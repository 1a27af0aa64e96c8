use std::sync::{LazyLock, Mutex, PoisonError};

use coursechat_common::{ChatMessage, ChatRequest, ContextType, Error, Result, Sender};
use coursechat_config::ComposerConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use tracing::debug;

use crate::providers::PromptMessage;

const BASE_PROMPT: &str = "You are the assistant for an online coding bootcamp. Answer \
     questions about its programs, curriculum, pricing, schedule and enrollment accurately \
     and warmly. If you do not know something, say so and point the learner to an advisor. \
     Keep answers short enough to read comfortably in a chat window.";

const CONCISE_NOTE: &str = "This conversation is getting long. Keep this answer concise and \
     avoid repeating what has already been said.";

const FRUSTRATION_NOTE: &str = "The learner sounds frustrated. Slow down, acknowledge the \
     difficulty, and explain the next step as clearly as possible.";

static FRUSTRATION_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:frustrat(?:ed|ing)|confus(?:ed|ing)|annoy(?:ed|ing)|not working|doesn't work|does not work|still don't|stuck|ugh|useless)\b",
    )
    .expect("frustration regex should compile")
});

const STYLE_HINTS: &[&str] = &[
    "Open with the direct answer, then add one helpful detail.",
    "Use a friendly, conversational tone.",
    "If it helps, finish with a short suggestion for what to ask next.",
    "Prefer plain words over jargon.",
    "Use a short list only when it genuinely makes the answer clearer.",
];

fn context_fragment(kind: ContextType) -> &'static str {
    match kind {
        ContextType::CourseAdvising => {
            "You are acting as a course advisor. Help the learner choose a program that fits \
             their goals, background and schedule."
        }
        ContextType::TechnicalSupport => {
            "You are acting as technical support. Ask for the exact error or symptom, then walk \
             through fixes one step at a time."
        }
        ContextType::GeneralInquiry => {
            "Answer general questions about the school and route detailed requests to the \
             right team."
        }
        ContextType::LearningAssistance => {
            "You are acting as a tutor. Explain concepts with small examples and check \
             understanding rather than handing over full solutions."
        }
    }
}

/// Chooses the cosmetic phrasing hint appended to each system prompt.
pub trait StyleHints: Send + Sync {
    fn next_hint(&self) -> Option<&'static str>;
}

/// Picks hints uniformly at random; deterministic when seeded.
pub struct RandomStyleHints {
    rng: Mutex<StdRng>,
}

impl RandomStyleHints {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl StyleHints for RandomStyleHints {
    fn next_hint(&self) -> Option<&'static str> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Some(STYLE_HINTS[rng.random_range(0..STYLE_HINTS.len())])
    }
}

/// Builds the ordered `[system, ...history, user]` message list for a turn.
pub struct RequestComposer {
    config: ComposerConfig,
    style: Option<Box<dyn StyleHints>>,
}

impl RequestComposer {
    pub fn new(config: ComposerConfig) -> Self {
        let style: Option<Box<dyn StyleHints>> = match (config.style_hints, config.style_seed) {
            (false, _) => None,
            (true, Some(seed)) => Some(Box::new(RandomStyleHints::seeded(seed))),
            (true, None) => Some(Box::new(RandomStyleHints::from_entropy())),
        };
        Self { config, style }
    }

    pub fn with_style_hints(mut self, style: Option<Box<dyn StyleHints>>) -> Self {
        self.style = style;
        self
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Reject requests that must never reach the provider.
    pub fn validate(&self, request: &ChatRequest) -> Result<()> {
        if request.message.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".into()));
        }
        let chars = request.message.chars().count();
        if chars > self.config.max_message_chars {
            return Err(Error::Validation(format!(
                "message is {chars} characters, the limit is {}",
                self.config.max_message_chars
            )));
        }
        Ok(())
    }

    pub fn compose(&self, request: &ChatRequest) -> Result<Vec<PromptMessage>> {
        self.validate(request)?;

        let conversation: Vec<&ChatMessage> = request
            .conversation_history
            .iter()
            .filter(|m| m.sender != Sender::Tool)
            .collect();

        let history = self.trim_history(&conversation, &request.message);
        debug!(
            kept = history.len(),
            dropped = conversation.len() - history.len(),
            "history trimmed"
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::system(
            self.system_prompt(request, conversation.len()),
        ));
        messages.extend(history.iter().map(|m| match m.sender {
            Sender::Assistant => PromptMessage::assistant(&m.content),
            _ => PromptMessage::user(&m.content),
        }));
        messages.push(PromptMessage::user(&request.message));
        Ok(messages)
    }

    fn trim_history<'a>(&self, conversation: &[&'a ChatMessage], message: &str) -> Vec<&'a ChatMessage> {
        let start = conversation
            .len()
            .saturating_sub(self.config.max_history_messages);
        let mut history = conversation[start..].to_vec();

        let message_tokens = estimate_tokens(message);
        let mut history_tokens: usize = history.iter().map(|m| estimate_tokens(&m.content)).sum();
        while !history.is_empty() && history_tokens + message_tokens > self.config.max_history_tokens
        {
            let dropped = history.remove(0);
            history_tokens -= estimate_tokens(&dropped.content);
        }
        history
    }

    fn system_prompt(&self, request: &ChatRequest, turns: usize) -> String {
        let mut prompt = format!("{BASE_PROMPT}\n\n{}", context_fragment(request.context.kind));

        if turns > self.config.concise_after_turns {
            prompt.push_str("\n\n");
            prompt.push_str(CONCISE_NOTE);
        }
        if sounds_frustrated(&request.message) {
            prompt.push_str("\n\n");
            prompt.push_str(FRUSTRATION_NOTE);
        }
        if let Some(hint) = self.style.as_ref().and_then(|s| s.next_hint()) {
            prompt.push_str("\n\n");
            prompt.push_str(hint);
        }
        prompt
    }
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Whole-word match, so "through" or "enough" never count as "ugh".
fn sounds_frustrated(message: &str) -> bool {
    FRUSTRATION_WORDS.is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatRole;
    use coursechat_common::ChatContext;

    fn composer() -> RequestComposer {
        RequestComposer::new(ComposerConfig {
            style_hints: false,
            ..ComposerConfig::default()
        })
    }

    fn history(n: usize, len: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                let text = format!("{i:03}{}", "x".repeat(len.saturating_sub(3)));
                if i % 2 == 0 {
                    ChatMessage::user(text)
                } else {
                    ChatMessage::assistant(text)
                }
            })
            .collect()
    }

    #[test]
    fn rejects_empty_and_oversized_messages() {
        let composer = composer();
        for message in ["", "   \n"] {
            let err = composer.compose(&ChatRequest::new(message)).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }

        let err = composer
            .compose(&ChatRequest::new("a".repeat(2001)))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(composer.compose(&ChatRequest::new("a".repeat(2000))).is_ok());
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        assert!(composer().compose(&ChatRequest::new("é".repeat(2000))).is_ok());
    }

    #[test]
    fn orders_system_history_user() {
        let request = ChatRequest::new("And the price?").with_history(vec![
            ChatMessage::user("Tell me about the curriculum"),
            ChatMessage::assistant("It covers web development."),
        ]);
        let messages = composer().compose(&request).unwrap();

        let roles: Vec<ChatRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(messages[3].content, "And the price?");
    }

    #[test]
    fn tool_messages_never_reach_the_provider() {
        let request = ChatRequest::new("thanks").with_history(vec![
            ChatMessage::user("pricing?"),
            ChatMessage::new(Sender::Tool, "raw document text"),
            ChatMessage::assistant("Tuition is $9,800."),
        ]);
        let messages = composer().compose(&request).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| m.content != "raw document text"));
    }

    #[test]
    fn keeps_at_most_the_configured_number_of_turns() {
        let request = ChatRequest::new("latest").with_history(history(14, 10));
        let messages = composer().compose(&request).unwrap();
        assert_eq!(messages.len(), 1 + 10 + 1);
        assert!(messages[1].content.starts_with("004"));
    }

    #[test]
    fn long_history_is_trimmed_from_the_front_under_the_token_ceiling() {
        let composer = RequestComposer::new(ComposerConfig {
            max_history_tokens: 500,
            style_hints: false,
            ..ComposerConfig::default()
        });
        // 8 messages of 700 chars: 5600 chars, about 1400 tokens.
        let history = history(8, 700);
        let message = "What should I do next?";

        let untrimmed = RequestComposer::new(ComposerConfig {
            max_history_tokens: usize::MAX,
            style_hints: false,
            ..ComposerConfig::default()
        })
        .compose(&ChatRequest::new(message).with_history(history.clone()))
        .unwrap();
        let trimmed = composer
            .compose(&ChatRequest::new(message).with_history(history))
            .unwrap();

        assert!(trimmed.len() < untrimmed.len());
        assert_eq!(trimmed.len(), 1 + 2 + 1);
        assert!(trimmed[1].content.starts_with("006"));
        assert_eq!(trimmed.last().map(|m| m.content.as_str()), Some(message));
    }

    #[test]
    fn system_prompt_uses_context_fragment() {
        let request = ChatRequest::new("My build fails")
            .with_context(ChatContext::new(ContextType::TechnicalSupport));
        let messages = composer().compose(&request).unwrap();
        assert!(messages[0].content.contains("technical support"));
    }

    #[test]
    fn adaptive_notes() {
        let composer = composer();

        let short = composer.compose(&ChatRequest::new("hello")).unwrap();
        assert!(!short[0].content.contains(CONCISE_NOTE));
        assert!(!short[0].content.contains(FRUSTRATION_NOTE));

        let long = composer
            .compose(&ChatRequest::new("hello").with_history(history(6, 10)))
            .unwrap();
        assert!(long[0].content.contains(CONCISE_NOTE));

        let upset = composer
            .compose(&ChatRequest::new("Ugh, the login is STILL not working"))
            .unwrap();
        assert!(upset[0].content.contains(FRUSTRATION_NOTE));
    }

    #[test]
    fn frustration_words_match_whole_words_only() {
        let composer = composer();
        for calm in [
            "Can you walk me through the enrollment steps?",
            "Is one evening a week enough time?",
            "I thought the cohort started in May, though.",
        ] {
            let messages = composer.compose(&ChatRequest::new(calm)).unwrap();
            assert!(!messages[0].content.contains(FRUSTRATION_NOTE), "{calm}");
        }

        for upset in ["I'm stuck on step 3", "This is so confusing", "ugh."] {
            let messages = composer.compose(&ChatRequest::new(upset)).unwrap();
            assert!(messages[0].content.contains(FRUSTRATION_NOTE), "{upset}");
        }
    }

    #[test]
    fn seeded_style_hints_are_deterministic() {
        let config = ComposerConfig {
            style_seed: Some(7),
            ..ComposerConfig::default()
        };
        let a = RequestComposer::new(config.clone());
        let b = RequestComposer::new(config);
        let request = ChatRequest::new("hello");
        for _ in 0..5 {
            assert_eq!(
                a.compose(&request).unwrap()[0].content,
                b.compose(&request).unwrap()[0].content
            );
        }
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
