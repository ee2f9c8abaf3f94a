//! Optional AI personalization appended to a rendered body.
//!
//! Fails open: `augment` returns the body untouched when no generator is
//! configured or when generation fails. `personalize` is the typed fallible
//! call; its error is discarded in exactly one place, inside `augment`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::contacts::Contact;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const MAX_TOKENS: u32 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_WORDS: usize = 35;
const MAX_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum AugmentError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Empty completion")]
    EmptyResponse,
}

/// External text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AugmentError>;
}

// ============================================================================
// OpenAI chat completions
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiClient {
    /// Build a client when a non-blank key is configured. No key, no client,
    /// and therefore no network call.
    pub fn from_api_key(api_key: Option<&str>) -> Option<Self> {
        let api_key = api_key.map(str::trim).filter(|k| !k.is_empty())?;
        match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => Some(Self {
                client,
                api_key: api_key.to_string(),
            }),
            Err(e) => {
                log::warn!("AI personalization disabled, HTTP client unavailable: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AugmentError> {
        let request = ChatRequest {
            model: DEFAULT_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: MAX_TOKENS,
        };

        let resp = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AugmentError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(AugmentError::EmptyResponse)
    }
}

// ============================================================================
// Personalization
// ============================================================================

pub fn build_prompt(contact: &Contact) -> String {
    format!(
        "Based on this contact info, write a brief, personalized sentence (max {} words) to add to a cold email:\n\
         Name: {} {}\n\
         Company: {}\n\
         Role: {}\n\
         Observation: {}\n\n\
         Write a natural, genuine-sounding personalization:",
        MAX_WORDS,
        contact.first_name,
        contact.last_name,
        contact.company,
        contact.role,
        contact.observation,
    )
}

/// Trim and bound a completion to the word and character limits.
pub fn bound_addendum(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let mut addendum = words[..words.len().min(MAX_WORDS)].join(" ");
    if addendum.chars().count() > MAX_CHARS {
        addendum = addendum.chars().take(MAX_CHARS - 3).collect::<String>();
        addendum.push_str("...");
    }
    Some(addendum)
}

/// Generate the addendum for one contact.
pub async fn personalize(
    contact: &Contact,
    generator: &dyn TextGenerator,
) -> Result<String, AugmentError> {
    let completion = generator.generate(&build_prompt(contact)).await?;
    bound_addendum(&completion).ok_or(AugmentError::EmptyResponse)
}

/// Append a personalized addendum after a blank line, or return `body`
/// unchanged when there is no generator or generation fails.
pub async fn augment(
    body: String,
    contact: &Contact,
    generator: Option<&dyn TextGenerator>,
) -> String {
    let Some(generator) = generator else {
        return body;
    };

    match personalize(contact, generator).await {
        Ok(addendum) => format!("{}\n\n{}", body, addendum),
        Err(e) => {
            log::warn!(
                "AI personalization skipped for {}: {}",
                contact.email,
                e
            );
            body
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedGenerator {
        reply: Result<String, u16>,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedGenerator {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                reply: Err(status),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, AugmentError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(AugmentError::Api {
                    status: *status,
                    message: "invalid_api_key".to_string(),
                }),
            }
        }
    }

    fn contact() -> Contact {
        Contact {
            first_name: "Ana".into(),
            last_name: "Silva".into(),
            company: "Acme".into(),
            role: "CTO".into(),
            observation: "launched a data platform".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_api_key_means_no_client() {
        assert!(OpenAiClient::from_api_key(None).is_none());
        assert!(OpenAiClient::from_api_key(Some("  ")).is_none());
    }

    #[tokio::test]
    async fn test_augment_without_generator_is_identity() {
        let body = "Hi Ana,\n\nBody text.".to_string();
        assert_eq!(augment(body.clone(), &contact(), None).await, body);
    }

    #[tokio::test]
    async fn test_augment_appends_after_blank_line() {
        let generator = FixedGenerator::ok("  Loved your data platform launch.\n");
        let result = augment("Hi Ana,".to_string(), &contact(), Some(&generator)).await;
        assert_eq!(result, "Hi Ana,\n\nLoved your data platform launch.");

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Name: Ana Silva"));
        assert!(prompts[0].contains("Company: Acme"));
        assert!(prompts[0].contains("Observation: launched a data platform"));
    }

    #[tokio::test]
    async fn test_augment_failure_returns_body_unchanged() {
        let generator = FixedGenerator::failing(401);
        let body = "Hi Ana,".to_string();
        assert_eq!(augment(body.clone(), &contact(), Some(&generator)).await, body);
    }

    #[tokio::test]
    async fn test_augment_blank_completion_is_skipped() {
        let generator = FixedGenerator::ok("   \n ");
        let body = "Hi Ana,".to_string();
        assert_eq!(augment(body.clone(), &contact(), Some(&generator)).await, body);
    }

    #[test]
    fn test_bound_addendum_word_limit() {
        let long = (1..=50).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let bounded = bound_addendum(&long).unwrap();
        assert_eq!(bounded.split_whitespace().count(), MAX_WORDS);
        assert!(bounded.ends_with("w35"));
    }

    #[test]
    fn test_bound_addendum_char_limit() {
        let long = "abcdefghij".repeat(30);
        let bounded = bound_addendum(&long).unwrap();
        assert_eq!(bounded.chars().count(), MAX_CHARS);
        assert!(bounded.ends_with("..."));
    }
}
