//! Run configuration consumed by the pipeline.
//!
//! The binary builds this from CLI flags and the environment (`.env` is
//! loaded first); the core only ever sees plain values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RunError;
use crate::pipeline::Templates;

/// Environment variable holding the text-generation API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable consulted when `--client-id` is not given.
pub const CLIENT_ID_ENV: &str = "OUTLOOK_CLIENT_ID";

pub const DEFAULT_SUBJECT: &str = "Quick question, {{first_name}}";

pub const DEFAULT_BODY: &str = "Hi {{first_name}},

I came across {{company}} and noticed {{observation}}.
As {{role}}, I thought you might be open to a short conversation.

Best regards,
";

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub excel: PathBuf,
    pub sheet: String,
    pub from_name: String,
    /// Logged only; Graph sends as the signed-in mailbox
    pub from_email: String,
    pub client_id: String,
    pub delay: Duration,
    pub max_attempts: u32,
    pub log_csv: PathBuf,
    pub ai_personalize: bool,
    pub openai_api_key: Option<String>,
    pub token_cache: PathBuf,
    pub templates: Templates,
}

impl RunConfig {
    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.client_id.trim().is_empty() {
            return Err(RunError::Configuration(format!(
                "a client id is required (--client-id or {})",
                CLIENT_ID_ENV
            )));
        }
        if self.sheet.trim().is_empty() {
            return Err(RunError::Configuration("sheet name is empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(RunError::Configuration("--max-attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// API key for augmentation, only when augmentation was requested.
    pub fn augmentation_key(&self) -> Option<&str> {
        if !self.ai_personalize {
            return None;
        }
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Read a template file, or fall back to the built-in text.
pub fn load_template(path: Option<&Path>, default: &str) -> Result<String, RunError> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|source| RunError::Template {
            path: path.to_path_buf(),
            source,
        }),
        None => Ok(default.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig {
            excel: PathBuf::from("contacts.xlsx"),
            sheet: "Sheet1".into(),
            from_name: "Sam".into(),
            from_email: "sam@example.com".into(),
            client_id: "client".into(),
            delay: Duration::from_millis(1000),
            max_attempts: 3,
            log_csv: PathBuf::from("log.csv"),
            ai_personalize: false,
            openai_api_key: Some("sk-test".into()),
            token_cache: PathBuf::from("token.json"),
            templates: Templates {
                subject: DEFAULT_SUBJECT.into(),
                body: DEFAULT_BODY.into(),
            },
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut missing_client = config();
        missing_client.client_id = " ".into();
        assert!(matches!(
            missing_client.validate(),
            Err(RunError::Configuration(_))
        ));

        let mut zero_attempts = config();
        zero_attempts.max_attempts = 0;
        assert!(zero_attempts.validate().is_err());
    }

    #[test]
    fn test_augmentation_key_requires_flag() {
        let mut cfg = config();
        assert_eq!(cfg.augmentation_key(), None);

        cfg.ai_personalize = true;
        assert_eq!(cfg.augmentation_key(), Some("sk-test"));

        cfg.openai_api_key = Some("".into());
        assert_eq!(cfg.augmentation_key(), None);
    }

    #[test]
    fn test_load_template() {
        assert_eq!(load_template(None, "fallback").unwrap(), "fallback");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subject.txt");
        std::fs::write(&path, "Hello {{first_name}}").unwrap();
        assert_eq!(load_template(Some(&path), "x").unwrap(), "Hello {{first_name}}");

        assert!(matches!(
            load_template(Some(&dir.path().join("missing.txt")), "x"),
            Err(RunError::Template { .. })
        ));
    }

    #[test]
    fn test_default_templates_render() {
        let contact = crate::contacts::Contact {
            first_name: "Ana".into(),
            ..Default::default()
        };
        let message =
            crate::template::render_message(DEFAULT_SUBJECT, DEFAULT_BODY, &contact).unwrap();
        assert_eq!(message.subject, "Quick question, Ana");
        assert!(message.body.starts_with("Hi Ana,"));
    }
}
