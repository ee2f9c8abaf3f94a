//! Errors that end a run before or instead of processing rows.
//!
//! Per-row failures never show up here; the pipeline records them and moves
//! on. Fatal errors are classified by whether the operator must act:
//! - RequiresUserAction: bad client id, declined sign-in, bad input files
//! - Retryable: sign-in timed out, identity provider unreachable

use std::path::PathBuf;
use thiserror::Error;

use crate::contacts::ContactsError;
use crate::microsoft_api::auth::AuthError;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Template not readable: {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Contacts(#[from] ContactsError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl RunError {
    /// Returns true if running again unchanged may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunError::Auth(AuthError::Timeout)
                | RunError::Auth(AuthError::Http(_))
                | RunError::Auth(AuthError::Provider { .. })
        )
    }

    pub fn requires_user_action(&self) -> bool {
        !self.is_retryable()
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            RunError::Configuration(_) => "Check the command-line flags and your .env file.",
            RunError::Template { .. } => "Check the template file path and permissions.",
            RunError::Contacts(ContactsError::Sheet(_)) => {
                "Check the sheet name; it must match the workbook tab exactly."
            }
            RunError::Contacts(_) => "Check the spreadsheet path and format (.xlsx, .xls, .ods).",
            RunError::Auth(AuthError::Timeout) => {
                "Run again and complete the sign-in before the code expires."
            }
            RunError::Auth(AuthError::Denied) => "Run again and accept the consent prompt.",
            RunError::Auth(AuthError::ClientRejected { .. }) => {
                "Verify the Azure app client id and that public client flows are enabled."
            }
            RunError::Auth(AuthError::Cache(_)) => {
                "Check permissions on the token cache path, or pass --token-cache."
            }
            RunError::Auth(_) => "Check your internet connection and try again.",
            RunError::HttpClient(_) => "Check the system TLS and proxy configuration.",
        }
    }
}
