//! Microsoft Graph mail: create unsent drafts.
//!
//! `POST /me/messages` stores a message in the Drafts folder without sending
//! it. There is deliberately no send call anywhere in this crate.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{http_client, parse_retry_after, GraphError, Session, GRAPH_ENDPOINT, REQUEST_TIMEOUT};
use crate::template::RenderedMessage;

/// Remote identifier Graph assigns to a created draft.
pub type DraftId = String;

// ============================================================================
// API request/response types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessageRequest<'a> {
    subject: &'a str,
    body: ItemBody<'a>,
    to_recipients: Vec<Recipient<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    email_address: EmailAddress<'a>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    address: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    #[serde(default)]
    id: String,
}

impl<'a> CreateMessageRequest<'a> {
    fn new(message: &'a RenderedMessage, recipient: &'a str) -> Self {
        Self {
            subject: &message.subject,
            body: ItemBody {
                content_type: "Text",
                content: &message.body,
            },
            to_recipients: vec![Recipient {
                email_address: EmailAddress { address: recipient },
            }],
        }
    }
}

// ============================================================================
// Mail service
// ============================================================================

/// The single remote mail operation the pipeline consumes.
#[async_trait]
pub trait MailService: Send + Sync {
    /// One create-draft attempt. Retrying is the caller's job.
    async fn create_draft(
        &self,
        session: &Session,
        message: &RenderedMessage,
        recipient: &str,
    ) -> Result<DraftId, GraphError>;
}

pub struct GraphMailClient {
    client: reqwest::Client,
    endpoint: String,
}

impl GraphMailClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_endpoint(GRAPH_ENDPOINT, REQUEST_TIMEOUT)
    }

    pub fn with_endpoint(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MailService for GraphMailClient {
    async fn create_draft(
        &self,
        session: &Session,
        message: &RenderedMessage,
        recipient: &str,
    ) -> Result<DraftId, GraphError> {
        let payload = CreateMessageRequest::new(message, recipient);

        let resp = self
            .client
            .post(format!("{}/me/messages", self.endpoint))
            .bearer_auth(session.access_token())
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            let created: CreatedMessage = resp.json().await?;
            if created.id.is_empty() {
                return Err(GraphError::InvalidResponse(
                    "draft created without an id".to_string(),
                ));
            }
            return Ok(created.id);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GraphError::AuthExpired);
        }

        let retry_after = parse_retry_after(resp.headers().get(reqwest::header::RETRY_AFTER));
        let body = resp.text().await.unwrap_or_default();
        Err(GraphError::ApiError {
            status: status.as_u16(),
            message: body,
            retry_after,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
