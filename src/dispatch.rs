//! Paced, retried draft submission.
//!
//! Every dispatch sleeps the pacing delay first, whether or not the previous
//! call failed. That sleep is the only rate limiter, which is why the batch
//! driver never dispatches concurrently.
//!
//! The session is checked before each attempt and renewed when its access
//! token has expired. A 401 gets one renewal and an immediate retry that does
//! not count against the retry bound.

use std::time::Duration;

use crate::microsoft_api::mail::{DraftId, MailService};
use crate::microsoft_api::{retry_delay, GraphError, RetryDecision, RetryPolicy, Session};
use crate::template::RenderedMessage;

pub const DEFAULT_PACING: Duration = Duration::from_millis(1000);

/// The operator the drafts are created for. Used for logging only; Graph
/// fills the sender from the signed-in mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("draft rejected: {0}")]
    Rejected(#[source] GraphError),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: GraphError,
    },
}

impl DispatchError {
    pub fn attempts(&self) -> Option<u32> {
        match self {
            DispatchError::RetriesExhausted { attempts, .. } => Some(*attempts),
            DispatchError::Rejected(_) => None,
        }
    }
}

pub struct Dispatcher<M> {
    service: M,
    pacing: Duration,
    policy: RetryPolicy,
}

impl<M: MailService> Dispatcher<M> {
    pub fn new(service: M) -> Self {
        Self {
            service,
            pacing: DEFAULT_PACING,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn service(&self) -> &M {
        &self.service
    }

    /// Create one draft for `recipient`, retrying transient failures.
    pub async fn dispatch(
        &self,
        session: &Session,
        from: &Identity,
        message: &RenderedMessage,
        recipient: &str,
    ) -> Result<DraftId, DispatchError> {
        tokio::time::sleep(self.pacing).await;

        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        let mut renewed = false;
        loop {
            if let Err(e) = session.valid_access_token().await {
                log::warn!("Could not renew expired access token: {}", e);
            }

            match self.service.create_draft(session, message, recipient).await {
                Ok(id) => {
                    log::debug!(
                        "Draft {} created in {}'s mailbox for {} (attempt {})",
                        id,
                        from.email,
                        recipient,
                        attempt
                    );
                    return Ok(id);
                }
                Err(GraphError::AuthExpired) if !renewed && session.can_renew() => {
                    renewed = true;
                    if let Err(e) = session.renew().await {
                        log::warn!("Access token rejected and renewal failed: {}", e);
                        return Err(DispatchError::Rejected(GraphError::AuthExpired));
                    }
                    log::info!("Access token rejected for {}; renewed, retrying", recipient);
                }
                Err(err) if err.retry_decision() == RetryDecision::Retryable => {
                    if attempt >= attempts {
                        return Err(DispatchError::RetriesExhausted {
                            attempts,
                            last: err,
                        });
                    }
                    let delay = retry_delay(attempt, &self.policy, err.retry_after());
                    log::warn!(
                        "draft for {} retry {}/{} after {} (sleep {:?})",
                        recipient,
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(DispatchError::Rejected(err)),
            }
        }
    }
}
