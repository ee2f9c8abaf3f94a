//! Batch driver: render → augment → dispatch → record, one contact at a time.
//!
//! Every per-row failure is contained here. Each contact yields exactly one
//! `DraftResult` and one log row before the next contact starts.

use crate::augment::{augment, TextGenerator};
use crate::contacts::Contact;
use crate::dispatch::{Dispatcher, Identity};
use crate::microsoft_api::mail::MailService;
use crate::microsoft_api::Session;
use crate::outcome::{DraftResult, DraftStatus, OutcomeLog};
use crate::template::{render_message, RenderedMessage};

/// Subject and body templates applied to every contact.
#[derive(Debug, Clone)]
pub struct Templates {
    pub subject: String,
    pub body: String,
}

/// What happened to one row, for progress output.
#[derive(Debug, Clone)]
pub struct RowReport {
    /// 1-based position in the contact list
    pub row: usize,
    pub result: DraftResult,
    /// Why the row failed, when it did
    pub error: Option<String>,
    /// Why the outcome log could not be written, when it could not
    pub log_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub log_failures: usize,
}

pub struct Pipeline<M> {
    templates: Templates,
    sender: Identity,
    dispatcher: Dispatcher<M>,
    generator: Option<Box<dyn TextGenerator>>,
    outcomes: OutcomeLog,
}

impl<M: MailService> Pipeline<M> {
    pub fn new(
        templates: Templates,
        sender: Identity,
        dispatcher: Dispatcher<M>,
        outcomes: OutcomeLog,
    ) -> Self {
        Self {
            templates,
            sender,
            dispatcher,
            generator: None,
            outcomes,
        }
    }

    /// Enable AI personalization.
    pub fn with_generator(mut self, generator: Box<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn outcomes(&self) -> &OutcomeLog {
        &self.outcomes
    }

    /// Process every contact in order.
    pub async fn run<F>(&self, session: &Session, contacts: &[Contact], mut on_row: F) -> RunSummary
    where
        F: FnMut(&RowReport),
    {
        let mut summary = RunSummary {
            total: contacts.len(),
            ..Default::default()
        };

        for (index, contact) in contacts.iter().enumerate() {
            let (result, error) = self.process_contact(session, contact).await;

            let log_error = match self.outcomes.record(&result) {
                Ok(()) => None,
                Err(e) => {
                    log::error!(
                        "Could not write outcome for {} to {}: {}",
                        result.email,
                        self.outcomes.path().display(),
                        e
                    );
                    summary.log_failures += 1;
                    Some(e.to_string())
                }
            };

            match result.status {
                DraftStatus::Success => summary.succeeded += 1,
                DraftStatus::Error => summary.failed += 1,
            }

            on_row(&RowReport {
                row: index + 1,
                result,
                error,
                log_error,
            });
        }

        log::info!(
            "Run finished: {} drafted, {} failed, {} total",
            summary.succeeded,
            summary.failed,
            summary.total
        );
        summary
    }

    /// Carry one contact to its terminal outcome. Never fails; failures are
    /// returned as an error-status result plus a reason.
    pub async fn process_contact(
        &self,
        session: &Session,
        contact: &Contact,
    ) -> (DraftResult, Option<String>) {
        let message = match render_message(&self.templates.subject, &self.templates.body, contact)
        {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Template error for {}: {}", contact.email, e);
                return (
                    DraftResult::failure(contact, ""),
                    Some(format!("template error: {}", e)),
                );
            }
        };

        let recipient = contact.email.trim();
        if recipient.is_empty() {
            return (
                DraftResult::failure(contact, &message.subject),
                Some("no email address".to_string()),
            );
        }

        let body = augment(message.body, contact, self.generator.as_deref()).await;
        let message = RenderedMessage {
            subject: message.subject,
            body,
        };

        match self
            .dispatcher
            .dispatch(session, &self.sender, &message, recipient)
            .await
        {
            Ok(draft_id) => (DraftResult::success(contact, &message.subject, draft_id), None),
            Err(e) => {
                log::warn!("Draft for {} failed: {}", recipient, e);
                (
                    DraftResult::failure(contact, &message.subject),
                    Some(e.to_string()),
                )
            }
        }
    }
}
