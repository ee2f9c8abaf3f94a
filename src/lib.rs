//! Batch creation of personalized Outlook drafts from a contact spreadsheet.
//!
//! Each contact is rendered, optionally augmented, and submitted as a draft
//! through Microsoft Graph. Every contact produces one row in the outcome log.

pub mod augment;
pub mod config;
pub mod contacts;
pub mod dispatch;
pub mod error;
pub mod microsoft_api;
pub mod outcome;
pub mod pipeline;
pub mod template;
