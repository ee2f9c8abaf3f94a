//! Append-only CSV log with one row per processed contact.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::contacts::Contact;

pub const HEADER: [&str; 6] = ["email", "company", "first_name", "subject", "draft_id", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStatus {
    Success,
    Error,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Success => "success",
            DraftStatus::Error => "error",
        }
    }
}

/// Terminal outcome for one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftResult {
    pub email: String,
    pub company: String,
    pub first_name: String,
    pub subject: String,
    pub draft_id: Option<String>,
    pub status: DraftStatus,
}

impl DraftResult {
    pub fn success(contact: &Contact, subject: &str, draft_id: String) -> Self {
        Self {
            email: contact.email.clone(),
            company: contact.company.clone(),
            first_name: contact.first_name.clone(),
            subject: subject.to_string(),
            draft_id: Some(draft_id),
            status: DraftStatus::Success,
        }
    }

    pub fn failure(contact: &Contact, subject: &str) -> Self {
        Self {
            email: contact.email.clone(),
            company: contact.company.clone(),
            first_name: contact.first_name.clone(),
            subject: subject.to_string(),
            draft_id: None,
            status: DraftStatus::Error,
        }
    }

    fn fields(&self) -> [&str; 6] {
        [
            self.email.as_str(),
            self.company.as_str(),
            self.first_name.as_str(),
            self.subject.as_str(),
            self.draft_id.as_deref().unwrap_or(""),
            self.status.as_str(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeLog {
    path: PathBuf,
}

impl OutcomeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one result, writing the header first for a new or empty file.
    pub fn record(&self, result: &DraftResult) -> std::io::Result<()> {
        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut chunk = String::new();
        if needs_header {
            push_row(&mut chunk, &HEADER);
        }
        push_row(&mut chunk, &result.fields());
        file.write_all(chunk.as_bytes())?;
        file.flush()
    }
}

fn push_row(out: &mut String, fields: &[&str]) {
    let row: Vec<Cow<'_, str>> = fields.iter().map(|f| csv_field(f)).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

/// RFC 4180 quoting.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}
