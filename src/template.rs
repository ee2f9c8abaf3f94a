//! Flat `{{placeholder}}` substitution for subject and body templates.
//!
//! Recognized names take the contact's value (empty when the cell was
//! empty). Unrecognized but well-formed names also render as the empty
//! string, so a literal `{{...}}` never reaches a recipient. Only malformed
//! syntax is an error.

use crate::contacts::Contact;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Subject and body after substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("unterminated placeholder at byte {offset}")]
    Unterminated { offset: usize },
    #[error("invalid placeholder name {name:?} at byte {offset}")]
    InvalidName { name: String, offset: usize },
}

/// Render a single template against a contact.
pub fn render(template: &str, contact: &Contact) -> Result<String, RenderError> {
    let mut output = String::with_capacity(template.len());
    let mut cursor = 0;

    while let Some(found) = template[cursor..].find(OPEN) {
        let start = cursor + found;
        output.push_str(&template[cursor..start]);

        let inner_start = start + OPEN.len();
        let inner_len = template[inner_start..]
            .find(CLOSE)
            .ok_or(RenderError::Unterminated { offset: start })?;
        let raw = &template[inner_start..inner_start + inner_len];
        let name = raw.trim();

        if !is_valid_name(name) {
            return Err(RenderError::InvalidName {
                name: raw.to_string(),
                offset: start,
            });
        }

        match contact.get(name) {
            Some(value) => output.push_str(value),
            None => log::debug!("Unknown placeholder '{}' rendered empty", name),
        }
        cursor = inner_start + inner_len + CLOSE.len();
    }

    output.push_str(&template[cursor..]);
    Ok(output)
}

/// Render the subject/body pair for one contact.
pub fn render_message(
    subject_template: &str,
    body_template: &str,
    contact: &Contact,
) -> Result<RenderedMessage, RenderError> {
    Ok(RenderedMessage {
        subject: render(subject_template, contact)?,
        body: render(body_template, contact)?,
    })
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
