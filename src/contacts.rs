//! Contact rows and the spreadsheet loader that produces them.
//!
//! The first row of the sheet is the header. Header cells are normalized
//! (`"First Name"` → `first_name`) and matched against the fixed attribute
//! set; other columns are ignored.

use std::path::{Path, PathBuf};

/// Attribute names a template may reference.
pub const ATTRIBUTES: &[&str] = &[
    "first_name",
    "last_name",
    "email",
    "company",
    "role",
    "observation",
];

/// One spreadsheet row. Missing cells are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: String,
    pub role: String,
    pub observation: String,
}

impl Contact {
    /// Value of a recognized attribute, `None` for names outside the set.
    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match name {
            "first_name" => &self.first_name,
            "last_name" => &self.last_name,
            "email" => &self.email,
            "company" => &self.company,
            "role" => &self.role,
            "observation" => &self.observation,
            _ => return None,
        };
        Some(value.as_str())
    }

    fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            "first_name" => &mut self.first_name,
            "last_name" => &mut self.last_name,
            "email" => &mut self.email,
            "company" => &mut self.company,
            "role" => &mut self.role,
            "observation" => &mut self.observation,
            _ => return,
        };
        *slot = value;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContactsError {
    #[error("Contact list not found: {0}")]
    NotFound(PathBuf),
    #[error("Could not open workbook {path}: {message}")]
    Workbook { path: PathBuf, message: String },
    #[error("Sheet '{0}' not found or unreadable")]
    Sheet(String),
    #[error("Sheet '{0}' has no header row")]
    MissingHeader(String),
}

/// Load contacts from one sheet of an `.xlsx`/`.xls`/`.ods` workbook.
pub fn load_contacts(path: &Path, sheet: &str) -> Result<Vec<Contact>, ContactsError> {
    use calamine::{open_workbook_auto, Reader};

    if !path.exists() {
        return Err(ContactsError::NotFound(path.to_path_buf()));
    }

    let mut workbook = open_workbook_auto(path).map_err(|e| ContactsError::Workbook {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let range = workbook.worksheet_range(sheet).map_err(|e| {
        log::debug!("worksheet_range({}) failed: {}", sheet, e);
        ContactsError::Sheet(sheet.to_string())
    })?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .ok_or_else(|| ContactsError::MissingHeader(sheet.to_string()))?
        .iter()
        .map(cell_to_string)
        .collect();

    let contacts = contacts_from_rows(
        &header,
        rows.map(|row| row.iter().map(cell_to_string).collect()),
    );
    log::info!("Loaded {} contacts from {} [{}]", contacts.len(), path.display(), sheet);
    Ok(contacts)
}

/// Map stringified rows onto contacts using the header. Blank rows are skipped.
pub fn contacts_from_rows<I>(header: &[String], rows: I) -> Vec<Contact>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let columns: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
    for column in columns.iter().filter(|c| !c.is_empty()) {
        if !ATTRIBUTES.contains(&column.as_str()) {
            log::debug!("Ignoring column '{}'", column);
        }
    }

    rows.into_iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            let mut contact = Contact::default();
            for (column, value) in columns.iter().zip(row) {
                contact.set(column, value.trim().to_string());
            }
            contact
        })
        .collect()
}

/// `" First Name "` → `first_name`.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => format_float(*f),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Spreadsheets store whole numbers as floats; drop the `.0`.
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.0}", f)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header(" First Name "), "first_name");
        assert_eq!(normalize_header("EMAIL"), "email");
        assert_eq!(normalize_header("last-name"), "last_name");
    }

    #[test]
    fn test_contacts_from_rows_maps_columns() {
        let header = strings(&["First Name", "Email", "Company", "Notes"]);
        let rows = vec![
            strings(&["Ana", "ana@acme.com", "Acme", "ignored"]),
            strings(&["", "bo@beta.io", "", ""]),
        ];

        let contacts = contacts_from_rows(&header, rows);
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].first_name, "Ana");
        assert_eq!(contacts[0].email, "ana@acme.com");
        assert_eq!(contacts[0].company, "Acme");
        assert_eq!(contacts[0].role, "");
        assert_eq!(contacts[1].first_name, "");
        assert_eq!(contacts[1].email, "bo@beta.io");
    }

    #[test]
    fn test_contacts_from_rows_skips_blank_rows_and_short_rows() {
        let header = strings(&["email", "role"]);
        let rows = vec![strings(&["", "  "]), strings(&["cy@x.com"])];

        let contacts = contacts_from_rows(&header, rows);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email, "cy@x.com");
        assert_eq!(contacts[0].role, "");
    }

    #[test]
    fn test_contact_get() {
        let contact = Contact {
            first_name: "Ana".into(),
            ..Default::default()
        };
        assert_eq!(contact.get("first_name"), Some("Ana"));
        assert_eq!(contact.get("company"), Some(""));
        assert_eq!(contact.get("favourite_color"), None);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(42.0), "42");
        assert_eq!(format_float(3.5), "3.5");
    }

    #[test]
    fn test_load_contacts_missing_file() {
        let err = load_contacts(Path::new("/nonexistent/contacts.xlsx"), "Sheet1").unwrap_err();
        assert!(matches!(err, ContactsError::NotFound(_)));
    }
}
