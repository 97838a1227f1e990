use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::mapper::{SEPARATOR, hidden_file_fragment};

/// An uploaded metadata file and the column headers read from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFile {
    pub file_id: String,
    pub file_name: String,
    pub columns: Vec<String>,
}

/// One checkbox on the mapping page.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnOption {
    pub column: String,
    /// Submitted as `column_select` / `join_select`
    pub value: String,
}

impl MetadataFile {
    /// Pair the uploaded contents with the id the file service assigned.
    ///
    /// Column names may not contain `;`, the separator of the mapping form
    /// values.
    pub fn from_upload(file_id: &str, file_name: &str, contents: &[u8]) -> Result<Self> {
        let columns = read_header_row(contents)
            .map_err(|e| AppError::Validation(format!("{}: {}", file_name, e)))?;

        if let Some(column) = columns.iter().find(|c| c.contains(SEPARATOR)) {
            return Err(AppError::Validation(format!(
                "{}: column \"{}\" contains '{}', please rename it",
                file_name, column, SEPARATOR
            )));
        }

        Ok(MetadataFile {
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            columns,
        })
    }

    /// Form values for the mapping page, in column order.
    pub fn column_options(&self) -> Vec<ColumnOption> {
        let fragment = hidden_file_fragment(&self.file_id);
        self.columns
            .iter()
            .map(|column| ColumnOption {
                column: column.clone(),
                value: format!("{}{}{}", column, SEPARATOR, fragment),
            })
            .collect()
    }
}

/// Read the column headers from the first line of a CSV file
///
/// Handles quoted fields with `""` escapes, a UTF-8 byte order mark and CRLF
/// line endings. Headers are trimmed.
///
/// # Errors
/// * `Validation` if the file is empty, not UTF-8, or the header row is blank
pub fn read_header_row(contents: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(contents)
        .map_err(|_| AppError::Validation("file is not valid UTF-8 text".to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let line = first_record(text);
    if line.trim().is_empty() {
        return Err(AppError::Validation("file has no header row".to_string()));
    }

    Ok(parse_csv_row(line)
        .into_iter()
        .map(|field| field.trim().to_string())
        .collect())
}

// First record, allowing newlines inside quoted fields
fn first_record(text: &str) -> &str {
    let mut in_quotes = false;
    for (idx, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\n' if !in_quotes => return text[..idx].trim_end_matches('\r'),
            _ => {}
        }
    }
    text.trim_end_matches('\r')
}

// Parse a CSV row into a vector of strings
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Escaped quote inside a quoted field
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }

    result.push(current_field);
    result
}
