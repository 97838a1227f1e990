//! Column-to-join mapping for metadata files.
//!
//! The mapping page submits every ticked column as a `column_select` value and
//! every join-key column as a `join_select` value. Each value carries the column
//! name and the owning file id in one string:
//!
//! ```text
//! <column>;<input type="hidden" name="file_id" value="<file_id>">
//! ```
//!
//! This module turns those values into a [`JoinSpec`], which serialises to the
//! flattened `file_id_N` / `columns_for_file_N` / `join_column_for_file_N`
//! object expected by the join service.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

use crate::error::{AppError, Result};

/// Separates the column name from the hidden-input fragment.
pub const SEPARATOR: char = ';';

/// Marker preceding the file id inside the hidden-input fragment.
pub const VALUE_MARKER: &str = "value=\"";

/// Number of characters trailing the id in the fragment (`"` and `>`).
const FRAGMENT_SUFFIX_LEN: usize = 2;

/// A column picked by the user, tied to the file it comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSelection {
    /// Column header as read from the uploaded file
    pub column: String,

    /// Identifier assigned to the file by the file service
    pub file_id: String,
}

impl ColumnSelection {
    /// Parse a `column_select` / `join_select` form value
    ///
    /// The value is split at the first `;`. The left side is the column name,
    /// the right side is the hidden-input fragment holding the file id.
    ///
    /// # Errors
    /// * `MalformedInput` if the separator is missing or the fragment holds no id
    ///
    /// # Examples
    /// ```
    /// use datacollab::mapper::ColumnSelection;
    ///
    /// let sel = ColumnSelection::parse_form_value(
    ///     r#"station;<input type="hidden" name="file_id" value="f1">"#,
    /// ).unwrap();
    /// assert_eq!(sel.column, "station");
    /// assert_eq!(sel.file_id, "f1");
    /// ```
    pub fn parse_form_value(raw: &str) -> Result<Self> {
        let (column, fragment) = raw.split_once(SEPARATOR).ok_or_else(|| {
            AppError::MalformedInput(format!("missing ';' separator in \"{}\"", raw))
        })?;

        if column.is_empty() {
            return Err(AppError::MalformedInput(format!(
                "empty column name in \"{}\"",
                raw
            )));
        }

        Ok(ColumnSelection {
            column: column.to_string(),
            file_id: extract_file_id(fragment)?,
        })
    }
}

/// Recover the file id embedded in a hidden-input fragment
///
/// Takes everything after the first `value="` and drops the last two
/// characters.
///
/// # Errors
/// * `MalformedInput` if the marker is absent or nothing remains after trimming
pub fn extract_file_id(fragment: &str) -> Result<String> {
    let start = fragment.find(VALUE_MARKER).ok_or_else(|| {
        AppError::MalformedInput(format!("no file id marker in \"{}\"", fragment))
    })?;
    let rest = &fragment[start + VALUE_MARKER.len()..];

    let keep = rest.chars().count().saturating_sub(FRAGMENT_SUFFIX_LEN);
    let id: String = rest.chars().take(keep).collect();

    if id.is_empty() {
        return Err(AppError::MalformedInput(format!(
            "empty file id in \"{}\"",
            fragment
        )));
    }
    Ok(id)
}

/// One file's part in a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJoin {
    pub file_id: String,
    pub columns: Vec<String>,
    pub join_column: String,
}

/// Per-file join specification, ordered by first appearance in the column
/// selections.
///
/// Serialises as one flat object; file `N` (1-based) contributes the keys
/// `file_id_N`, `columns_for_file_N` and `join_column_for_file_N`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinSpec {
    pub files: Vec<FileJoin>,
}

impl JoinSpec {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Check every file in the spec against the `file_id` fields the page
    /// declared. An empty declaration list skips the check.
    pub fn ensure_declared(&self, declared: &[String]) -> Result<()> {
        if declared.is_empty() {
            return Ok(());
        }
        match self
            .files
            .iter()
            .find(|f| !declared.iter().any(|d| d == &f.file_id))
        {
            Some(unknown) => Err(AppError::MalformedInput(format!(
                "file {} was not part of the mapping form",
                unknown.file_id
            ))),
            None => Ok(()),
        }
    }
}

impl Serialize for JoinSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.files.len() * 3))?;
        for (idx, file) in self.files.iter().enumerate() {
            let n = idx + 1;
            map.serialize_entry(&format!("file_id_{}", n), &file.file_id)?;
            map.serialize_entry(&format!("columns_for_file_{}", n), &file.columns)?;
            map.serialize_entry(&format!("join_column_for_file_{}", n), &file.join_column)?;
        }
        map.end()
    }
}

/// Ordered grouping of column names by file id.
#[derive(Default)]
struct Grouped {
    order: Vec<String>,
    columns: HashMap<String, Vec<String>>,
}

impl Grouped {
    fn push(&mut self, sel: &ColumnSelection) {
        if !self.columns.contains_key(&sel.file_id) {
            self.order.push(sel.file_id.clone());
        }
        self.columns
            .entry(sel.file_id.clone())
            .or_default()
            .push(sel.column.clone());
    }
}

/// Build the join specification from structured selections
///
/// # Arguments
/// * `selected` - columns to carry into the joined dataset
/// * `join_on` - join-key columns; only the first per file is used
///
/// # Returns
/// * `Result<JoinSpec>` - files numbered in order of first appearance in `selected`
///
/// # Errors
/// * `MalformedInput` if nothing is selected, or a join column names a file
///   with no selected columns
/// * `MissingJoinColumn` if a file with selected columns has no join column
pub fn build_join_spec(selected: &[ColumnSelection], join_on: &[ColumnSelection]) -> Result<JoinSpec> {
    if selected.is_empty() {
        return Err(AppError::MalformedInput("no columns selected".to_string()));
    }

    let mut included = Grouped::default();
    for sel in selected {
        included.push(sel);
    }

    let mut keys = Grouped::default();
    for sel in join_on {
        keys.push(sel);
    }

    if let Some(orphan) = keys
        .order
        .iter()
        .find(|id| !included.columns.contains_key(*id))
    {
        return Err(AppError::MalformedInput(format!(
            "join column given for file {} which has no selected columns",
            orphan
        )));
    }

    let mut files = Vec::with_capacity(included.order.len());
    for file_id in included.order {
        let join_column = keys
            .columns
            .get(&file_id)
            .and_then(|cols| cols.first())
            .cloned()
            .ok_or_else(|| AppError::MissingJoinColumn {
                file_id: file_id.clone(),
            })?;
        let columns = included.columns.remove(&file_id).unwrap_or_default();
        files.push(FileJoin {
            file_id,
            columns,
            join_column,
        });
    }

    Ok(JoinSpec { files })
}

/// Build the join specification straight from the raw form values.
pub fn map_form_values(column_select: &[String], join_select: &[String]) -> Result<JoinSpec> {
    let selected = column_select
        .iter()
        .map(|raw| ColumnSelection::parse_form_value(raw))
        .collect::<Result<Vec<_>>>()?;
    let join_on = join_select
        .iter()
        .map(|raw| ColumnSelection::parse_form_value(raw))
        .collect::<Result<Vec<_>>>()?;
    build_join_spec(&selected, &join_on)
}

/// Render the hidden-input fragment the mapping page appends to each column.
///
/// [`extract_file_id`] reverses this.
pub fn hidden_file_fragment(file_id: &str) -> String {
    format!("<input type=\"hidden\" name=\"file_id\" value=\"{}\">", file_id)
}
