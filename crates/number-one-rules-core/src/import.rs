//! Bulk import: source text or JSON rows in, one batch insert out.
//!
//! Parsing and mapping complete before the store is touched. When nothing
//! survives mapping the store is never called.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::csv::parse_csv;
use crate::mapping::{map_rows, Column, DiscardReason, DiscardedRow, RuleMapping};
use crate::{NewRule, RuleStore, RulesError};

const CSV_SOURCE: &str = "CSV file";
const JSON_SOURCE: &str = "remote sheet";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ImportOutcome {
    pub imported: usize,
    pub discarded: Vec<DiscardedRow>,
}

impl ImportOutcome {
    #[must_use]
    pub fn message(&self) -> String {
        format!("Imported {} rules successfully", self.imported)
    }
}

/// Imports a whole CSV document through `store`.
///
/// `delimiter` overrides first-line detection when given. A leading UTF-8
/// byte-order mark is dropped before parsing.
///
/// # Errors
/// Returns [`RulesError::NoValidRows`] when the document is empty or no data
/// row carries both a title and a description, and propagates the store's
/// [`RulesError::Store`] unchanged when the batch insert fails.
pub fn import_csv_text<S: RuleStore + ?Sized>(
    store: &mut S,
    text: &str,
    delimiter: Option<char>,
) -> Result<ImportOutcome, RulesError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rows = parse_csv(text, delimiter);
    let Some((header, data)) = rows.split_first() else {
        return Err(RulesError::NoValidRows(CSV_SOURCE));
    };

    let header: Vec<String> = header.iter().map(|name| name.trim().to_lowercase()).collect();
    let mapping = map_rows(&header, data);
    submit(store, mapping, CSV_SOURCE)
}

/// Imports loosely-typed JSON objects through `store`.
///
/// # Errors
/// Same contract as [`import_csv_text`].
pub fn import_json_rows<S: RuleStore + ?Sized>(
    store: &mut S,
    rows: &[Value],
) -> Result<ImportOutcome, RulesError> {
    submit(store, normalize_json_rows(rows), JSON_SOURCE)
}

/// Normalizes JSON objects into rules.
///
/// Keys match the recognized column names case-insensitively (`title`,
/// `Title`, `TITLE`, ...). Values are coerced to trimmed strings; arrays are
/// joined with `;`. For a column given more than once the first non-empty
/// value wins.
#[must_use]
pub fn normalize_json_rows(rows: &[Value]) -> RuleMapping {
    let mut mapping = RuleMapping::default();

    for (row_index, row) in rows.iter().enumerate() {
        let Value::Object(fields) = row else {
            mapping.discarded.push(DiscardedRow {
                row_index,
                reason: DiscardReason::NotAnObject,
            });
            continue;
        };

        let mut rule = NewRule::default();
        for (key, value) in fields {
            let Some(column) = Column::parse(key) else {
                continue;
            };
            if !column_value(&rule, column).is_empty() {
                continue;
            }
            column.assign(&mut rule, coerce_to_string(value));
        }

        match DiscardReason::for_rule(&rule) {
            None => mapping.accepted.push(rule),
            Some(reason) => mapping.discarded.push(DiscardedRow { row_index, reason }),
        }
    }

    mapping
}

fn submit<S: RuleStore + ?Sized>(
    store: &mut S,
    mapping: RuleMapping,
    source: &'static str,
) -> Result<ImportOutcome, RulesError> {
    debug!(
        source,
        accepted = mapping.accepted.len(),
        discarded = mapping.discarded.len(),
        "mapped import rows"
    );

    if mapping.accepted.is_empty() {
        return Err(RulesError::NoValidRows(source));
    }

    let inserted = store.insert_rules(&mapping.accepted)?;
    info!(
        source,
        imported = inserted.len(),
        discarded = mapping.discarded.len(),
        "bulk import committed"
    );

    Ok(ImportOutcome {
        imported: inserted.len(),
        discarded: mapping.discarded,
    })
}

fn column_value(rule: &NewRule, column: Column) -> &str {
    match column {
        Column::Title => &rule.title,
        Column::Description => &rule.description,
        Column::Area => &rule.area,
        Column::Discipline => &rule.discipline,
        Column::Skill => &rule.skill,
    }
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.trim().to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items
            .iter()
            .map(coerce_to_string)
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>()
            .join(";"),
        Value::Object(_) => value.to_string(),
    }
}
