//! Header-driven mapping from parsed rows to [`NewRule`] values.

use serde::{Deserialize, Serialize};

use crate::NewRule;

/// Recognized column names. Anything else in a header is ignored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Title,
    Description,
    Area,
    Discipline,
    Skill,
}

impl Column {
    pub const ALL: [Self; 5] = [
        Self::Title,
        Self::Description,
        Self::Area,
        Self::Discipline,
        Self::Skill,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Area => "area",
            Self::Discipline => "discipline",
            Self::Skill => "skill",
        }
    }

    /// Exact, case-insensitive match on the trimmed header name.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        match header.trim().to_lowercase().as_str() {
            "title" => Some(Self::Title),
            "description" => Some(Self::Description),
            "area" => Some(Self::Area),
            "discipline" => Some(Self::Discipline),
            "skill" => Some(Self::Skill),
            _ => None,
        }
    }

    pub(crate) fn assign(self, rule: &mut NewRule, value: String) {
        match self {
            Self::Title => rule.title = value,
            Self::Description => rule.description = value,
            Self::Area => rule.area = value,
            Self::Discipline => rule.discipline = value,
            Self::Skill => rule.skill = value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    MissingTitle,
    MissingDescription,
    MissingTitleAndDescription,
    NotAnObject,
}

impl DiscardReason {
    pub(crate) fn for_rule(rule: &NewRule) -> Option<Self> {
        match (rule.title.is_empty(), rule.description.is_empty()) {
            (false, false) => None,
            (true, false) => Some(Self::MissingTitle),
            (false, true) => Some(Self::MissingDescription),
            (true, true) => Some(Self::MissingTitleAndDescription),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DiscardedRow {
    /// Zero-based index into the data rows (the header is not counted).
    pub row_index: usize,
    pub reason: DiscardReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RuleMapping {
    pub accepted: Vec<NewRule>,
    pub discarded: Vec<DiscardedRow>,
}

/// Maps data rows positionally through the header.
///
/// Rows missing a non-empty title or description are recorded in
/// [`RuleMapping::discarded`] and never reach `accepted`. When a column name
/// repeats, the right-most column wins.
#[must_use]
pub fn map_rows(header: &[String], rows: &[Vec<String>]) -> RuleMapping {
    let columns: Vec<(usize, Column)> = header
        .iter()
        .enumerate()
        .filter_map(|(index, name)| Column::parse(name).map(|column| (index, column)))
        .collect();

    let mut mapping = RuleMapping::default();

    for (row_index, row) in rows.iter().enumerate() {
        let mut rule = NewRule::default();
        for (index, column) in &columns {
            let value = row
                .get(*index)
                .map(|raw| raw.trim().to_string())
                .unwrap_or_default();
            column.assign(&mut rule, value);
        }

        match DiscardReason::for_rule(&rule) {
            None => mapping.accepted.push(rule),
            Some(reason) => mapping.discarded.push(DiscardedRow { row_index, reason }),
        }
    }

    mapping
}
