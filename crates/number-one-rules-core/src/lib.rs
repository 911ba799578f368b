//! Domain model and pure pipelines for the Number One Rules corpus.
//!
//! Everything in this crate is synchronous and side-effect free apart from
//! calls made through the [`RuleStore`] collaborator:
//! - [`csv`] tokenizes delimited text into rows.
//! - [`mapping`] turns header + data rows into [`NewRule`] values.
//! - [`import`] drives parse, map and a single batch insert.
//! - [`stats`] folds impressions and responses into per-rule statistics.
//! - [`filter`] implements the browse view's search and facet filter.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub mod csv;
pub mod filter;
pub mod import;
pub mod mapping;
pub mod stats;

pub use csv::{detect_delimiter, parse_csv};
pub use filter::{filter_rules, RuleFilter};
pub use import::{import_csv_text, import_json_rows, normalize_json_rows, ImportOutcome};
pub use mapping::{map_rows, Column, DiscardReason, DiscardedRow, RuleMapping};
pub use stats::{
    aggregate_rule_statistics, normalize_title, percentage, RuleComment, RuleStatistics, StatsKey,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RulesError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("No valid rules found in {0}")]
    NoValidRows(&'static str),
    #[error("{0}")]
    Store(String),
    #[error("remote import error: {0}")]
    Remote(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Area {
    People,
    #[serde(rename = "Self")]
    SelfArea,
    Business,
}

impl Area {
    pub const ALL: [Self; 3] = [Self::People, Self::SelfArea, Self::Business];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::People => "People",
            Self::SelfArea => "Self",
            Self::Business => "Business",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|area| area.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Discipline {
    Perception,
    Will,
    Action,
}

impl Discipline {
    pub const ALL: [Self; 3] = [Self::Perception, Self::Will, Self::Action];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Perception => "Perception",
            Self::Will => "Will",
            Self::Action => "Action",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|discipline| discipline.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Skill {
    Communication,
    Teamwork,
    #[serde(rename = "Analytical skills")]
    AnalyticalSkills,
    Empathy,
    #[serde(rename = "Work ethic")]
    WorkEthic,
    Leadership,
    #[serde(rename = "Self-management")]
    SelfManagement,
}

impl Skill {
    pub const ALL: [Self; 7] = [
        Self::Communication,
        Self::Teamwork,
        Self::AnalyticalSkills,
        Self::Empathy,
        Self::WorkEthic,
        Self::Leadership,
        Self::SelfManagement,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Communication => "Communication",
            Self::Teamwork => "Teamwork",
            Self::AnalyticalSkills => "Analytical skills",
            Self::Empathy => "Empathy",
            Self::WorkEthic => "Work ethic",
            Self::Leadership => "Leadership",
            Self::SelfManagement => "Self-management",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|skill| skill.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

/// Importable rule shape. Facets hold the raw trimmed text from the source;
/// `area` may list several tags separated by `;` or `,`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewRule {
    pub title: String,
    pub description: String,
    pub area: String,
    pub discipline: String,
    pub skill: String,
}

impl NewRule {
    /// Checks the two mandatory fields of a rule.
    ///
    /// # Errors
    /// Returns [`RulesError::Validation`] when `title` or `description` is
    /// blank after trimming.
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.title.trim().is_empty() {
            return Err(RulesError::Validation("title MUST be provided".to_string()));
        }

        if self.description.trim().is_empty() {
            return Err(RulesError::Validation(
                "description MUST be provided".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn areas(&self) -> Vec<Area> {
        area_tags(&self.area)
    }

    #[must_use]
    pub fn discipline_tag(&self) -> Option<Discipline> {
        Discipline::parse(&self.discipline)
    }

    #[must_use]
    pub fn skill_tag(&self) -> Option<Skill> {
        Skill::parse(&self.skill)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub area: String,
    pub discipline: String,
    pub skill: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Rule {
    #[must_use]
    pub fn areas(&self) -> Vec<Area> {
        area_tags(&self.area)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RuleOrder {
    Title,
    NewestFirst,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImpressionAction {
    Viewed,
    Skipped,
    Reviewed,
}

impl ImpressionAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewed => "viewed",
            Self::Skipped => "skipped",
            Self::Reviewed => "reviewed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "viewed" => Some(Self::Viewed),
            "skipped" => Some(Self::Skipped),
            "reviewed" => Some(Self::Reviewed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpressionInput {
    pub rule_id: Option<Ulid>,
    pub rule_title: String,
    pub action: ImpressionAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpressionEvent {
    pub id: Ulid,
    pub rule_id: Option<Ulid>,
    pub rule_title: String,
    pub action: ImpressionAction,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseInput {
    pub rule_id: Option<Ulid>,
    pub rule_title: String,
    pub resonates: bool,
    pub applicable: bool,
    pub learned_new: bool,
    pub thoughts: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseRecord {
    pub id: Ulid,
    pub rule_id: Option<Ulid>,
    pub rule_title: String,
    pub resonates: bool,
    pub applicable: bool,
    pub learned_new: bool,
    pub thoughts: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A visitor-submitted rule awaiting moderation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub area: String,
    pub discipline: String,
    pub skill: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub const WEEKLY_WINDOW_DAYS: i64 = 7;

/// Submissions created at or after `since`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActivityCounts {
    #[serde(with = "time::serde::rfc3339")]
    pub since: OffsetDateTime,
    pub responses: usize,
    pub suggestions: usize,
}

/// Start of the trailing seven-day window ending at `now`.
#[must_use]
pub fn weekly_window_start(now: OffsetDateTime) -> OffsetDateTime {
    now - time::Duration::days(WEEKLY_WINDOW_DAYS)
}

/// Record-store collaborator.
///
/// Implementations own identity assignment and persistence. Every method is
/// a single round trip; [`RuleStore::insert_rules`] MUST apply the whole
/// batch or nothing.
pub trait RuleStore {
    /// Inserts a batch of rules in one call.
    ///
    /// # Errors
    /// Returns [`RulesError::Store`] carrying the store's own message when
    /// the batch is rejected.
    fn insert_rules(&mut self, rules: &[NewRule]) -> Result<Vec<Rule>, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the read fails.
    fn list_rules(&self, order: RuleOrder) -> Result<Vec<Rule>, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the id is unknown or the write fails.
    fn update_rule(&mut self, id: Ulid, rule: &NewRule) -> Result<Rule, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the id is unknown or the write fails.
    fn delete_rule(&mut self, id: Ulid) -> Result<(), RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the write fails.
    fn delete_all_rules(&mut self) -> Result<usize, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the write fails.
    fn record_impression(
        &mut self,
        input: &ImpressionInput,
    ) -> Result<ImpressionEvent, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the read fails.
    fn list_impressions(&self) -> Result<Vec<ImpressionEvent>, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the write fails.
    fn purge_impressions(&mut self) -> Result<usize, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the write fails.
    fn record_response(&mut self, input: &ResponseInput) -> Result<ResponseRecord, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the read fails.
    fn list_responses(&self) -> Result<Vec<ResponseRecord>, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the id is unknown or the write fails.
    fn delete_response(&mut self, id: Ulid) -> Result<(), RulesError>;

    /// Stores a suggestion after the same validation as a single rule add.
    ///
    /// # Errors
    /// Returns [`RulesError::Validation`] for a blank title or description,
    /// or [`RulesError::Store`] when the write fails.
    fn submit_suggestion(&mut self, suggestion: &NewRule) -> Result<Suggestion, RulesError>;

    /// Lists suggestions newest first.
    ///
    /// # Errors
    /// Returns [`RulesError::Store`] when the read fails.
    fn list_suggestions(&self) -> Result<Vec<Suggestion>, RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the id is unknown or the write fails.
    fn delete_suggestion(&mut self, id: Ulid) -> Result<(), RulesError>;

    /// # Errors
    /// Returns [`RulesError::Store`] when the read fails.
    fn count_activity_since(&self, since: OffsetDateTime) -> Result<ActivityCounts, RulesError>;
}

fn area_tags(raw: &str) -> Vec<Area> {
    let mut tags = Vec::new();
    for token in raw.split([';', ',']) {
        if let Some(area) = Area::parse(token) {
            if !tags.contains(&area) {
                tags.push(area);
            }
        }
    }
    tags
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`RulesError::Validation`] when parsing fails or the timestamp is
/// not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, RulesError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| RulesError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(RulesError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`RulesError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, RulesError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| RulesError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}
