//! Per-rule statistics folded from impressions and responses.
//!
//! Buckets are keyed by rule id, or by normalized title for legacy rows that
//! predate rule ids. Two distinct rules sharing a title after normalization
//! land in the same legacy bucket; that merge is kept as-is.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use ulid::Ulid;

use crate::{ImpressionAction, ImpressionEvent, ResponseRecord};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StatsKey {
    Id(Ulid),
    Title(String),
}

impl StatsKey {
    #[must_use]
    pub fn derive(rule_id: Option<Ulid>, rule_title: &str) -> Self {
        match rule_id {
            Some(id) => Self::Id(id),
            None => Self::Title(normalize_title(rule_title)),
        }
    }
}

impl Display for StatsKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Title(title) => write!(f, "title:{title}"),
        }
    }
}

/// Legacy key normalization: surrounding whitespace trimmed, then lower-cased.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RuleComment {
    pub thoughts: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RuleStatistics {
    pub key: StatsKey,
    pub rule_id: Option<Ulid>,
    pub rule_title: String,
    pub total_views: u64,
    pub total_skips: u64,
    pub total_reviews: u64,
    pub resonates_yes: u64,
    pub resonates_no: u64,
    pub applicable_yes: u64,
    pub applicable_no: u64,
    pub learned_new_yes: u64,
    pub learned_new_no: u64,
    pub comments: Vec<RuleComment>,
}

impl RuleStatistics {
    fn empty(key: StatsKey, rule_id: Option<Ulid>, rule_title: &str) -> Self {
        Self {
            key,
            rule_id,
            rule_title: rule_title.trim().to_string(),
            total_views: 0,
            total_skips: 0,
            total_reviews: 0,
            resonates_yes: 0,
            resonates_no: 0,
            applicable_yes: 0,
            applicable_no: 0,
            learned_new_yes: 0,
            learned_new_no: 0,
            comments: Vec::new(),
        }
    }

    #[must_use]
    pub fn resonates_pct(&self) -> u32 {
        percentage(self.resonates_yes, self.total_reviews)
    }

    #[must_use]
    pub fn applicable_pct(&self) -> u32 {
        percentage(self.applicable_yes, self.total_reviews)
    }

    #[must_use]
    pub fn learned_new_pct(&self) -> u32 {
        percentage(self.learned_new_yes, self.total_reviews)
    }

    #[must_use]
    pub fn skip_rate_pct(&self) -> u32 {
        percentage(self.total_skips, self.total_views + self.total_skips)
    }
}

/// `round(100 * value / total)`, and `0` when `total` is zero.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentage(value: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }

    (100.0 * value as f64 / total as f64).round() as u32
}

/// Folds both collections into statistics, sorted by `total_views`
/// descending and then by key.
///
/// `reviewed` impressions are not counted: reviews come from `responses`.
#[must_use]
pub fn aggregate_rule_statistics(
    impressions: &[ImpressionEvent],
    responses: &[ResponseRecord],
) -> Vec<RuleStatistics> {
    let mut buckets: BTreeMap<StatsKey, RuleStatistics> = BTreeMap::new();

    for event in impressions {
        let bucket = bucket_for(&mut buckets, event.rule_id, &event.rule_title);
        match event.action {
            ImpressionAction::Viewed => bucket.total_views += 1,
            ImpressionAction::Skipped => bucket.total_skips += 1,
            ImpressionAction::Reviewed => {}
        }
    }

    for response in responses {
        let bucket = bucket_for(&mut buckets, response.rule_id, &response.rule_title);
        bucket.total_reviews += 1;
        tally(response.resonates, &mut bucket.resonates_yes, &mut bucket.resonates_no);
        tally(response.applicable, &mut bucket.applicable_yes, &mut bucket.applicable_no);
        tally(
            response.learned_new,
            &mut bucket.learned_new_yes,
            &mut bucket.learned_new_no,
        );

        let thoughts = response.thoughts.trim();
        if !thoughts.is_empty() {
            bucket.comments.push(RuleComment {
                thoughts: thoughts.to_string(),
                created_at: response.created_at,
            });
        }
    }

    let mut stats: Vec<RuleStatistics> = buckets.into_values().collect();
    stats.sort_by(|lhs, rhs| {
        rhs.total_views
            .cmp(&lhs.total_views)
            .then_with(|| lhs.key.cmp(&rhs.key))
    });

    debug!(
        impressions = impressions.len(),
        responses = responses.len(),
        buckets = stats.len(),
        "aggregated rule statistics"
    );

    stats
}

fn bucket_for<'a>(
    buckets: &'a mut BTreeMap<StatsKey, RuleStatistics>,
    rule_id: Option<Ulid>,
    rule_title: &str,
) -> &'a mut RuleStatistics {
    let key = StatsKey::derive(rule_id, rule_title);
    let bucket = buckets
        .entry(key.clone())
        .or_insert_with(|| RuleStatistics::empty(key, rule_id, rule_title));
    if bucket.rule_title.is_empty() {
        bucket.rule_title = rule_title.trim().to_string();
    }
    bucket
}

fn tally(answer: bool, yes: &mut u64, no: &mut u64) {
    if answer {
        *yes += 1;
    } else {
        *no += 1;
    }
}
