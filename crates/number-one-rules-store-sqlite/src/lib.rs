#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use number_one_rules_core::{
    format_rfc3339, now_utc, parse_rfc3339_utc, ActivityCounts, ImpressionAction,
    ImpressionEvent, ImpressionInput, NewRule, ResponseInput, ResponseRecord, Rule, RuleOrder,
    RuleStore, RulesError, Suggestion,
};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};
use ulid::Ulid;

const RULES_MIGRATION_VERSION: i64 = 1;
const SUGGESTIONS_MIGRATION_VERSION: i64 = 2;

const SCHEMA_RULES_V1: &str = r"
CREATE TABLE IF NOT EXISTS rules (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL CHECK (length(trim(title)) > 0),
  description TEXT NOT NULL CHECK (length(trim(description)) > 0),
  area TEXT NOT NULL DEFAULT '',
  discipline TEXT NOT NULL DEFAULT '',
  skill TEXT NOT NULL DEFAULT '',
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rules_title ON rules(title);
CREATE INDEX IF NOT EXISTS idx_rules_created_at ON rules(created_at DESC);

CREATE TABLE IF NOT EXISTS rule_impressions (
  id TEXT PRIMARY KEY,
  rule_id TEXT,
  rule_title TEXT NOT NULL,
  action TEXT NOT NULL CHECK (action IN ('viewed', 'skipped', 'reviewed')),
  created_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_rule_impressions_no_update
BEFORE UPDATE ON rule_impressions
BEGIN
  SELECT RAISE(FAIL, 'rule_impressions is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_rule_impressions_rule_id ON rule_impressions(rule_id);

CREATE TABLE IF NOT EXISTS rule_responses (
  id TEXT PRIMARY KEY,
  rule_id TEXT,
  rule_title TEXT NOT NULL,
  resonates INTEGER NOT NULL CHECK (resonates IN (0, 1)),
  applicable INTEGER NOT NULL CHECK (applicable IN (0, 1)),
  learned_new INTEGER NOT NULL CHECK (learned_new IN (0, 1)),
  thoughts TEXT NOT NULL DEFAULT '',
  created_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_rule_responses_no_update
BEFORE UPDATE ON rule_responses
BEGIN
  SELECT RAISE(FAIL, 'rule_responses is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_rule_responses_created_at ON rule_responses(created_at DESC);
";

const SCHEMA_SUGGESTIONS_V2: &str = r"
CREATE TABLE IF NOT EXISTS suggestions (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL CHECK (length(trim(title)) > 0),
  description TEXT NOT NULL CHECK (length(trim(description)) > 0),
  area TEXT NOT NULL DEFAULT '',
  discipline TEXT NOT NULL DEFAULT '',
  skill TEXT NOT NULL DEFAULT '',
  created_at TEXT NOT NULL
);
";

pub struct SqliteRuleStore {
    conn: Connection,
}

impl SqliteRuleStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        for (version, schema, label) in [
            (RULES_MIGRATION_VERSION, SCHEMA_RULES_V1, "rules"),
            (SUGGESTIONS_MIGRATION_VERSION, SCHEMA_SUGGESTIONS_V2, "suggestions"),
        ] {
            self.conn
                .execute_batch(schema)
                .with_context(|| format!("failed to apply {label} schema"))?;
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                    params![version, now],
                )
                .with_context(|| format!("failed to register {label} schema migration"))?;
        }

        Ok(())
    }

    pub fn schema_version(&self) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("failed to read schema version")
    }

    pub fn insert_rule_batch(&mut self, rules: &[NewRule]) -> Result<Vec<Rule>> {
        let now = now_utc();
        let now_raw = format_rfc3339(now).map_err(|err| anyhow!(err.to_string()))?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start rule batch transaction")?;

        let mut inserted = Vec::with_capacity(rules.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rules(id, title, description, area, discipline, skill, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            )?;

            for rule in rules {
                rule.validate()
                    .map_err(|err| anyhow!("rule validation failed: {err}"))?;
                let id = Ulid::new();
                stmt.execute(params![
                    id.to_string(),
                    rule.title.trim(),
                    rule.description.trim(),
                    rule.area.trim(),
                    rule.discipline.trim(),
                    rule.skill.trim(),
                    now_raw,
                ])
                .with_context(|| format!("failed to insert rule {:?}", rule.title))?;

                inserted.push(Rule {
                    id,
                    title: rule.title.trim().to_string(),
                    description: rule.description.trim().to_string(),
                    area: rule.area.trim().to_string(),
                    discipline: rule.discipline.trim().to_string(),
                    skill: rule.skill.trim().to_string(),
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        tx.commit().context("failed to commit rule batch")?;
        info!(count = inserted.len(), "inserted rule batch");
        Ok(inserted)
    }

    /// `NewestFirst` orders by the ULID id: creation order to the
    /// millisecond, arbitrary among rules inserted in the same millisecond.
    pub fn list_all_rules(&self, order: RuleOrder) -> Result<Vec<Rule>> {
        let order_by = match order {
            RuleOrder::Title => "title COLLATE NOCASE ASC, id ASC",
            RuleOrder::NewestFirst => "id DESC",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, title, description, area, discipline, skill, created_at, updated_at
             FROM rules
             ORDER BY {order_by}"
        ))?;
        let rows = stmt.query_map([], parse_rule_row)?;
        collect_rows(rows)
    }

    pub fn get_rule(&self, id: Ulid) -> Result<Option<Rule>> {
        self.conn
            .query_row(
                "SELECT id, title, description, area, discipline, skill, created_at, updated_at
                 FROM rules
                 WHERE id = ?1",
                params![id.to_string()],
                parse_rule_row,
            )
            .optional()
            .context("failed to load rule")
    }

    pub fn replace_rule(&mut self, id: Ulid, rule: &NewRule) -> Result<Rule> {
        rule.validate()
            .map_err(|err| anyhow!("rule validation failed: {err}"))?;
        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;

        let changed = self
            .conn
            .execute(
                "UPDATE rules
                 SET title = ?2, description = ?3, area = ?4, discipline = ?5, skill = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    rule.title.trim(),
                    rule.description.trim(),
                    rule.area.trim(),
                    rule.discipline.trim(),
                    rule.skill.trim(),
                    now,
                ],
            )
            .context("failed to update rule")?;

        if changed == 0 {
            return Err(anyhow!("rule not found: {id}"));
        }

        self.get_rule(id)?
            .ok_or_else(|| anyhow!("rule not found after update: {id}"))
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM rules WHERE id = ?1", params![id.to_string()])
            .context("failed to delete rule")?;

        if changed == 0 {
            return Err(anyhow!("rule not found: {id}"));
        }
        Ok(())
    }

    pub fn remove_all_rules(&mut self) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM rules", [])
            .context("failed to delete all rules")?;
        info!(count = changed, "deleted all rules");
        Ok(changed)
    }

    pub fn append_impression(&mut self, input: &ImpressionInput) -> Result<ImpressionEvent> {
        if input.rule_id.is_none() && input.rule_title.trim().is_empty() {
            return Err(anyhow!("impression requires a rule id or a rule title"));
        }

        let event = ImpressionEvent {
            id: Ulid::new(),
            rule_id: input.rule_id,
            rule_title: input.rule_title.trim().to_string(),
            action: input.action,
            created_at: now_utc(),
        };

        self.conn
            .execute(
                "INSERT INTO rule_impressions(id, rule_id, rule_title, action, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.id.to_string(),
                    event.rule_id.map(|id| id.to_string()),
                    event.rule_title,
                    event.action.as_str(),
                    format_rfc3339(event.created_at).map_err(|err| anyhow!(err.to_string()))?,
                ],
            )
            .context("failed to append impression")?;

        debug!(action = event.action.as_str(), "appended impression");
        Ok(event)
    }

    pub fn list_all_impressions(&self) -> Result<Vec<ImpressionEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rule_id, rule_title, action, created_at
             FROM rule_impressions
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], parse_impression_row)?;
        collect_rows(rows)
    }

    pub fn purge_all_impressions(&mut self) -> Result<usize> {
        let changed = self
            .conn
            .execute("DELETE FROM rule_impressions", [])
            .context("failed to purge impressions")?;
        info!(count = changed, "purged impressions");
        Ok(changed)
    }

    pub fn append_response(&mut self, input: &ResponseInput) -> Result<ResponseRecord> {
        if input.rule_id.is_none() && input.rule_title.trim().is_empty() {
            return Err(anyhow!("response requires a rule id or a rule title"));
        }

        let record = ResponseRecord {
            id: Ulid::new(),
            rule_id: input.rule_id,
            rule_title: input.rule_title.trim().to_string(),
            resonates: input.resonates,
            applicable: input.applicable,
            learned_new: input.learned_new,
            thoughts: input.thoughts.trim().to_string(),
            created_at: now_utc(),
        };

        self.conn
            .execute(
                "INSERT INTO rule_responses(
                    id, rule_id, rule_title, resonates, applicable, learned_new, thoughts, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    record.rule_id.map(|id| id.to_string()),
                    record.rule_title,
                    bool_to_sql(record.resonates),
                    bool_to_sql(record.applicable),
                    bool_to_sql(record.learned_new),
                    record.thoughts,
                    format_rfc3339(record.created_at).map_err(|err| anyhow!(err.to_string()))?,
                ],
            )
            .context("failed to append response")?;

        Ok(record)
    }

    pub fn list_all_responses(&self) -> Result<Vec<ResponseRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rule_id, rule_title, resonates, applicable, learned_new, thoughts, created_at
             FROM rule_responses
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], parse_response_row)?;
        collect_rows(rows)
    }

    pub fn remove_response(&mut self, id: Ulid) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM rule_responses WHERE id = ?1",
                params![id.to_string()],
            )
            .context("failed to delete response")?;

        if changed == 0 {
            return Err(anyhow!("response not found: {id}"));
        }
        Ok(())
    }

    pub fn append_suggestion(&mut self, suggestion: &NewRule) -> Result<Suggestion> {
        let record = Suggestion {
            id: Ulid::new(),
            title: suggestion.title.trim().to_string(),
            description: suggestion.description.trim().to_string(),
            area: suggestion.area.trim().to_string(),
            discipline: suggestion.discipline.trim().to_string(),
            skill: suggestion.skill.trim().to_string(),
            created_at: now_utc(),
        };

        self.conn
            .execute(
                "INSERT INTO suggestions(id, title, description, area, discipline, skill, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.title,
                    record.description,
                    record.area,
                    record.discipline,
                    record.skill,
                    format_rfc3339(record.created_at).map_err(|err| anyhow!(err.to_string()))?,
                ],
            )
            .context("failed to append suggestion")?;

        debug!(id = %record.id, "appended suggestion");
        Ok(record)
    }

    pub fn list_all_suggestions(&self) -> Result<Vec<Suggestion>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, area, discipline, skill, created_at
             FROM suggestions
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], parse_suggestion_row)?;
        collect_rows(rows)
    }

    pub fn remove_suggestion(&mut self, id: Ulid) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM suggestions WHERE id = ?1", params![id.to_string()])
            .context("failed to delete suggestion")?;

        if changed == 0 {
            return Err(anyhow!("suggestion not found: {id}"));
        }
        Ok(())
    }

    /// Counts responses and suggestions created at or after `since`.
    ///
    /// Compares ULID ids against the lowest id minted at `since`.
    pub fn activity_since(&self, since: OffsetDateTime) -> Result<ActivityCounts> {
        let floor = ulid_floor(since)?.to_string();
        let count = |table: &str| -> Result<usize> {
            let total: i64 = self
                .conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE id >= ?1"),
                    params![floor],
                    |row| row.get(0),
                )
                .with_context(|| format!("failed to count {table}"))?;
            usize::try_from(total).with_context(|| format!("negative count for {table}"))
        };

        Ok(ActivityCounts {
            since,
            responses: count("rule_responses")?,
            suggestions: count("suggestions")?,
        })
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl RuleStore for SqliteRuleStore {
    fn insert_rules(&mut self, rules: &[NewRule]) -> Result<Vec<Rule>, RulesError> {
        self.insert_rule_batch(rules).map_err(store_error)
    }

    fn list_rules(&self, order: RuleOrder) -> Result<Vec<Rule>, RulesError> {
        self.list_all_rules(order).map_err(store_error)
    }

    fn update_rule(&mut self, id: Ulid, rule: &NewRule) -> Result<Rule, RulesError> {
        self.replace_rule(id, rule).map_err(store_error)
    }

    fn delete_rule(&mut self, id: Ulid) -> Result<(), RulesError> {
        self.remove_rule(id).map_err(store_error)
    }

    fn delete_all_rules(&mut self) -> Result<usize, RulesError> {
        self.remove_all_rules().map_err(store_error)
    }

    fn record_impression(
        &mut self,
        input: &ImpressionInput,
    ) -> Result<ImpressionEvent, RulesError> {
        self.append_impression(input).map_err(store_error)
    }

    fn list_impressions(&self) -> Result<Vec<ImpressionEvent>, RulesError> {
        self.list_all_impressions().map_err(store_error)
    }

    fn purge_impressions(&mut self) -> Result<usize, RulesError> {
        self.purge_all_impressions().map_err(store_error)
    }

    fn record_response(&mut self, input: &ResponseInput) -> Result<ResponseRecord, RulesError> {
        self.append_response(input).map_err(store_error)
    }

    fn list_responses(&self) -> Result<Vec<ResponseRecord>, RulesError> {
        self.list_all_responses().map_err(store_error)
    }

    fn delete_response(&mut self, id: Ulid) -> Result<(), RulesError> {
        self.remove_response(id).map_err(store_error)
    }

    fn submit_suggestion(&mut self, suggestion: &NewRule) -> Result<Suggestion, RulesError> {
        suggestion.validate()?;
        self.append_suggestion(suggestion).map_err(store_error)
    }

    fn list_suggestions(&self) -> Result<Vec<Suggestion>, RulesError> {
        self.list_all_suggestions().map_err(store_error)
    }

    fn delete_suggestion(&mut self, id: Ulid) -> Result<(), RulesError> {
        self.remove_suggestion(id).map_err(store_error)
    }

    fn count_activity_since(&self, since: OffsetDateTime) -> Result<ActivityCounts, RulesError> {
        self.activity_since(since).map_err(store_error)
    }
}

fn ulid_floor(since: OffsetDateTime) -> Result<Ulid> {
    let millis = u64::try_from(since.unix_timestamp_nanos() / 1_000_000)
        .with_context(|| format!("timestamp before the unix epoch: {since}"))?;
    Ok(Ulid::from_parts(millis, 0))
}

fn store_error(err: anyhow::Error) -> RulesError {
    RulesError::Store(format!("{err:#}"))
}

fn parse_rule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: parse_ulid(0, &row.get::<_, String>(0)?)?,
        title: row.get(1)?,
        description: row.get(2)?,
        area: row.get(3)?,
        discipline: row.get(4)?,
        skill: row.get(5)?,
        created_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        updated_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
    })
}

fn parse_impression_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImpressionEvent> {
    let action_raw: String = row.get(3)?;
    let action = ImpressionAction::parse(&action_raw)
        .ok_or_else(|| invalid_data(3, format!("invalid action: {action_raw}")))?;

    Ok(ImpressionEvent {
        id: parse_ulid(0, &row.get::<_, String>(0)?)?,
        rule_id: parse_optional_ulid(1, row.get::<_, Option<String>>(1)?)?,
        rule_title: row.get(2)?,
        action,
        created_at: parse_timestamp(4, &row.get::<_, String>(4)?)?,
    })
}

fn parse_response_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResponseRecord> {
    Ok(ResponseRecord {
        id: parse_ulid(0, &row.get::<_, String>(0)?)?,
        rule_id: parse_optional_ulid(1, row.get::<_, Option<String>>(1)?)?,
        rule_title: row.get(2)?,
        resonates: row.get::<_, i64>(3)? == 1,
        applicable: row.get::<_, i64>(4)? == 1,
        learned_new: row.get::<_, i64>(5)? == 1,
        thoughts: row.get(6)?,
        created_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
    })
}

fn parse_suggestion_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Suggestion> {
    Ok(Suggestion {
        id: parse_ulid(0, &row.get::<_, String>(0)?)?,
        title: row.get(1)?,
        description: row.get(2)?,
        area: row.get(3)?,
        discipline: row.get(4)?,
        skill: row.get(5)?,
        created_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
    })
}

fn parse_ulid(column: usize, raw: &str) -> rusqlite::Result<Ulid> {
    Ulid::from_string(raw).map_err(|_| invalid_data(column, format!("invalid ULID: {raw}")))
}

fn parse_optional_ulid(column: usize, raw: Option<String>) -> rusqlite::Result<Option<Ulid>> {
    raw.as_deref()
        .filter(|value| !value.is_empty())
        .map(|value| parse_ulid(column, value))
        .transpose()
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<OffsetDateTime> {
    parse_rfc3339_utc(raw).map_err(|err| invalid_data(column, err.to_string()))
}

fn invalid_data(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use number_one_rules_core::{aggregate_rule_statistics, import_csv_text, weekly_window_start};

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteRuleStore {
        let store = must(SqliteRuleStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn new_rule(title: &str, description: &str) -> NewRule {
        NewRule {
            title: title.to_string(),
            description: description.to_string(),
            ..NewRule::default()
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = fixture_store();
        must(store.migrate());
        assert_eq!(must(store.schema_version()), Some(SUGGESTIONS_MIGRATION_VERSION));
    }

    #[test]
    fn batch_insert_assigns_ids_and_lists_by_title() {
        let mut store = fixture_store();
        let inserted = must(store.insert_rule_batch(&[
            new_rule("zeal", "z"),
            new_rule(" Attention ", "a"),
            new_rule("Be kind", "b"),
        ]));
        assert_eq!(inserted.len(), 3);
        assert_eq!(inserted[1].title, "Attention");

        let listed = must(store.list_all_rules(RuleOrder::Title));
        let titles: Vec<&str> = listed.iter().map(|rule| rule.title.as_str()).collect();
        assert_eq!(titles, vec!["Attention", "Be kind", "zeal"]);
    }

    #[test]
    fn newest_first_follows_insert_millisecond() {
        let mut store = fixture_store();
        must(store.insert_rule_batch(&[new_rule("Older", "o")]));
        std::thread::sleep(std::time::Duration::from_millis(2));
        must(store.insert_rule_batch(&[new_rule("Newer", "n")]));

        let listed = must(store.list_all_rules(RuleOrder::NewestFirst));
        let titles: Vec<&str> = listed.iter().map(|rule| rule.title.as_str()).collect();
        assert_eq!(titles, vec!["Newer", "Older"]);
    }

    #[test]
    fn batch_insert_is_all_or_nothing() {
        let mut store = fixture_store();
        let result = store.insert_rule_batch(&[new_rule("ok", "fine"), new_rule("broken", "  ")]);
        assert!(result.is_err());
        assert!(must(store.list_all_rules(RuleOrder::Title)).is_empty());
    }

    #[test]
    fn trait_errors_carry_store_message() {
        let mut store = fixture_store();
        let missing = Ulid::new();
        let result = RuleStore::delete_rule(&mut store, missing);
        assert_eq!(
            result,
            Err(RulesError::Store(format!("rule not found: {missing}")))
        );
    }

    #[test]
    fn update_and_delete_rules() {
        let mut store = fixture_store();
        let inserted = must(store.insert_rule_batch(&[new_rule("Old", "text")]));
        let id = inserted[0].id;

        let updated = must(store.replace_rule(
            id,
            &NewRule {
                title: "New".to_string(),
                description: "better text".to_string(),
                area: "People".to_string(),
                discipline: "Will".to_string(),
                skill: "Leadership".to_string(),
            },
        ));
        assert_eq!(updated.title, "New");
        assert_eq!(updated.area, "People");
        assert!(updated.updated_at >= inserted[0].updated_at);

        assert!(store.replace_rule(id, &new_rule("", "x")).is_err());

        must(store.remove_rule(id));
        assert!(must(store.get_rule(id)).is_none());
        assert!(store.remove_rule(id).is_err());
    }

    #[test]
    fn delete_all_reports_count() {
        let mut store = fixture_store();
        must(store.insert_rule_batch(&[new_rule("a", "a"), new_rule("b", "b")]));
        assert_eq!(must(store.remove_all_rules()), 2);
        assert_eq!(must(store.remove_all_rules()), 0);
    }

    #[test]
    fn impressions_are_append_only_but_purgeable() {
        let mut store = fixture_store();
        let event = must(store.append_impression(&ImpressionInput {
            rule_id: None,
            rule_title: "Legacy".to_string(),
            action: ImpressionAction::Viewed,
        }));

        let update_result = store.connection().execute(
            "UPDATE rule_impressions SET action = 'skipped' WHERE id = ?1",
            params![event.id.to_string()],
        );
        assert!(update_result.is_err());

        assert_eq!(must(store.list_all_impressions()), vec![event]);
        assert_eq!(must(store.purge_all_impressions()), 1);
        assert!(must(store.list_all_impressions()).is_empty());
    }

    #[test]
    fn responses_round_trip_and_block_updates() {
        let mut store = fixture_store();
        let rule_id = Ulid::new();
        let record = must(store.append_response(&ResponseInput {
            rule_id: Some(rule_id),
            rule_title: "Be kind".to_string(),
            resonates: true,
            applicable: false,
            learned_new: true,
            thoughts: "  useful  ".to_string(),
        }));
        assert_eq!(record.thoughts, "useful");

        let listed = must(store.list_all_responses());
        assert_eq!(listed, vec![record.clone()]);
        assert_eq!(listed[0].rule_id, Some(rule_id));

        let update_result = store.connection().execute(
            "UPDATE rule_responses SET thoughts = 'edited' WHERE id = ?1",
            params![record.id.to_string()],
        );
        assert!(update_result.is_err());

        must(store.remove_response(record.id));
        assert!(store.remove_response(record.id).is_err());
    }

    #[test]
    fn events_need_an_id_or_title() {
        let mut store = fixture_store();
        let result = store.append_impression(&ImpressionInput {
            rule_id: None,
            rule_title: "  ".to_string(),
            action: ImpressionAction::Skipped,
        });
        assert!(result.is_err());
    }

    #[test]
    fn csv_import_and_aggregation_through_the_store() {
        let mut store = fixture_store();
        let outcome = match import_csv_text(
            &mut store,
            "title,description\nBe kind,Kindness matters\nOwn it,Take responsibility\n",
            None,
        ) {
            Ok(value) => value,
            Err(err) => panic!("import failed: {err}"),
        };
        assert_eq!(outcome.imported, 2);

        let rules = must(store.list_all_rules(RuleOrder::Title));
        let kind = &rules[0];
        for action in [ImpressionAction::Viewed, ImpressionAction::Viewed, ImpressionAction::Skipped] {
            must(store.append_impression(&ImpressionInput {
                rule_id: Some(kind.id),
                rule_title: kind.title.clone(),
                action,
            }));
        }
        must(store.append_response(&ResponseInput {
            rule_id: Some(kind.id),
            rule_title: kind.title.clone(),
            resonates: true,
            applicable: true,
            learned_new: false,
            thoughts: "ok".to_string(),
        }));

        let stats = aggregate_rule_statistics(
            &must(store.list_all_impressions()),
            &must(store.list_all_responses()),
        );
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].rule_title, "Be kind");
        assert_eq!(stats[0].total_views, 2);
        assert_eq!(stats[0].total_skips, 1);
        assert_eq!(stats[0].total_reviews, 1);
    }

    #[test]
    fn suggestions_validate_list_newest_first_and_delete() {
        let mut store = fixture_store();

        assert_eq!(
            RuleStore::submit_suggestion(&mut store, &new_rule("  ", "text")),
            Err(RulesError::Validation("title MUST be provided".to_string()))
        );

        let first = match RuleStore::submit_suggestion(&mut store, &new_rule("First", "one")) {
            Ok(value) => value,
            Err(err) => panic!("submit failed: {err}"),
        };
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = must(store.append_suggestion(&NewRule {
            area: " People;Self ".to_string(),
            ..new_rule(" Second ", "two")
        }));
        assert_eq!(second.title, "Second");
        assert_eq!(second.area, "People;Self");

        let listed = must(store.list_all_suggestions());
        assert_eq!(listed, vec![second.clone(), first.clone()]);

        must(store.remove_suggestion(first.id));
        assert_eq!(must(store.list_all_suggestions()), vec![second]);
        assert_eq!(
            RuleStore::delete_suggestion(&mut store, first.id),
            Err(RulesError::Store(format!("suggestion not found: {}", first.id)))
        );
    }

    #[test]
    fn activity_counts_only_the_trailing_week() {
        let mut store = fixture_store();
        must(store.append_suggestion(&new_rule("Fresh", "new idea")));
        must(store.append_response(&ResponseInput {
            rule_id: None,
            rule_title: "Be kind".to_string(),
            resonates: true,
            applicable: true,
            learned_new: false,
            thoughts: String::new(),
        }));

        let stale_at = now_utc() - time::Duration::days(10);
        let stale_id = must(ulid_floor(stale_at)).increment().unwrap_or_default();
        let stale_raw = must(format_rfc3339(stale_at).map_err(|err| anyhow!(err.to_string())));
        must(
            store
                .connection()
                .execute(
                    "INSERT INTO suggestions(id, title, description, created_at)
                     VALUES (?1, 'Stale', 'old idea', ?2)",
                    params![stale_id.to_string(), stale_raw],
                )
                .map_err(anyhow::Error::from),
        );

        let since = weekly_window_start(now_utc());
        let counts = must(store.activity_since(since));

        assert_eq!(counts.since, since);
        assert_eq!(counts.responses, 1);
        assert_eq!(counts.suggestions, 1);
        assert_eq!(must(store.list_all_suggestions()).len(), 2);
    }
}
