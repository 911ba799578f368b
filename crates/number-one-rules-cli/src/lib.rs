//! Command surface for the Number One Rules corpus.
//!
//! - [`run_cli`] executes a parsed [`Cli`] against the configured database.
//! - [`run_command_with_store`] executes a [`Command`] against an open store.
//! - [`remote`] fetches rule rows from a remote sheet endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use number_one_rules_core::{
    aggregate_rule_statistics, filter_rules, format_rfc3339, import_csv_text, import_json_rows,
    now_utc, weekly_window_start, ActivityCounts, Area, Discipline, ImportOutcome,
    ImpressionAction, ImpressionInput, NewRule, ResponseInput, ResponseRecord, Rule, RuleFilter,
    RuleOrder, RuleStatistics, RuleStore, Skill, Suggestion,
};
use number_one_rules_store_sqlite::SqliteRuleStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ulid::Ulid;

pub mod remote;

use remote::{RemoteImportConfig, RemoteSheetFetcher, DEFAULT_REMOTE_TIMEOUT_SECS};

const IMPORT_CONTRACT_VERSION: &str = "rule_import.v1";
const STATS_CONTRACT_VERSION: &str = "rule_stats.v1";
const STATS_SUMMARY_CONTRACT_VERSION: &str = "rule_stats_summary.v1";
const WEEKLY_CONTRACT_VERSION: &str = "weekly_activity.v1";
const TITLE_COLUMN_WIDTH: usize = 36;

#[derive(Debug, Parser)]
#[command(name = "nor")]
#[command(about = "Number One Rules corpus CLI")]
pub struct Cli {
    #[arg(long, env = "NOR_DB", default_value = "./number_one_rules.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Rules {
        #[command(subcommand)]
        command: Box<RulesCommand>,
    },
    Impressions {
        #[command(subcommand)]
        command: Box<ImpressionsCommand>,
    },
    Responses {
        #[command(subcommand)]
        command: Box<ResponsesCommand>,
    },
    Suggestions {
        #[command(subcommand)]
        command: Box<SuggestionsCommand>,
    },
    Stats {
        #[command(subcommand)]
        command: Box<StatsCommand>,
    },
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    ImportCsv(ImportCsvArgs),
    ImportSheet(ImportSheetArgs),
    Add(RuleArgs),
    Update(UpdateRuleArgs),
    Delete(IdArgs),
    DeleteAll(ConfirmArgs),
    List(ListRulesArgs),
}

#[derive(Debug, Args)]
pub struct ImportCsvArgs {
    #[arg(long)]
    file: PathBuf,
    /// Field delimiter (`,` or `;`); detected from the header line when omitted.
    #[arg(long, value_parser = parse_delimiter)]
    delimiter: Option<char>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ImportSheetArgs {
    #[arg(long)]
    url: String,
    #[arg(long, env = "NOR_REMOTE_TIMEOUT_SECS", default_value_t = DEFAULT_REMOTE_TIMEOUT_SECS)]
    timeout_secs: u64,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct RuleArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    /// May be repeated; stored as a `;`-separated tag list.
    #[arg(long, value_enum)]
    area: Vec<AreaArg>,
    #[arg(long, value_enum)]
    discipline: Option<DisciplineArg>,
    #[arg(long, value_enum)]
    skill: Option<SkillArg>,
}

#[derive(Debug, Args)]
pub struct UpdateRuleArgs {
    #[arg(long)]
    id: String,
    #[command(flatten)]
    rule: RuleArgs,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
pub struct ConfirmArgs {
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Args)]
pub struct JsonArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct ListRulesArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum)]
    area: Option<AreaArg>,
    #[arg(long, value_enum)]
    discipline: Option<DisciplineArg>,
    #[arg(long, value_enum)]
    skill: Option<SkillArg>,
    #[arg(long, value_enum, default_value_t = OrderArg::Title)]
    order: OrderArg,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ImpressionsCommand {
    Log(ImpressionLogArgs),
    Purge(ConfirmArgs),
}

#[derive(Debug, Args)]
pub struct ImpressionLogArgs {
    #[arg(long)]
    rule_id: Option<String>,
    #[arg(long)]
    rule_title: String,
    #[arg(long, value_enum)]
    action: ActionArg,
}

#[derive(Debug, Subcommand)]
pub enum ResponsesCommand {
    Submit(ResponseSubmitArgs),
    List(JsonArgs),
    Delete(IdArgs),
}

#[derive(Debug, Args)]
pub struct ResponseSubmitArgs {
    #[arg(long)]
    rule_id: Option<String>,
    #[arg(long)]
    rule_title: String,
    #[arg(long, value_enum)]
    resonates: YesNoArg,
    #[arg(long, value_enum)]
    applicable: YesNoArg,
    #[arg(long, value_enum)]
    learned_new: YesNoArg,
    #[arg(long, default_value = "")]
    thoughts: String,
}

#[derive(Debug, Subcommand)]
pub enum SuggestionsCommand {
    Submit(RuleArgs),
    List(JsonArgs),
    Delete(IdArgs),
}

#[derive(Debug, Subcommand)]
pub enum StatsCommand {
    Show(JsonArgs),
    Summary(JsonArgs),
    /// Responses and suggestions created in the last seven days.
    Weekly(JsonArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AreaArg {
    People,
    #[value(name = "self")]
    SelfArea,
    Business,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DisciplineArg {
    Perception,
    Will,
    Action,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SkillArg {
    Communication,
    Teamwork,
    AnalyticalSkills,
    Empathy,
    WorkEthic,
    Leadership,
    SelfManagement,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OrderArg {
    Title,
    Newest,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ActionArg {
    Viewed,
    Skipped,
    Reviewed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum YesNoArg {
    Yes,
    No,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when the store cannot be opened or migrated, or when the
/// command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let mut store = open_store(&cli.db)?;
    run_command_with_store(cli.command, &mut store)
}

/// Executes a parsed command against an existing store handle.
///
/// # Errors
/// Returns an error when validation, import, persistence, or output fails.
pub fn run_command_with_store(command: Command, store: &mut SqliteRuleStore) -> Result<()> {
    match command {
        Command::Rules { command } => run_rules(*command, store),
        Command::Impressions { command } => run_impressions(*command, store),
        Command::Responses { command } => run_responses(*command, store),
        Command::Suggestions { command } => run_suggestions(*command, store),
        Command::Stats { command } => run_stats(*command, store),
    }
}

/// Opens and migrates the database at `db_path`.
///
/// # Errors
/// Returns an error when the database cannot be opened or migrated.
pub fn open_store(db_path: &Path) -> Result<SqliteRuleStore> {
    let store = SqliteRuleStore::open(db_path)?;
    store.migrate()?;
    Ok(store)
}

fn run_rules(command: RulesCommand, store: &mut SqliteRuleStore) -> Result<()> {
    match command {
        RulesCommand::ImportCsv(args) => {
            let text = std::fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read CSV file {}", args.file.display()))?;
            let outcome = import_csv_text(store, &text, args.delimiter)?;
            print_import_outcome(&outcome, args.json)
        }
        RulesCommand::ImportSheet(args) => {
            let config = RemoteImportConfig {
                timeout: Duration::from_secs(args.timeout_secs),
                ..RemoteImportConfig::default()
            };
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let rows = runtime.block_on(async {
                let fetcher = RemoteSheetFetcher::new(config)?;
                fetcher.fetch_rows(&args.url).await
            })?;
            let outcome = import_json_rows(store, &rows)?;
            print_import_outcome(&outcome, args.json)
        }
        RulesCommand::Add(args) => {
            let rule = new_rule_from_args(args);
            rule.validate()?;
            let inserted = store.insert_rules(std::slice::from_ref(&rule))?;
            println!("Rule added successfully");
            for rule in inserted {
                println!("id={}", rule.id);
            }
            Ok(())
        }
        RulesCommand::Update(args) => {
            let id = parse_id(&args.id)?;
            let rule = new_rule_from_args(args.rule);
            rule.validate()?;
            let updated = store.update_rule(id, &rule)?;
            println!("Rule updated successfully");
            println!("id={}", updated.id);
            Ok(())
        }
        RulesCommand::Delete(args) => {
            store.delete_rule(parse_id(&args.id)?)?;
            println!("Rule deleted successfully");
            Ok(())
        }
        RulesCommand::DeleteAll(args) => {
            if !args.yes {
                return Err(anyhow!("refusing to delete all rules without --yes"));
            }
            let deleted = store.delete_all_rules()?;
            println!("Deleted {deleted} rules");
            Ok(())
        }
        RulesCommand::List(args) => {
            let order = match args.order {
                OrderArg::Title => RuleOrder::Title,
                OrderArg::Newest => RuleOrder::NewestFirst,
            };
            let filter = RuleFilter {
                search: args.search,
                area: args.area.map(map_area),
                discipline: args.discipline.map(map_discipline),
                skill: args.skill.map(map_skill),
            };
            let rules = store.list_rules(order)?;
            let visible = filter_rules(&rules, &filter);

            if args.json {
                println!("{}", serde_json::to_string_pretty(&visible)?);
            } else {
                print_rules_table(&visible);
            }
            Ok(())
        }
    }
}

fn run_impressions(command: ImpressionsCommand, store: &mut SqliteRuleStore) -> Result<()> {
    match command {
        ImpressionsCommand::Log(args) => {
            let input = ImpressionInput {
                rule_id: args.rule_id.as_deref().map(parse_id).transpose()?,
                rule_title: args.rule_title,
                action: match args.action {
                    ActionArg::Viewed => ImpressionAction::Viewed,
                    ActionArg::Skipped => ImpressionAction::Skipped,
                    ActionArg::Reviewed => ImpressionAction::Reviewed,
                },
            };
            let event = store.record_impression(&input)?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(())
        }
        ImpressionsCommand::Purge(args) => {
            if !args.yes {
                return Err(anyhow!("refusing to purge impressions without --yes"));
            }
            let purged = store.purge_impressions()?;
            println!("Purged {purged} impressions");
            Ok(())
        }
    }
}

fn run_responses(command: ResponsesCommand, store: &mut SqliteRuleStore) -> Result<()> {
    match command {
        ResponsesCommand::Submit(args) => {
            let input = ResponseInput {
                rule_id: args.rule_id.as_deref().map(parse_id).transpose()?,
                rule_title: args.rule_title,
                resonates: is_yes(args.resonates),
                applicable: is_yes(args.applicable),
                learned_new: is_yes(args.learned_new),
                thoughts: args.thoughts,
            };
            let record = store.record_response(&input)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        ResponsesCommand::List(args) => {
            let responses = store.list_responses()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&responses)?);
            } else {
                print_responses_table(&responses);
            }
            Ok(())
        }
        ResponsesCommand::Delete(args) => {
            store.delete_response(parse_id(&args.id)?)?;
            println!("Response deleted successfully");
            Ok(())
        }
    }
}

fn run_suggestions(command: SuggestionsCommand, store: &mut SqliteRuleStore) -> Result<()> {
    match command {
        SuggestionsCommand::Submit(args) => {
            let suggestion = store.submit_suggestion(&new_rule_from_args(args))?;
            println!("Suggestion submitted successfully");
            println!("id={}", suggestion.id);
            Ok(())
        }
        SuggestionsCommand::List(args) => {
            let suggestions = store.list_suggestions()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
            } else {
                print_suggestions_table(&suggestions);
            }
            Ok(())
        }
        SuggestionsCommand::Delete(args) => {
            store.delete_suggestion(parse_id(&args.id)?)?;
            println!("Suggestion deleted successfully");
            Ok(())
        }
    }
}

fn run_stats(command: StatsCommand, store: &SqliteRuleStore) -> Result<()> {
    if let StatsCommand::Weekly(args) = command {
        let counts = store.count_activity_since(weekly_window_start(now_utc()))?;
        let payload = build_weekly_json_payload(&counts)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            println!(
                "since={} responses={} suggestions={}",
                payload.since, payload.responses, payload.suggestions
            );
        }
        return Ok(());
    }

    let impressions = store.list_impressions()?;
    let responses = store.list_responses()?;
    let statistics = aggregate_rule_statistics(&impressions, &responses);
    info!(
        impressions = impressions.len(),
        responses = responses.len(),
        buckets = statistics.len(),
        "aggregated rule statistics"
    );

    match command {
        StatsCommand::Show(args) => {
            if args.json {
                let payload = build_stats_json_payload(&statistics)?;
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print_stats_table(&statistics);
            }
            Ok(())
        }
        StatsCommand::Summary(args) => {
            let summary = build_stats_summary(&statistics);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_stats_summary(&summary);
            }
            Ok(())
        }
        StatsCommand::Weekly(_) => Err(anyhow!(
            "internal dispatch error: weekly stats should be handled before aggregation"
        )),
    }
}

fn parse_delimiter(raw: &str) -> std::result::Result<char, String> {
    match raw {
        "," | "comma" => Ok(','),
        ";" | "semicolon" => Ok(';'),
        other => Err(format!("unsupported delimiter {other:?}; use `,` or `;`")),
    }
}

fn parse_id(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw.trim()).with_context(|| format!("invalid id: {raw}"))
}

fn is_yes(value: YesNoArg) -> bool {
    matches!(value, YesNoArg::Yes)
}

fn new_rule_from_args(args: RuleArgs) -> NewRule {
    let mut areas: Vec<Area> = Vec::new();
    for area in args.area.into_iter().map(map_area) {
        if !areas.contains(&area) {
            areas.push(area);
        }
    }

    NewRule {
        title: args.title.trim().to_string(),
        description: args.description.trim().to_string(),
        area: areas
            .iter()
            .map(|area| area.as_str())
            .collect::<Vec<_>>()
            .join(";"),
        discipline: args
            .discipline
            .map(|value| map_discipline(value).as_str().to_string())
            .unwrap_or_default(),
        skill: args
            .skill
            .map(|value| map_skill(value).as_str().to_string())
            .unwrap_or_default(),
    }
}

fn map_area(value: AreaArg) -> Area {
    match value {
        AreaArg::People => Area::People,
        AreaArg::SelfArea => Area::SelfArea,
        AreaArg::Business => Area::Business,
    }
}

fn map_discipline(value: DisciplineArg) -> Discipline {
    match value {
        DisciplineArg::Perception => Discipline::Perception,
        DisciplineArg::Will => Discipline::Will,
        DisciplineArg::Action => Discipline::Action,
    }
}

fn map_skill(value: SkillArg) -> Skill {
    match value {
        SkillArg::Communication => Skill::Communication,
        SkillArg::Teamwork => Skill::Teamwork,
        SkillArg::AnalyticalSkills => Skill::AnalyticalSkills,
        SkillArg::Empathy => Skill::Empathy,
        SkillArg::WorkEthic => Skill::WorkEthic,
        SkillArg::Leadership => Skill::Leadership,
        SkillArg::SelfManagement => Skill::SelfManagement,
    }
}

fn print_import_outcome(outcome: &ImportOutcome, json: bool) -> Result<()> {
    if !outcome.discarded.is_empty() {
        warn!(
            discarded = outcome.discarded.len(),
            "skipped rows without a title or description"
        );
    }

    if json {
        let payload = ImportJsonPayload {
            contract_version: IMPORT_CONTRACT_VERSION.to_string(),
            imported: outcome.imported,
            discarded: outcome.discarded.len(),
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", outcome.message());
        if !outcome.discarded.is_empty() {
            println!(
                "Skipped {} rows without a title or description",
                outcome.discarded.len()
            );
        }
    }
    Ok(())
}

fn print_rules_table(rules: &[&Rule]) {
    println!(
        "{:<26} {:<width$} {:<20} {:<11} skill",
        "id",
        "title",
        "area",
        "discipline",
        width = TITLE_COLUMN_WIDTH
    );
    println!("{}", "-".repeat(110));

    for rule in rules {
        println!(
            "{:<26} {:<width$} {:<20} {:<11} {}",
            rule.id.to_string(),
            truncate(&rule.title, TITLE_COLUMN_WIDTH),
            rule.area,
            rule.discipline,
            rule.skill,
            width = TITLE_COLUMN_WIDTH
        );
    }
    println!("{} rules", rules.len());
}

fn print_responses_table(responses: &[ResponseRecord]) {
    println!(
        "{:<26} {:<width$} {:<9} {:<10} {:<11} thoughts",
        "id",
        "rule",
        "resonates",
        "applicable",
        "learned_new",
        width = TITLE_COLUMN_WIDTH
    );
    println!("{}", "-".repeat(110));

    for response in responses {
        println!(
            "{:<26} {:<width$} {:<9} {:<10} {:<11} {}",
            response.id.to_string(),
            truncate(&response.rule_title, TITLE_COLUMN_WIDTH),
            yes_no(response.resonates),
            yes_no(response.applicable),
            yes_no(response.learned_new),
            response.thoughts,
            width = TITLE_COLUMN_WIDTH
        );
    }
}

fn print_stats_table(statistics: &[RuleStatistics]) {
    println!(
        "{:<width$} {:>6} {:>6} {:>7} {:>6} {:>10} {:>11} {:>8} {:>8}",
        "rule",
        "views",
        "skips",
        "reviews",
        "skip%",
        "resonates%",
        "applicable%",
        "learned%",
        "comments",
        width = TITLE_COLUMN_WIDTH
    );
    println!("{}", "-".repeat(110));

    for row in statistics {
        println!(
            "{:<width$} {:>6} {:>6} {:>7} {:>6} {:>10} {:>11} {:>8} {:>8}",
            truncate(&row.rule_title, TITLE_COLUMN_WIDTH),
            row.total_views,
            row.total_skips,
            row.total_reviews,
            row.skip_rate_pct(),
            row.resonates_pct(),
            row.applicable_pct(),
            row.learned_new_pct(),
            row.comments.len(),
            width = TITLE_COLUMN_WIDTH
        );
    }
}

fn print_suggestions_table(suggestions: &[Suggestion]) {
    println!(
        "{:<26} {:<width$} {:<20} {:<11} skill",
        "id",
        "title",
        "area",
        "discipline",
        width = TITLE_COLUMN_WIDTH
    );
    println!("{}", "-".repeat(110));

    for suggestion in suggestions {
        println!(
            "{:<26} {:<width$} {:<20} {:<11} {}",
            suggestion.id.to_string(),
            truncate(&suggestion.title, TITLE_COLUMN_WIDTH),
            suggestion.area,
            suggestion.discipline,
            suggestion.skill,
            width = TITLE_COLUMN_WIDTH
        );
    }
    println!("{} suggestions", suggestions.len());
}

fn print_stats_summary(summary: &StatsSummaryJsonPayload) {
    println!(
        "rules={} views={} skips={} reviews={} comments={}",
        summary.rule_count,
        summary.total_views,
        summary.total_skips,
        summary.total_reviews,
        summary.comment_count
    );
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut shortened: String = value.chars().take(width.saturating_sub(3)).collect();
    shortened.push_str("...");
    shortened
}

/// Discards are reported as a count only.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportJsonPayload {
    contract_version: String,
    imported: usize,
    discarded: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatsJsonPayload {
    contract_version: String,
    generated_at: String,
    rules: Vec<RuleStatistics>,
}

fn build_stats_json_payload(statistics: &[RuleStatistics]) -> Result<StatsJsonPayload> {
    Ok(StatsJsonPayload {
        contract_version: STATS_CONTRACT_VERSION.to_string(),
        generated_at: format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?,
        rules: statistics.to_vec(),
    })
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeeklyJsonPayload {
    contract_version: String,
    since: String,
    responses: usize,
    suggestions: usize,
}

fn build_weekly_json_payload(counts: &ActivityCounts) -> Result<WeeklyJsonPayload> {
    Ok(WeeklyJsonPayload {
        contract_version: WEEKLY_CONTRACT_VERSION.to_string(),
        since: format_rfc3339(counts.since).map_err(|err| anyhow!(err.to_string()))?,
        responses: counts.responses,
        suggestions: counts.suggestions,
    })
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSummaryJsonPayload {
    contract_version: String,
    rule_count: usize,
    total_views: u64,
    total_skips: u64,
    total_reviews: u64,
    comment_count: usize,
}

fn build_stats_summary(statistics: &[RuleStatistics]) -> StatsSummaryJsonPayload {
    StatsSummaryJsonPayload {
        contract_version: STATS_SUMMARY_CONTRACT_VERSION.to_string(),
        rule_count: statistics.len(),
        total_views: statistics.iter().map(|row| row.total_views).sum(),
        total_skips: statistics.iter().map(|row| row.total_skips).sum(),
        total_reviews: statistics.iter().map(|row| row.total_reviews).sum(),
        comment_count: statistics.iter().map(|row| row.comments.len()).sum(),
    }
}
