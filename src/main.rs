// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lingodeck::app_config::{self, Config};
use lingodeck::database::models::{ImportMode, NewProject, ProjectRecord, TermCategory, TranslationStatus};
use lingodeck::database::{DatabaseConnection, Repository};
use lingodeck::errors::AppError;
use lingodeck::jobs::{JobService, JobState, ProgressPhase, StartJobRequest};
use lingodeck::providers::HttpProviderFactory;
use lingodeck::providers::openai::ChatCompletionProvider;
use lingodeck::{language_utils, protection, source_file, sync::SyncService};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for job strategies
#[derive(Debug, Clone, ValueEnum)]
#[value(rename_all = "snake_case")]
enum CliStrategy {
    MissingOnly,
    MissingAndAi,
    Full,
    ValidateOnly,
}

impl CliStrategy {
    fn as_str(&self) -> &'static str {
        match self {
            CliStrategy::MissingOnly => "missing_only",
            CliStrategy::MissingAndAi => "missing_and_ai",
            CliStrategy::Full => "full",
            CliStrategy::ValidateOnly => "validate_only",
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum CliImportMode {
    Retranslate,
    Merge,
}

impl From<CliImportMode> for ImportMode {
    fn from(mode: CliImportMode) -> Self {
        match mode {
            CliImportMode::Retranslate => ImportMode::Retranslate,
            CliImportMode::Merge => ImportMode::Merge,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum CliTermCategory {
    Brand,
    Technical,
    Url,
    Code,
}

impl From<CliTermCategory> for TermCategory {
    fn from(category: CliTermCategory) -> Self {
        match category {
            CliTermCategory::Brand => TermCategory::Brand,
            CliTermCategory::Technical => TermCategory::Technical,
            CliTermCategory::Url => TermCategory::Url,
            CliTermCategory::Code => TermCategory::Code,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
#[value(rename_all = "snake_case")]
enum CliManualStatus {
    Locked,
    NeedsReview,
    AiTranslated,
}

impl From<CliManualStatus> for TranslationStatus {
    fn from(status: CliManualStatus) -> Self {
        match status {
            CliManualStatus::Locked => TranslationStatus::Locked,
            CliManualStatus::NeedsReview => TranslationStatus::NeedsReview,
            CliManualStatus::AiTranslated => TranslationStatus::AiTranslated,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    /// Create a project from a source language pack
    Create {
        /// Project name
        name: String,
        /// Source JSON file
        #[arg(long)]
        source_file: PathBuf,
        /// Source language code
        #[arg(long, default_value = "en")]
        source_language: String,
        /// Directory receiving generated `<code>.json` files
        #[arg(long)]
        locales_path: Option<PathBuf>,
        /// Free text added to every prompt
        #[arg(long)]
        context: Option<String>,
        /// `merge` keeps translations already in the locales directory as locked rows
        #[arg(long, value_enum, default_value = "retranslate")]
        import_mode: CliImportMode,
        /// Default provider (`provider` or `provider:model`)
        #[arg(long)]
        provider: Option<String>,
        /// Default word budget per request
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// List projects
    List,
}

#[derive(Subcommand, Debug)]
enum TermsCommand {
    /// Add a protected term
    Add {
        project: String,
        term: String,
        #[arg(long, value_enum, default_value = "brand")]
        category: CliTermCategory,
        /// Treat the term as a regular expression
        #[arg(long)]
        regex: bool,
        /// Restrict the term to these key paths
        #[arg(long = "scope")]
        scopes: Vec<String>,
    },
    /// List protected terms
    List { project: String },
    /// Remove a protected term by id
    Remove { project: String, id: i64 },
    /// Ask the provider which source terms should stay untranslated
    Analyze {
        project: String,
        /// Provider (`provider` or `provider:model`), defaults to the project's
        #[arg(long)]
        provider: Option<String>,
        /// Store the suggestions as global protected terms
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ManualCommand {
    /// Write a translation by hand (locked unless told otherwise)
    Set {
        project: String,
        key_path: String,
        language: String,
        text: String,
        #[arg(long, value_enum, default_value = "locked")]
        status: CliManualStatus,
    },
    /// List locked rows or the review worklist of a language
    List {
        project: String,
        language: String,
        #[arg(long, value_enum, default_value = "needs_review")]
        status: CliManualStatus,
    },
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Re-read the source file and apply added, changed and removed keys
    Sync {
        /// Project id or name
        project: String,
    },

    /// Run a translation job and follow its progress
    Translate {
        /// Project id or name
        project: String,
        /// Target languages, comma separated; all known languages when omitted
        #[arg(short, long, value_delimiter = ',')]
        languages: Vec<String>,
        #[arg(short, long, value_enum, default_value = "missing_only")]
        strategy: CliStrategy,
        /// Re-translate locked rows too (`full` only, default true there)
        #[arg(long)]
        include_locked: Option<bool>,
        /// Write `<code>.json` files to the project's locales path
        #[arg(short, long)]
        generate_files: bool,
        /// `provider` or `provider:model`
        #[arg(short, long)]
        provider: Option<String>,
        /// Word budget per request
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Print the final result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show translation coverage per language
    Status {
        project: String,
        #[arg(short, long, value_delimiter = ',')]
        languages: Vec<String>,
    },

    /// Write locale files from stored translations
    Export {
        project: String,
        #[arg(short, long, value_delimiter = ',')]
        languages: Vec<String>,
        /// Defaults to the project's locales path
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Manage protected terms
    #[command(subcommand)]
    Terms(TermsCommand),

    /// Manual translations
    #[command(subcommand)]
    Manual(ManualCommand),

    /// Generate shell completions for lingodeck
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// LingoDeck - translation management for JSON language packs
///
/// Keeps translations in step with a source language pack and fills the gaps
/// with AI providers.
#[derive(Parser, Debug)]
#[command(name = "lingodeck")]
#[command(version = "0.1.0")]
#[command(about = "AI-assisted translation management for JSON language packs")]
#[command(long_about = "LingoDeck tracks the keys of a source JSON language pack and translates them with AI providers.

EXAMPLES:
    lingodeck project create shop --source-file locales/en.json --locales-path locales
    lingodeck sync shop
    lingodeck translate shop -l fr,de                # Translate missing keys
    lingodeck translate shop -s full --include-locked false
    lingodeck translate shop -s validate_only        # Re-check existing translations
    lingodeck terms add shop Acme --category brand
    lingodeck completions bash > lingodeck.bash

CONFIGURATION:
    Configuration is stored in lingodeck.json by default. If the file doesn't
    exist, a default one is created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "lingodeck.json", global = true)]
    config_path: String,

    /// Set logging level
    #[arg(long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji and ANSI color for log level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌ ", "1;31"),
            Level::Warn => ("🚧 ", "1;33"),
            Level::Info => (" ", "1;32"),
            Level::Debug => ("🔍 ", "1;36"),
            Level::Trace => ("📋 ", "1;35"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (emoji, color) = Self::style_for_level(record.level());
            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {} {}\x1B[0m",
                color,
                now,
                emoji,
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // The level is lowered or raised once the config is loaded
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "lingodeck", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load_or_create(&cli.config_path)
        .with_context(|| format!("Failed to load configuration from {}", cli.config_path))?;
    if let Some(level) = cli.log_level.clone() {
        config.log_level = level.into();
    }
    log::set_max_level(config.log_level.to_level_filter());

    run(cli.command, config).await.map_err(|e| anyhow!(e))
}

fn open_repository(config: &Config) -> Result<Repository> {
    let connection = match &config.database_path {
        Some(path) => DatabaseConnection::new(path)?,
        None => DatabaseConnection::new_default()?,
    };
    Ok(Repository::new(connection))
}

/// Resolve a project by numeric id or by name
async fn find_project(repository: &Repository, reference: &str) -> Result<ProjectRecord> {
    if let Ok(id) = reference.parse::<i64>() {
        if let Some(project) = repository.get_project(id).await? {
            return Ok(project);
        }
    }
    repository
        .find_project_by_name(reference)
        .await?
        .ok_or_else(|| anyhow!("Project not found: {}", reference))
}

/// Requested languages, or every language the project has translations for
async fn target_languages(repository: &Repository, project: &ProjectRecord, requested: &[String]) -> Result<Vec<String>> {
    let languages = if requested.is_empty() {
        repository.known_languages(project.id).await?
    } else {
        requested.to_vec()
    };
    Ok(languages
        .into_iter()
        .filter(|code| !language_utils::language_codes_match(code, &project.source_language))
        .collect())
}

async fn run(command: Commands, config: Config) -> Result<(), AppError> {
    let repository = open_repository(&config)?;

    match command {
        Commands::Project(ProjectCommand::Create {
            name,
            source_file,
            source_language,
            locales_path,
            context,
            import_mode,
            provider,
            chunk_size,
        }) => {
            if let Some(size) = chunk_size {
                app_config::validate_chunk_size(size)?;
            }
            let source_language = language_utils::validate_language_code(&source_language)?;
            let project = repository
                .create_project(&NewProject {
                    name,
                    source_language,
                    source_file_path: source_file.display().to_string(),
                    locales_path: locales_path.map(|p| p.display().to_string()),
                    translation_context: context,
                    import_mode: import_mode.into(),
                    translation_provider: provider,
                    chunk_size_words: chunk_size,
                })
                .await?;
            info!("Created project {} (id {})", project.name, project.id);

            let sync = SyncService::new(repository.clone());
            let report = sync.sync_project(project.id).await?;
            info!("Imported {} keys", report.added);

            for import in sync.import_existing_translations(project.id).await? {
                println!(
                    "{:<8} {:>5}/{:<5} {:>5.1}% complete ({} missing)",
                    import.language_code,
                    import.imported,
                    import.total,
                    import.completeness(),
                    import.missing
                );
            }
        }

        Commands::Project(ProjectCommand::List) => {
            for project in repository.list_projects().await? {
                println!(
                    "{:>4}  {:<24} {:<6} {}  (synced: {})",
                    project.id,
                    project.name,
                    project.source_language,
                    project.source_file_path,
                    project.last_synced_at.as_deref().unwrap_or("never")
                );
            }
        }

        Commands::Sync { project } => {
            let project = find_project(&repository, &project).await?;
            let report = SyncService::new(repository.clone()).sync_project(project.id).await?;
            println!(
                "{}: {} added, {} updated, {} deleted, {} unchanged",
                project.name, report.added, report.updated, report.deleted, report.unchanged
            );
        }

        Commands::Translate {
            project,
            languages,
            strategy,
            include_locked,
            generate_files,
            provider,
            chunk_size,
            json,
        } => {
            let project = find_project(&repository, &project).await?;
            let service = JobService::new(
                Arc::new(repository.clone()),
                config,
                Arc::new(HttpProviderFactory),
            );
            let request = StartJobRequest {
                project_id: project.id,
                languages,
                strategy: strategy.as_str().to_string(),
                include_locked,
                generate_files,
                provider,
                chunk_size_words: chunk_size,
            };
            follow_job(&service, request, json).await?;
        }

        Commands::Status { project, languages } => {
            let project = find_project(&repository, &project).await?;
            println!("{} ({} keys source: {})", project.name, project.source_language, project.source_file_path);
            for code in target_languages(&repository, &project, &languages).await? {
                let counts = repository.status_counts(project.id, &code).await?;
                let percent = if counts.total_keys == 0 {
                    100.0
                } else {
                    counts.translated() as f64 * 100.0 / counts.total_keys as f64
                };
                println!(
                    "  {:<8} {:<22} {:>5.1}%  missing {:>5}  ai {:>5}  locked {:>5}  review {:>5}",
                    code,
                    language_utils::display_name(&code),
                    percent,
                    counts.missing,
                    counts.ai_translated,
                    counts.locked,
                    counts.needs_review
                );
            }
        }

        Commands::Export {
            project,
            languages,
            output_dir,
        } => {
            let project = find_project(&repository, &project).await?;
            let output_dir = output_dir
                .or_else(|| project.locales_path.as_ref().map(PathBuf::from))
                .ok_or_else(|| anyhow!("Project {} has no locales path, pass --output-dir", project.name))?;
            let (source, _) = source_file::load_source_file(&project.source_file_path)?;

            for code in target_languages(&repository, &project, &languages).await? {
                let translations = repository.language_translations(project.id, &code).await?;
                let path = source_file::write_locale_file(&output_dir, &code, &source, &translations)?;
                info!("Wrote {} ({} translations)", path.display(), translations.len());
            }
        }

        Commands::Terms(TermsCommand::Add {
            project,
            term,
            category,
            regex,
            scopes,
        }) => {
            let project = find_project(&repository, &project).await?;
            let term = repository
                .add_protected_term(project.id, &term, category.into(), regex, scopes)
                .await?;
            info!("Protected '{}' (id {})", term.term, term.id);
        }

        Commands::Terms(TermsCommand::List { project }) => {
            let project = find_project(&repository, &project).await?;
            for term in repository.list_protected_terms(project.id).await? {
                let scope = if term.key_scopes.is_empty() {
                    "global".to_string()
                } else {
                    term.key_scopes.join(", ")
                };
                println!(
                    "{:>4}  {:<24} {:<10} {:<6} {}",
                    term.id,
                    term.term,
                    term.category.to_string(),
                    if term.is_regex { "regex" } else { "" },
                    scope
                );
            }
        }

        Commands::Terms(TermsCommand::Remove { project, id }) => {
            let project = find_project(&repository, &project).await?;
            if !repository.remove_protected_term(project.id, id).await? {
                warn!("No protected term with id {}", id);
            }
        }

        Commands::Terms(TermsCommand::Analyze {
            project,
            provider,
            apply,
        }) => {
            let project = find_project(&repository, &project).await?;
            let resolved =
                config.resolve_provider(provider.as_deref().or(project.translation_provider.as_deref()))?;
            let client = ChatCompletionProvider::new(&resolved.config, config.translation.system_message.clone())?;

            let texts: Vec<String> = repository
                .list_keys(project.id)
                .await?
                .into_iter()
                .filter(|k| k.should_translate)
                .map(|k| k.source_text)
                .collect();
            let report = protection::analyze_terms(&client, &resolved.model, &texts).await?;
            if report.failed_requests > 0 {
                warn!("{} analysis requests failed", report.failed_requests);
            }

            let known: Vec<String> = repository
                .list_protected_terms(project.id)
                .await?
                .into_iter()
                .map(|t| t.term)
                .collect();
            for (category, term) in report.analysis.terms() {
                let is_known = known.iter().any(|k| k == term);
                println!("{:<10} {}{}", category.to_string(), term, if is_known { "  (protected)" } else { "" });
                if apply && !is_known {
                    repository
                        .add_protected_term(project.id, term, category, false, Vec::new())
                        .await?;
                }
            }
            info!(
                "{} suggestions from {} texts ({} tokens)",
                report.analysis.len(),
                report.analysed_texts,
                report.usage.total()
            );
        }

        Commands::Manual(ManualCommand::Set {
            project,
            key_path,
            language,
            text,
            status,
        }) => {
            let project = find_project(&repository, &project).await?;
            repository
                .set_manual_translation(project.id, &key_path, &language, &text, status.into())
                .await?;
            info!("Saved {} [{}]", key_path, language);
        }

        Commands::Manual(ManualCommand::List {
            project,
            language,
            status,
        }) => {
            let project = find_project(&repository, &project).await?;
            let status: TranslationStatus = status.into();
            let rows = repository.list_translations(project.id, &language, &[status]).await?;
            for row in rows {
                println!("{:<40} {}", row.key_path, row.translated_text);
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) {msg}")
        .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style.progress_chars("█▓▒░"));
    bar
}

/// Start a job and render its progress log until it finishes
async fn follow_job(service: &JobService, request: StartJobRequest, json: bool) -> Result<(), AppError> {
    let job_id = service.start_job(request).await?;
    info!("Started job {}", job_id);

    let bar = progress_bar();
    let mut seen = 0u64;
    let mut cancel_sent = false;

    let snapshot = loop {
        for event in service.progress_since(&job_id, seen) {
            seen = seen.max(event.sequence);
            match &event.phase {
                ProgressPhase::Checked {
                    total_keys,
                    translated_keys,
                    ..
                } => bar.set_message(format!(
                    "{}: {}/{} translated",
                    event.language_name, translated_keys, total_keys
                )),
                ProgressPhase::NoWork { .. } => bar.println(format!("{}: nothing to do", event.language_name)),
                ProgressPhase::Starting { total_batches, .. } => {
                    bar.set_length(*total_batches as u64);
                    bar.set_position(0);
                    bar.set_message(event.language_name.clone());
                }
                ProgressPhase::BatchDone { batch_number, .. } => bar.set_position(*batch_number as u64),
                ProgressPhase::Retrying { retry_keys_count } => bar.set_message(format!(
                    "{}: retrying {} keys",
                    event.language_name, retry_keys_count
                )),
                ProgressPhase::Completed {
                    success_count,
                    failure_count,
                    ..
                } => bar.println(format!(
                    "{}: {} translated, {} failed",
                    event.language_name, success_count, failure_count
                )),
                ProgressPhase::FileGenerated { path } => bar.println(format!("Generated {}", path)),
                ProgressPhase::Checking | ProgressPhase::TasksFound { .. } => {}
            }
        }

        let snapshot = service
            .get_progress(&job_id)
            .ok_or_else(|| anyhow!("Job {} disappeared", job_id))?;
        if snapshot.state.is_terminal() {
            break snapshot;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                cancel_sent = service.cancel_job(&job_id);
                bar.println("Cancelling after the current batch...");
            }
        }
    };
    bar.finish_and_clear();

    let result = snapshot.result.unwrap_or_default();
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Job {} {}: {} translated, {} failed, {} tokens, {:.1}s",
            job_id,
            snapshot.state,
            result.total_translated,
            result.total_failed,
            result.token_usage.total(),
            result.elapsed_secs
        );
        if result.total_validated > 0 {
            println!("Validated {}, cleared {}", result.total_validated, result.total_cleared);
        }
        for item in &result.failed_items {
            println!("  ✗ {} [{}]: {}", item.key_path, item.language_code, item.error);
        }
    }

    match snapshot.state {
        JobState::Failed => Err(AppError::Unknown(
            snapshot.error.unwrap_or_else(|| "job failed".to_string()),
        )),
        _ => Ok(()),
    }
}
