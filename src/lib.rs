/*!
 * # LingoDeck - translation management for JSON language packs
 *
 * A Rust library that keeps a project's translations in step with its source
 * language pack and fills the gaps with AI providers.
 *
 * ## Features
 *
 * - Import and re-sync a nested JSON source file into a SQLite project model
 * - Translate missing or changed keys in word-bounded batches through any
 *   OpenAI-compatible chat completion endpoint (OpenAI, DeepSeek, Gemini, custom)
 * - Protected terms that must survive translation verbatim
 * - Locked translations that jobs never overwrite unless asked to
 * - Background jobs with pollable progress, cancellation and remediation of
 *   failed keys
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `database`: SQLite persistence and the `ProjectStore` seam
 * - `source_file`: Source JSON flattening and locale file generation
 * - `sync`: Key diffing and sync transactions
 * - `translation`: Batch planning, validation and prompts
 * - `providers`: Translation provider clients
 * - `jobs`: Job runner, progress log, job registry and job control
 * - `protection`: Protected term placeholders and AI term suggestions
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod database;
pub mod errors;
pub mod file_utils;
pub mod jobs;
pub mod language_utils;
pub mod protection;
pub mod providers;
pub mod source_file;
pub mod sync;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use database::{DatabaseConnection, ProjectStore, Repository};
pub use errors::{AppError, JobError, ProviderError};
pub use jobs::{JobService, JobState, StartJobRequest};
pub use language_utils::{get_language_name, language_codes_match};
pub use sync::{KeyDiffer, SyncService};
pub use translation::{BatchPlanner, Strategy, Validator};
