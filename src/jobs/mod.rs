/*!
 * Translation jobs.
 *
 * - `models`: job state, results and requests
 * - `progress`: progress events and the per-job event log
 * - `store`: in-memory job registry with retention
 * - `runner`: the per-job state machine
 * - `service`: start, poll, resume and cancel
 * - `remediation`: resolving failed items
 */

pub mod models;
pub mod progress;
pub mod remediation;
pub mod runner;
pub mod service;
pub mod store;

// Re-export main types
pub use models::{FailedItem, JobResult, JobState, StartJobRequest};
pub use progress::{EventIdentity, ProgressEvent, ProgressPhase, ProgressStore, ProgressView};
pub use remediation::{Remediation, RemediationAction};
pub use runner::{JobPlan, JobRunner, RunOutcome, RunnerSettings};
pub use service::{JobService, JobSnapshot};
pub use store::{JobRecord, JobStore};
