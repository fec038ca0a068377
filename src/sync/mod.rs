/*!
 * Source synchronisation: key diffing and persisting its outcome.
 */

pub mod differ;
pub mod service;

pub use differ::{DiffResult, KeyDiffer};
pub use service::{ImportReport, SyncReport, SyncService};
