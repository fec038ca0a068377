/*!
 * Database module for persistent storage of projects and translations.
 *
 * This module provides SQLite-based persistence for:
 * - Projects and their source keys
 * - Per-language translations with their status
 * - Protected terms
 */

pub mod schema;
pub mod connection;
pub mod repository;
pub mod models;
pub mod store;

// Re-export main types
pub use connection::DatabaseConnection;
pub use repository::Repository;
pub use store::ProjectStore;
