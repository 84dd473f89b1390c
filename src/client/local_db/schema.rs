//! Database Schema Migrations
//!
//! Ordered list of schema migrations applied by [`super::SqliteStore`].
//! Applied versions are recorded in `schema_migrations`.

/// A single forward-only migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Tracking table, created before any migration runs
pub const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)";

/// All migrations, ascending by version
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "namespaced key-value records",
    sql: include_str!("schema.sql"),
}];

/// Version after all migrations are applied
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Migrations newer than `current_version`
pub fn pending(current_version: i64) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > current_version)
}
