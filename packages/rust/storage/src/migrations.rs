//! SQL migration definitions for the PostHarvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements; every statement is
//! idempotent so a half-applied batch can be re-run.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: posts",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Append-only harvested posts. The newest created_utc per subreddit is the
-- harvest watermark.
CREATE TABLE IF NOT EXISTS posts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    subreddit    TEXT NOT NULL,
    title        TEXT NOT NULL,
    author       TEXT NOT NULL,
    created_utc  REAL NOT NULL,
    created_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_subreddit_created
    ON posts(subreddit, created_utc);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Harvest run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS harvest_runs (
    id           TEXT PRIMARY KEY,
    sources_json TEXT NOT NULL,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    stats_json   TEXT
);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ascending_and_recorded() {
        let migrations = all_migrations();
        for pair in migrations.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        for m in &migrations {
            let marker = format!("VALUES ({})", m.version);
            assert!(
                m.sql.contains(&marker),
                "migration v{} not recorded",
                m.version
            );
        }
    }
}
