//! libSQL storage layer for harvested posts.
//!
//! The [`Storage`] struct wraps a local libSQL (SQLite) database holding the
//! append-only `posts` table and the `harvest_runs` history.
//!
//! **Access rules:**
//! - Harvest runs: read-write via [`Storage::open`]
//! - Status queries: read-only via [`Storage::open_readonly`]
//!
//! The watermark for a source is never stored separately: it is the maximum
//! `created_utc` among that source's rows, so it can only move forward and it
//! changes exactly when a [`Storage::save_posts`] transaction commits.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, Value, params};
use postharvest_shared::{
    HarvestError, Post, Result, SourceName, SourceStats, StoredPost, readable_utc,
};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn db_err(e: libsql::Error) -> HarvestError {
    HarvestError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarvestError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        HarvestError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvestError::Storage("database is opened in read-only mode".into()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Post operations
    // -----------------------------------------------------------------------

    /// Newest `created_utc` stored for `source`, or `None` if it has no rows.
    pub async fn latest_created_utc(&self, source: &SourceName) -> Result<Option<f64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(created_utc) FROM posts WHERE subreddit = ?1",
                params![source.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => value_to_f64(row.get_value(0).map_err(db_err)?),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Append `posts` for `source` in a single transaction.
    ///
    /// Either every post is committed or none is; on any failure the
    /// transaction is rolled back and the source's watermark is unchanged.
    /// Returns the number of rows inserted.
    pub async fn save_posts(&self, source: &SourceName, posts: &[Post]) -> Result<usize> {
        self.check_writable()?;
        if posts.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction().await.map_err(db_err)?;

        let mut inserted = 0;
        let mut failure = None;
        for post in posts {
            let outcome = match readable_utc(post.created_utc) {
                Ok(created_date) => tx
                    .execute(
                        "INSERT INTO posts (subreddit, title, author, created_utc, created_date)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            source.as_str(),
                            post.title.as_str(),
                            post.author.as_str(),
                            post.created_utc,
                            created_date
                        ],
                    )
                    .await
                    .map_err(db_err),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(_) => inserted += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(%source, error = %rollback_err, "rollback failed");
            }
            tracing::error!(
                %source,
                batch = posts.len(),
                attempted = inserted + 1,
                error = %e,
                "batch insert failed, nothing saved"
            );
            return Err(e);
        }

        tx.commit().await.map_err(db_err)?;
        tracing::info!(%source, inserted, "inserted posts");
        Ok(inserted)
    }

    /// Number of rows stored for `source`.
    pub async fn post_count(&self, source: &SourceName) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM posts WHERE subreddit = ?1",
                params![source.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Newest-first posts for `source`, at most `limit`.
    pub async fn recent_posts(&self, source: &SourceName, limit: u32) -> Result<Vec<StoredPost>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, subreddit, title, author, created_utc, created_date
                 FROM posts WHERE subreddit = ?1
                 ORDER BY created_utc DESC, id DESC
                 LIMIT ?2",
                params![source.as_str(), limit],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_stored_post(&row)?);
        }
        Ok(results)
    }

    /// Row count and watermark for every source that has data.
    pub async fn source_stats(&self) -> Result<Vec<SourceStats>> {
        let mut rows = self
            .conn
            .query(
                "SELECT subreddit, COUNT(*), MAX(created_utc)
                 FROM posts GROUP BY subreddit ORDER BY subreddit",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(SourceStats {
                source: row.get::<String>(0).map_err(db_err)?,
                post_count: row.get::<i64>(1).map_err(db_err)? as u64,
                latest_created_utc: value_to_f64(row.get_value(2).map_err(db_err)?)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Harvest run history
    // -----------------------------------------------------------------------

    /// Record the start of a harvest run. Returns the generated run ID.
    pub async fn insert_harvest_run(&self, sources: &[String]) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let sources_json = serde_json::to_string(sources)
            .map_err(|e| HarvestError::Storage(format!("encode sources: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO harvest_runs (id, sources_json, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), sources_json, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Close a harvest run with its summary stats.
    pub async fn finish_harvest_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE harvest_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(HarvestError::Storage(format!("unknown harvest run {run_id}")));
        }
        Ok(())
    }

    /// Stats JSON of the most recently started run that has finished.
    pub async fn last_finished_run(&self) -> Result<Option<(String, String)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT finished_at, stats_json FROM harvest_runs
                 WHERE finished_at IS NOT NULL
                 ORDER BY started_at DESC LIMIT 1",
                params![],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some((
                row.get::<String>(0).map_err(db_err)?,
                row.get::<String>(1).unwrap_or_default(),
            ))),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

/// Read a nullable numeric column. SQLite may hand back an integer for a REAL
/// column holding a whole number.
fn value_to_f64(value: Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Real(v) => Ok(Some(v)),
        Value::Integer(v) => Ok(Some(v as f64)),
        other => Err(HarvestError::Storage(format!(
            "expected a numeric timestamp, got {other:?}"
        ))),
    }
}

/// Convert a database row to a [`StoredPost`].
fn row_to_stored_post(row: &libsql::Row) -> Result<StoredPost> {
    Ok(StoredPost {
        id: row.get::<i64>(0).map_err(db_err)?,
        source: row.get::<String>(1).map_err(db_err)?,
        title: row.get::<String>(2).map_err(db_err)?,
        author: row.get::<String>(3).map_err(db_err)?,
        created_utc: value_to_f64(row.get_value(4).map_err(db_err)?)?.unwrap_or_default(),
        created_date: row.get::<String>(5).map_err(db_err)?,
    })
}
