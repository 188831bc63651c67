//! Persistence seams used by the harvester, and their libSQL implementation.

use async_trait::async_trait;

use postharvest_shared::{Post, Result, SourceName, Watermark};
use postharvest_storage::Storage;

/// Read side: the newest `created_utc` already persisted for a source.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn watermark(&self, source: &SourceName) -> Result<Watermark>;
}

/// Write side: append a batch of posts atomically. Returns rows written.
#[async_trait]
pub trait PostSink: Send + Sync {
    async fn save(&self, posts: &[Post], source: &SourceName) -> Result<usize>;
}

/// Run-level bookkeeping. Failures here are logged by the caller, never fatal.
#[async_trait]
pub trait RunJournal: Send + Sync {
    async fn start_run(&self, sources: &[String]) -> Result<String>;
    async fn finish_run(&self, run_id: &str, stats: &serde_json::Value) -> Result<()>;
}

#[async_trait]
impl WatermarkStore for Storage {
    async fn watermark(&self, source: &SourceName) -> Result<Watermark> {
        self.latest_created_utc(source).await
    }
}

#[async_trait]
impl PostSink for Storage {
    async fn save(&self, posts: &[Post], source: &SourceName) -> Result<usize> {
        self.save_posts(source, posts).await
    }
}

#[async_trait]
impl RunJournal for Storage {
    async fn start_run(&self, sources: &[String]) -> Result<String> {
        self.insert_harvest_run(sources).await
    }

    async fn finish_run(&self, run_id: &str, stats: &serde_json::Value) -> Result<()> {
        self.finish_harvest_run(run_id, &stats.to_string()).await
    }
}
