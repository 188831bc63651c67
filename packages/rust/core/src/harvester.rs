//! Ingestion orchestration: watermark → fetch → save, one source at a time.
//!
//! Every source is an isolated unit. Whatever goes wrong while reading its
//! watermark, fetching, or saving is recorded in that source's
//! [`SourceReport`] and the run moves on to the next source.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use postharvest_fetcher::{Fetcher, StopReason};
use postharvest_shared::{HarvestError, Result, SourceName, Watermark, readable_utc};

use crate::store::{PostSink, RunJournal, WatermarkStore};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Final state of one source in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum SourceStatus {
    /// New posts were saved.
    Ingested,
    /// Nothing newer than the watermark.
    NoNewPosts,
    /// The source could not be processed; nothing was saved for it.
    Failed(String),
}

/// What happened to one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    /// Source name as given by the caller.
    pub source: String,
    /// Watermark read before fetching.
    pub watermark: Watermark,
    /// Posts returned by the fetcher.
    pub fetched: usize,
    /// Rows committed.
    pub saved: usize,
    /// How the fetch ended, when it ran.
    #[serde(serialize_with = "serialize_stop")]
    pub stop: Option<StopReason>,
    pub status: SourceStatus,
    pub elapsed: Duration,
}

fn serialize_stop<S: serde::Serializer>(
    stop: &Option<StopReason>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match stop {
        Some(reason) => serializer.serialize_some(&reason.to_string()),
        None => serializer.serialize_none(),
    }
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            watermark: None,
            fetched: 0,
            saved: 0,
            stop: None,
            status: SourceStatus::NoNewPosts,
            elapsed: Duration::ZERO,
        }
    }

    /// Whether the fetch ended early and only part of the new posts were seen.
    pub fn is_partial(&self) -> bool {
        matches!(self.stop, Some(StopReason::Aborted(_)))
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    /// One entry per requested source, in input order.
    pub sources: Vec<SourceReport>,
    pub elapsed: Duration,
}

impl HarvestReport {
    /// Rows committed across all sources.
    pub fn total_saved(&self) -> usize {
        self.sources.iter().map(|s| s.saved).sum()
    }

    /// Sources that failed outright.
    pub fn failures(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| matches!(s.status, SourceStatus::Failed(_)))
    }

    /// Sources whose fetch was cut short.
    pub fn partials(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.is_partial())
    }

    fn stats_json(&self) -> serde_json::Value {
        let status = if self.failures().next().is_none() {
            "completed"
        } else {
            "completed_with_errors"
        };
        serde_json::json!({
            "status": status,
            "sources": self.sources.len(),
            "saved": self.total_saved(),
            "failed": self.failures().map(|s| s.source.as_str()).collect::<Vec<_>>(),
            "partial": self.partials().map(|s| s.source.as_str()).collect::<Vec<_>>(),
            "elapsed_ms": self.elapsed.as_millis() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a source is processed.
    fn source_started(&self, source: &str, current: usize, total: usize);
    /// Called after a source is processed, whatever the outcome.
    fn source_finished(&self, report: &SourceReport);
    /// Called when the run completes.
    fn done(&self, report: &HarvestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn source_started(&self, _source: &str, _current: usize, _total: usize) {}
    fn source_finished(&self, _report: &SourceReport) {}
    fn done(&self, _report: &HarvestReport) {}
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

/// Runs the incremental harvest over a list of sources.
pub struct Harvester {
    fetcher: Fetcher,
    watermarks: Arc<dyn WatermarkStore>,
    sink: Arc<dyn PostSink>,
    journal: Option<Arc<dyn RunJournal>>,
    source_timeout: Option<Duration>,
}

impl Harvester {
    pub fn new(
        fetcher: Fetcher,
        watermarks: Arc<dyn WatermarkStore>,
        sink: Arc<dyn PostSink>,
    ) -> Self {
        Self {
            fetcher,
            watermarks,
            sink,
            journal: None,
            source_timeout: None,
        }
    }

    /// Record each run's start and summary.
    pub fn with_journal(mut self, journal: Arc<dyn RunJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Give up on a source whose fetch (including waits) takes longer than
    /// `limit`. Nothing is saved for it.
    pub fn with_source_timeout(mut self, limit: Duration) -> Self {
        self.source_timeout = Some(limit);
        self
    }

    /// Process `sources` sequentially, in order. Never fails as a whole.
    pub async fn run(&self, sources: &[String], progress: &dyn ProgressReporter) -> HarvestReport {
        let start = Instant::now();
        info!(count = sources.len(), "starting harvest");

        let run_id = match &self.journal {
            Some(journal) => match journal.start_run(sources).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "could not record harvest run start");
                    None
                }
            },
            None => None,
        };

        let mut reports = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            progress.source_started(source, index + 1, sources.len());
            let report = self.harvest_source(source).await;
            progress.source_finished(&report);
            reports.push(report);
        }

        let report = HarvestReport {
            sources: reports,
            elapsed: start.elapsed(),
        };

        if let (Some(journal), Some(run_id)) = (&self.journal, run_id) {
            if let Err(e) = journal.finish_run(&run_id, &report.stats_json()).await {
                warn!(run_id = %run_id, error = %e, "could not record harvest run summary");
            }
        }

        info!(
            sources = report.sources.len(),
            saved = report.total_saved(),
            failed = report.failures().count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "finished processing all sources"
        );
        progress.done(&report);
        report
    }

    /// One source, fully contained: every error ends up in the report.
    #[instrument(skip(self), fields(source = %raw))]
    async fn harvest_source(&self, raw: &str) -> SourceReport {
        let start = Instant::now();
        let mut report = SourceReport::new(raw);
        info!("processing source");

        if let Err(e) = self.ingest(raw, &mut report).await {
            error!(error = %e, "error processing source");
            report.status = SourceStatus::Failed(e.to_string());
        }

        report.elapsed = start.elapsed();
        report
    }

    async fn ingest(&self, raw: &str, report: &mut SourceReport) -> Result<()> {
        let source = SourceName::new(raw)?;

        report.watermark = match self.watermarks.watermark(&source).await {
            Ok(watermark) => watermark,
            Err(e) => {
                error!(error = %e, "could not read watermark, fetching everything reachable");
                None
            }
        };
        match report.watermark {
            Some(mark) => info!(
                watermark = mark,
                readable = readable_utc(mark).unwrap_or_default(),
                "last processed timestamp"
            ),
            None => info!("no previous posts, fetching everything reachable"),
        }

        let fetch = self.fetcher.fetch_new(&source, report.watermark);
        let outcome = match self.source_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| HarvestError::Timeout(limit))?,
            None => fetch.await,
        };

        report.fetched = outcome.posts.len();
        report.stop = Some(outcome.stop.clone());
        info!(new_posts = report.fetched, "found new posts");

        if outcome.posts.is_empty() {
            if let StopReason::Aborted(reason) = outcome.stop {
                report.status = SourceStatus::Failed(reason);
                return Ok(());
            }
            info!("no new posts");
            report.status = SourceStatus::NoNewPosts;
            return Ok(());
        }

        report.saved = self.sink.save(&outcome.posts, &source).await?;
        report.status = SourceStatus::Ingested;
        Ok(())
    }
}
