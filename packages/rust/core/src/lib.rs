//! Harvest orchestration for PostHarvest.
//!
//! Ties the fetcher and storage together: for each source, read the
//! watermark, fetch what is newer, and persist it atomically.

pub mod harvester;
pub mod store;

pub use harvester::{
    HarvestReport, Harvester, ProgressReporter, SilentProgress, SourceReport, SourceStatus,
};
pub use store::{PostSink, RunJournal, WatermarkStore};
