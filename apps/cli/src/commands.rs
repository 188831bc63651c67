//! CLI command definitions, routing, and tracing setup.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use postharvest_core::{
    HarvestReport, Harvester, ProgressReporter, SilentProgress, SourceReport, SourceStatus,
};
use postharvest_fetcher::Fetcher;
use postharvest_shared::{
    AppConfig, FetchConfig, SourceName, SourceStats, init_config, init_config_at, load_config,
    load_config_from, readable_utc,
};
use postharvest_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PostHarvest: pull new subreddit posts into a local SQLite database.
#[derive(Parser, Debug)]
#[command(
    name = "postharvest",
    version,
    about = "Incrementally harvest new posts from subreddit listings into SQLite.",
    long_about = None,
    args_conflicts_with_subcommands = true,
)]
pub(crate) struct Cli {
    /// Comma-separated sources to harvest (defaults to the configured list).
    pub sources: Option<String>,

    /// Database file (overrides config).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Activity log file (overrides config).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Config file (defaults to ~/.postharvest/postharvest.toml).
    #[arg(long, global = true, env = "POSTHARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Give up on a source after this many seconds (overrides config).
    #[arg(long)]
    pub source_timeout: Option<u64>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    fn is_config_init(&self) -> bool {
        matches!(
            self.command,
            Some(Command::Config {
                action: ConfigAction::Init
            })
        )
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// JSON runs print the report on stdout, so console logs go to stderr.
    fn logs_to_stderr(self) -> bool {
        self == LogFormat::Json
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Show per-source post counts, watermarks and the last run.
    Status {
        /// Only report this source.
        source: Option<String>,

        /// Also list the newest N stored posts per source.
        #[arg(long, default_value = "0")]
        recent: u32,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Config file merged with command-line overrides.
#[derive(Debug)]
pub(crate) struct Settings {
    pub config: AppConfig,
    pub db_path: PathBuf,
    pub log_file: PathBuf,
    pub source_timeout: Option<Duration>,
}

impl Settings {
    pub(crate) fn resolve(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) if cli.is_config_init() && !path.exists() => AppConfig::default(),
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };

        let db_path = cli
            .db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.defaults.db_path));
        let log_file = cli
            .log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.defaults.log_file));
        let source_timeout = cli
            .source_timeout
            .or(config.defaults.source_timeout_secs)
            .map(Duration::from_secs);

        Ok(Self {
            config,
            db_path,
            log_file,
            source_timeout,
        })
    }

    /// Sources from the command line, or the configured defaults.
    pub(crate) fn sources(&self, arg: Option<&str>) -> Vec<String> {
        match arg {
            Some(list) => SourceName::split_list(list),
            None => self.config.defaults.sources.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing: stdout in the chosen format plus an append-only
/// activity log file.
pub(crate) fn init_tracing(cli: &Cli, settings: &Settings) -> Result<()> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "postharvest=info",
        1 => "postharvest=debug",
        _ => "postharvest=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let file = open_log_file(&settings.log_file)?;
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file));

    let console = if cli.log_format.logs_to_stderr() {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    let (text, json) = match cli.log_format {
        LogFormat::Text => (
            Some(fmt::layer().with_target(false).with_writer(console)),
            None,
        ),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(console))),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .with(file_layer)
        .try_init()
        .wrap_err("failed to install tracing subscriber")?;
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("cannot create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("cannot open log file {}", path.display()))
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command {
        None => cmd_harvest(cli.sources.as_deref(), cli.log_format, &settings).await,
        Some(Command::Status { source, recent }) => {
            cmd_status(&settings, source.as_deref(), recent).await
        }
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()).await,
            ConfigAction::Show => cmd_config_show(&settings).await,
        },
    }
}

async fn cmd_harvest(sources: Option<&str>, format: LogFormat, settings: &Settings) -> Result<()> {
    let sources = settings.sources(sources);
    if sources.is_empty() {
        return Err(eyre!("no sources given and none configured"));
    }

    info!(db = %settings.db_path.display(), "starting harvest run");

    let fetch_config = FetchConfig::try_from(&settings.config.fetch)?;
    let fetcher = Fetcher::new(fetch_config)?;
    let storage = Arc::new(
        Storage::open(&settings.db_path)
            .await
            .wrap_err_with(|| format!("cannot open database {}", settings.db_path.display()))?,
    );

    let mut harvester = Harvester::new(fetcher, storage.clone(), storage.clone())
        .with_journal(storage.clone());
    if let Some(limit) = settings.source_timeout {
        harvester = harvester.with_source_timeout(limit);
    }

    let report = match format {
        LogFormat::Text => {
            let progress = CliProgress::new(sources.len());
            harvester.run(&sources, &progress).await
        }
        LogFormat::Json => harvester.run(&sources, &SilentProgress).await,
    };

    match format {
        LogFormat::Text => print!("{}", render_report(&report)),
        LogFormat::Json => println!("{}", serde_json::to_string(&report)?),
    }
    info!("script completed");
    Ok(())
}

async fn cmd_status(settings: &Settings, source: Option<&str>, recent: u32) -> Result<()> {
    let storage = Storage::open_readonly(&settings.db_path).await?;
    let source = source.map(SourceName::new).transpose()?;
    let stats = gather_stats(&storage, source.as_ref()).await?;
    let last_run = storage.last_finished_run().await?;

    print!("{}", render_status(&stats, last_run.as_ref()));

    if recent > 0 {
        for stat in &stats {
            let source = SourceName::new(&stat.source)?;
            println!();
            println!("  {source}:");
            for post in storage.recent_posts(&source, recent).await? {
                println!(
                    "    {}  {}  ({})",
                    post.created_date, post.title, post.author
                );
            }
        }
    }
    Ok(())
}

/// Per-source stats: every stored source, or just `only`.
async fn gather_stats(storage: &Storage, only: Option<&SourceName>) -> Result<Vec<SourceStats>> {
    let Some(source) = only else {
        return Ok(storage.source_stats().await?);
    };
    let post_count = storage.post_count(source).await?;
    if post_count == 0 {
        return Ok(Vec::new());
    }
    Ok(vec![SourceStats {
        source: source.to_string(),
        post_count,
        latest_created_utc: storage.latest_created_utc(source).await?,
    }])
}

async fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => init_config_at(path)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(settings: &Settings) -> Result<()> {
    let toml_str = toml::to_string_pretty(&settings.config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn render_report(report: &HarvestReport) -> String {
    let mut out = String::from("\n");
    for source in &report.sources {
        let outcome = match &source.status {
            SourceStatus::Ingested => format!("{} new", source.saved),
            SourceStatus::NoNewPosts => "up to date".to_string(),
            SourceStatus::Failed(e) => format!("failed: {e}"),
        };
        let partial = match source.status {
            SourceStatus::Ingested if source.is_partial() => " (partial)",
            _ => "",
        };
        out.push_str(&format!("  {:<24} {outcome}{partial}\n", source.source));
    }
    out.push_str(&format!(
        "\n  Saved {} posts from {} sources ({} failed) in {:.1}s\n\n",
        report.total_saved(),
        report.sources.len(),
        report.failures().count(),
        report.elapsed.as_secs_f64()
    ));
    out
}

fn render_status(stats: &[SourceStats], last_run: Option<&(String, String)>) -> String {
    if stats.is_empty() {
        return "  No posts stored yet.\n".to_string();
    }

    let mut out = format!("  {:<24} {:>8}  {}\n", "SOURCE", "POSTS", "LATEST");
    for stat in stats {
        let latest = stat
            .latest_created_utc
            .and_then(|t| readable_utc(t).ok())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  {:<24} {:>8}  {latest}\n",
            stat.source, stat.post_count
        ));
    }
    if let Some((finished_at, stats_json)) = last_run {
        let saved = serde_json::from_str::<serde_json::Value>(stats_json)
            .ok()
            .and_then(|v| v["saved"].as_u64());
        match saved {
            Some(saved) => out.push_str(&format!("\n  Last run: {finished_at} ({saved} saved)\n")),
            None => out.push_str(&format!("\n  Last run: {finished_at}\n")),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar over the source list.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn source_started(&self, source: &str, _current: usize, _total: usize) {
        self.bar.set_message(format!("Harvesting {source}"));
    }

    fn source_finished(&self, _report: &SourceReport) {
        self.bar.inc(1);
    }

    fn done(&self, _report: &HarvestReport) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("postharvest").chain(args.iter().copied()))
            .expect("valid args")
    }

    fn write_config(body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ph_cli_{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn bare_invocation_harvests_default_sources() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        assert!(cli.sources.is_none());

        let settings = Settings {
            config: AppConfig::default(),
            db_path: PathBuf::from("db/postharvest.db"),
            log_file: PathBuf::from("db/activity.log"),
            source_timeout: None,
        };
        assert_eq!(
            settings.sources(None),
            vec!["computerscience", "pics", "brazil"]
        );
    }

    #[test]
    fn positional_sources_are_split() {
        let cli = parse(&["rust, golang,,zig"]);
        let settings = Settings {
            config: AppConfig::default(),
            db_path: PathBuf::new(),
            log_file: PathBuf::new(),
            source_timeout: None,
        };
        assert_eq!(
            settings.sources(cli.sources.as_deref()),
            vec!["rust", "golang", "zig"]
        );
    }

    #[test]
    fn subcommands_parse() {
        assert!(matches!(
            parse(&["status"]).command,
            Some(Command::Status { source, recent }) if source.is_none() && recent == 0
        ));
        assert!(matches!(
            parse(&["status", "pics", "--recent", "3"]).command,
            Some(Command::Status { source: Some(ref s), recent: 3 }) if s == "pics"
        ));
        assert!(matches!(
            parse(&["config", "show"]).command,
            Some(Command::Config { action }) if matches!(action, ConfigAction::Show)
        ));
        assert_eq!(parse(&["-vv", "--log-format", "json"]).verbose, 2);
    }

    #[test]
    fn flags_override_config_file() {
        let path = write_config(
            r#"
[defaults]
sources = ["pics"]
db_path = "data/from_file.db"
log_file = "data/from_file.log"
source_timeout_secs = 120
"#,
        );
        let config_arg = path.to_string_lossy().to_string();

        let from_file = Settings::resolve(&parse(&["--config", &config_arg])).unwrap();
        assert_eq!(from_file.db_path, PathBuf::from("data/from_file.db"));
        assert_eq!(from_file.log_file, PathBuf::from("data/from_file.log"));
        assert_eq!(from_file.source_timeout, Some(Duration::from_secs(120)));
        assert_eq!(from_file.sources(None), vec!["pics"]);

        let overridden = Settings::resolve(&parse(&[
            "--config",
            &config_arg,
            "--db",
            "other.db",
            "--source-timeout",
            "5",
        ]))
        .unwrap();
        assert_eq!(overridden.db_path, PathBuf::from("other.db"));
        assert_eq!(overridden.source_timeout, Some(Duration::from_secs(5)));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn report_lists_every_source() {
        let mut ok = SourceReport {
            source: "pics".into(),
            watermark: None,
            fetched: 3,
            saved: 3,
            stop: None,
            status: SourceStatus::Ingested,
            elapsed: Duration::ZERO,
        };
        let mut failed = ok.clone();
        failed.source = "brazil".into();
        failed.saved = 0;
        failed.status = SourceStatus::Failed("storage error: disk full".into());
        ok.stop = Some(postharvest_fetcher::StopReason::Exhausted);

        let text = render_report(&HarvestReport {
            sources: vec![ok, failed],
            elapsed: Duration::from_millis(1500),
        });
        assert!(text.contains("pics"));
        assert!(text.contains("3 new"));
        assert!(text.contains("failed: storage error: disk full"));
        assert!(text.contains("Saved 3 posts from 2 sources (1 failed)"));
    }

    #[test]
    fn status_renders_watermarks_and_last_run() {
        assert!(render_status(&[], None).contains("No posts stored yet"));

        let stats = vec![SourceStats {
            source: "pics".into(),
            post_count: 42,
            latest_created_utc: Some(0.0),
        }];
        let run = ("2024-01-01 00:00:00".to_string(), r#"{"saved": 7}"#.to_string());
        let text = render_status(&stats, Some(&run));
        assert!(text.contains("pics"));
        assert!(text.contains("42"));
        assert!(text.contains("1970-01-01 00:00:00"));
        assert!(text.contains("Last run: 2024-01-01 00:00:00 (7 saved)"));
    }

    #[test]
    fn json_logs_leave_stdout_to_the_report() {
        assert!(LogFormat::Json.logs_to_stderr());
        assert!(!LogFormat::Text.logs_to_stderr());
    }

    #[test]
    fn config_init_honours_config_path() {
        let path = std::env::temp_dir()
            .join(format!("ph_cli_{}", uuid::Uuid::now_v7()))
            .join("postharvest.toml");
        let config_arg = path.to_string_lossy().to_string();

        // The target file does not exist yet; resolving must not fail.
        let cli = parse(&["config", "init", "--config", &config_arg]);
        assert!(Settings::resolve(&cli).is_ok());

        let written = init_config_at(&path).unwrap();
        assert_eq!(written, path);
        let loaded = Settings::resolve(&parse(&["--config", &config_arg])).unwrap();
        assert_eq!(
            loaded.config.defaults.sources,
            AppConfig::default().defaults.sources
        );

        // Anything but `config init` still requires the file to exist.
        std::fs::remove_file(&path).ok();
        let missing = Settings::resolve(&parse(&["--config", &config_arg]));
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn status_for_one_source() {
        let db = std::env::temp_dir().join(format!("ph_cli_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&db).await.unwrap();
        let pics = SourceName::new("pics").unwrap();
        let brazil = SourceName::new("brazil").unwrap();
        let post = |created_utc| postharvest_shared::Post {
            title: "t".into(),
            author: "a".into(),
            created_utc,
        };
        storage
            .save_posts(&pics, &[post(20.0), post(10.0)])
            .await
            .unwrap();
        storage.save_posts(&brazil, &[post(5.0)]).await.unwrap();

        let all = gather_stats(&storage, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = gather_stats(&storage, Some(&pics)).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].post_count, 2);
        assert_eq!(one[0].latest_created_utc, Some(20.0));

        let unknown = SourceName::new("rust").unwrap();
        let none = gather_stats(&storage, Some(&unknown)).await.unwrap();
        assert!(none.is_empty());
    }
}
