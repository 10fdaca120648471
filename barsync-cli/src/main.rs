//! barsync CLI: sync, fetch, symbol listing and cache commands.
//!
//! Commands:
//! - `sync`: bring the local Parquet cache up to date for one or more symbols
//! - `fetch`: uncached fetch of a window, printed or written as CSV
//! - `symbols`: list tradable symbols of a source
//! - `cache status`: report cached files and their date ranges

mod config;

use anyhow::{bail, Context, Result};
use barsync_core::data::normalize::parse_stamp;
use barsync_core::data::{AShareSource, BarCache, BinanceSource, CircuitBreaker};
use barsync_core::{
    fetch_bars, list_symbols, Bar, BarSource, DataError, FetchRequest, Period, SyncEngine,
    SyncReport, SystemClock,
};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use config::FileConfig;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "barsync",
    about = "barsync: incremental OHLCV sync into a local Parquet cache"
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Binance,
    Ashare,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync symbols into the cache and report what changed.
    Sync {
        /// Symbols to sync (e.g., BTCUSDT ETHUSDT, or 600519 000001).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Bar period: 1m, 5m, 15m, 30m, 1h, 2h, 4h, 1d.
        #[arg(long, default_value = "1h")]
        period: Period,

        /// Start (YYYY-MM-DD or YYYY-MM-DD HH:MM). Defaults to the configured start.
        #[arg(long)]
        start: Option<String>,

        #[arg(long, value_enum, default_value_t = SourceKind::Binance)]
        source: SourceKind,

        /// Cache directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Symbols synced in parallel.
        #[arg(long, default_value_t = 4)]
        jobs: usize,
    },
    /// Fetch bars without touching the cache.
    Fetch {
        symbol: String,

        #[arg(long, default_value = "1h")]
        period: Period,

        /// Start (YYYY-MM-DD or YYYY-MM-DD HH:MM).
        #[arg(long)]
        start: String,

        /// End (YYYY-MM-DD or YYYY-MM-DD HH:MM). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        #[arg(long, value_enum, default_value_t = SourceKind::Binance)]
        source: SourceKind,

        /// Write CSV here instead of printing.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List tradable symbols.
    Symbols {
        #[arg(long, value_enum, default_value_t = SourceKind::Binance)]
        source: SourceKind,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached files, row counts and date ranges.
    Status {
        /// Cache directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = FileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync {
            symbols,
            period,
            start,
            source,
            cache_dir,
            jobs,
        } => run_sync(&config, symbols, period, start, source, cache_dir, jobs),
        Commands::Fetch {
            symbol,
            period,
            start,
            end,
            source,
            out,
        } => run_fetch(&config, symbol, period, &start, end, source, out.as_deref()),
        Commands::Symbols { source, json } => run_symbols(&config, source, json),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&config.cache_dir(cache_dir)),
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_source(kind: SourceKind, config: &FileConfig) -> Result<Box<dyn BarSource>> {
    let breaker = Arc::new(CircuitBreaker::default_provider());
    let source: Box<dyn BarSource> = match kind {
        SourceKind::Binance => Box::new(BinanceSource::new(&config.binance, breaker)?),
        SourceKind::Ashare => Box::new(AShareSource::new(&config.ashare, breaker)?),
    };
    Ok(source)
}

fn parse_when(raw: &str) -> Result<NaiveDateTime> {
    match parse_stamp(raw) {
        Some(dt) => Ok(dt),
        None => bail!("invalid date '{raw}': expected YYYY-MM-DD or YYYY-MM-DD HH:MM"),
    }
}

/// Drop repeated symbols, keeping first-seen order.
fn unique_symbols(symbols: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    symbols
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn run_sync(
    config: &FileConfig,
    symbols: Vec<String>,
    period: Period,
    start: Option<String>,
    kind: SourceKind,
    cache_dir: Option<PathBuf>,
    jobs: usize,
) -> Result<()> {
    let start = start.as_deref().map(parse_when).transpose()?;
    let symbols = unique_symbols(symbols);

    let source = build_source(kind, config)?;
    let cache = BarCache::new(config.cache_dir(cache_dir));
    tracing::debug!(cache_root = %cache.root().display(), symbols = symbols.len(), jobs, "syncing");
    let clock = SystemClock;
    let engine =
        SyncEngine::new(source.as_ref(), &cache, &clock).with_settings(config.sync.clone());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.clamp(1, symbols.len().max(1)))
        .build()
        .context("build worker pool")?;
    let outcomes: Vec<(String, Result<SyncReport, DataError>)> = pool.install(|| {
        symbols
            .par_iter()
            .map(|symbol| (symbol.clone(), engine.sync(symbol, period, start)))
            .collect()
    });

    println!(
        "{:<12} {:>8} {:>8} {:>6} {:<8} {}",
        "Symbol", "Rows", "Fetched", "Pages", "Status", "Cache file"
    );
    println!("{}", "-".repeat(72));

    let mut failed = 0;
    for (symbol, outcome) in &outcomes {
        match outcome {
            Ok(report) => println!(
                "{:<12} {:>8} {:>8} {:>6} {:<8} {}",
                symbol,
                report.bars.len(),
                report.fetched,
                report.pages,
                if report.is_partial() { "partial" } else { "ok" },
                report.cache_path.display()
            ),
            Err(e) => {
                failed += 1;
                println!("{symbol:<12} {:>8} {:>8} {:>6} {:<8}", "-", "-", "-", "failed");
                eprintln!("Error for {symbol}: {e}");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} symbols failed", outcomes.len());
    }
    Ok(())
}

fn run_fetch(
    config: &FileConfig,
    symbol: String,
    period: Period,
    start: &str,
    end: Option<String>,
    kind: SourceKind,
    out: Option<&Path>,
) -> Result<()> {
    let request = FetchRequest {
        symbol,
        period,
        start: parse_when(start)?,
        end: end.as_deref().map(parse_when).transpose()?,
    };
    if let Some(end) = request.end {
        if end < request.start {
            bail!("--end {end} is before --start {}", request.start);
        }
    }

    let source = build_source(kind, config)?;
    let bars = fetch_bars(source.as_ref(), &SystemClock, &config.sync, &request)?;

    match out {
        Some(path) => {
            write_csv(path, &bars)?;
            println!("Wrote {} bars to {}", bars.len(), path.display());
        }
        None => print_bars(&bars),
    }
    Ok(())
}

fn write_csv(path: &Path, bars: &[Bar]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer.flush()?;
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

fn print_bars(bars: &[Bar]) {
    println!(
        "{:<20} {:>12} {:>12} {:>12} {:>12} {:>14} {:>16}",
        "dt", "open", "high", "low", "close", "vol", "amount"
    );
    for bar in bars {
        println!(
            "{:<20} {:>12} {:>12} {:>12} {:>12} {:>14} {:>16}",
            bar.dt.format("%Y-%m-%d %H:%M:%S"),
            fmt_opt(bar.open),
            fmt_opt(bar.high),
            fmt_opt(bar.low),
            fmt_opt(bar.close),
            fmt_opt(bar.vol),
            fmt_opt(bar.amount),
        );
    }
}

fn run_symbols(config: &FileConfig, kind: SourceKind, json: bool) -> Result<()> {
    let source = build_source(kind, config)?;
    let symbols = list_symbols(source.as_ref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&symbols)?);
        return Ok(());
    }
    for info in &symbols {
        let detail = match (&info.base, &info.quote, &info.name) {
            (Some(base), Some(quote), _) => format!("{base}/{quote}"),
            (_, _, Some(name)) => name.clone(),
            _ => String::new(),
        };
        println!("{:<16} {detail}", info.symbol);
    }
    println!("{} symbols", symbols.len());
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    let cache = BarCache::new(cache_dir);
    let entries = cache.status()?;

    if entries.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    println!("Cache: {}", cache_dir.display());
    println!("Files: {}", entries.len());
    println!();
    println!(
        "{:<10} {:<12} {:<6} {:<10} {:>8}  {}",
        "Source", "Symbol", "Period", "Bucket", "Rows", "Range"
    );
    println!("{}", "-".repeat(92));
    for e in &entries {
        println!(
            "{:<10} {:<12} {:<6} {:<10} {:>8}  {} to {}",
            e.source,
            e.symbol,
            e.period,
            e.bucket.format("%Y%m%d"),
            e.rows,
            e.first_dt.format("%Y-%m-%d %H:%M"),
            e.last_dt.format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}
