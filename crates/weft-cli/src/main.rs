use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

use weft_client::{HttpDownloader, JsonLinesWriter, ParserAnalyzer, ProcessorPipeline};
use weft_client::{link_parser, page_parser};
use weft_core::domain::primary_domain_of;
use weft_core::{
    ComponentId, DataArgs, Item, Kind, ModuleArgs, ProcessItem, RequestArgs, Scheduler,
    SerialNumberGenerator,
};

#[derive(Parser)]
#[command(name = "weft", version, about = "Pluggable web crawl engine")]
struct Cli {
    /// Seed URL; its primary domain is always crawlable
    #[arg(env = "WEFT_SEED")]
    seed: Url,

    /// Extra primary domains to crawl (comma-separated)
    #[arg(short, long = "domain", env = "WEFT_DOMAINS", value_delimiter = ',')]
    domains: Vec<String>,

    /// Maximum link depth; the seed is depth 0
    #[arg(long, env = "WEFT_MAX_DEPTH", default_value_t = 1)]
    depth: u32,

    /// Append extracted pages to this JSON Lines file
    #[arg(short, long, env = "WEFT_OUTPUT")]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 2)]
    downloaders: usize,

    #[arg(long, default_value_t = 1)]
    analyzers: usize,

    #[arg(long, default_value_t = 1)]
    pipelines: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "WEFT_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Allow requests to private/reserved addresses
    #[arg(long, default_value_t = false)]
    allow_private: bool,

    /// Milliseconds between idle checks
    #[arg(long, default_value_t = 200)]
    idle_interval_ms: u64,

    /// Consecutive idle checks before the crawl counts as finished
    #[arg(long, default_value_t = 5)]
    idle_rounds: u32,

    /// Stop after this many seconds even if work remains
    #[arg(long, env = "WEFT_MAX_RUNTIME")]
    max_runtime: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("weft=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_args = DataArgs::from_env().context("Invalid buffer pool configuration")?;
    let module_args = build_modules(&cli)?;

    let request_args = RequestArgs::new(crawl_domains(&cli.seed, &cli.domains)?, cli.depth);

    let sched = Arc::new(Scheduler::new());
    sched
        .init(request_args, data_args, module_args)
        .context("Failed to initialize scheduler")?;

    let mut errors = sched.error_chan()?;
    let error_log = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(err) = errors.recv().await {
            count += 1;
            tracing::warn!(kind = ?err.kind(), error = %err, "Crawl error");
        }
        count
    });

    sched
        .start(cli.seed.clone())
        .context("Failed to start scheduler")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping");
                shutdown.cancel();
            }
        }
    });
    let deadline = cli.max_runtime.map(Duration::from_secs);

    let reason = tokio::select! {
        () = shutdown.cancelled() => "interrupted",
        () = wait_until_idle(&sched, cli.idle_interval_ms, cli.idle_rounds) => "finished",
        () = sleep_or_forever(deadline) => "max runtime reached",
    };
    tracing::info!(reason, "Crawl ending");

    sched.stop().context("Failed to stop scheduler")?;
    let error_count = error_log.await.unwrap_or(0);

    let summary = sched.summary();
    tracing::info!(
        urls = summary.url_count,
        errors = error_count,
        "Crawl complete"
    );
    println!("{}", summary.to_json_pretty()?);

    Ok(())
}

/// The given domains, or the seed's primary domain when none are given.
fn crawl_domains(seed: &Url, domains: &[String]) -> Result<Vec<String>> {
    if !domains.is_empty() {
        return Ok(domains.to_vec());
    }
    let domain = primary_domain_of(seed).context("Seed URL has no usable domain")?;
    Ok(vec![domain])
}

/// One serial number generator for every component id in the run.
fn build_modules(cli: &Cli) -> Result<ModuleArgs> {
    let sn = SerialNumberGenerator::default();
    let timeout = Duration::from_secs(cli.timeout);
    let writer = cli
        .output
        .as_ref()
        .map(|path| {
            JsonLinesWriter::create(path)
                .with_context(|| format!("Failed to open output file: {}", path.display()))
        })
        .transpose()?;

    let mut args = ModuleArgs::new();
    for _ in 0..cli.downloaders {
        let id = ComponentId::encode(Kind::Downloader, sn.get(), None);
        let mut downloader = HttpDownloader::with_timeout(id, timeout)?;
        if cli.allow_private {
            downloader = downloader.allow_private_urls();
        }
        args = args.with_downloader(downloader);
    }
    for _ in 0..cli.analyzers {
        let id = ComponentId::encode(Kind::Analyzer, sn.get(), None);
        args = args.with_analyzer(ParserAnalyzer::new(id, vec![link_parser(), page_parser()])?);
    }
    for _ in 0..cli.pipelines {
        let id = ComponentId::encode(Kind::Pipeline, sn.get(), None);
        let mut processors = vec![log_item()];
        if let Some(writer) = &writer {
            processors.push(writer.processor());
        }
        args = args.with_pipeline(ProcessorPipeline::new(id, processors)?);
    }
    Ok(args)
}

fn log_item() -> ProcessItem {
    Arc::new(|item: Item| -> Result<Item, weft_core::CrawlError> {
        let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("?");
        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
        tracing::info!(%url, %title, "Page extracted");
        Ok(item)
    })
}

async fn wait_until_idle(sched: &Scheduler, interval_ms: u64, rounds: u32) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut streak = 0;
    while streak < rounds.max(1) {
        interval.tick().await;
        streak = if sched.idle() { streak + 1 } else { 0 };
    }
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
