use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use qrbench::{
    run_duration_bound, run_fixed_count, run_warmup, AdapterSelect, AggregateReport, BenchConfig,
    EncodedImage, ImageCache, Protocol, RunMode, StreamAdapter, SyncAdapter, SyncApi,
};
use qrbench::wire::HealthResponse;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    /// Multipart upload to /detect/file
    File,
    /// JSON body to /detect/base64
    Base64,
    /// Alternate file/base64 by request parity
    Mixed,
    /// Persistent duplex sessions against /ws
    Stream,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::File => Protocol::File,
            ProtocolArg::Base64 => Protocol::Base64,
            ProtocolArg::Mixed => Protocol::Mixed,
            ProtocolArg::Stream => Protocol::Stream,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "qrbench", about = "Drive QR detection service benchmarks")]
struct Args {
    /// Base URL of the detection service
    #[arg(long, default_value = "http://localhost:3000")]
    host: String,

    /// Transport to exercise
    #[arg(long, value_enum, default_value_t = ProtocolArg::File)]
    protocol: ProtocolArg,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 10)]
    concurrency: usize,

    /// Total request count (fixed-count mode; ignored when --duration-secs is set)
    #[arg(long, default_value_t = 100)]
    requests: u64,

    /// Run for a wall-clock duration instead of a fixed count
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Warmup exchanges before the measured run
    #[arg(long, default_value_t = 10)]
    warmup: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Image file(s) used as the request payload; each becomes a cache entry
    #[arg(long, required = true)]
    image: Vec<PathBuf>,

    /// Expected decoded text for accuracy verification (streaming runs).
    /// One value per --image, matched by position; unmatched images get an
    /// unverifiable placeholder token.
    #[arg(long)]
    expect_text: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mode = match args.duration_secs {
        Some(secs) => RunMode::DurationBound {
            duration: Duration::from_secs(secs),
        },
        None => RunMode::FixedCount {
            total_requests: args.requests,
        },
    };

    let config = BenchConfig::try_new(&args.host, args.protocol.into(), args.concurrency, mode)?
        .with_warmup(args.warmup)
        .with_request_timeout(Duration::from_secs(args.timeout_secs));

    check_service_health(&config).await?;

    let cache = Arc::new(load_cache(&args)?);
    info!(entries = cache.len(), "payload cache ready");

    let report = match config.protocol {
        Protocol::File => run_sync(&config, cache, SyncApi::File).await?,
        Protocol::Base64 => run_sync(&config, cache, SyncApi::Base64).await?,
        Protocol::Mixed => run_mixed(&config, cache).await?,
        Protocol::Stream => run_stream(&config, cache).await?,
    };

    print_report(&report);
    Ok(())
}

/// Fatal before any samples are collected: a service that is down at run
/// start is a setup failure, not a sample.
async fn check_service_health(config: &BenchConfig) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to construct health-check client")?;
    let response = client
        .get(config.health_url())
        .send()
        .await
        .with_context(|| format!("service unreachable at {}", config.health_url()))?;
    if !response.status().is_success() {
        return Err(anyhow!(
            "health check failed with HTTP {}",
            response.status().as_u16()
        ));
    }
    let health: HealthResponse = response
        .json()
        .await
        .context("health response was not decodable")?;
    info!(service = %health.service, version = %health.version, "service healthy");
    if let Some(pool) = &health.pool_stats {
        info!(
            initial_size = pool.initial_size,
            max_size = pool.max_size,
            "detector pool"
        );
    }
    if !health.features.is_empty() {
        let features: Vec<&str> = health.features.keys().map(String::as_str).collect();
        info!(features = ?features, "service features");
    }
    Ok(())
}

fn load_cache(args: &Args) -> Result<ImageCache> {
    let mut entries = Vec::with_capacity(args.image.len());
    for (index, path) in args.image.iter().enumerate() {
        let bytes = std::fs::read(path)
            .with_context(|| format!("unable to read image {}", path.display()))?;
        let token = args
            .expect_text
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("unverified-{}", index));
        entries.push(EncodedImage::new(token, bytes));
    }
    ImageCache::from_entries(entries)
}

async fn run_sync(
    config: &BenchConfig,
    cache: Arc<ImageCache>,
    api: SyncApi,
) -> Result<AggregateReport> {
    let adapter = Arc::new(SyncAdapter::new(config, api, cache)?);
    if config.warmup_requests > 0 {
        info!(count = config.warmup_requests, "warming up");
        run_warmup(adapter.as_ref(), config.warmup_requests).await;
    }
    let select = Arc::new(AdapterSelect::Single(adapter));
    dispatch(config, select).await
}

async fn run_mixed(config: &BenchConfig, cache: Arc<ImageCache>) -> Result<AggregateReport> {
    let file = Arc::new(SyncAdapter::new(config, SyncApi::File, Arc::clone(&cache))?);
    let base64 = Arc::new(SyncAdapter::new(config, SyncApi::Base64, cache)?);
    if config.warmup_requests > 0 {
        info!(count = config.warmup_requests, "warming up");
        run_warmup(file.as_ref(), config.warmup_requests).await;
    }
    let select = Arc::new(AdapterSelect::Alternating {
        even: file,
        odd: base64,
    });
    dispatch(config, select).await
}

async fn run_stream(config: &BenchConfig, cache: Arc<ImageCache>) -> Result<AggregateReport> {
    let adapter = Arc::new(StreamAdapter::connect(config, cache).await?);
    info!(sessions = adapter.sessions(), "stream sessions established");
    if config.warmup_requests > 0 {
        info!(count = config.warmup_requests, "warming up");
        run_warmup(adapter.as_ref(), config.warmup_requests).await;
    }
    adapter.begin_measurement();
    let select = Arc::new(AdapterSelect::Single(
        Arc::clone(&adapter) as Arc<dyn qrbench::DetectExchange>
    ));
    let report = dispatch(config, select).await?;

    match adapter.accuracy().accuracy() {
        Some(accuracy) => println!(
            "Detection accuracy: {:.1}% ({} / {} received)",
            accuracy * 100.0,
            adapter.accuracy().correct(),
            adapter.accuracy().received()
        ),
        None => println!("Detection accuracy: n/a (no results received)"),
    }
    adapter.shutdown().await?;
    Ok(report)
}

async fn dispatch(config: &BenchConfig, select: Arc<AdapterSelect>) -> Result<AggregateReport> {
    match &config.mode {
        RunMode::FixedCount { total_requests } => {
            run_fixed_count(select, *total_requests, config.concurrency).await
        }
        RunMode::DurationBound { duration } => {
            run_duration_bound(select, config.concurrency, *duration).await
        }
    }
}

fn print_report(report: &AggregateReport) {
    println!(
        "Total requests: {} (success {}, failure {})",
        report.total, report.successes, report.failures
    );
    println!(
        "Elapsed: {:.2}s  QPS: {:.2}",
        report.elapsed.as_secs_f64(),
        report.qps
    );

    if let Some(latency) = &report.client_latency {
        println!("Client latency (ms):");
        print_distribution("total", latency);
    }
    if !report.phases.is_empty() {
        println!("Phase breakdown (ms):");
        for (phase, dist) in &report.phases {
            print_distribution(phase, dist);
        }
    }
    if !report.server_reported.is_empty() {
        println!("Server-reported (ms):");
        for (metric, dist) in &report.server_reported {
            print_distribution(metric, dist);
        }
    }
    if let Some(size) = report.mean_response_size {
        println!("Mean response size: {:.0} bytes", size);
    }
    if !report.errors.is_empty() {
        println!("Failures by kind:");
        for (kind, count) in &report.errors {
            println!("  {}: {}", kind, count);
        }
    }
}

fn print_distribution(name: &str, dist: &qrbench::Distribution) {
    println!(
        "  {}: mean={:.2} median={:.2} min={:.2} max={:.2} p95={:.2} p99={:.2} (n={})",
        name, dist.mean, dist.median, dist.min, dist.max, dist.p95, dist.p99, dist.count
    );
}
