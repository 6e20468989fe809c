//! ostimer-tick - run a timer for a while and report what it did
//!
//! Usage:
//!     ostimer-tick --period-ms 50 --periodic --duration-ms 260
//!     ostimer-tick --backend thread --period-ms 10 --periodic
//!     ostimer-tick --config timer.json --json

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use ostimer_core::{BackendKind, Timer, TimerConfig, TimerError, TimerStats};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Platform,
    Thread,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Platform => BackendKind::Platform,
            Backend::Thread => BackendKind::Thread,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ostimer-tick")]
#[command(about = "Run an OS timer and count its fires")]
#[command(version)]
struct Args {
    /// Timer period in milliseconds
    #[arg(short, long, default_value_t = 100)]
    period_ms: u64,

    /// Re-arm after every expiration
    #[arg(long)]
    periodic: bool,

    /// How long to let the timer run before stopping it
    #[arg(short, long, default_value_t = 1000)]
    duration_ms: u64,

    /// Timer backend
    #[arg(short, long, value_enum, default_value_t = Backend::Platform)]
    backend: Backend,

    /// JSON TimerConfig; overrides --period-ms, --periodic and --backend
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Report {
    backend: &'static str,
    period_ms: u64,
    periodic: bool,
    elapsed_ms: u64,
    ticks: u64,
    stats: TimerStats,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "ostimer_core=debug"
    } else {
        "ostimer_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    match run(&config, Duration::from_millis(args.duration_ms)) {
        Ok(report) => output(&report, args.json),
        Err(e) => {
            if args.json {
                match serde_json::to_string_pretty(&e.to_error_response()) {
                    Ok(json) => println!("{}", json),
                    Err(_) => eprintln!("Error: {}", e),
                }
            } else {
                eprintln!("Error: {}", e);
            }
            std::process::exit(1);
        }
    }
}

fn load_config(args: &Args) -> Result<TimerConfig, TimerError> {
    if let Some(path) = &args.config {
        tracing::debug!(path = %path.display(), "loading timer config");
        return TimerConfig::from_file(path);
    }

    let config = TimerConfig::new()
        .period(Duration::from_millis(args.period_ms))
        .periodic(args.periodic)
        .backend(args.backend.into());
    config.validate()?;
    Ok(config)
}

fn run(config: &TimerConfig, duration: Duration) -> Result<Report, TimerError> {
    let ticks = Arc::new(AtomicU64::new(0));
    let counter = ticks.clone();

    let mut timer = Timer::from_config(
        config,
        Some(Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(tick = n, "tick");
        })),
    )?;

    tracing::info!(
        backend = timer.backend_name(),
        period_ms = config.period_ms,
        periodic = config.periodic,
        "starting timer"
    );

    let started = Instant::now();
    timer.start()?;
    std::thread::sleep(duration);
    timer.stop();
    let elapsed = started.elapsed();

    Ok(Report {
        backend: timer.backend_name(),
        period_ms: config.period_ms,
        periodic: config.periodic,
        elapsed_ms: elapsed.as_millis() as u64,
        ticks: ticks.load(Ordering::Relaxed),
        stats: timer.stats(),
    })
}

fn output(report: &Report, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Error serializing report: {}", e),
        }
        return;
    }

    println!(
        "{} timer, period {}ms ({}), ran {}ms",
        report.backend,
        report.period_ms,
        if report.periodic { "periodic" } else { "one-shot" },
        report.elapsed_ms
    );
    println!("  ticks:   {}", report.ticks);
    println!("  skipped: {}", report.stats.skipped);
    println!("  panics:  {}", report.stats.panics);
}
