mod sample;

use std::{
    env, process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use core_types::{EngineConfig, RetryLimiter};
use log::{info, warn};
use sample::HostSample;
use serde_json::json;
use thiserror::Error;
use time_window::{
    Coalesce, MultiKeyWindow, MultiKeyWindowBuilder, RollingWindow, RollingWindowBuilder,
    WindowError, WindowRegistry,
};
use tracing_subscriber::EnvFilter;

const GROUP: &str = "web";
const HOSTS: usize = 4;
const DEFAULT_RUN_SECS: u64 = 10;
const DEFAULT_CONFIG: &str = "config.toml";
const DEFAULT_SERIES_LEN: usize = 60;
const PUSH_INTERVAL: Duration = Duration::from_millis(250);
// every FLAKY_EVERY-th poll of the flaky host fails
const FLAKY_EVERY: u64 = 5;

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("window-diag failed: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), DiagError> {
    let args = CliArgs::parse_from(env::args().skip(1))?;
    let run_for = Duration::from_secs(args.secs);
    let config = EngineConfig::load_from(&args.config)?;
    let multi_key = &config.multi_key;
    let window: Arc<MultiKeyWindow<HostSample>> = Arc::new(
        MultiKeyWindowBuilder::from_settings(multi_key)
            .series_len(multi_key.series_len.unwrap_or(DEFAULT_SERIES_LEN))
            .build()?,
    );
    let registry: Arc<WindowRegistry<String, u64>> =
        Arc::new(WindowRegistry::new(&config.registry)?);
    // group requests per second, summed across hosts
    let requests: Arc<RollingWindow<u64>> = Arc::new(
        RollingWindowBuilder::from_settings(&config.window)
            .coalesce(Coalesce::Merge)
            .build()?,
    );
    let limiter = Arc::new(RetryLimiter::from_settings(&config.retry));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))?;
    }

    info!("window-diag: {HOSTS} hosts in group {GROUP} for {run_for:?}");
    let producers: Vec<_> = (0..HOSTS)
        .map(|idx| {
            let producer = Producer {
                host: format!("{GROUP}-{idx}"),
                flaky: idx == 0,
                window: Arc::clone(&window),
                registry: Arc::clone(&registry),
                requests: Arc::clone(&requests),
                limiter: Arc::clone(&limiter),
            };
            let stop = Arc::clone(&stop);
            thread::spawn(move || producer.run(&stop))
        })
        .collect();

    sleep_with_stop(&stop, run_for);
    stop.store(true, Ordering::Relaxed);
    for handle in producers {
        if handle.join().is_err() {
            warn!("window-diag: producer thread panicked");
        }
    }

    println!("{}", render_report(&window, &registry, &requests)?);
    Ok(())
}

/// `RUST_LOG` filter, `info` by default. Library `log` records are bridged in.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

struct CliArgs {
    secs: u64,
    config: String,
}

impl CliArgs {
    fn parse_from<I: IntoIterator<Item = String>>(args: I) -> Result<Self, DiagError> {
        let mut secs = DEFAULT_RUN_SECS;
        let mut config = DEFAULT_CONFIG.to_string();
        for arg in args {
            if let Some(value) = arg.strip_prefix("--secs=") {
                secs = value
                    .parse()
                    .map_err(|_| DiagError::InvalidSecs(value.to_string()))?;
            } else if let Some(value) = arg.strip_prefix("--config=") {
                config = value.to_string();
            } else {
                return Err(DiagError::UnknownArg(arg));
            }
        }
        Ok(Self { secs, config })
    }
}

fn render_report(
    window: &MultiKeyWindow<HostSample>,
    registry: &WindowRegistry<String, u64>,
    requests: &RollingWindow<u64>,
) -> Result<String, DiagError> {
    let mut pushes = serde_json::Map::new();
    registry.range(|host, counter| {
        pushes.insert(host.clone(), json!(counter.points()));
        true
    });
    let group = HostSample::template(GROUP, GROUP);
    let report = json!({
        "last": window.get_last_point(group.clone()),
        "series": window.series(&group),
        "max": window.pop_max(),
        "pushes": pushes,
        "requests": {
            "prev": requests.prev(),
            "max": requests.max(),
            "points": requests.points(),
        },
    });
    Ok(serde_json::to_string_pretty(&report)?)
}

struct Producer {
    host: String,
    flaky: bool,
    window: Arc<MultiKeyWindow<HostSample>>,
    registry: Arc<WindowRegistry<String, u64>>,
    requests: Arc<RollingWindow<u64>>,
    limiter: Arc<RetryLimiter>,
}

impl Producer {
    fn run(self, stop: &AtomicBool) {
        let mut polls: u64 = 0;
        while !stop.load(Ordering::Relaxed) {
            polls += 1;
            if self.limiter.allow(&self.host) {
                match self.poll(polls) {
                    Some(requests) => {
                        self.limiter.delete(&self.host);
                        self.window
                            .push(HostSample::new(self.host.as_str(), GROUP, requests));
                        self.registry.load_or_store(&self.host).push(1);
                        self.requests.push(requests);
                    }
                    None => {
                        let backoff = self.limiter.failed(&self.host);
                        warn!("{}: poll failed, backing off {backoff:?}", self.host);
                    }
                }
            }
            sleep_with_stop(stop, PUSH_INTERVAL);
        }
    }

    /// Synthetic request counter; the flaky host drops every few polls.
    fn poll(&self, polls: u64) -> Option<u64> {
        if self.flaky && polls % FLAKY_EVERY == 0 {
            return None;
        }
        let seed = self.host.bytes().map(u64::from).sum::<u64>();
        Some((polls * 7 + seed) % 100)
    }
}

fn sleep_with_stop(stop: &AtomicBool, interval: Duration) {
    const STEP: Duration = Duration::from_millis(100);
    let mut remaining = interval;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let sleep_for = remaining.min(STEP);
        thread::sleep(sleep_for);
        remaining = remaining.saturating_sub(sleep_for);
    }
}

#[derive(Debug, Error)]
enum DiagError {
    #[error("unknown argument: {0} (expected --secs=N or --config=PATH)")]
    UnknownArg(String),
    #[error("invalid --secs value: {0}")]
    InvalidSecs(String),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
