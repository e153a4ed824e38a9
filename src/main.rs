mod api;
mod config;
mod knowledge;
mod model;
mod onvif;
mod probe;
mod scanner;
mod search;
mod urls;

use anyhow::Result;
use clap::Parser;
use config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "camscout",
    version,
    about = "Discovers working video stream endpoints on IP cameras"
)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Run a single scan against this host or URL, print events as JSON
    /// lines and exit.
    #[arg(long)]
    scan_target: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let cfg_path = args
        .config
        .unwrap_or_else(|| PathBuf::from("camscout.json"));
    let (mut cfg, created) = Config::load_or_create(&cfg_path)?;

    if created {
        warn!(path = %cfg_path.display(), "created new config file with defaults");
    }
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir.display().to_string();
    }

    let kb = Arc::new(knowledge::KnowledgeBase::new(&cfg.data_dir));
    let auth_keys = match kb.load_query_parameters().await {
        Ok(keys) => keys.as_ref().clone(),
        Err(err) => {
            warn!(error = %err, "query parameter table unavailable; using built-in auth keys");
            knowledge::DEFAULT_AUTH_KEYS.iter().map(|k| k.to_string()).collect()
        }
    };

    let probe = Arc::new(probe::StreamProber::new(cfg.scan.ffprobe_path.clone()));
    if !probe.ffprobe_available().await {
        warn!(
            path = %cfg.scan.ffprobe_path,
            "ffprobe not available; rtsp streams cannot be validated"
        );
    }

    let scanner = Arc::new(scanner::Scanner::new(
        Arc::clone(&kb),
        onvif::OnvifProber::new(),
        probe,
        auth_keys,
        cfg.scan.workers,
    ));

    if let Some(target) = args.scan_target {
        let request = model::DiscoveryRequest {
            target,
            model: args.model,
            username: args.username,
            password: args.password,
            channel: 0,
            max_streams: 10,
            timeout_seconds: 240,
            model_limit: 6,
        };
        let summary = scanner
            .scan(&request, &StdoutSink)
            .await
            .map_err(|err| anyhow::anyhow!("invalid scan request: {err}"))?;
        info!(
            tested = summary.total_tested,
            found = summary.total_found,
            "one-shot scan finished"
        );
        return Ok(());
    }

    info!(
        bind = %cfg.api.bind,
        data_dir = %cfg.data_dir,
        workers = cfg.scan.workers,
        "camscout starting"
    );

    api::run(cfg, kb, scanner).await
}

/// Sink for the one-shot CLI mode: one JSON event per line on stdout.
struct StdoutSink;

impl scanner::EventSink for StdoutSink {
    fn emit(&self, event: model::ScanEvent) {
        println!(
            "{}",
            serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string())
        );
    }
}

fn init_logging(level: &str) {
    let env = tracing_subscriber::EnvFilter::try_new(level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_target(false)
        .compact()
        .init();
}
