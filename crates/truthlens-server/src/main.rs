//! truthlens-server: HTTP front end for the prediction dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use truthlens::transport::{ServerConfig, serve};
use truthlens::{DispatchConfig, PredictionService, TRUTHLENS_VERSION, VersionInfo};

const DEFAULT_CONFIG_PATH: &str = "server-config.json";

const USAGE: &str = "usage: truthlens-server [--config <path>] [--host <host>] [--port <port>]";

/// Initialize tracing with TRUTHLENS_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("TRUTHLENS_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("truthlens={level},truthlens_server={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[derive(Debug)]
struct Args {
    config: PathBuf,
    server: ServerConfig,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        server: ServerConfig::default(),
    };

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} requires a value\n{USAGE}"))
        };
        match arg.as_str() {
            "--config" => parsed.config = PathBuf::from(value("--config")?),
            "--host" => parsed.server.host = value("--host")?,
            "--port" => {
                let raw = value("--port")?;
                parsed.server.port = raw
                    .parse()
                    .with_context(|| format!("invalid port: {raw}"))?;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unexpected argument: {other}\n{USAGE}"),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = parse_args(std::env::args().skip(1))?;

    info!("truthlens {}", TRUTHLENS_VERSION);

    let config = DispatchConfig::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;

    let mut version = VersionInfo::new();
    if let Ok(build) = std::env::var("TRUTHLENS_BUILD") {
        version = version.with_build(build);
    }
    let service = Arc::new(PredictionService::new(&config).with_version(version));
    info!(
        strategies = ?service.health().strategies,
        max_concurrency = config.max_concurrency,
        "Dispatch configured"
    );

    serve(args.server, service).await
}
