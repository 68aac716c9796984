use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};

use ota_relay::{telemetry, Config, Relay, UpdateRecord};

#[derive(Parser)]
#[command(name = "ota-relay")]
#[command(about = "Over-the-air update relay with pull resolution and real-time SSE/WebSocket push", version)]
#[command(after_help = "Endpoints:
   GET  /api/ota?apiKey=&currentVersion=&deviceId=&action=&targetVersion=
   POST /api/ota?apiKey=
   GET  /api/ota/stream?apiKey=          (Server-Sent Events)
   GET  /api/ota/status?apiKey=
   WS   ws://host:<ws-port>/?apiKey=")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Config file (defaults to ./ota-relay.toml when present)
    #[arg(short, long, global = true, env = "OTA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Serve(ServeArgs),

    /// Register an update on a running relay from a JSON file
    Publish {
        #[arg(long, env = "OTA_SERVER", default_value = "http://localhost:3000")]
        server: String,

        #[arg(long, env = "OTA_API_KEY")]
        api_key: String,

        file: PathBuf,
    },

    /// Pull from a running relay as a client would
    Check {
        #[arg(long, env = "OTA_SERVER", default_value = "http://localhost:3000")]
        server: String,

        #[arg(long, env = "OTA_API_KEY")]
        api_key: String,

        #[arg(long, default_value = "1.0.0")]
        current: String,

        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "OTA_HOST")]
    host: Option<String>,

    #[arg(long, env = "OTA_HTTP_PORT")]
    http_port: Option<u16>,

    #[arg(long, env = "OTA_WS_PORT")]
    ws_port: Option<u16>,

    /// Seed file with the initial update records
    #[arg(long, env = "OTA_SEED_FILE")]
    seed: Option<PathBuf>,

    /// Additional glob to watch (repeatable)
    #[arg(short, long = "watch", value_name = "GLOB")]
    watch: Vec<String>,

    #[arg(long, env = "OTA_NO_WATCH")]
    no_watch: bool,

    #[arg(long, env = "OTA_LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "OTA_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.http_port {
            config.server.http_port = port;
        }
        if let Some(port) = self.ws_port {
            config.server.ws_port = port;
        }
        if let Some(seed) = self.seed {
            config.store.seed_file = Some(seed);
        }
        config.watch.paths.extend(self.watch);
        if self.no_watch {
            config.watch.enabled = false;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(dir) = self.log_dir {
            config.log.dir = Some(dir);
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve(cli.serve)) {
        Commands::Serve(args) => {
            let mut config = Config::load(cli.config.as_deref()).context("loading config")?;
            args.apply(&mut config);
            serve(config).await
        }
        Commands::Publish {
            server,
            api_key,
            file,
        } => publish(&server, &api_key, &file).await,
        Commands::Check {
            server,
            api_key,
            current,
            device,
        } => check(&server, &api_key, &current, device.as_deref()).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    telemetry::init(&config.log)?;

    let relay = Relay::start(&config).await.context("starting relay")?;
    let http = relay.http_addr()?;
    let ws = relay.ws_addr()?;

    println!("{}", "🚀 OTA relay running".cyan().bold());
    println!("  {} {}", "→ Pull:".bright_blue(), format!("http://{http}/api/ota").bright_white());
    println!("  {} {}", "→ SSE: ".bright_blue(), format!("http://{http}/api/ota/stream").bright_white());
    println!("  {} {}", "→ WS:  ".bright_blue(), format!("ws://{ws}/").bright_white());
    if let Some(latest) = relay.state().store.latest_version() {
        println!("  {} {}", "→ Latest:".bright_blue(), latest.to_string().bright_yellow());
    }
    if relay.is_watching() {
        println!("{}", "👁  Watching for source changes...".bright_cyan());
    } else {
        println!("{}", "⚠️  File watching inactive".bright_yellow());
    }

    relay.run(shutdown_signal()).await?;
    println!("{}", "✓ Relay stopped".green());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

async fn publish(server: &str, api_key: &str, file: &Path) -> Result<()> {
    let body = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let record: serde_json::Value =
        serde_json::from_slice(&body).with_context(|| format!("{} is not valid JSON", file.display()))?;

    let response = reqwest::Client::new()
        .post(format!("{}/api/ota", server.trim_end_matches('/')))
        .query(&[("apiKey", api_key)])
        .json(&record)
        .send()
        .await
        .context("sending update")?;

    let status = response.status();
    if status != StatusCode::CREATED {
        let text = response.text().await.unwrap_or_default();
        bail!("server rejected update ({status}): {text}");
    }

    let created: UpdateRecord = response.json().await.context("decoding created record")?;
    println!(
        "{} Published {}",
        "✓".green(),
        created.version.to_string().bright_yellow()
    );
    Ok(())
}

async fn check(server: &str, api_key: &str, current: &str, device: Option<&str>) -> Result<()> {
    let mut query = vec![("apiKey", api_key), ("currentVersion", current)];
    if let Some(device) = device {
        query.push(("deviceId", device));
    }

    let response = reqwest::Client::new()
        .get(format!("{}/api/ota", server.trim_end_matches('/')))
        .query(&query)
        .send()
        .await
        .context("pulling update")?;

    match response.status() {
        StatusCode::NO_CONTENT => {
            println!("{} Up to date ({})", "✓".green(), current.bright_white());
        }
        StatusCode::OK => {
            let record: UpdateRecord = response.json().await.context("decoding update")?;
            println!(
                "{} Update available: {} → {}{}",
                "⬆".bright_cyan(),
                current.bright_white(),
                record.version.to_string().bright_yellow(),
                if record.mandatory { " (mandatory)".red().to_string() } else { String::new() }
            );
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        status => {
            let text = response.text().await.unwrap_or_default();
            bail!("pull failed ({status}): {text}");
        }
    }
    Ok(())
}
