//! `sensordash` – phone motion dashboard.
//!
//! Subcommands:
//!
//! - `serve`: open the sample store, start the refresh scheduler and the
//!   dashboard/ingestion server, run until Ctrl-C.
//! - `poll`: read a phone running phyphox once a second and post each reading
//!   to the ingestion endpoint.
//! - `init-config`: write `~/.sensordash/config.toml` with default values.

mod config;
mod poller;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use sensordash_cockpit::CockpitServer;
use sensordash_runtime::{FrameBus, RefreshScheduler, init_tracing};
use sensordash_store::{SampleStore, SqliteSampleStore};
use sensordash_types::SensorError;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::poller::Poller;

#[derive(Parser, Debug)]
#[command(name = "sensordash", version, about = "Live dashboard for phone motion sensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dashboard and ingestion server.
    Serve {
        /// Log at debug level.
        #[arg(long, default_value_t = false)]
        debug: bool,
        /// HTTP port (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
        /// SQLite database file (overrides the config file).
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
    },
    /// Forward phyphox readings to the ingestion endpoint.
    Poll {
        /// User id attached to every sample.
        #[arg(long)]
        user: Option<String>,
        /// Base URL of the phone, e.g. http://192.168.0.108
        #[arg(long, value_name = "URL")]
        phyphox: Option<String>,
        /// Ingestion endpoint URL.
        #[arg(long, value_name = "URL")]
        ingest: Option<String>,
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Write a default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let result = match cli.command {
        Command::Serve { debug, port, db } => {
            // Tracing first: the OTLP exporter must exist before the runtime.
            let _guard = init_tracing("sensordash", debug);
            print_banner();
            let cfg = Config {
                http_port: port.unwrap_or(cfg.http_port),
                db_path: db.unwrap_or(cfg.db_path),
                ..cfg
            };
            block_on(serve(cfg))
        }
        Command::Poll {
            user,
            phyphox,
            ingest,
            debug,
        } => {
            let _guard = init_tracing("sensordash-poller", debug);
            let cfg = Config {
                user_id: user.unwrap_or(cfg.user_id),
                phyphox_url: phyphox.unwrap_or(cfg.phyphox_url),
                ingest_url: ingest.unwrap_or(cfg.ingest_url),
                ..cfg
            };
            block_on(poll(cfg))
        }
        Command::InitConfig { force } => init_config(force),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

fn block_on<F: std::future::Future<Output = Result<(), SensorError>>>(fut: F) -> Result<(), SensorError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SensorError::Io(format!("failed to start async runtime: {e}")))?
        .block_on(fut)
}

/// Shutdown channel flipped by Ctrl-C / SIGTERM.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }
    rx
}

// ─────────────────────────────────────────────────────────────────────────────
// serve
// ─────────────────────────────────────────────────────────────────────────────

fn open_store(path: &Path) -> Result<SqliteSampleStore, SensorError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            SensorError::Store(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    SqliteSampleStore::open(path)
        .map_err(|e| SensorError::Store(format!("{}: {e}", path.display())))
}

async fn serve(cfg: Config) -> Result<(), SensorError> {
    let store: Arc<dyn SampleStore> = Arc::new(open_store(&cfg.db_path)?);
    let bus = FrameBus::default();
    let shutdown = shutdown_signal();

    let server = CockpitServer::new(Arc::clone(&store), bus.clone())
        .with_port(cfg.http_port)
        .with_request_timeout(cfg.request_timeout());
    let listener = server.bind().await?;

    println!(
        "  Dashboard:  {}",
        format!("http://localhost:{}", cfg.http_port).bold()
    );
    println!(
        "  Ingestion:  {}",
        format!("POST http://localhost:{}/api/sensor_ingest", cfg.http_port).dimmed()
    );
    println!("  Database:   {}", cfg.db_path.display().to_string().dimmed());
    println!();

    let scheduler = Arc::new(RefreshScheduler::new(store, bus, cfg.scheduler_config()));
    let refresh = tokio::spawn(scheduler.run(shutdown.clone()));

    server.serve(listener, shutdown).await;
    if let Err(e) = refresh.await {
        warn!(error = %e, "refresh task ended abnormally");
    }
    info!("sensordash stopped");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// poll
// ─────────────────────────────────────────────────────────────────────────────

async fn poll(cfg: Config) -> Result<(), SensorError> {
    let poller = Poller::new(&cfg.user_id, &cfg.phyphox_url, &cfg.ingest_url)?;
    println!(
        "  Polling {} as {} → {}",
        cfg.phyphox_url.bold(),
        cfg.user_id.bold(),
        cfg.ingest_url.dimmed()
    );
    poller.run(shutdown_signal()).await;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// init-config
// ─────────────────────────────────────────────────────────────────────────────

fn init_config(force: bool) -> Result<(), SensorError> {
    let path = config::config_path();
    if path.exists() && !force {
        println!(
            "  Config already exists at {} (use {} to overwrite).",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return Ok(());
    }
    config::save(&Config::default())?;
    println!(
        "  {} Config written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  ___                        ___          _    "#.bold().cyan());
    println!("{}", r#" / __| ___ _ _  ___ ___ _ _|   \ __ _ __| |_  "#.bold().cyan());
    println!("{}", r#" \__ \/ -_) ' \(_-</ _ \ '_| |) / _` (_-< ' \ "#.bold().cyan());
    println!("{}", r#" |___/\___|_||_/__/\___/_| |___/\__,_/__/_||_|"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "SensorDash".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Live phone motion dashboard");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from(["sensordash", "serve", "--debug", "--port", "9000", "--db", "/tmp/s.db"])
            .unwrap();
        match cli.command {
            Command::Serve { debug, port, db } => {
                assert!(debug);
                assert_eq!(port, Some(9000));
                assert_eq!(db, Some(PathBuf::from("/tmp/s.db")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn poll_flags_parse() {
        let cli = Cli::try_parse_from([
            "sensordash",
            "poll",
            "--user",
            "alice",
            "--phyphox",
            "http://192.168.0.108",
        ])
        .unwrap();
        match cli.command {
            Command::Poll { user, phyphox, ingest, debug } => {
                assert_eq!(user.as_deref(), Some("alice"));
                assert_eq!(phyphox.as_deref(), Some("http://192.168.0.108"));
                assert_eq!(ingest, None);
                assert!(!debug);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn init_config_is_kebab_case() {
        let cli = Cli::try_parse_from(["sensordash", "init-config", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }

    #[test]
    fn open_store_creates_missing_directories() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("samples.db");
        let store = open_store(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(path.exists());
    }
}
