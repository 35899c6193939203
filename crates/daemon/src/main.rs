//! LanShare
//!
//! Shares a folder with browsers on the local network.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::ipc::{get_socket_path, IpcClient, IpcResponse};
use daemon::network::{lan_ip, share_url};
use daemon::orchestrator::{ServerEvent, ShareServer};
use daemon::ui::qr::{generate_png_qr, generate_terminal_qr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// LanShare - share a folder with browsers on the local network.
#[derive(Parser, Debug)]
#[command(name = "lanshare")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the share server in the foreground
    Serve {
        /// Folder to share (overrides the configured one)
        folder: Option<PathBuf>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(long, short)]
        port: Option<u16>,

        /// Do not print a QR code of the share URL
        #[arg(long)]
        no_qr: bool,
    },

    /// Share a different folder on the running server
    Share {
        /// Folder to share
        folder: PathBuf,
    },

    /// Stop sharing any folder, keeping the server up
    Unshare,

    /// Show server status
    Status,

    /// Stop the running server
    Stop {
        /// Seconds to wait for the server to exit
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Print or save a QR code of the share URL
    Qr {
        /// Write a PNG to this file instead of printing to the terminal
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// URL to encode (defaults to the running server's URL)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    let _log_guard = init_tracing(&config, cli.verbose)?;
    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Serve {
            folder,
            host,
            port,
            no_qr,
        } => {
            if let Some(folder) = folder {
                config.share.root = Some(folder);
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if no_qr {
                config.server.show_qr = false;
            }
            config.validate()?;

            run_server(config).await?;
        }
        Commands::Share { folder } => {
            let folder = std::fs::canonicalize(&folder)
                .with_context(|| format!("Cannot share {}", folder.display()))?;

            let mut client = connect_to_server().await?;
            match client.set_root(folder).await? {
                IpcResponse::RootSet { root } => println!("Now sharing {}", root.display()),
                IpcResponse::Error { message } => anyhow::bail!("Server refused folder: {}", message),
                other => anyhow::bail!("Unexpected response from server: {:?}", other),
            }
        }
        Commands::Unshare => {
            let mut client = connect_to_server().await?;
            match client.clear_root().await? {
                IpcResponse::RootCleared => println!("No folder is shared"),
                IpcResponse::Error { message } => anyhow::bail!("Server returned error: {}", message),
                other => anyhow::bail!("Unexpected response from server: {:?}", other),
            }
        }
        Commands::Status => match query_status().await {
            Ok(status) => {
                println!(
                    "LanShare: {}",
                    if status.running { "running" } else { "stopping" }
                );
                println!("  Uptime: {}", format_duration(status.uptime_secs));
                match &status.root {
                    Some(root) => println!("  Folder: {}", root.display()),
                    None => println!("  Folder: (none)"),
                }
                if let Some(url) = &status.url {
                    println!("  URL:    {}", url);
                }
            }
            Err(e) => {
                eprintln!("LanShare is not running: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Stop { timeout } => match graceful_stop(timeout).await {
            Ok(()) => println!("LanShare stopped"),
            Err(e) => {
                eprintln!("Failed to stop LanShare: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Qr { output, url } => {
            let url = match url {
                Some(url) => url,
                None => match query_status().await {
                    Ok(ServerStatus { url: Some(url), .. }) => url,
                    _ => share_url(lan_ip(), config.server.port),
                },
            };

            match output {
                Some(path) => {
                    generate_png_qr(&url, &path)?;
                    println!("QR code for {} written to {}", url, path.display());
                }
                None => {
                    println!("{}", generate_terminal_qr(&url)?);
                    println!("{}", url);
                }
            }
        }
    }

    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
/// The returned guard flushes the log file and must live until exit.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(log_file) = &config.daemon.log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("log_file must name a file: {}", log_file.display()))?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(Some(guard))
}

/// Run the share server until a signal or a stop request arrives.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let socket_path = get_socket_path();
    if IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(200))
        .await
        .is_ok()
    {
        eprintln!("Error: LanShare is already running");
        eprintln!();
        eprintln!("To change the shared folder, run:");
        eprintln!("  lanshare share FOLDER");
        eprintln!();
        eprintln!("To stop it, run:");
        eprintln!("  lanshare stop");
        std::process::exit(1);
    }

    let show_qr = config.server.show_qr;
    let mut server = ShareServer::new(config)?.with_control_socket(socket_path);
    server.start().await?;

    let url = server.share_url().unwrap_or_default().to_string();
    println!("LanShare is running at {}", url);
    match server.registry().get() {
        Some(root) => println!("Sharing {}", root.path().display()),
        None => println!("No folder shared yet; run `lanshare share FOLDER`"),
    }
    if show_qr {
        match generate_terminal_qr(&url) {
            Ok(qr) => println!("{}", qr),
            Err(e) => tracing::warn!("Failed to render QR code: {}", e),
        }
    }

    // Subscribe to server events for logging
    let mut events = server.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServerEvent::StateChanged(state) => {
                    tracing::debug!("Server state: {:?}", state);
                }
                ServerEvent::RootChanged(Some(root)) => {
                    tracing::info!("Now sharing {}", root.display());
                }
                ServerEvent::RootChanged(None) => {
                    tracing::info!("No folder is shared");
                }
                ServerEvent::ShutdownRequested => {
                    tracing::info!("Shutdown requested by control client");
                }
                ServerEvent::Error { message } => {
                    tracing::error!("Server error: {}", message);
                }
            }
        }
    });

    let stop_requested = server.shutdown_token();
    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result?;
        }
        _ = stop_requested.cancelled() => {}
    }

    server.stop().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Connect to the running server's control socket.
async fn connect_to_server() -> anyhow::Result<IpcClient> {
    IpcClient::connect_with_timeout(&get_socket_path(), Duration::from_secs(5))
        .await
        .map_err(|_| anyhow::anyhow!("LanShare is not running (cannot connect to control socket)"))
}

/// Status reported by a running server.
struct ServerStatus {
    running: bool,
    uptime_secs: u64,
    root: Option<PathBuf>,
    url: Option<String>,
}

async fn query_status() -> anyhow::Result<ServerStatus> {
    let mut client = connect_to_server().await?;

    match client.status().await? {
        IpcResponse::Status {
            running,
            uptime_secs,
            root,
            url,
        } => Ok(ServerStatus {
            running,
            uptime_secs,
            root,
            url,
        }),
        IpcResponse::Error { message } => anyhow::bail!("Server returned error: {}", message),
        other => anyhow::bail!("Unexpected response from server: {:?}", other),
    }
}

/// Ask the server to stop and wait until its control socket is gone.
async fn graceful_stop(timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = get_socket_path();
    let mut client = connect_to_server().await?;

    println!("Sending stop request...");
    client.set_timeout(Duration::from_secs(timeout_secs));
    match client.stop().await? {
        IpcResponse::Stopping => {
            println!("Stop acknowledged, waiting for transfers to finish...");
        }
        IpcResponse::Error { message } => anyhow::bail!("Server returned error: {}", message),
        other => anyhow::bail!("Unexpected response from server: {:?}", other),
    }

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }

        if IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    anyhow::bail!("Timeout waiting for LanShare to exit ({}s)", timeout_secs)
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
