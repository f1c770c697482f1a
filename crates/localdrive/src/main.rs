use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localdrive::{Config, Controller, LifecycleCommand, LifecycleEvent, LifecycleManager};

#[derive(Parser, Debug)]
#[command(name = "localdrive")]
#[command(about = "Share a folder with devices on the local network")]
#[command(version)]
struct Cli {
    /// Folder to serve
    #[arg(short, long, env = "UPLOAD_FOLDER", default_value = ".")]
    folder: PathBuf,

    /// Address to bind to
    #[arg(long, env = "LOCALDRIVE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "LOCALDRIVE_PORT", default_value = "5000")]
    port: u16,

    /// Serve in the foreground without the interactive console
    #[arg(long)]
    server_only: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "LOCALDRIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "LOCALDRIVE_VERBOSE")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "localdrive=debug,tower_http=debug"
    } else {
        "localdrive=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .map_err(|err| anyhow::anyhow!("loading config {}: {}", path.display(), err))?,
        None => Config::default(),
    };

    let manager = Arc::new(
        LifecycleManager::new(&cli.folder, config)
            .with_context(|| format!("serving folder {}", cli.folder.display()))?,
    );
    info!("Serving files from: {}", manager.serving_root().display());

    if cli.server_only {
        run_server_only(&manager, &cli.host, cli.port)
    } else {
        run_console(manager, cli.host, cli.port)
    }
}

/// Serve until SIGINT/SIGTERM, then stop cleanly.
fn run_server_only(manager: &LifecycleManager, host: &str, port: u16) -> Result<()> {
    manager.start(host, port).context("starting server")?;
    if let Some(url) = manager.url() {
        println!("LocalDrive running at {}", url);
    }
    println!("Press Ctrl+C to stop");

    wait_for_shutdown_signal()?;
    info!("Shutdown signal received, stopping server...");
    manager.stop();
    Ok(())
}

/// Drive the server through the command channel from stdin lines.
fn run_console(manager: Arc<LifecycleManager>, host: String, port: u16) -> Result<()> {
    let controller = Controller::spawn(Arc::clone(&manager)).context("spawning lifecycle worker")?;

    let signals = controller.sender();
    thread::Builder::new()
        .name("localdrive-signals".into())
        .spawn(move || {
            if let Err(err) = wait_for_shutdown_signal() {
                warn!("Signal handling unavailable: {}", err);
                return;
            }
            let _ = signals.send(LifecycleCommand::Shutdown);
        })
        .context("spawning signal thread")?;

    let input = controller.sender();
    let console_host = host.clone();
    thread::Builder::new()
        .name("localdrive-console".into())
        .spawn(move || read_console(&manager, input, console_host, port))
        .context("spawning console thread")?;

    print_help();
    controller.send(LifecycleCommand::Start { host, port });

    while let Some(event) = controller.recv_event() {
        match event {
            LifecycleEvent::Started { url, .. } => println!("Server running at {}", url),
            LifecycleEvent::Stopped => println!("Server stopped"),
            LifecycleEvent::RootChanged(root) => println!("Now serving {}", root.display()),
            LifecycleEvent::Failed { command, message } => {
                eprintln!("{} failed: {}", command, message)
            }
            LifecycleEvent::Exited => break,
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn print_help() {
    println!("Commands: start | stop | toggle | status | folder <path> | quit");
}

fn print_status(manager: &LifecycleManager) {
    match manager.url() {
        Some(url) => println!("Running at {} (serving {})", url, manager.serving_root().display()),
        None => println!("Stopped (serving {})", manager.serving_root().display()),
    }
}

fn read_console(
    manager: &LifecycleManager,
    commands: Sender<LifecycleCommand>,
    host: String,
    port: u16,
) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));

        let command = match word {
            "" => continue,
            "start" => LifecycleCommand::Start {
                host: host.clone(),
                port,
            },
            "stop" => LifecycleCommand::Stop,
            "toggle" => LifecycleCommand::Toggle {
                host: host.clone(),
                port,
            },
            "folder" if !rest.trim().is_empty() => {
                LifecycleCommand::SetRoot(Path::new(rest.trim()).to_path_buf())
            }
            "quit" | "exit" => break,
            "status" => {
                print_status(manager);
                continue;
            }
            _ => {
                print_help();
                continue;
            }
        };

        if commands.send(command).is_err() {
            return;
        }
    }

    let _ = commands.send(LifecycleCommand::Shutdown);
}

fn wait_for_shutdown_signal() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;

    runtime.block_on(async {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", err);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    warn!("Failed to install SIGTERM handler: {}", err);
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
    });

    Ok(())
}
