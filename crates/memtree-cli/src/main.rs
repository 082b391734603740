mod app;
mod http;
mod server;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memtree_core::RecallRequest;
use rmcp::{ServiceExt, transport::stdio};

use crate::app::{App, NewMemory};

#[derive(Parser)]
#[command(name = "memtree", about = "Conversational memory recall: CLI, MCP server and HTTP endpoint")]
struct Cli {
    /// Data directory (default: $MEMTREE_DATA_DIR or ~/.memtree)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve,

    /// Serve recall over HTTP
    Http {
        /// Listen address (default: [http].bind from config.toml)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one recall; the request is JSON read from a file or stdin
    Recall {
        /// Request file (stdin when omitted or "-")
        request: Option<PathBuf>,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },

    /// Store memories from JSON lines, one exchange per line
    Add {
        /// Owner of the memories
        #[arg(long)]
        user: String,

        /// Input file (stdin when omitted or "-")
        file: Option<PathBuf>,
    },

    /// Show memory counts
    Stats {
        /// Limit to one user
        #[arg(long)]
        user: Option<String>,
    },
}

impl Cli {
    fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(memtree_store::default_base_dir)
    }

    fn open_app(&self) -> Result<App> {
        App::open(&self.data_dir())
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve => cmd_serve(&cli).await,
        Commands::Http { bind } => cmd_http(&cli, bind.as_deref()).await,
        Commands::Recall { request, pretty } => cmd_recall(&cli, request.as_deref(), *pretty).await,
        Commands::Add { user, file } => cmd_add(&cli, user, file.as_deref()).await,
        Commands::Stats { user } => cmd_stats(&cli, user.as_deref()),
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

// ---------------------------------------------------------------------------
// Advisory pidfile for observability
// ---------------------------------------------------------------------------

/// Check for an existing pidfile and log accordingly, then write our own.
fn acquire_pidfile(data_dir: &Path) -> Option<PathBuf> {
    let path = data_dir.join("memtree-serve.pid");
    if let Ok(content) = std::fs::read_to_string(&path)
        && let Ok(pid) = content.trim().parse::<u32>()
    {
        if is_process_alive(pid) {
            tracing::warn!("another memtree serve (PID {pid}) is running; sharing the store via busy_timeout");
        } else {
            tracing::info!("cleaned up stale pidfile (PID {pid} is dead)");
            let _ = std::fs::remove_file(&path);
        }
    }

    match std::fs::File::create(&path) {
        Ok(mut f) => {
            let _ = write!(f, "{}", std::process::id());
            tracing::info!("wrote pidfile: {}", path.display());
            Some(path)
        }
        Err(e) => {
            tracing::warn!("failed to write pidfile: {e}");
            None
        }
    }
}

fn release_pidfile(path: &Path) {
    let _ = std::fs::remove_file(path);
    tracing::info!("removed pidfile: {}", path.display());
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve(cli: &Cli) -> Result<()> {
    let data_dir = cli.data_dir();
    let app = App::open(&data_dir)?;
    tracing::info!("starting MCP server on {}", data_dir.display());

    let pidfile = acquire_pidfile(&data_dir);

    let server = server::MemtreeServer::new(app);
    let service = server
        .clone()
        .serve(stdio())
        .await
        .context("failed to start MCP server");

    // Early EOF (no handshake) is a clean exit, not an error
    let result = match service {
        Ok(service) => tokio::select! {
            quit = service.waiting() => quit.map(|_| ()).context("MCP server task failed"),
            _ = shutdown_signal() => Ok(()),
        },
        Err(e) => {
            tracing::info!("MCP session ended before initialization: {e:#}");
            Ok(())
        }
    };

    server.checkpoint_wal();
    if let Some(path) = pidfile {
        release_pidfile(&path);
    }
    result
}

async fn cmd_http(cli: &Cli, bind: Option<&str>) -> Result<()> {
    let app = cli.open_app()?;
    let bind = bind.unwrap_or(app.settings.http.bind.as_str()).to_string();
    let store = app.store.clone();
    http::serve(app, &bind).await?;
    store.checkpoint_truncate().context("WAL checkpoint failed")?;
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => {
            std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn cmd_recall(cli: &Cli, request: Option<&Path>, pretty: bool) -> Result<()> {
    let app = cli.open_app()?;
    let input = read_input(request)?;
    let request: RecallRequest =
        serde_json::from_str(&input).context("request is not a valid recall request")?;

    let response = app.recall(&request).await?;
    let json = if pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{json}");

    if cli.verbose {
        eprintln!(
            "--- shortTerm={}, longTerm roots={}, nodes={} ---",
            response.short_term.len(),
            response.long_term.len(),
            response.long_term_len()
        );
    }
    Ok(())
}

async fn cmd_add(cli: &Cli, user: &str, file: Option<&Path>) -> Result<()> {
    let app = cli.open_app()?;
    let input = read_input(file)?;

    let mut memories = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let memory: NewMemory = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid memory", i + 1))?;
        memories.push(memory);
    }

    let ids = app.add(user, memories).await?;
    println!("added {} memories for {user}", ids.len());
    Ok(())
}

fn cmd_stats(cli: &Cli, user: Option<&str>) -> Result<()> {
    let app = cli.open_app()?;
    let stats = app.stats(user)?;

    let users = stats["users"].as_array().cloned().unwrap_or_default();
    println!("data_dir:   {}", cli.data_dir().display());
    println!("users:      {}", users.len());
    println!("memories:   {}", stats["memories"]);
    for entry in &users {
        println!(
            "  {}: {}",
            entry["userId"].as_str().unwrap_or_default(),
            entry["memories"]
        );
    }
    Ok(())
}
