//! Manifold MCP server binary.
//!
//! Speaks newline-delimited JSON-RPC on stdio (`tools/list`, `tools/call`,
//! `ping`); all logging goes to stderr because stdout is the protocol
//! channel. Startup configuration failures print to stderr and exit
//! non-zero; a clean shutdown (stdin EOF) exits zero.

#![allow(clippy::print_stdout, clippy::print_stderr)] // stdout is the transport, stderr the console

mod rpc;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

use manifold::catalog::Catalog;
use manifold::conversation::{ConversationStore, StoreConfig};
use manifold::providers::ProviderRegistry;
use manifold::server::Dispatcher;
use manifold::settings::{EnvSource, ServerSettings};
use manifold::tools::ToolContext;

/// How often the conversation store is garbage-collected.
const GC_INTERVAL: Duration = Duration::from_secs(600);

/// Manifold - multi-provider LLM orchestration over MCP
#[derive(Parser)]
#[command(name = "manifold")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv); LOG_LEVEL overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Optional .env file overlaying the process environment
    #[arg(long, env = "MANIFOLD_ENV_FILE", global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdio (the default)
    Serve,
    /// Print the published tool descriptors as JSON and exit
    Tools,
    /// Print the model catalog as seen through the restriction policy
    Models,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("manifold: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("manifold: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // LOG_LEVEL (or RUST_LOG) wins over -v flags when set.
    let filter = std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| EnvFilter::new(format!("manifold={default_level},manifold_server={default_level}")),
            EnvFilter::new,
        );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> manifold::Result<()> {
    let env = match &cli.env_file {
        Some(path) => EnvSource::with_env_file(path)?,
        None if Path::new(".env").exists() => EnvSource::with_env_file(Path::new(".env"))?,
        None => EnvSource::process(),
    };

    let settings = Arc::new(ServerSettings::from_env(&env)?);
    let catalog = Catalog::load(&env)?;
    let registry = Arc::new(ProviderRegistry::from_env(&env, &catalog)?);
    let store = Arc::new(ConversationStore::new(StoreConfig::from_settings(&settings)));
    info!(
        providers = ?registry.configured_kinds(),
        default_model = %settings.default_model,
        "manifold configured"
    );

    let dispatcher = Arc::new(Dispatcher::new(ToolContext::new(
        registry,
        Arc::clone(&store),
        settings,
    )));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(dispatcher, store).await,
        Commands::Tools => {
            let descriptors = dispatcher.descriptors();
            println!(
                "{}",
                serde_json::to_string_pretty(&descriptors)
                    .unwrap_or_else(|_| "[]".to_owned())
            );
            Ok(())
        }
        Commands::Models => {
            let result = dispatcher.dispatch("listmodels", serde_json::json!({})).await;
            for block in result.content {
                if let manifold::tools::ContentBlock::Text { text } = block {
                    println!("{text}");
                }
            }
            Ok(())
        }
    }
}

async fn serve(dispatcher: Arc<Dispatcher>, store: Arc<ConversationStore>) -> manifold::Result<()> {
    // Background TTL/LRU sweep for conversation memory.
    let gc_store = Arc::clone(&store);
    let gc_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            gc_store.gc().await;
        }
    });

    // One writer task owns stdout; request handlers run concurrently and
    // send finished lines through the channel.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    info!("serving MCP on stdio");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_owned();
        if line.is_empty() {
            continue;
        }
        let dispatcher = Arc::clone(&dispatcher);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle_line(&dispatcher, &line).await;
            let _ = tx.send(response.to_line());
        });
    }
    drop(tx);

    let _ = writer.await;
    gc_task.abort();
    info!("stdin closed, shutting down");
    Ok(())
}

async fn handle_line(dispatcher: &Dispatcher, line: &str) -> rpc::Response {
    let request: rpc::Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "unparseable request line");
            return rpc::Response::error(None, rpc::PARSE_ERROR, format!("parse error: {e}"));
        }
    };

    match request.method.as_str() {
        "tools/list" => rpc::Response::success(
            request.id,
            serde_json::json!({"tools": dispatcher.descriptors()}),
        ),
        "tools/call" => {
            let params: rpc::CallParams = match serde_json::from_value(request.params) {
                Ok(params) => params,
                Err(e) => {
                    return rpc::Response::error(
                        request.id,
                        rpc::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            };
            let result = dispatcher.dispatch(&params.name, params.arguments).await;
            match serde_json::to_value(&result) {
                Ok(value) => rpc::Response::success(request.id, value),
                Err(e) => {
                    error!(error = %e, "unserializable tool result");
                    rpc::Response::error(request.id, rpc::INVALID_PARAMS, e.to_string())
                }
            }
        }
        "ping" => rpc::Response::success(request.id, serde_json::json!({})),
        other => rpc::Response::error(
            request.id,
            rpc::METHOD_NOT_FOUND,
            format!("unknown method '{other}'"),
        ),
    }
}
