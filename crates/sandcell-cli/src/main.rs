//! # sandcell CLI Entry Point
//!
//! Main binary for the sandcell script sandbox. Runs the server and offers
//! two small debugging tools for looking inside record stores.
//!
//! ## Usage
//!
//! ```bash
//! # Start the server with the default socket and store paths
//! sandcell serve
//!
//! # Start the server somewhere else, redacting every stack trace
//! sandcell serve --socket /run/sandcell.sock --mmap-path /run/sandcell-share --redact-stacks
//!
//! # Print one record from a store
//! sandcell fetch /tmp/sandcell-share 0000000000a1k
//!
//! # Print store statistics
//! sandcell inspect /tmp/sandcell-share
//! ```
//!
//! `SANDCELL_SOCKET` and `SANDCELL_MMAP_PATH` override the default socket and
//! store paths when the matching flag is not given.

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;

use sandcell_common::{PayloadCodec, ShareReader, StackPolicy};
use sandcell_server::{CapabilityRegistry, SandboxServer, ServerConfig};

const SOCKET_ENV: &str = "SANDCELL_SOCKET";
const MMAP_PATH_ENV: &str = "SANDCELL_MMAP_PATH";

#[derive(FromArgs)]
/// sandcell - run untrusted scripts in per-connection sandboxes
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Fetch(FetchArgs),
    Inspect(InspectArgs),
}

/// Arguments for running the server.
///
/// Flags win over environment variables, which win over the defaults in
/// `ServerConfig`.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// start the sandcell server
struct ServeArgs {
    /// path of the Unix socket to listen on
    #[argh(option, short = 's')]
    socket: Option<String>,

    /// path of the record store this server writes
    #[argh(option, long = "mmap-path")]
    mmap_path: Option<String>,

    /// prefix of peer store paths; the client id is appended
    #[argh(option, long = "share-prefix")]
    share_prefix: Option<String>,

    /// store size budget in megabytes
    #[argh(option, short = 'm', long = "memory-limit", default = "55")]
    memory_limit: u64,

    /// maximum number of live records in the store
    #[argh(option, long = "max-entries", default = "1024")]
    max_entries: u32,

    /// delay before the listener is bound again after a failure, in milliseconds
    #[argh(option, long = "restart-delay-ms", default = "500")]
    restart_delay_ms: u64,

    /// replace stack traces in every error record
    #[argh(switch, long = "redact-stacks")]
    redact_stacks: bool,
}

impl ServeArgs {
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let socket_path = self
            .socket
            .or_else(|| std::env::var(SOCKET_ENV).ok())
            .map(Into::into)
            .unwrap_or(defaults.socket_path);
        let mmap_path = self
            .mmap_path
            .or_else(|| std::env::var(MMAP_PATH_ENV).ok())
            .map(Into::into)
            .unwrap_or(defaults.mmap_path);
        let share_prefix = self.share_prefix.unwrap_or(defaults.share_prefix);
        let stack_policy = if self.redact_stacks {
            StackPolicy::Redact
        } else {
            StackPolicy::Preserve
        };

        ServerConfig::new()
            .with_socket_path(socket_path)
            .with_mmap_path(mmap_path)
            .with_share_prefix(share_prefix)
            .with_memory_limit_mb(self.memory_limit)
            .with_max_entries(self.max_entries)
            .with_restart_delay(Duration::from_millis(self.restart_delay_ms))
            .with_stack_policy(stack_policy)
    }
}

#[derive(FromArgs)]
#[argh(subcommand, name = "fetch")]
/// print one record from a store file
struct FetchArgs {
    /// path of the store file
    #[argh(positional)]
    store: String,

    /// record identifier
    #[argh(positional)]
    id: String,

    /// print the payload on a single line
    #[argh(switch, short = 'c')]
    compact: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "inspect")]
/// print statistics of a store file
struct InspectArgs {
    /// path of the store file
    #[argh(positional)]
    store: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // fetch and inspect print to stdout; keep logs out of the way unless asked
    let default_level = match cli.command {
        Commands::Serve(_) => "info",
        Commands::Fetch(_) | Commands::Inspect(_) => "warn",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Fetch(args) => run_fetch(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = args.into_config();
    tracing::info!("Socket: {}", config.socket_path.display());
    tracing::info!("Record store: {}", config.mmap_path.display());
    tracing::info!(
        "Store budget: {} MB ({} bytes, {} entries)",
        config.memory_limit_mb,
        config.store_capacity_bytes(),
        config.max_entries
    );
    if config.stack_policy == StackPolicy::Redact {
        tracing::info!("Stack traces are redacted");
    }

    let registry = CapabilityRegistry::standard();
    tracing::info!("Capabilities: {}", registry.names().join(", "));

    let server = SandboxServer::new(config, registry).context("failed to start server")?;
    server.run().await?;
    Ok(())
}

fn run_fetch(args: FetchArgs) -> Result<()> {
    let mut reader = ShareReader::open(&args.store)
        .with_context(|| format!("failed to open store {}", args.store))?;
    let record = reader
        .get(&args.id)?
        .with_context(|| format!("no record '{}' in {}", args.id, args.store))?;
    let value = PayloadCodec::decode(&record.payload)?;

    println!("kind: {}", record.kind);
    if args.compact {
        println!("{}", serde_json::to_string(&value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let mut reader = ShareReader::open(&args.store)
        .with_context(|| format!("failed to open store {}", args.store))?;
    let stats = reader.stats()?;

    println!("store:    {}", args.store);
    println!("entries:  {}/{}", stats.live_entries, stats.max_entries);
    println!("data:     {}/{} bytes", stats.data_used, stats.data_capacity);
    println!("live:     {} bytes", stats.live_bytes);
    println!("closed:   {}", stats.closed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve_defaults() {
        let args: Cli = Cli::from_args(&["sandcell"], &["serve"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                socket,
                mmap_path,
                share_prefix,
                memory_limit,
                max_entries,
                restart_delay_ms,
                redact_stacks,
            }) => {
                assert!(socket.is_none());
                assert!(mmap_path.is_none());
                assert!(share_prefix.is_none());
                assert_eq!(memory_limit, 55);
                assert_eq!(max_entries, 1024);
                assert_eq!(restart_delay_ms, 500);
                assert!(!redact_stacks);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_with_options() {
        let args: Cli = Cli::from_args(&["sandcell"], &[
            "serve",
            "-s", "/run/sc.sock",
            "--mmap-path", "/run/sc-share",
            "--share-prefix", "/run/peer-",
            "--memory-limit", "8",
            "--max-entries", "16",
            "--restart-delay-ms", "50",
            "--redact-stacks",
        ]).unwrap();
        let Commands::Serve(serve) = args.command else {
            panic!("Expected Serve command");
        };

        let config = serve.into_config();
        assert_eq!(config.socket_path, std::path::PathBuf::from("/run/sc.sock"));
        assert_eq!(config.mmap_path, std::path::PathBuf::from("/run/sc-share"));
        assert_eq!(config.share_prefix, "/run/peer-");
        assert_eq!(config.memory_limit_mb, 8);
        assert_eq!(config.max_entries, 16);
        assert_eq!(config.restart_delay, Duration::from_millis(50));
        assert_eq!(config.stack_policy, StackPolicy::Redact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_parse_serve_invalid_memory_limit() {
        let result = Cli::from_args(&["sandcell"], &["serve", "--memory-limit", "lots"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_fetch() {
        let args: Cli = Cli::from_args(&["sandcell"], &["fetch", "/tmp/share", "00abc", "-c"]).unwrap();
        match args.command {
            Commands::Fetch(FetchArgs { store, id, compact }) => {
                assert_eq!(store, "/tmp/share");
                assert_eq!(id, "00abc");
                assert!(compact);
            }
            _ => panic!("Expected Fetch command"),
        }
    }

    #[test]
    fn test_cli_parse_fetch_missing_id() {
        let result = Cli::from_args(&["sandcell"], &["fetch", "/tmp/share"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_inspect() {
        let args: Cli = Cli::from_args(&["sandcell"], &["inspect", "/tmp/share"]).unwrap();
        match args.command {
            Commands::Inspect(InspectArgs { store }) => assert_eq!(store, "/tmp/share"),
            _ => panic!("Expected Inspect command"),
        }
    }

    #[test]
    fn test_cli_parse_unknown_subcommand() {
        let result = Cli::from_args(&["sandcell"], &["run"]);
        assert!(result.is_err());
    }
}
