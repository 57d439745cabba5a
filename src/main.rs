use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use harreplay::{config::Config, logging, server};

#[derive(Debug, Parser)]
#[command(name = "harreplay", about = "Replay recorded HAR responses over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the replay server.
    Serve {
        /// Optional path to config TOML. If omitted, default discovery is used.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
        /// Override `server.listen` (`host:port`).
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Print every indexed lookup key, sorted, one per line.
    Keys {
        /// Optional path to config TOML. If omitted, default discovery is used.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            log_level,
            listen,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            logging::init(&config, log_level.as_deref())?;
            let handle = server::serve(&config).await?;
            eprintln!("{}", startup_summary(&config, &handle));
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await;
        }
        Command::Keys { config } => {
            let config = Config::load(config.as_deref())?;
            let indexed = server::load_index(&config).await?;
            for key in indexed.index.sorted_keys() {
                println!("{key}");
            }
            if !indexed.skipped.is_empty() {
                eprintln!("skipped {} malformed entries:", indexed.skipped.len());
                for entry in &indexed.skipped {
                    eprintln!("  {entry}");
                }
            }
        }
    }

    Ok(())
}

fn startup_summary(config: &Config, handle: &server::ServerHandle) -> String {
    let index_page = handle
        .index_page
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "none".to_owned());

    format!(
        "startup config: listen={}, archive={}, api_root={}, resources={}, skipped_entries={}, index_page={}",
        handle.listen_addr,
        handle.archive_path.display(),
        config.archive.api_root,
        handle.index_len,
        handle.entries_skipped,
        index_page
    )
}
