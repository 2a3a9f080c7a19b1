//! muxstore CLI - Inspect and bootstrap a muxstore database.

use clap::Parser;
use muxstore::cli::{Cli, Commands, LineCommands, RemoteCommands, SessionCommands};
use muxstore::commands::{self, Output};
use muxstore::config::resolve_store_config;
use muxstore::storage::Store;
use muxstore::sys::SystemHost;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "warn";

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run(cli.home, cli.command, human) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

fn run(home: Option<PathBuf>, command: Commands, human: bool) -> Result<(), muxstore::Error> {
    let resolved = resolve_store_config(home)?;
    init_logging(resolved.log_level.as_ref().map(|r| r.value.as_str()));
    tracing::debug!(
        home = %resolved.home.value.display(),
        home_source = %resolved.home.source,
        busy_timeout_source = %resolved.busy_timeout.source,
        "resolved configuration"
    );

    let config = resolved.into_config();
    let store = Store::open(&config)?;

    match command {
        Commands::Init => {
            let host = SystemHost::new(config.remote_id_path());
            output(&commands::init(&store, &host)?, human);
        }
        Commands::Session {
            command: SessionCommands::List,
        } => output(&commands::session_list(&store)?, human),
        Commands::Remote {
            command: RemoteCommands::List,
        } => output(&commands::remote_list(&store)?, human),
        Commands::Line { command } => match command {
            LineCommands::Add {
                session,
                window,
                text,
            } => output(&commands::line_add(&store, &session, window, &text)?, human),
            LineCommands::List { session, window } => {
                output(&commands::line_list(&store, &session, window)?, human)
            }
        },
        Commands::History { session, limit } => {
            output(&commands::history(&store, &session, limit)?, human)
        }
    }
    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over the config file's `log-level`.
fn init_logging(config_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_level.unwrap_or(DEFAULT_LOG_LEVEL)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
