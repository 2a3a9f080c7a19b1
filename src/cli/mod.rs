//! CLI argument definitions for muxstore.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("MUXSTORE_GIT_COMMIT"),
    ", built ",
    env!("MUXSTORE_BUILD_TIMESTAMP"),
    ")"
);

/// muxstore - Persistence for terminal multiplexing sessions.
///
/// Start with `muxstore init` to create the identity, the local remote and
/// the default session.
#[derive(Parser, Debug)]
#[command(name = "muxstore")]
#[command(author, version, long_version = LONG_VERSION, about = "Inspect and bootstrap a muxstore database", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Home directory holding the database, config.kdl and remoteid.
    /// Can also be set via MUXSTORE_HOME environment variable.
    #[arg(long = "home", global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the client identity, local remote and default session if missing
    Init,

    /// Session commands
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Remote target commands
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },

    /// Window line commands
    Line {
        #[command(subcommand)]
        command: LineCommands,
    },

    /// Show command history of a session, newest first
    History {
        /// Session name or ID
        #[arg(long)]
        session: String,

        /// Maximum number of items
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List all sessions
    List,
}

/// Remote subcommands
#[derive(Subcommand, Debug)]
pub enum RemoteCommands {
    /// List all remote targets
    List,
}

/// Line subcommands
#[derive(Subcommand, Debug)]
pub enum LineCommands {
    /// Append a comment line to a window
    Add {
        /// Session name or ID
        #[arg(long)]
        session: String,

        /// Window ID (defaults to the active window of the active screen)
        #[arg(long)]
        window: Option<String>,

        /// Comment text
        text: String,
    },

    /// List the lines of a window, oldest first
    List {
        /// Session name or ID
        #[arg(long)]
        session: String,

        /// Window ID (defaults to the active window of the active screen)
        #[arg(long)]
        window: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_line_add() {
        let cli = Cli::try_parse_from([
            "muxstore", "-H", "line", "add", "--session", "default", "hello there",
        ])
        .unwrap();
        assert!(cli.human_readable);
        match cli.command {
            Commands::Line {
                command:
                    LineCommands::Add {
                        session,
                        window,
                        text,
                    },
            } => {
                assert_eq!(session, "default");
                assert!(window.is_none());
                assert_eq!(text, "hello there");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_history_requires_session() {
        assert!(Cli::try_parse_from(["muxstore", "history"]).is_err());
        let cli =
            Cli::try_parse_from(["muxstore", "history", "--session", "s", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History { limit: Some(5), .. }
        ));
    }
}
