//! Command-line interface of the `scout` binary.

use clap::{Parser, Subcommand};
use scout_scheduler::ExecutionState;

/// Scout job scheduler
///
/// Polls the job store and runs pending agent executions with retry and
/// cooldown.
#[derive(Parser, Debug)]
#[command(name = "scout")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default ~/.scout/scout.toml)
    #[arg(short, long, global = true, env = "SCOUT_CONFIG")]
    pub config: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the scheduler loop until interrupted (default)
    Run,

    /// Schedule a new execution of a job configuration
    Enqueue {
        /// Job configuration ID
        config_id: String,
    },

    /// Print one execution as JSON
    Show {
        /// Job execution ID
        execution_id: String,
    },

    /// List the most recent executions of a configuration
    Recent {
        /// Job configuration ID
        config_id: String,

        /// Only executions in this state (pending, completed, failed)
        #[arg(short, long)]
        state: Option<ExecutionState>,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// List known job configurations
    Configs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default() {
        let cli = Cli::try_parse_from(["scout"]).unwrap();
        assert_eq!(cli.command, None);
        assert!(!cli.verbose);
    }

    #[test]
    fn recent_parses_state_filter() {
        let cli = Cli::try_parse_from([
            "scout", "recent", "cfg-1", "--state", "failed", "--limit", "3", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Some(Commands::Recent {
                config_id: "cfg-1".into(),
                state: Some(ExecutionState::Failed),
                limit: 3,
            })
        );
    }

    #[test]
    fn unknown_state_is_rejected() {
        let parsed = Cli::try_parse_from(["scout", "recent", "cfg-1", "--state", "running"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["scout", "enqueue", "cfg-1", "--config", "/tmp/s.toml"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/s.toml"));
        assert_eq!(
            cli.command,
            Some(Commands::Enqueue {
                config_id: "cfg-1".into()
            })
        );
    }
}
