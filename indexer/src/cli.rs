//! CLI surface (§6): the long-running service is the default action; `reindex` and
//! `setup-service` are one-shot operator commands.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "indexer", about = "Locking-contract event indexer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replays a block range without advancing the stored cursor.
    Reindex {
        #[arg(long)]
        from_block: u64,
        /// Overrides the window size for this run only; auto-tuning is disabled when set.
        #[arg(long)]
        block_process_limit: Option<u64>,
    },
    /// Runs pending migrations and exits.
    SetupService,
    /// Prints the global leaderboard (or one holder's totals) as JSON.
    Leaderboard {
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Restrict to a single holder address (`0x...`), ignoring limit/offset.
        #[arg(long)]
        holder: Option<String>,
    },
}
