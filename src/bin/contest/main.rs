//! Contest CLI
//!
//! Command-line client for a running contest server.

mod client;
mod commands;
mod style;

use clap::{Parser, Subcommand};
use style::*;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "contest")]
#[command(author = "CortexLM")]
#[command(version)]
#[command(about = "Contest - inspect competitions and Hacktoberfest progress", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Contest server URL
    #[arg(
        short,
        long,
        env = "CONTEST_SERVER",
        default_value = "http://localhost:8080",
        global = true
    )]
    server: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Server and platform integration health
    #[command(visible_alias = "h")]
    Health,

    /// List competitions
    #[command(visible_alias = "ls")]
    Competitions {
        /// Only show competitions in this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Participation statistics for a competition
    Stats {
        /// Competition id
        id: Uuid,
    },

    /// Hacktoberfest progress and rankings
    #[command(visible_alias = "hf")]
    Hacktoberfest {
        #[command(subcommand)]
        command: HacktoberfestCommands,
    },
}

#[derive(Subcommand)]
enum HacktoberfestCommands {
    /// Progress of one GitHub user
    #[command(visible_alias = "st")]
    Status { username: String },

    /// Rank several GitHub users
    #[command(visible_alias = "lb")]
    Leaderboard {
        #[arg(required = true)]
        users: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let server = cli.server.as_str();
    let result = match cli.command {
        Commands::Health => commands::health::run(server).await,
        Commands::Competitions { status } => {
            commands::competitions::run(server, status.as_deref()).await
        }
        Commands::Stats { id } => commands::stats::run(server, id).await,
        Commands::Hacktoberfest { command } => match command {
            HacktoberfestCommands::Status { username } => {
                commands::hacktoberfest::status(server, &username).await
            }
            HacktoberfestCommands::Leaderboard { users } => {
                commands::hacktoberfest::leaderboard(server, &users).await
            }
        },
    };

    if let Err(e) = result {
        print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
