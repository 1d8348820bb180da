use clap::Parser;
use log::info;
use server::gateway::Gateway;
use server::history::HistoryLog;
use server::leaderboard::LeaderboardStore;
use server::level::LevelStore;
use shared::GameConstants;
use std::path::PathBuf;

/// Main-method of the application.
/// Parses command-line arguments, opens the data stores, and runs the gateway.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Directory holding levels, leaderboards, and history
        #[clap(short, long, default_value = "data")]
        data_dir: PathBuf,
    }

    env_logger::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir)?;
    let levels = LevelStore::open(args.data_dir.join("levels"))?;
    info!("Loaded {} published levels", levels.len());
    let leaderboards = LeaderboardStore::open(args.data_dir.join("leaderboards.json"))?;
    let history = HistoryLog::open(args.data_dir.join("history.json"));

    let address = format!("{}:{}", args.host, args.port);
    let mut gateway = Gateway::bind(
        &address,
        GameConstants::default(),
        levels,
        leaderboards,
        history,
    )
    .await?;

    tokio::select! {
        result = gateway.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            Ok(())
        }
    }
}
