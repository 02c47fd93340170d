use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nutrilog_billing_lib::services::image_hash_bytes;
use nutrilog_billing_lib::{commands, init_tracing, BillingConfig, BillingState};

/// Inspect and drive NutriLog billing state from the command line
#[derive(Parser, Debug)]
#[command(name = "nutrilog-billing", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile and print the subscription state for a user
    Status {
        #[arg(env = "NUTRILOG_USER_ID")]
        user_id: String,
    },

    /// Start the one-time free trial for a user
    StartTrial {
        #[arg(env = "NUTRILOG_USER_ID")]
        user_id: String,
    },

    /// Print the paywall offerings
    Offerings {
        #[arg(env = "NUTRILOG_USER_ID")]
        user_id: String,
    },

    /// Print the scan cache key for an image file
    ScanHash { path: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli.command).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<String, String> {
    let json = match command {
        Command::ScanHash { path } => {
            let bytes = std::fs::read(&path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
            return Ok(image_hash_bytes(&bytes));
        }
        Command::Status { user_id } => {
            let state = commands::initialize_subscription(&open_billing()?, user_id).await?;
            serde_json::to_string_pretty(&state)
        }
        Command::StartTrial { user_id } => {
            let started = commands::start_trial(&open_billing()?, user_id).await?;
            serde_json::to_string_pretty(&started)
        }
        Command::Offerings { user_id } => {
            let offerings = commands::get_offerings(&open_billing()?, user_id).await?;
            serde_json::to_string_pretty(&offerings)
        }
    };

    json.map_err(|e| e.to_string())
}

fn open_billing() -> Result<BillingState, String> {
    BillingState::open(BillingConfig::from_env()).map_err(|e| e.to_string())
}
