use clap::{Parser, Subcommand};
use colored::Colorize;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

mod client;
mod commands;
mod error;
mod events;
mod project;
mod session;
mod settings;
mod smoke;
#[cfg(test)]
mod test_support;

use client::OpencodeClient;
use events::EventMode;
use settings::{CliOverrides, EnvDefaults, resolve_effective_settings};

#[derive(Debug, Parser)]
#[command(name = "opencode-tester", version)]
#[command(about = "CLI tool for testing the OpenCode API", long_about = None)]
struct Cli {
    /// OpenCode API base URL [env: OPENCODE_URL] [default: http://localhost:4096]
    #[arg(short, long, global = true)]
    url: Option<String>,

    /// Event subscription strategy [env: OPENCODE_EVENTS] [default: auto]
    #[arg(long, global = true, value_enum)]
    events: Option<EventMode>,

    /// Polling-mode tick interval [env: OPENCODE_POLL_INTERVAL_MS] [default: 3000]
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// Log filter used when RUST_LOG is unset [default: warn]
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start an interactive session
    Interactive,
    /// Session operations
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Send a message to a session
    SendMessage { session_id: String, content: String },
    /// List messages in a session
    ListMessages { session_id: String },
    /// Event subscription
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
    /// Project file explorer
    Files {
        #[command(subcommand)]
        command: FilesCommand,
    },
    /// Run the API smoke test
    Smoke {
        #[arg(long, default_value_t = 5)]
        event_wait_secs: u64,
    },
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// Create a new session
    Create,
}

#[derive(Debug, Subcommand)]
enum EventsCommand {
    /// Monitor real-time events
    Monitor,
}

#[derive(Debug, Subcommand)]
enum FilesCommand {
    /// List project files
    List,
    /// Print a project file
    Read { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        base_url: cli.url.clone(),
        event_mode: cli.events,
        poll_interval_ms: cli.poll_interval_ms,
        log_filter: cli.log.clone(),
    };
    let settings = resolve_effective_settings(&EnvDefaults::from_env(), &overrides)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let client = OpencodeClient::from_settings(&settings).await;
    tracing::debug!(
        base_url = %client.base_url(),
        mode = %settings.event_mode,
        transport = client.event_transport(),
        "client ready"
    );

    let result = match cli.command {
        Commands::Interactive => commands::interactive(&client, settings.base_url.as_str()).await,
        Commands::Session { command: SessionCommand::Create } => {
            commands::create_session(&client).await
        }
        Commands::SendMessage { session_id, content } => {
            commands::send_message(&client, &session_id, &content).await
        }
        Commands::ListMessages { session_id } => commands::list_messages(&client, &session_id).await,
        Commands::Events { command: EventsCommand::Monitor } => commands::monitor_events(&client).await,
        Commands::Files { command: FilesCommand::List } => commands::list_files(&client).await,
        Commands::Files { command: FilesCommand::Read { path } } => {
            commands::read_file(&client, &path).await
        }
        Commands::Smoke { event_wait_secs } => {
            let report = smoke::run(&client, Duration::from_secs(event_wait_secs)).await;
            if !report.all_passed() {
                std::process::exit(1);
            }
            Ok(())
        }
    };

    if let Err(error) = result {
        eprintln!("{} {:#}", "❌ Error:".red(), error);
        std::process::exit(1);
    }
    Ok(())
}
