//! AutoCare CLI - terminal client for the AutoCare service platform
//!
//! Live chat with the assigned technician and live service status tracking.

mod api;
mod auth;
mod commands;
mod config;
mod models;
mod realtime;
mod session;
mod tui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use tui::log_capture::LogBuffer;

#[derive(Parser)]
#[command(name = "autocare")]
#[command(about = "Terminal client for AutoCare: chat and live service tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// REST API base URL (overrides config)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// STOMP WebSocket endpoint (overrides config)
    #[arg(long, global = true)]
    ws_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the bearer token issued at sign-in
    Login {
        /// JWT from the web sign-in
        #[arg(short, long)]
        token: String,
    },

    /// Clear the stored token
    Logout,

    /// Show current authentication status
    Status,

    /// List chat rooms
    Chats,

    /// Print the chat history of an appointment
    Messages {
        /// Appointment ID (from `services` output)
        appointment: String,
    },

    /// Send a message over REST
    Send {
        /// Appointment ID (from `services` output)
        appointment: String,

        /// Message text
        message: String,
    },

    /// Open the live chat view for an appointment
    Chat {
        /// Appointment ID (from `services` output)
        appointment: String,

        /// Show sent messages immediately as pending until the echo arrives
        #[arg(long)]
        optimistic: bool,
    },

    /// List booked services
    Services {
        /// Keep the live update stream open and print changes
        #[arg(short, long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging. The chat view owns the terminal, so its logs go to
    // the in-app debug pane instead of stderr.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let log_buffer = LogBuffer::new();
    if matches!(cli.command, Commands::Chat { .. }) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(log_buffer.clone()),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    match cli.command {
        Commands::Login { token } => {
            tracing::info!("Storing token...");
            auth::login(&token).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        command => {
            let config = Config::load()?.with_overrides(cli.api_url, cli.ws_url);
            match command {
                Commands::Chats => {
                    tracing::info!("Fetching chats...");
                    commands::list_chats(&config).await?;
                }
                Commands::Messages { appointment } => {
                    commands::read_messages(&config, &appointment).await?;
                }
                Commands::Send {
                    appointment,
                    message,
                } => {
                    tracing::info!("Sending message...");
                    commands::send_message(&config, &appointment, &message).await?;
                }
                Commands::Chat {
                    appointment,
                    optimistic,
                } => {
                    commands::open_chat(&config, &appointment, optimistic, log_buffer).await?;
                }
                Commands::Services { watch } => {
                    commands::list_services(&config, watch).await?;
                }
                Commands::Login { .. } | Commands::Logout | Commands::Status => {}
            }
        }
    }

    Ok(())
}
