//! Main entry point for SFX Translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sfx_translator::cli::commands::{self, Commands};
use sfx_translator::core::config::AppSettings;

/// SFX Translator - translate sound effect file names with LLM providers
#[derive(Parser, Debug)]
#[command(name = "sfx-translator", version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over the flag
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={}", env!("CARGO_CRATE_NAME"), log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = AppSettings::load()?;

    // Execute command
    match args.command {
        Some(Commands::Translate {
            provider,
            model,
            fallback_provider,
            fallback_model,
            min_group_size,
            max_group_items,
            dry_run,
            batch,
            yes,
        }) => {
            commands::handle_translate(
                &settings,
                provider,
                model,
                fallback_provider,
                fallback_model,
                min_group_size,
                max_group_items,
                dry_run,
                batch,
                yes,
            )
            .await?;
        }
        Some(Commands::Group {
            min_group_size,
            max_group_items,
        }) => {
            commands::handle_group(&settings, min_group_size, max_group_items).await?;
        }
        Some(Commands::Scan { dir }) => {
            commands::handle_scan(&settings, dir).await?;
        }
        Some(Commands::Rename { dir }) => {
            commands::handle_rename(&settings, dir).await?;
        }
        Some(Commands::Restore { dir }) => {
            commands::handle_restore(&settings, dir).await?;
        }
        Some(Commands::Placeholders { dir }) => {
            commands::handle_placeholders(&settings, dir).await?;
        }
        Some(Commands::Providers { action }) => {
            commands::handle_providers(&settings, action).await?;
        }
        None => {
            println!("Please specify a command. Use --help for more information.");
        }
    }

    Ok(())
}
