//! OpenChat - chat proxy and terminal client
//!
#![doc = "OpenChat - chat proxy and terminal client"]
#![doc = "Main entry point for the openchat binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use openchat::cli::{Cli, Commands};
use openchat::commands;
use openchat::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!("Starting proxy server");
            commands::serve::run_serve(config, bind).await?;
            Ok(())
        }
        Commands::Chat {
            prompt,
            model,
            conversation,
            new,
            no_web_search,
            image,
            html,
            regenerate,
        } => {
            if let Some(m) = &model {
                tracing::debug!("Using model override: {}", m);
            }
            let options = commands::chat::ChatOptions {
                prompt: prompt.unwrap_or_default(),
                model,
                conversation,
                new,
                no_web_search,
                image,
                html,
                regenerate,
            };
            commands::chat::run_chat(&config, options).await?;
            Ok(())
        }
        Commands::Render { file, citations } => {
            commands::render::run_render(file.as_deref(), citations.as_deref())?;
            Ok(())
        }
        Commands::Image {
            prompt,
            model,
            size,
            format,
            output,
        } => {
            let args = commands::image::ImageArgs {
                prompt,
                model,
                size,
                format,
                output,
            };
            commands::image::run_image(&config, args).await?;
            Ok(())
        }
        Commands::Upscale {
            input,
            scale,
            no_enhance,
            output,
        } => {
            commands::image::run_upscale(&config, &input, scale, !no_enhance, output).await?;
            Ok(())
        }
        Commands::Info { json } => {
            commands::info::run_info(&config, json).await?;
            Ok(())
        }
        Commands::History { command } => {
            tracing::debug!("Starting history command");
            commands::history::handle_history(&config, command)?;
            Ok(())
        }
        Commands::Settings { command } => {
            commands::settings::handle_settings(&config, command)?;
            Ok(())
        }
        Commands::Schedule { command } => {
            commands::schedule::run_schedule(&config, command).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so streamed replies and rendered HTML on stdout stay clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "openchat=debug" } else { "openchat=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
