//! `RecipeChat` dev server -- scripted local assistant.
//!
//! Answers every prompt with `You asked: <prompt>`, over the chat socket at
//! `/ws` and the AI proxy endpoint at `/api/ai/perplexity`.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:8000
//! cargo run --bin recipechat-devserver
//!
//! # Whole-message replies, token required
//! cargo run --bin recipechat-devserver -- --reply-mode whole --token s3cret
//! ```

use std::sync::Arc;

use clap::Parser;
use recipechat_devserver::config::{DevCliArgs, DevConfig};
use recipechat_devserver::server::{self, DevState};

#[tokio::main]
async fn main() {
    let cli = DevCliArgs::parse();

    let config = match DevConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        addr = %config.bind_addr,
        reply_mode = ?config.reply_mode,
        token_required = config.token.is_some(),
        "starting recipechat dev server"
    );

    let state = Arc::new(DevState::with_config(config.token.clone(), config.reply_mode));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "dev server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dev server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start dev server");
            std::process::exit(1);
        }
    }
}
