//! `recipechat` -- line-oriented terminal chat with the cooking assistant.
//!
//! Reads prompts from stdin and prints assistant replies as they arrive.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/recipechat/config.toml`).
//!
//! ```bash
//! # Against the local dev server over WebSocket
//! cargo run --bin recipechat -- --mode socket --ws-base-url ws://127.0.0.1:8000
//!
//! # HTTP fallback through the AI proxy
//! RECIPECHAT_API_BASE_URL=http://127.0.0.1:8000 cargo run --bin recipechat
//! ```

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use recipechat::client::ChatClient;
use recipechat::config::{CliArgs, ClientConfig, TransportMode};
use recipechat::events::Subscription;
use recipechat::status::ConnectionStatus;
use recipechat::transcript::{Role, Transcript};
use recipechat::transport::ChatTransport;
use recipechat_proto::envelope::TIMESTAMP_KEY;
use recipechat_proto::message::{ChatMessage, Metadata, Timestamp, UserMessage};

/// Canned prompts offered by the quick commands.
const QUICK_PROMPTS: [(&str, &str); 3] = [
    ("/plan", "Suggest a 3-day vegetarian meal plan."),
    ("/cook", "What can I make with chicken, rice, and broccoli?"),
    ("/tip", "How do I properly sear a steak?"),
];

/// Events forwarded from client callbacks to the terminal loop.
enum UiEvent {
    Message(ChatMessage),
    Status(ConnectionStatus),
    Error(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(mode = ?config.mode, "recipechat starting");

    let result = match config.mode {
        TransportMode::Socket => match ChatClient::socket(&config) {
            Ok(client) => run(client).await,
            Err(e) => Err(e.to_string()),
        },
        TransportMode::Fallback => match ChatClient::fallback(&config) {
            Ok(client) => run(client).await,
            Err(e) => Err(e.to_string()),
        },
    };

    tracing::info!("recipechat exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("recipechat: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, which carries the conversation).
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("recipechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn forward_events<T: ChatTransport>(
    client: &ChatClient<T>,
    tx: &mpsc::UnboundedSender<UiEvent>,
) -> Vec<Subscription> {
    let on_message = tx.clone();
    let on_status = tx.clone();
    let on_error = tx.clone();
    vec![
        client.on_message(move |m| {
            let _ = on_message.send(UiEvent::Message(m.clone()));
        }),
        client.on_status(move |s| {
            let _ = on_status.send(UiEvent::Status(*s));
        }),
        client.on_error(move |e| {
            let _ = on_error.send(UiEvent::Error(e.to_string()));
        }),
    ]
}

/// Main loop: stdin lines in, client events out.
async fn run<T: ChatTransport>(client: ChatClient<T>) -> Result<(), String> {
    let client = Arc::new(client);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriptions = forward_events(&client, &tx);
    let mut transcript = Transcript::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "recipechat ({}) - type a question, /plan /cook /tip for ideas, /quit to leave",
        client.transport_kind()
    );
    client.connect();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| e.to_string())? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/status" => println!("* status: {}", client.status()),
                    "/connect" => client.connect(),
                    "/disconnect" => client.disconnect(),
                    input => {
                        let prompt = QUICK_PROMPTS
                            .iter()
                            .find(|(cmd, _)| *cmd == input)
                            .map_or(input, |(_, prompt)| *prompt);
                        if prompt.is_empty() {
                            continue;
                        }
                        if prompt != input {
                            println!("> {prompt}");
                        }
                        send(&client, &mut transcript, prompt);
                    }
                }
            }
            Some(event) = rx.recv() => render(&mut transcript, event),
        }
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    client.disconnect();
    Ok(())
}

fn send<T: ChatTransport>(client: &Arc<ChatClient<T>>, transcript: &mut Transcript, prompt: &str) {
    let mut metadata = Metadata::new();
    metadata.insert(
        TIMESTAMP_KEY.to_string(),
        Value::from(Timestamp::now().as_millis()),
    );
    transcript.apply(&ChatMessage::User(UserMessage::new(
        prompt,
        metadata.clone(),
    )));

    let client = Arc::clone(client);
    let prompt = prompt.to_string();
    tokio::spawn(async move {
        client.send_user_message(&prompt, metadata).await;
    });
}

fn render(transcript: &mut Transcript, event: UiEvent) {
    let mut out = io::stdout().lock();
    match event {
        UiEvent::Message(message) => {
            let was_streaming = transcript.active_stream().is_some();
            let touched = transcript.apply(&message);
            let stamp = chrono::Local::now().format("%H:%M");
            match (&message, touched) {
                (ChatMessage::AssistantDelta { text }, Some(idx)) => {
                    if !was_streaming || transcript.entries()[idx].text.len() == text.len() {
                        let _ = write!(out, "[{stamp}] assistant: ");
                    }
                    let _ = write!(out, "{text}");
                }
                (ChatMessage::AssistantDone, _) => {
                    if was_streaming {
                        let _ = writeln!(out);
                    }
                }
                (_, Some(idx)) => {
                    let entry = &transcript.entries()[idx];
                    let who = match entry.role {
                        Role::User => "you",
                        Role::Assistant => "assistant",
                        Role::Error => "error",
                    };
                    let _ = writeln!(out, "[{stamp}] {who}: {}", entry.text);
                }
                (_, None) => {}
            }
        }
        UiEvent::Status(status) => {
            let _ = writeln!(out, "* {status}");
        }
        UiEvent::Error(e) => {
            let _ = writeln!(out, "* error: {e}");
        }
    }
    let _ = out.flush();
}
