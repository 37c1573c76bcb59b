//! Interactive chat with local and OpenAI-compatible models.
//!
//! # Usage
//!
//! ```bash
//! # Chat with the local model server on localhost:11434
//! whalechat --model llama3
//!
//! # Use a configuration file with several providers and a retrieval backend
//! whalechat --config ~/.whalechat/config.yaml
//!
//! # Answer from a knowledge base
//! whalechat --model llama3 --knowledge-base 5f0c...
//!
//! # Disable colors (useful for piping output)
//! whalechat --no-color
//! ```
//!
//! Type `/help` while chatting for the list of commands.  Ctrl-C stops the answer
//! that is streaming; Ctrl-D exits.
//!
//! Set `RUST_LOG=whalechat=debug` for diagnostics on stderr.

use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use whalechat::chat::{ChatApp, ChatArgs, ChatConfig, PlainTextRenderer, Renderer, parse_command};

/// Main entry point for the whalechat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    whalechat::register_biometrics(biometrics::Collector::new());

    let (args, _) = ChatArgs::from_command_line_relaxed("whalechat [OPTIONS]");
    let config = ChatConfig::from(args);
    let whale = config.load_whale_config()?;

    let mut app = ChatApp::from_config(&whale, &config)?;
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    // Token of the answer currently streaming, if any.
    let active: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));

    let handler_active = Arc::clone(&active);
    ctrlc::set_handler(move || {
        if let Ok(guard) = handler_active.lock()
            && let Some(token) = guard.as_ref()
        {
            token.cancel();
        }
    })?;

    println!("Whale Chat ({})", app.status_line());
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match app.handle_command(cmd, &mut renderer).await {
                        Ok(true) => {}
                        Ok(false) => {
                            println!("Goodbye!");
                            break;
                        }
                        Err(err) => renderer.print_error(&err.to_string()),
                    }
                    continue;
                }

                let pending = match app.begin_send(line) {
                    Ok(pending) => pending,
                    Err(err) => {
                        renderer.print_error(&err.to_string());
                        continue;
                    }
                };
                set_active(&active, Some(pending.cancellation_token()));
                println!("Assistant:");
                app.run_send(pending, &mut renderer).await;
                set_active(&active, None);
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    if let Err(err) = app.persist() {
        renderer.print_error(&format!("Failed to save chat state: {err}"));
    }
    Ok(())
}

fn set_active(active: &Mutex<Option<CancellationToken>>, token: Option<CancellationToken>) {
    match active.lock() {
        Ok(mut guard) => *guard = token,
        Err(poisoned) => *poisoned.into_inner() = token,
    }
}
