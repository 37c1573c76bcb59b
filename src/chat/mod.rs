//! Interactive chat application.
//!
//! A line-oriented REPL over the [`Orchestrator`](crate::Orchestrator):
//!
//! - Answers stream to the terminal as they arrive and Ctrl-C stops them
//! - Slash commands manage sessions, models, providers, and knowledge bases
//! - Sessions and knowledge bases persist in the data directory
//!
//! # Architecture
//!
//! - [`config`]: command line arguments and the YAML configuration file
//! - [`app`]: current selections and command handling
//! - [`commands`]: slash command parsing
//! - [`render`]: terminal output

mod app;
mod commands;
mod config;
mod render;

pub use app::ChatApp;
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{API_KEY_ENV, ChatArgs, ChatConfig, WhaleConfig};
pub use render::{PlainTextRenderer, Renderer};
