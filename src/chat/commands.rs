//! Slash command parsing for the chat application.
//!
//! Input starting with `/` controls the application and is never sent to a model.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a fresh session on the next message.
    New,

    /// List sessions.
    Sessions,

    /// Make a session current.  Accepts any unique id prefix.
    Switch(String),

    /// Delete a session.  Accepts any unique id prefix.
    Delete(String),

    /// Change the model.
    Model(String),

    /// List the models of the current provider.
    Models,

    /// Change the provider.
    Provider(String),

    /// Attach a knowledge base to the current session.
    KnowledgeBase(String),

    /// Detach the knowledge base from the current session.
    ClearKnowledgeBase,

    /// List knowledge bases.
    KnowledgeBases,

    /// Create a knowledge base.
    NewKnowledgeBase(String),

    /// Delete a knowledge base.  Sessions using it keep answering without context.
    DeleteKnowledgeBase(String),

    /// Add a text file to the current knowledge base.
    AddDocument(String),

    /// Remove a document, by id or name, from the current knowledge base.
    RemoveDocument(String),

    /// Ask the retrieval backend directly.
    Rag(String),

    /// Set or clear the system prompt.
    /// `None` clears the current system prompt.
    System(Option<String>),

    /// Check the retrieval backend.
    Health,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it should be
/// sent as a message.
///
/// # Examples
///
/// ```
/// # use whalechat::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/model llama3").is_some());
/// assert!(parse_command("Hello, whale!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New,
        "sessions" | "ls" => ChatCommand::Sessions,
        "switch" => required(argument, ChatCommand::Switch, "/switch requires a session id"),
        "delete" | "rm" => required(argument, ChatCommand::Delete, "/delete requires a session id"),
        "model" => required(argument, ChatCommand::Model, "/model requires a model name"),
        "models" => ChatCommand::Models,
        "provider" => required(argument, ChatCommand::Provider, "/provider requires a provider id"),
        "kb" => match argument {
            Some(arg) if arg.eq_ignore_ascii_case("clear") => ChatCommand::ClearKnowledgeBase,
            Some(arg) => ChatCommand::KnowledgeBase(arg.to_string()),
            None => ChatCommand::Invalid("/kb requires a knowledge base id or 'clear'".to_string()),
        },
        "kbs" => ChatCommand::KnowledgeBases,
        "kb-new" => required(
            argument,
            ChatCommand::NewKnowledgeBase,
            "/kb-new requires a name",
        ),
        "kb-delete" => required(
            argument,
            ChatCommand::DeleteKnowledgeBase,
            "/kb-delete requires a knowledge base id",
        ),
        "kb-add" => required(argument, ChatCommand::AddDocument, "/kb-add requires a file path"),
        "kb-rm" => required(argument, ChatCommand::RemoveDocument, "/kb-rm requires a document id"),
        "rag" => required(argument, ChatCommand::Rag, "/rag requires a question"),
        "system" => ChatCommand::System(argument.map(|s| s.to_string())),
        "health" => ChatCommand::Health,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn required<F>(argument: Option<&str>, constructor: F, message: &str) -> ChatCommand
where
    F: Fn(String) -> ChatCommand,
{
    match argument {
        Some(arg) => constructor(arg.to_string()),
        None => ChatCommand::Invalid(message.to_string()),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new session with the next message
  /sessions              List sessions
  /switch <id>           Continue a session (an id prefix is enough)
  /delete <id>           Delete a session
  /model <name>          Change the model (e.g., /model llama3)
  /models                List the models of the current provider
  /provider <id>         Change the provider
  /kb <id>|clear         Attach or detach a knowledge base
  /kbs                   List knowledge bases
  /kb-new <name>         Create a knowledge base and attach it
  /kb-delete <id>        Delete a knowledge base
  /kb-add <path>         Add a .txt or .md file to the attached knowledge base
  /kb-rm <doc>           Remove a document (id or name) from the attached knowledge base
  /rag <question>        Ask the retrieval backend directly
  /system [prompt]       Set system prompt (no argument clears it)
  /health                Check the retrieval backend
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl-C while an answer streams to stop it."#
}
