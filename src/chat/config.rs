//! Configuration types for the chat application.
//!
//! Command-line arguments are parsed with `arrrg` into [`ChatArgs`] and resolved into a
//! [`ChatConfig`].  Providers, timeouts, and the retrieval backend live in a YAML file
//! described by [`WhaleConfig`]; command-line values override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};

use crate::client::ClientOptions;
use crate::error::{Error, Result};
use crate::orchestrator::OrchestratorSettings;
use crate::types::{DEFAULT_PROVIDER_ID, Provider, ProviderKind};

/// Environment variable supplying the API key of OpenAI-compatible providers.
pub const API_KEY_ENV: &str = "WHALECHAT_API_KEY";

/// Directory under `$HOME` holding sessions and knowledge bases.
const DEFAULT_DATA_DIR: &str = ".whalechat";

/// Command-line arguments for the whalechat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// YAML configuration file.
    #[arrrg(optional, "Path to a YAML configuration file", "FILE")]
    pub config: Option<String>,

    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: first model of the provider)", "MODEL")]
    pub model: Option<String>,

    /// Provider serving the model.
    #[arrrg(optional, "Provider id (default: local-ollama)", "PROVIDER")]
    pub provider: Option<String>,

    /// Knowledge base attached to new sessions.
    #[arrrg(optional, "Knowledge base id for new sessions", "KB")]
    pub knowledge_base: Option<String>,

    /// System prompt to set context for the conversation.
    #[arrrg(optional, "System prompt for the conversation", "PROMPT")]
    pub system: Option<String>,

    /// Where sessions and knowledge bases are stored.
    #[arrrg(optional, "Data directory (default: ~/.whalechat)", "DIR")]
    pub data_dir: Option<String>,

    /// Bound on waiting for a response.
    #[arrrg(optional, "Request timeout in seconds (default: 60)", "SECONDS")]
    pub timeout: Option<u64>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Settings read from the YAML configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WhaleConfig {
    /// Known providers.
    pub providers: Vec<Provider>,

    /// Provider used unless another is chosen.
    pub default_provider: String,

    /// Model used unless another is chosen.
    pub default_model: Option<String>,

    /// Base system prompt.
    pub system_prompt: Option<String>,

    /// Root URL of the retrieval backend, if one is deployed.
    pub retrieval_url: Option<String>,

    /// Where sessions and knowledge bases are stored.
    pub data_dir: Option<PathBuf>,

    /// Seconds allowed for establishing a connection.
    pub connect_timeout_secs: u64,

    /// Seconds allowed for a response to start.
    pub request_timeout_secs: u64,

    /// Seconds allowed between two stream events.  Absent means unbounded.
    pub stream_idle_timeout_secs: Option<u64>,

    /// Extra attempts for retryable failures before a stream opens.
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay between retries, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for WhaleConfig {
    fn default() -> Self {
        let options = ClientOptions::default();
        Self {
            providers: vec![Provider::local()],
            default_provider: DEFAULT_PROVIDER_ID.to_string(),
            default_model: None,
            system_prompt: None,
            retrieval_url: None,
            data_dir: None,
            connect_timeout_secs: options.connect_timeout.as_secs(),
            request_timeout_secs: options.request_timeout.as_secs(),
            stream_idle_timeout_secs: None,
            max_retries: options.max_retries,
            initial_backoff_ms: options.initial_backoff.as_millis() as u64,
            max_backoff_ms: options.max_backoff.as_millis() as u64,
        }
    }
}

impl WhaleConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        Self::from_yaml(&content)
    }

    /// Look up a provider.
    pub fn provider(&self, provider_id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    /// Give `api_key` to every OpenAI-compatible provider that lacks one.
    pub fn fill_api_keys(&mut self, api_key: Option<String>) {
        let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
            return;
        };
        for provider in &mut self.providers {
            if provider.kind == ProviderKind::OpenAiCompatibleSse && provider.bearer_token().is_none() {
                provider.api_key = Some(api_key.clone());
            }
        }
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, config: &ChatConfig) -> Self {
        if let Some(provider) = &config.provider {
            self.default_provider = provider.clone();
        }
        if let Some(model) = &config.model {
            self.default_model = Some(model.clone());
        }
        if let Some(system) = &config.system_prompt {
            self.system_prompt = Some(system.clone());
        }
        if let Some(data_dir) = &config.data_dir {
            self.data_dir = Some(data_dir.clone());
        }
        if let Some(timeout) = config.request_timeout {
            self.request_timeout_secs = timeout.as_secs();
        }
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(Error::configuration(
                "no providers configured",
                Some("providers".to_string()),
            ));
        }
        let mut ids: Vec<&str> = self.providers.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(Error::configuration(
                format!("provider '{}' is configured twice", pair[0]),
                Some("providers".to_string()),
            ));
        }
        if self.provider(&self.default_provider).is_none() {
            return Err(Error::configuration(
                format!("default provider '{}' is not configured", self.default_provider),
                Some("defaultProvider".to_string()),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::configuration(
                "request timeout must be positive",
                Some("requestTimeoutSecs".to_string()),
            ));
        }
        Ok(())
    }

    /// Timeouts and retry policy for the HTTP client.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..ClientOptions::default()
        }
    }

    /// Settings for the orchestrator.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            system_prompt: self.system_prompt.clone(),
            retrieval_url: self.retrieval_url.clone(),
            stream_idle_timeout: self.stream_idle_timeout_secs.map(Duration::from_secs),
        }
    }

    /// The data directory, defaulting to `~/.whalechat`.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DATA_DIR),
        }
    }
}

/// Configuration for the chat application.
///
/// This struct holds the values given on the command line.  Values left unset fall
/// back to the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// YAML configuration file.
    pub config_path: Option<PathBuf>,

    /// Model override.
    pub model: Option<String>,

    /// Provider override.
    pub provider: Option<String>,

    /// Knowledge base attached to new sessions.
    pub knowledge_base: Option<String>,

    /// System prompt override.
    pub system_prompt: Option<String>,

    /// Data directory override.
    pub data_dir: Option<PathBuf>,

    /// Request timeout override.
    pub request_timeout: Option<Duration>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with no overrides and colors enabled.
    pub fn new() -> Self {
        Self {
            config_path: None,
            model: None,
            provider: None,
            knowledge_base: None,
            system_prompt: None,
            data_dir: None,
            request_timeout: None,
            use_color: true,
        }
    }

    /// Sets the configuration file.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the provider to use.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the knowledge base for new sessions.
    pub fn with_knowledge_base(mut self, knowledge_base: impl Into<String>) -> Self {
        self.knowledge_base = Some(knowledge_base.into());
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Load the configuration file (or defaults), apply overrides and the API key
    /// from the environment, and validate the result.
    pub fn load_whale_config(&self) -> Result<WhaleConfig> {
        let whale = match &self.config_path {
            Some(path) => WhaleConfig::from_file(path)?,
            None => WhaleConfig::default(),
        };
        let mut whale = whale.with_overrides(self);
        whale.fill_api_keys(std::env::var(API_KEY_ENV).ok());
        whale.validate()?;
        Ok(whale)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        ChatConfig {
            config_path: args.config.map(PathBuf::from),
            model: args.model,
            provider: args.provider,
            knowledge_base: args.knowledge_base,
            system_prompt: args.system,
            data_dir: args.data_dir.map(PathBuf::from),
            request_timeout: args.timeout.map(Duration::from_secs),
            use_color: !args.no_color,
        }
    }
}
