use serde::{Deserialize, Serialize};

/// Identifier of the provider configured out of the box.
pub const DEFAULT_PROVIDER_ID: &str = "local-ollama";

/// Base URL of the provider configured out of the box.
pub const DEFAULT_PROVIDER_URL: &str = "http://localhost:11434";

/// Wire flavor of a provider.
///
/// The kind decides the endpoint shape and the response framing; it carries no
/// business logic of its own.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// A local model server answering `/api/chat` with newline-delimited JSON.
    #[serde(rename = "ollama", alias = "native-ndjson")]
    NativeNdjson,

    /// A cloud endpoint answering `/chat/completions` with server-sent events.
    #[serde(rename = "openai-compatible", alias = "openai-compatible-sse")]
    OpenAiCompatibleSse,
}

/// A configured chat-completion backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Unique provider identifier.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Wire flavor.
    #[serde(rename = "type", alias = "kind")]
    pub kind: ProviderKind,

    /// Root URL of the backend.
    pub base_url: String,

    /// Bearer token, if the backend needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Whether sends may use this provider.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Provider {
    /// Create an enabled provider.
    pub fn new(id: impl Into<String>, kind: ProviderKind, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            base_url: base_url.into(),
            api_key: None,
            enabled: true,
        }
    }

    /// The local model server at its usual address.
    pub fn local() -> Self {
        Self::new(
            DEFAULT_PROVIDER_ID,
            ProviderKind::NativeNdjson,
            DEFAULT_PROVIDER_URL,
        )
        .with_name("Ollama")
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Enable or disable the provider.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The API key, if one is set and non-blank.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_deserializes_original_shape() {
        let json = serde_json::json!({
            "id": "cloud",
            "name": "Cloud",
            "type": "openai-compatible",
            "baseUrl": "https://api.example.com/v1/",
            "apiKey": "sk-test",
            "enabled": true
        });
        let provider: Provider = serde_json::from_value(json).unwrap();
        assert_eq!(provider.kind, ProviderKind::OpenAiCompatibleSse);
        assert_eq!(provider.base_url, "https://api.example.com/v1/");
        assert_eq!(provider.bearer_token(), Some("sk-test"));
    }

    #[test]
    fn kind_aliases() {
        let kind: ProviderKind = serde_json::from_str("\"native-ndjson\"").unwrap();
        assert_eq!(kind, ProviderKind::NativeNdjson);
        let kind: ProviderKind = serde_json::from_str("\"openai-compatible-sse\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAiCompatibleSse);
        assert_eq!(
            serde_json::to_string(&ProviderKind::NativeNdjson).unwrap(),
            "\"ollama\""
        );
    }

    #[test]
    fn blank_api_key_is_no_key() {
        let provider = Provider::local().with_api_key("   ");
        assert_eq!(provider.bearer_token(), None);
    }

    #[test]
    fn enabled_defaults_to_true() {
        let json = serde_json::json!({
            "id": "p",
            "type": "ollama",
            "baseUrl": "http://localhost:11434"
        });
        let provider: Provider = serde_json::from_value(json).unwrap();
        assert!(provider.enabled);
    }
}
