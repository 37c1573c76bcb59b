use serde::{Deserialize, Serialize};

/// A model offered by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Identifier passed as `model` in chat requests.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Provider that serves the model.
    pub provider_id: String,

    /// Parameter count as reported by the server, e.g. `"8B"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.size {
            Some(size) => write!(f, "{} ({size})", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Response of the local model server's `GET /api/tags`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsResponse {
    /// Installed models.
    #[serde(default)]
    pub models: Vec<TagsModel>,
}

/// One entry of [`TagsResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct TagsModel {
    /// Model name, e.g. `llama3:8b`.
    pub name: String,

    /// Model details.
    #[serde(default)]
    pub details: Option<TagsModelDetails>,
}

/// Details of a [`TagsModel`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsModelDetails {
    /// Parameter count, e.g. `8.0B`.
    #[serde(default)]
    pub parameter_size: Option<String>,
}

/// Response of an OpenAI-compatible `GET /models`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsResponse {
    /// Available models.
    #[serde(default)]
    pub data: Vec<ModelsEntry>,
}

/// One entry of [`ModelsResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsEntry {
    /// Model identifier.
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_response_deserialization() {
        let json = serde_json::json!({
            "models": [
                {"name": "llama3:8b", "details": {"parameter_size": "8.0B", "family": "llama"}},
                {"name": "tiny"}
            ]
        });
        let tags: TagsResponse = serde_json::from_value(json).unwrap();
        assert_eq!(tags.models.len(), 2);
        assert_eq!(
            tags.models[0]
                .details
                .as_ref()
                .and_then(|d| d.parameter_size.as_deref()),
            Some("8.0B")
        );
        assert!(tags.models[1].details.is_none());
    }

    #[test]
    fn model_display() {
        let model = Model {
            id: "llama3".to_string(),
            name: "llama3".to_string(),
            provider_id: "local-ollama".to_string(),
            size: Some("8B".to_string()),
        };
        assert_eq!(model.to_string(), "llama3 (8B)");
    }
}
