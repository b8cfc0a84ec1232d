//! Static catalog of models offered to clients.

use serde::Serialize;

/// A model selectable by clients.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Gateway model identifier.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
}

/// Model used when a session does not pick one.
pub const DEFAULT_MODEL: &str = "anthropic/claude-4-sonnet";

/// Models exposed by the gateway.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "anthropic/claude-4-sonnet",
        name: "Claude 4 Sonnet",
    },
    ModelInfo {
        id: "anthropic/claude-4-opus",
        name: "Claude 4 Opus",
    },
    ModelInfo {
        id: "google-ai-studio/gemini-3.0-pro",
        name: "Gemini 3.0 Pro",
    },
    ModelInfo {
        id: "openai/gpt-5.1-pro",
        name: "GPT-5.1 Pro",
    },
    ModelInfo {
        id: "xai/grok-4",
        name: "Grok-4",
    },
];

/// Look up a catalog entry by identifier.
#[must_use]
pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|model| model.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_in_catalog() {
        assert!(find_model(DEFAULT_MODEL).is_some());
        assert!(find_model("unknown/model").is_none());
    }
}
