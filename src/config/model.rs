//! Sampling Configuration
//!
//! Model and sampling parameters as partial layers. App defaults, mask
//! overrides and per-call overrides are stacked with `overlay`, later layers
//! winning, then `resolve` fills whatever is still unset.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "glm-4-flash";
pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_TOP_P: f32 = 1.0;

/// One layer of model configuration; unset fields defer to lower layers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    /// Only override the model name
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    /// `self` with every field set in `other` replaced by `other`'s value
    pub fn overlay(&self, other: &ModelConfig) -> ModelConfig {
        ModelConfig {
            model: other.model.clone().or_else(|| self.model.clone()),
            temperature: other.temperature.or(self.temperature),
            top_p: other.top_p.or(self.top_p),
            presence_penalty: other.presence_penalty.or(self.presence_penalty),
            frequency_penalty: other.frequency_penalty.or(self.frequency_penalty),
            max_tokens: other.max_tokens.or(self.max_tokens),
        }
    }

    /// Fill unset fields with built-in defaults
    pub fn resolve(&self) -> ResolvedModelConfig {
        ResolvedModelConfig {
            model: self
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: self.top_p.unwrap_or(DEFAULT_TOP_P),
            presence_penalty: self.presence_penalty.unwrap_or(0.0),
            frequency_penalty: self.frequency_penalty.unwrap_or(0.0),
            max_tokens: self.max_tokens,
        }
    }

    /// Stack app defaults, mask overrides and per-call overrides
    pub fn effective(
        defaults: &ModelConfig,
        mask: &ModelConfig,
        call: &ModelConfig,
    ) -> ResolvedModelConfig {
        defaults.overlay(mask).overlay(call).resolve()
    }
}

/// Fully resolved sampling parameters for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModelConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub max_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let resolved = ModelConfig::default().resolve();
        assert_eq!(resolved.model, DEFAULT_MODEL);
        assert_eq!(resolved.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(resolved.top_p, DEFAULT_TOP_P);
        assert_eq!(resolved.presence_penalty, 0.0);
        assert_eq!(resolved.max_tokens, None);
    }

    #[test]
    fn test_layer_precedence() {
        let defaults = ModelConfig {
            model: Some("glm-4".to_string()),
            temperature: Some(0.5),
            top_p: Some(0.9),
            ..Default::default()
        };
        let mask = ModelConfig {
            temperature: Some(0.1),
            presence_penalty: Some(0.3),
            ..Default::default()
        };
        let call = ModelConfig::with_model("glm-4v");

        let resolved = ModelConfig::effective(&defaults, &mask, &call);
        assert_eq!(resolved.model, "glm-4v");
        assert_eq!(resolved.temperature, 0.1);
        assert_eq!(resolved.top_p, 0.9);
        assert_eq!(resolved.presence_penalty, 0.3);
        assert_eq!(resolved.frequency_penalty, 0.0);
    }

    #[test]
    fn test_deserialize_partial_layer() {
        let layer: ModelConfig = serde_json::from_str(r#"{"temperature": 0.8}"#).unwrap();
        assert_eq!(layer.temperature, Some(0.8));
        assert_eq!(layer.model, None);
    }
}
