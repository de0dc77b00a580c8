//! Validated pipeline configuration input.
//!
//! The orchestrator never parses YAML or JSON files itself: it receives
//! an already-built configuration structure and validates it before any
//! stage executes. Validation reports every problem found, not just the
//! first one.

use crate::errors::ConfigValidationError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

fn default_enabled() -> bool {
    true
}

/// Declarative configuration for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Disabled stages are left out of assembly entirely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Execution rank.
    #[serde(default)]
    pub order: i64,
    /// Whether a failure of this stage aborts the run.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Per-stage retry count override.
    #[serde(default)]
    pub max_retries: Option<i64>,
    /// Per-stage retry base delay override, in seconds.
    #[serde(default)]
    pub retry_delay_seconds: Option<f64>,
    /// Optional condition expression, interpreted by the stage factory.
    #[serde(default)]
    pub condition: Option<String>,
    /// Free-form parameters; factories extract and validate their own keys.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl StageConfig {
    /// Creates a minimal enabled stage config.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            order,
            continue_on_error: false,
            max_retries: None,
            retry_delay_seconds: None,
            condition: None,
            parameters: HashMap::new(),
        }
    }

    /// Sets a parameter value.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// The validated configuration consumed at pipeline-assembly time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Pipeline version tag.
    #[serde(default)]
    pub version: String,
    /// Ordered stage configurations.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Creates a named pipeline config with no stages.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage configuration.
    #[must_use]
    pub fn with_stage(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    /// Validates the configuration, collecting every distinct problem.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigValidationError`] listing all messages when any
    /// check fails. Nothing runs on a validation failure.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut messages = Vec::new();
        let mut seen_ids = HashSet::new();

        if self.name.trim().is_empty() {
            messages.push("pipeline name must not be empty".to_string());
        }

        for stage in &self.stages {
            let label = if stage.id.is_empty() {
                "<missing id>"
            } else {
                stage.id.as_str()
            };

            if stage.id.trim().is_empty() {
                messages.push("stage id must not be empty".to_string());
            } else if !seen_ids.insert(stage.id.clone()) {
                messages.push(format!("duplicate stage id '{}'", stage.id));
            }

            if stage.name.trim().is_empty() {
                messages.push(format!("stage '{label}' has an empty name"));
            }

            if stage.order < 0 {
                messages.push(format!(
                    "stage '{label}' has negative order {}",
                    stage.order
                ));
            }

            if let Some(retries) = stage.max_retries {
                if retries < 0 {
                    messages.push(format!(
                        "stage '{label}' has negative max_retries {retries}"
                    ));
                }
            }

            if let Some(delay) = stage.retry_delay_seconds {
                if delay < 0.0 {
                    messages.push(format!(
                        "stage '{label}' has negative retry_delay_seconds {delay}"
                    ));
                }
            }
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError::new(messages))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_config_passes() {
        let config = PipelineConfig::new("video")
            .with_stage(StageConfig::new("story_idea", "Story Idea", 1))
            .with_stage(StageConfig::new("script", "Script", 2));

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = PipelineConfig::new("video")
            .with_stage(StageConfig::new("a", "A", 1))
            .with_stage(StageConfig::new("a", "A again", 2));

        let err = config.validate().unwrap_err();
        assert!(err.messages.iter().any(|m| m.contains("duplicate stage id 'a'")));
    }

    #[test]
    fn test_all_problems_reported_together() {
        let mut bad = StageConfig::new("", "", -1);
        bad.max_retries = Some(-3);
        bad.retry_delay_seconds = Some(-0.5);

        let config = PipelineConfig::new("").with_stage(bad);
        let err = config.validate().unwrap_err();

        assert_eq!(err.messages.len(), 6);
        assert!(err.messages.iter().any(|m| m.contains("pipeline name")));
        assert!(err.messages.iter().any(|m| m.contains("stage id must not be empty")));
        assert!(err.messages.iter().any(|m| m.contains("empty name")));
        assert!(err.messages.iter().any(|m| m.contains("negative order")));
        assert!(err.messages.iter().any(|m| m.contains("negative max_retries")));
        assert!(err.messages.iter().any(|m| m.contains("negative retry_delay_seconds")));
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{"name": "p", "stages": [{"id": "a", "name": "A"}]}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        let stage = &config.stages[0];
        assert!(stage.enabled);
        assert_eq!(stage.order, 0);
        assert!(!stage.continue_on_error);
        assert!(stage.parameters.is_empty());
    }

    #[test]
    fn test_parameters_roundtrip() {
        let config = StageConfig::new("tts", "Text To Speech", 3)
            .with_parameter("voice", serde_json::json!("narrator"))
            .with_parameter("speed", serde_json::json!(1.25));

        let json = serde_json::to_string(&config).unwrap();
        let back: StageConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(back.parameters.get("voice"), Some(&serde_json::json!("narrator")));
        assert_eq!(back.parameters.get("speed"), Some(&serde_json::json!(1.25)));
    }
}
