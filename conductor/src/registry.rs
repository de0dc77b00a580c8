//! Stage registry: a catalog mapping stage ids to construction metadata.
//!
//! Used when pipelines are assembled from declarative configuration
//! rather than hand-wired code. The registry has no execution behavior
//! and no per-run state; it is a lock-guarded lookup table.

use crate::config::{PipelineConfig, StageConfig};
use crate::errors::OrchestratorError;
use crate::stage::StageDefinition;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds a runnable stage from its configuration.
pub type StageFactory =
    Arc<dyn Fn(&StageConfig) -> Result<StageDefinition, OrchestratorError> + Send + Sync>;

/// Construction metadata for a registered stage.
#[derive(Clone)]
pub struct StageMetadata {
    /// Display name.
    pub display_name: String,
    /// Human-readable description.
    pub description: String,
    /// Category tag for grouping.
    pub category: String,
    /// Parameters applied when the configuration omits them.
    pub default_parameters: HashMap<String, serde_json::Value>,
    /// Stage ids this stage expects to run after. Informational only:
    /// the registry does not enforce topological execution.
    pub dependencies: Vec<String>,
    /// Whether the pipeline remains usable without this stage.
    pub optional: bool,
    factory: StageFactory,
}

impl StageMetadata {
    /// Creates metadata around a factory.
    #[must_use]
    pub fn new(display_name: impl Into<String>, factory: StageFactory) -> Self {
        Self {
            display_name: display_name.into(),
            description: String::new(),
            category: String::new(),
            default_parameters: HashMap::new(),
            dependencies: Vec::new(),
            optional: false,
            factory,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the category tag.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Adds a default parameter.
    #[must_use]
    pub fn with_default_parameter(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.default_parameters.insert(key.into(), value);
        self
    }

    /// Declares informational dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Marks the stage as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Builds a stage definition from configuration.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error.
    pub fn build(&self, config: &StageConfig) -> Result<StageDefinition, OrchestratorError> {
        (self.factory)(config)
    }
}

impl fmt::Debug for StageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageMetadata")
            .field("display_name", &self.display_name)
            .field("category", &self.category)
            .field("dependencies", &self.dependencies)
            .field("optional", &self.optional)
            .finish()
    }
}

/// A lookup table from stage id to construction metadata.
///
/// Registrations are append-only per process unless explicitly
/// unregistered. Safe for concurrent reads behind a single lock.
#[derive(Debug, Default)]
pub struct StageRegistry {
    inner: RwLock<HashMap<String, StageMetadata>>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers metadata under an id.
    ///
    /// # Errors
    ///
    /// Fails if the id is already registered.
    pub fn register(
        &self,
        id: impl Into<String>,
        metadata: StageMetadata,
    ) -> Result<(), OrchestratorError> {
        let id = id.into();
        let mut inner = self.inner.write();

        if inner.contains_key(&id) {
            return Err(OrchestratorError::AlreadyRegistered { id });
        }

        debug!(stage_id = %id, "Stage registered");
        inner.insert(id, metadata);
        Ok(())
    }

    /// Looks up metadata for an id.
    #[must_use]
    pub fn metadata(&self, id: &str) -> Option<StageMetadata> {
        self.inner.read().get(id).cloned()
    }

    /// Returns metadata for all registered stages.
    #[must_use]
    pub fn all_stages(&self) -> Vec<StageMetadata> {
        self.inner.read().values().cloned().collect()
    }

    /// Returns true if the id is registered.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Removes a registration, returning true if it existed.
    pub fn unregister(&self, id: &str) -> bool {
        self.inner.write().remove(id).is_some()
    }

    /// Assembles an ordered stage list from a pipeline configuration.
    ///
    /// The configuration is validated first; nothing is built on a
    /// validation failure. Disabled stages are left out. Each enabled
    /// stage's factory receives its configuration with the registry's
    /// default parameters filled in underneath the configured ones.
    ///
    /// # Errors
    ///
    /// Returns validation errors, an error for an id with no registered
    /// factory, or a factory failure.
    pub fn assemble(
        &self,
        config: &PipelineConfig,
    ) -> Result<Vec<StageDefinition>, OrchestratorError> {
        config.validate()?;

        let mut stages = Vec::new();
        for stage_config in config.stages.iter().filter(|s| s.enabled) {
            let Some(metadata) = self.metadata(&stage_config.id) else {
                return Err(OrchestratorError::stage(
                    &stage_config.id,
                    "no registered factory for stage id",
                ));
            };

            let mut effective = stage_config.clone();
            for (key, value) in &metadata.default_parameters {
                effective
                    .parameters
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }

            let mut definition = metadata.build(&effective)?;
            if let Some(retries) = effective.max_retries {
                definition = definition.with_max_retries(retries.max(0) as u32);
            }
            if let Some(seconds) = effective.retry_delay_seconds {
                definition = definition.with_retry_delay(Duration::from_secs_f64(seconds.max(0.0)));
            }
            definition = definition.with_continue_on_error(effective.continue_on_error);
            stages.push(definition);
        }

        stages.sort_by_key(|s| s.order);
        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;

    fn noop_factory() -> StageFactory {
        Arc::new(|config: &StageConfig| {
            Ok(StageDefinition::from_fn(
                &config.id,
                &config.name,
                config.order as i32,
                |_ctx, _cancel| async { Ok(serde_json::Value::Null) },
            ))
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = StageRegistry::new();
        registry
            .register("tts", StageMetadata::new("Text To Speech", noop_factory()))
            .unwrap();

        assert!(registry.is_registered("tts"));
        assert!(!registry.is_registered("other"));

        let metadata = registry.metadata("tts").unwrap();
        assert_eq!(metadata.display_name, "Text To Speech");
        assert_eq!(registry.all_stages().len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = StageRegistry::new();
        registry
            .register("tts", StageMetadata::new("TTS", noop_factory()))
            .unwrap();

        let result = registry.register("tts", StageMetadata::new("TTS again", noop_factory()));
        assert!(matches!(
            result.unwrap_err(),
            OrchestratorError::AlreadyRegistered { .. }
        ));
    }

    #[test]
    fn test_unregister() {
        let registry = StageRegistry::new();
        registry
            .register("tts", StageMetadata::new("TTS", noop_factory()))
            .unwrap();

        assert!(registry.unregister("tts"));
        assert!(!registry.is_registered("tts"));
        assert!(!registry.unregister("tts"));

        // Re-registration after unregister is allowed.
        registry
            .register("tts", StageMetadata::new("TTS", noop_factory()))
            .unwrap();
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = StageMetadata::new("Render", noop_factory())
            .with_description("Renders the final video")
            .with_category("media")
            .with_dependencies(vec!["script".to_string()])
            .with_default_parameter("codec", serde_json::json!("h264"))
            .optional();

        assert_eq!(metadata.category, "media");
        assert_eq!(metadata.dependencies, vec!["script".to_string()]);
        assert!(metadata.optional);
    }

    #[test]
    fn test_assemble_orders_and_filters() {
        let registry = StageRegistry::new();
        for id in ["a", "b", "c"] {
            registry
                .register(id, StageMetadata::new(id, noop_factory()))
                .unwrap();
        }

        let mut disabled = StageConfig::new("b", "B", 1);
        disabled.enabled = false;

        let config = crate::config::PipelineConfig::new("p")
            .with_stage(StageConfig::new("c", "C", 9))
            .with_stage(disabled)
            .with_stage(StageConfig::new("a", "A", 2));

        let stages = registry.assemble(&config).unwrap();
        let ids: Vec<_> = stages.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_assemble_applies_overrides_and_defaults() {
        let registry = StageRegistry::new();
        let seen_params = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let seen = seen_params.clone();

        let factory: StageFactory = Arc::new(move |config: &StageConfig| {
            *seen.lock() = config.parameters.clone();
            Ok(StageDefinition::from_fn(
                &config.id,
                &config.name,
                config.order as i32,
                |_ctx, _cancel| async { Ok(serde_json::Value::Null) },
            ))
        });

        registry
            .register(
                "tts",
                StageMetadata::new("TTS", factory)
                    .with_default_parameter("voice", serde_json::json!("narrator"))
                    .with_default_parameter("speed", serde_json::json!(1.0)),
            )
            .unwrap();

        let mut stage_config = StageConfig::new("tts", "TTS", 1)
            .with_parameter("speed", serde_json::json!(1.5));
        stage_config.max_retries = Some(2);
        stage_config.retry_delay_seconds = Some(0.5);
        stage_config.continue_on_error = true;

        let config = crate::config::PipelineConfig::new("p").with_stage(stage_config);
        let stages = registry.assemble(&config).unwrap();

        assert_eq!(stages[0].max_retries, Some(2));
        assert_eq!(stages[0].retry_delay, Some(Duration::from_millis(500)));
        assert!(stages[0].continue_on_error);

        let params = seen_params.lock();
        // Configured value wins; missing defaults are filled in.
        assert_eq!(params.get("speed"), Some(&serde_json::json!(1.5)));
        assert_eq!(params.get("voice"), Some(&serde_json::json!("narrator")));
    }

    #[test]
    fn test_assemble_rejects_invalid_config() {
        let registry = StageRegistry::new();
        let config = crate::config::PipelineConfig::new("")
            .with_stage(StageConfig::new("a", "A", -1));

        assert!(matches!(
            registry.assemble(&config).unwrap_err(),
            OrchestratorError::Validation(_)
        ));
    }

    #[test]
    fn test_assemble_unregistered_id_fails() {
        let registry = StageRegistry::new();
        let config =
            crate::config::PipelineConfig::new("p").with_stage(StageConfig::new("ghost", "G", 1));

        assert!(registry.assemble(&config).is_err());
    }
}
