use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Which layer a reflection attempt applies at: the whole step/workflow,
/// a single agent call, or a single prompt revision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::AsRefStr, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReflectionLevel {
    #[default]
    Workflow,
    Agent,
    Prompt,
}

/// Builds a revised prompt/payload from the failure context. Fallible: a
/// builder that fails causes the original step error to be rethrown
/// unchanged, per the reflect-failure contract.
pub type PromptBuilder = Arc<dyn Fn(&ReflectContext) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct ReflectionConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub level: ReflectionLevel,
    pub prompt_builder: Option<PromptBuilder>,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self { enabled: false, max_attempts: 1, level: ReflectionLevel::Workflow, prompt_builder: None }
    }
}

/// What `ReflectionManager::reflect` is given to decide with.
pub struct ReflectContext {
    pub step_name: String,
    pub attempt: u32,
    pub error: Error,
}

#[derive(Debug, Clone)]
pub struct ReflectDecision {
    pub should_retry: bool,
    pub revised_prompt: Option<Value>,
}

/// One row of the bounded-retry attempt history `ReflectionManager` keeps.
#[derive(Debug, Clone)]
pub struct ReflectionRecord {
    pub level: ReflectionLevel,
    pub attempt: u32,
    pub trigger_reason: String,
    pub prompt: Option<Value>,
    pub successful: bool,
}

/// Generalizes the teacher's count-based node retry into a reflect-decide
/// loop: on failure, a caller asks whether to retry (optionally with a
/// revised prompt) instead of blindly re-running the same work up to N
/// times.
#[derive(Clone)]
pub struct ReflectionManager {
    config: ReflectionConfig,
    history: Arc<RwLock<Vec<ReflectionRecord>>>,
}

impl ReflectionManager {
    pub fn new(config: ReflectionConfig) -> Self {
        Self { config, history: Arc::new(RwLock::new(Vec::new())) }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    pub fn level(&self) -> ReflectionLevel {
        self.config.level
    }

    pub fn history(&self) -> Vec<ReflectionRecord> {
        self.history.read().unwrap().clone()
    }

    /// Decides whether `ctx.attempt` should be retried. Disabled managers,
    /// or contexts already at the attempt ceiling, never retry.
    pub fn reflect(&self, ctx: ReflectContext) -> Result<ReflectDecision> {
        if !self.config.enabled || ctx.attempt >= self.max_attempts() {
            return Ok(ReflectDecision { should_retry: false, revised_prompt: None });
        }

        let revised_prompt = match &self.config.prompt_builder {
            Some(builder) => Some(builder(&ctx).map_err(|e| Error::ReflectionTransient(e.to_string()))?),
            None => None,
        };

        self.history.write().unwrap().push(ReflectionRecord {
            level: self.config.level,
            attempt: ctx.attempt,
            trigger_reason: ctx.error.to_string(),
            prompt: revised_prompt.clone(),
            successful: false,
        });

        Ok(ReflectDecision { should_retry: true, revised_prompt })
    }

    /// Marks the most recent recorded attempt successful, once the retry
    /// it authorized completes without error.
    pub fn mark_last_reflection_successful(&self) {
        if let Some(last) = self.history.write().unwrap().last_mut() {
            last.successful = true;
        }
    }
}

impl Default for ReflectionManager {
    fn default() -> Self {
        Self::new(ReflectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_manager_never_retries() {
        let manager = ReflectionManager::default();
        let decision = manager
            .reflect(ReflectContext { step_name: "s".into(), attempt: 1, error: Error::Other("x".into()) })
            .unwrap();
        assert!(!decision.should_retry);
        assert!(manager.history().is_empty());
    }

    #[test]
    fn retries_up_to_max_attempts_and_records_history() {
        let manager = ReflectionManager::new(ReflectionConfig {
            enabled: true,
            max_attempts: 3,
            level: ReflectionLevel::Workflow,
            prompt_builder: Some(Arc::new(|ctx| Ok(Value::String(format!("retry after {}", ctx.attempt))))),
        });

        let d1 = manager
            .reflect(ReflectContext { step_name: "s".into(), attempt: 1, error: Error::Other("a".into()) })
            .unwrap();
        assert!(d1.should_retry);
        assert_eq!(d1.revised_prompt, Some(Value::String("retry after 1".into())));

        let d3 = manager
            .reflect(ReflectContext { step_name: "s".into(), attempt: 3, error: Error::Other("c".into()) })
            .unwrap();
        assert!(!d3.should_retry);
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn a_failing_prompt_builder_surfaces_as_reflection_transient() {
        let manager = ReflectionManager::new(ReflectionConfig {
            enabled: true,
            max_attempts: 2,
            level: ReflectionLevel::Workflow,
            prompt_builder: Some(Arc::new(|_| Err(Error::Other("builder exploded".into())))),
        });
        let err = manager
            .reflect(ReflectContext { step_name: "s".into(), attempt: 1, error: Error::Other("orig".into()) })
            .unwrap_err();
        assert!(matches!(err, Error::ReflectionTransient(_)));
    }
}
