use std::path::Path;
use std::sync::Arc;

use crate::config::GroundswellConfig;
use crate::debugger::TreeDebugger;
use crate::error::Result;
use crate::events::WorkflowObserver;
use crate::workflow::Workflow;

/// Wires a `GroundswellConfig`, an initial set of observers (including
/// optionally a `TreeDebugger`), and produces a root `Workflow`.
pub struct WorkflowEngineBuilder {
    config: GroundswellConfig,
    observers: Vec<Arc<dyn WorkflowObserver>>,
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowEngineBuilder {
    pub fn new() -> Self {
        let mut config = GroundswellConfig::default();
        let file = Path::new("config/groundswell.toml");

        if file.exists() {
            config = GroundswellConfig::create(file);
        } else if let Ok(env_config_path) = std::env::var("GROUNDSWELL_CONFIG") {
            let env_file = Path::new(&env_config_path);
            if env_file.exists() {
                config = GroundswellConfig::create(env_file);
            }
        }

        Self { config, observers: Vec::new() }
    }

    pub fn set_config_source<T: AsRef<Path>>(mut self, source: T) -> Self {
        self.config = GroundswellConfig::create(source);
        self
    }

    pub fn config(mut self, config: GroundswellConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Builds a root `Workflow` named `name`, with every observer attached
    /// (plus a `TreeDebugger` if `config.attach_tree_debugger` is set,
    /// returned alongside for callers that want to render it).
    pub fn build_root(&self, name: &str) -> Result<(Workflow, Option<Arc<TreeDebugger>>)> {
        let root = Workflow::new(Some(name), None)?;

        for observer in &self.observers {
            root.add_observer(observer.clone())?;
        }

        let debugger = if self.config.attach_tree_debugger {
            let debugger = Arc::new(TreeDebugger::new());
            root.add_observer(debugger.clone())?;
            Some(debugger)
        } else {
            None
        };

        Ok((root, debugger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_root_attaches_the_tree_debugger_when_configured() {
        let builder = WorkflowEngineBuilder::new().config(GroundswellConfig {
            attach_tree_debugger: true,
            ..GroundswellConfig::default()
        });
        let (root, debugger) = builder.build_root("root").unwrap();
        assert_eq!(root.name(), "root");
        assert!(debugger.is_some());
    }

    #[test]
    fn build_root_omits_the_tree_debugger_by_default() {
        let builder = WorkflowEngineBuilder::new();
        let (_, debugger) = builder.build_root("root").unwrap();
        assert!(debugger.is_none());
    }
}
