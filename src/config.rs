//! Configuration types for the Groundswell engine.
//!
//! Configuration can be loaded from TOML files or created programmatically.

use std::{fs, path::Path};

use serde::Deserialize;

use crate::reflection::ReflectionLevel;

/// Main configuration for a Groundswell root `Workflow`.
///
/// # Example TOML
///
/// ```toml
/// max_name_length = 100
/// attach_tree_debugger = true
/// default_step_budget_ms = 30000
///
/// [reflection]
/// enabled = false
/// max_attempts = 1
/// level = "workflow"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroundswellConfig {
    /// Ceiling on a workflow/node name's character count.
    pub max_name_length: usize,
    /// Whether `WorkflowEngineBuilder::build_root` attaches a `TreeDebugger`
    /// observer to the root it produces.
    pub attach_tree_debugger: bool,
    /// A duration hint in milliseconds an executor may consult for
    /// cooperative cancellation checks. Not enforced by the engine itself.
    pub default_step_budget_ms: Option<u64>,
    /// Default reflection knobs new `ReflectionManager`s are built with.
    pub reflection: ReflectionDefaults,
}

/// Defaults for `ReflectionConfig`, overridable per call site.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReflectionDefaults {
    pub enabled: bool,
    pub max_attempts: u32,
    pub level: ReflectionLevel,
}

impl Default for ReflectionDefaults {
    fn default() -> Self {
        Self { enabled: false, max_attempts: 1, level: ReflectionLevel::Workflow }
    }
}

impl Default for GroundswellConfig {
    fn default() -> Self {
        Self {
            max_name_length: crate::node::DEFAULT_MAX_NAME_LEN,
            attach_tree_debugger: false,
            default_step_budget_ms: None,
            reflection: ReflectionDefaults::default(),
        }
    }
}

impl GroundswellConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read or parsed.
    pub fn create<T: AsRef<Path>>(path: T) -> Self {
        let data = fs::read_to_string(path.as_ref())
            .unwrap_or_else(|e| panic!("failed to load config file {:?}: {e}", path.as_ref()));
        Self::load_from_str(data.as_str())
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Panics
    ///
    /// Panics if the string cannot be parsed as valid TOML.
    pub fn load_from_str(toml_str: &str) -> Self {
        toml::from_str::<GroundswellConfig>(toml_str).expect("failed to parse the toml str")
    }
}
