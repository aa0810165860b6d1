//! Dependency configurations handed to the service at Init.

use serde::{Deserialize, Serialize};

use crate::context::RuntimeContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationValue {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationInfo {
    pub name: String,
    #[serde(default)]
    pub values: Vec<ConfigurationValue>,
}

/// Configuration published by `origin` (a `module/service` or the workspace).
///
/// A configuration without `runtime_context` applies to every context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub origin: String,
    #[serde(default)]
    pub runtime_context: Option<RuntimeContext>,
    #[serde(default)]
    pub infos: Vec<ConfigurationInfo>,
}

/// Keep the configurations that apply to `context`.
#[must_use]
pub fn filter_configurations(
    configurations: &[Configuration],
    context: RuntimeContext,
) -> Vec<Configuration> {
    configurations
        .iter()
        .filter(|c| c.runtime_context.is_none_or(|ctx| ctx == context))
        .cloned()
        .collect()
}
