//! Environment variables injected into the service process
//!
//! Keys follow a `SVCAGENT__<SECTION>__<SEGMENT>...` scheme. Segments are
//! upper-cased and `-`, `/` and `.` are replaced by `_`, so every key is a
//! valid POSIX variable name regardless of the module or service name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::configuration::Configuration;
use crate::context::RuntimeContext;
use crate::endpoints::EndpointKey;
use crate::identity::ServiceIdentity;
use crate::network::NetworkInstance;

pub const PREFIX: &str = "SVCAGENT";
const SEPARATOR: &str = "__";

/// Deployment environment the service runs in (`local`, `dev`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new("local")
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates variables for the next spawn. Later writes to the same key
/// replace earlier ones; iteration order is sorted by key.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentVariableManager {
    vars: BTreeMap<String, String>,
}

impl EnvironmentVariableManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.vars.clear();
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set_environment(&mut self, environment: &Environment) {
        self.set(key(&["ENVIRONMENT"]), environment.as_str());
    }

    pub fn set_identity(&mut self, identity: &ServiceIdentity) {
        self.set(key(&["SERVICE", "NAME"]), &identity.name);
        self.set(key(&["SERVICE", "MODULE"]), &identity.module);
        self.set(key(&["SERVICE", "VERSION"]), &identity.version);
        self.set(key(&["SERVICE", "WORKSPACE"]), &identity.workspace);
    }

    pub fn set_runtime_context(&mut self, context: RuntimeContext) {
        self.set(key(&["RUNTIME_CONTEXT"]), context.as_str());
    }

    pub fn add_configurations(&mut self, configurations: &[Configuration]) {
        for conf in configurations {
            for info in &conf.infos {
                for value in &info.values {
                    let section = if value.secret {
                        "SECRET_CONFIGURATION"
                    } else {
                        "CONFIGURATION"
                    };
                    self.set(
                        key(&[section, &conf.origin, &info.name, &value.key]),
                        &value.value,
                    );
                }
            }
        }
    }

    pub fn add_endpoint(&mut self, endpoint: &EndpointKey, instance: &NetworkInstance) {
        self.set(endpoint_key(endpoint), &instance.address);
    }

    pub fn set_fixture(&mut self, fixture: &str) {
        self.set(key(&["FIXTURE"]), fixture);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Snapshot handed to a runner.
    #[must_use]
    pub fn to_vec(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Variable holding the address of `endpoint`.
#[must_use]
pub fn endpoint_key(endpoint: &EndpointKey) -> String {
    key(&[
        "ENDPOINT",
        &endpoint.module,
        &endpoint.service,
        &endpoint.name,
        endpoint.api.as_str(),
    ])
}

fn key(segments: &[&str]) -> String {
    let mut out = String::from(PREFIX);
    for segment in segments {
        out.push_str(SEPARATOR);
        out.push_str(&normalize(segment));
    }
    out
}

fn normalize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '-' | '/' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}
