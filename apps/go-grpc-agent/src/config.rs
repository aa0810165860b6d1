//! Agent configuration.
//!
//! Layered with figment: defaults, then the YAML file given with `--config`,
//! then `SVCAGENT_AGENT__*` environment variables (`__` separates nesting),
//! then command line overrides.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use agentkit::env::Environment;
use agentkit::network::PortStrategy;
use agentkit::runner::container::DEFAULT_IMAGE;
use agentkit::{RuntimeContext, RuntimeOptions, ServiceIdentity};

pub const ENV_PREFIX: &str = "SVCAGENT_AGENT__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub service: ServiceConfig,
    pub runtime: RuntimeOptions,
    pub runner: RunnerConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Which service to drive and where it lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    pub module: String,
    pub version: String,
    pub workspace: String,
    pub workspace_path: PathBuf,
    /// Service directory relative to `workspace_path`; `<module>/<name>` when unset.
    pub path: Option<PathBuf>,
    pub environment: Environment,
    /// Value of `SVCAGENT__FIXTURE` at Start.
    pub fixture: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            module: String::new(),
            version: "0.0.0".to_owned(),
            workspace: "local".to_owned(),
            workspace_path: PathBuf::from("."),
            path: None,
            environment: Environment::default(),
            fixture: None,
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn identity(&self) -> ServiceIdentity {
        let identity = ServiceIdentity::new(&self.name, &self.module, &self.version)
            .in_workspace(&self.workspace, &self.workspace_path);
        match &self.path {
            Some(path) => identity.at(path),
            None => identity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// `native` or `container`; probed from the host when unset.
    pub context: Option<RuntimeContext>,
    pub go: PathBuf,
    /// Run this binary instead of building with `go`.
    pub binary: Option<PathBuf>,
    pub buf: PathBuf,
    pub docker: String,
    pub image: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            context: None,
            go: PathBuf::from("go"),
            binary: None,
            buf: PathBuf::from("buf"),
            docker: "docker".to_owned(),
            image: DEFAULT_IMAGE.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub ports: PortStrategy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ports: PortStrategy::Temporary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

/// Command line values that win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub verbose: u8,
    pub context: Option<RuntimeContext>,
    pub binary: Option<PathBuf>,
    pub json_logs: bool,
}

impl AgentConfig {
    /// Load defaults, the optional YAML file and the environment.
    ///
    /// # Errors
    /// When the file is missing or any layer does not match the schema.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        figment
            .extract()
            .context("failed to load agent configuration")
    }

    pub fn apply_cli_overrides(&mut self, overrides: &CliOverrides) {
        match overrides.verbose {
            0 => {}
            1 => "info".clone_into(&mut self.logging.level),
            2 => "debug".clone_into(&mut self.logging.level),
            _ => "trace".clone_into(&mut self.logging.level),
        }
        if overrides.context.is_some() {
            self.runner.context = overrides.context;
        }
        if let Some(binary) = &overrides.binary {
            self.runner.binary = Some(binary.clone());
        }
        if overrides.json_logs {
            self.logging.json = true;
        }
    }

    /// # Errors
    /// When the configuration cannot be serialized.
    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).context("failed to serialize configuration")
    }

    /// # Errors
    /// When the configuration does not name a service.
    pub fn validate(&self) -> Result<()> {
        if self.service.name.is_empty() || self.service.module.is_empty() {
            anyhow::bail!("service.name and service.module must be set");
        }
        self.service
            .identity()
            .validate()
            .context("invalid service identity")?;
        Ok(())
    }
}
