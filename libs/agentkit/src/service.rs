//! Service capability: persisted configuration, endpoints and hooks
//!
//! The runtime never inherits service behaviour; it talks to a
//! [`ServiceCapability`] object instead. [`GoGrpcService`] is the capability
//! for Go gRPC services described by a `service.yaml` file.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::endpoints::{EndpointDeclaration, EndpointError, ServiceEndpoints};
use crate::identity::ServiceIdentity;
use crate::settings::Settings;

/// Name of the persisted service configuration inside a service location.
pub const SERVICE_CONFIGURATION_FILE: &str = "service.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_saphyr::Error,
    },
    #[error("{field} mismatch: identity says '{expected}', service.yaml says '{found}'")]
    Mismatch {
        field: &'static str,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Endpoints(#[from] EndpointError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub settings: Settings,
}

/// Contents of `service.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    pub name: String,
    pub module: String,
    pub version: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointDeclaration>,
    #[serde(default)]
    pub agent: AgentSection,
}

impl ServiceConfiguration {
    /// Read `service.yaml` from `location`.
    ///
    /// # Errors
    /// `ConfigError::Read` or `ConfigError::Parse`.
    pub fn load(location: &Path) -> Result<Self, ConfigError> {
        let path = location.join(SERVICE_CONFIGURATION_FILE);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_saphyr::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.agent.settings
    }

    /// The file must describe the service the identity names.
    ///
    /// # Errors
    /// `ConfigError::Mismatch` for the first differing field.
    pub fn check_identity(&self, identity: &ServiceIdentity) -> Result<(), ConfigError> {
        for (field, expected, found) in [
            ("name", &identity.name, &self.name),
            ("module", &identity.module, &self.module),
        ] {
            if expected != found {
                return Err(ConfigError::Mismatch {
                    field,
                    expected: expected.clone(),
                    found: found.clone(),
                });
            }
        }
        Ok(())
    }
}

/// What the platform may ask an agent about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engage {
    Capabilities,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Factory,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Engagement {
    Capabilities(Vec<Capability>),
    Settings(Option<Settings>),
}

/// Service-specific behaviour the runtime delegates to.
#[async_trait]
pub trait ServiceCapability: Send + Sync {
    /// Read and validate the persisted configuration of `identity`.
    async fn load_configuration(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<ServiceConfiguration, ConfigError>;

    /// Endpoints the service owns for this session.
    fn load_endpoints(
        &self,
        identity: &ServiceIdentity,
        configuration: &ServiceConfiguration,
    ) -> Result<ServiceEndpoints, ConfigError>;

    /// Called after the runner stopped, even when stopping it failed.
    async fn stop(&self) -> anyhow::Result<()>;

    fn communicate(&self, engage: Engage) -> Engagement;
}

/// Capability of a Go gRPC service with an optional REST gateway.
#[derive(Debug, Default)]
pub struct GoGrpcService {
    loaded: RwLock<Option<ServiceConfiguration>>,
}

impl GoGrpcService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration read by the last successful load, cleared by `stop`.
    #[must_use]
    pub fn loaded(&self) -> Option<ServiceConfiguration> {
        self.loaded.read().clone()
    }
}

#[async_trait]
impl ServiceCapability for GoGrpcService {
    async fn load_configuration(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<ServiceConfiguration, ConfigError> {
        let configuration = ServiceConfiguration::load(&identity.location())?;
        configuration.check_identity(identity)?;
        tracing::debug!(
            service = %identity.unique(),
            endpoints = configuration.endpoints.len(),
            settings = ?configuration.agent.settings,
            "loaded service configuration"
        );
        *self.loaded.write() = Some(configuration.clone());
        Ok(configuration)
    }

    fn load_endpoints(
        &self,
        identity: &ServiceIdentity,
        configuration: &ServiceConfiguration,
    ) -> Result<ServiceEndpoints, ConfigError> {
        let endpoints = ServiceEndpoints::discover(
            identity,
            &configuration.endpoints,
            configuration.settings().rest_endpoint,
        )?;
        Ok(endpoints)
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if self.loaded.write().take().is_some() {
            tracing::debug!("service stopped");
        }
        Ok(())
    }

    fn communicate(&self, engage: Engage) -> Engagement {
        match engage {
            Engage::Capabilities => {
                Engagement::Capabilities(vec![Capability::Factory, Capability::Runtime])
            }
            Engage::Settings => {
                Engagement::Settings(self.loaded.read().as_ref().map(|c| c.settings().clone()))
            }
        }
    }
}
