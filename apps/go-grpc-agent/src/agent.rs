//! Wiring of the runtime collaborators and the command implementations.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use agentkit::codegen::BufGeneratorFactory;
use agentkit::driver::{Driver, Requests};
use agentkit::lifecycle::DesiredAction;
use agentkit::network::NetworkManager;
use agentkit::runner::{DefaultRunnerFactory, DockerCli, GoToolchain, PrebuiltBinary, Toolchain};
use agentkit::runtime::{InitRequest, LoadRequest, StartRequest};
use agentkit::service::{GoGrpcService, ServiceCapability};
use agentkit::{Collaborators, Runtime};

use crate::config::AgentConfig;
use crate::signals;

pub struct Agent {
    config: AgentConfig,
    service: Arc<GoGrpcService>,
    runtime: Arc<Runtime>,
}

impl Agent {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let toolchain: Arc<dyn Toolchain> = match &config.runner.binary {
            Some(binary) => Arc::new(PrebuiltBinary::new(binary)),
            None => Arc::new(GoToolchain::new(&config.runner.go)),
        };
        let runners = DefaultRunnerFactory::new(
            toolchain,
            Arc::new(DockerCli::new(&config.runner.docker)),
            config.runner.image.clone(),
        );
        let service = Arc::new(GoGrpcService::new());
        let runtime = Runtime::new(
            Collaborators {
                service: service.clone(),
                runners: Arc::new(runners),
                generators: Arc::new(BufGeneratorFactory::new(&config.runner.buf)),
            },
            config.runtime.clone(),
        );
        Self {
            config,
            service,
            runtime: Arc::new(runtime),
        }
    }

    fn load_request(&self) -> LoadRequest {
        LoadRequest {
            identity: self.config.service.identity(),
            environment: self.config.service.environment.clone(),
        }
    }

    /// Load the service and build the requests replayed by the driver.
    async fn prepare(&self) -> Result<Requests> {
        let load = self.load_request();
        let loaded = self.runtime.load(load.clone()).await?;
        let network_mappings = NetworkManager::new(self.config.network.ports)
            .generate_mappings(loaded.endpoints.iter())
            .context("failed to allocate service ports")?;
        for mapping in &network_mappings {
            if let Some(instance) = mapping.instances.first() {
                tracing::info!(endpoint = %mapping.endpoint, address = %instance.address, "endpoint");
            }
        }
        Ok(Requests {
            load,
            init: InitRequest {
                network_mappings,
                dependency_configurations: Vec::new(),
                runtime_context: self.config.runner.context,
            },
            start: StartRequest {
                dependency_network_mappings: Vec::new(),
                fixture: self.config.service.fixture.clone(),
            },
        })
    }

    /// Bring the service up, follow source changes until a shutdown signal,
    /// then stop and destroy it.
    ///
    /// # Errors
    /// When the service cannot be brought up or torn down.
    pub async fn run(self) -> Result<()> {
        let requests = self.prepare().await?;
        let driver = Driver::new(self.runtime.clone(), requests);
        let transition = driver.replay(DesiredAction::Init).await?;
        tracing::info!(phase = %transition.phase, "service is up");

        let cancel = CancellationToken::new();
        let follower = tokio::spawn(driver.run(cancel.clone()));

        let waited = signals::wait_for_shutdown().await;
        cancel.cancel();
        if let Err(e) = follower.await {
            tracing::warn!(error = %e, "driver task failed");
        }

        let stopped = self.runtime.stop().await;
        let destroyed = self.runtime.destroy().await;
        waited?;
        stopped?;
        destroyed?;
        Ok(())
    }

    /// Read `service.yaml` and discover endpoints without touching the runtime.
    ///
    /// # Errors
    /// When the configuration or the service definition is invalid.
    pub async fn check(&self) -> Result<String> {
        self.config.validate()?;
        let identity = self.config.service.identity();
        let configuration = self.service.load_configuration(&identity).await?;
        let endpoints = self.service.load_endpoints(&identity, &configuration)?;
        let report = serde_json::json!({
            "service": identity.to_string(),
            "location": identity.location(),
            "settings": configuration.settings(),
            "endpoints": endpoints,
        });
        Ok(serde_json::to_string_pretty(&report)?)
    }

    /// Load, initialize and run the toolchain tests.
    ///
    /// # Errors
    /// When a lifecycle step fails or the tests fail.
    pub async fn test(self) -> Result<()> {
        let requests = self.prepare().await?;
        self.runtime.init(requests.init).await?;
        let tested = self.runtime.test().await?;
        match &tested.output {
            Some(output) => {
                print!("{}", output.stdout);
                eprint!("{}", output.stderr);
            }
            None => println!("toolchain has no test command"),
        }
        let success = tested.success();
        self.runtime.destroy().await?;
        if !success {
            anyhow::bail!("service tests failed");
        }
        Ok(())
    }

    /// Drop build artifacts and cached generation state.
    ///
    /// # Errors
    /// When the service cannot be loaded or its cache cannot be emptied.
    pub async fn destroy(self) -> Result<()> {
        self.runtime.load(self.load_request()).await?;
        self.runtime.destroy().await?;
        Ok(())
    }
}
