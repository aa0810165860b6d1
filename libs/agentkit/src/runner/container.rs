//! Container runner
//!
//! Builds happen in a throwaway container with the service source mounted at
//! `/app` and the cache at `/cache`; the binary lands in the cache so the run
//! container (same mounts) can execute it. The run container is attached to
//! the spawned engine CLI process, so its output flows through the same
//! forwarders as a native process.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::process::{self, ManagedProcess};
use super::toolchain::Toolchain;
use super::{
    BuildLayout, BuildRecord, CommandSpec, ExecEnvironment, ExecOutput, ProcessInfo,
    RunnerEnvironment, RunnerError, RunnerSpec, RunnerState, SpawnRequest,
};
use crate::context::RuntimeContext;

pub const SOURCE_MOUNT: &str = "/app";
pub const CACHE_MOUNT: &str = "/cache";

/// Default image used to build and run Go services.
pub const DEFAULT_IMAGE: &str = "golang:1.23-alpine";

/// One container invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    /// `(host path, container path, read only)`
    pub mounts: Vec<(PathBuf, String, bool)>,
    pub workdir: Option<String>,
    pub ports: Vec<u16>,
    pub envs: Vec<(String, String)>,
    pub command: Vec<String>,
}

/// Container engine used by [`ContainerRunner`].
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Foreground command that runs `spec` and removes the container on exit.
    fn run_command(&self, spec: &ContainerSpec) -> CommandSpec;

    /// Stop the named container, waiting at most `grace`. Missing containers are not an error.
    async fn stop(&self, container: &str, grace: Duration) -> Result<(), RunnerError>;

    /// Force-remove the named container. Missing containers are not an error.
    async fn remove(&self, container: &str) -> Result<(), RunnerError>;
}

/// The `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    fn run_command(&self, spec: &ContainerSpec) -> CommandSpec {
        let mut cmd = CommandSpec::new(&self.binary).args(["run", "--rm"]);
        if let Some(name) = &spec.name {
            cmd = cmd.args(["--name", name.as_str()]);
        }
        for (host, target, read_only) in &spec.mounts {
            let suffix = if *read_only { ":ro" } else { "" };
            cmd = cmd
                .arg("-v")
                .arg(format!("{}:{target}{suffix}", host.display()));
        }
        if let Some(workdir) = &spec.workdir {
            cmd = cmd.args(["-w", workdir.as_str()]);
        }
        for port in &spec.ports {
            cmd = cmd.arg("-p").arg(format!("{port}:{port}"));
        }
        for (key, value) in &spec.envs {
            cmd = cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(&spec.image).args(spec.command.iter().cloned())
    }

    async fn stop(&self, container: &str, grace: Duration) -> Result<(), RunnerError> {
        let cmd = CommandSpec::new(&self.binary)
            .args(["stop", "-t"])
            .arg(grace.as_secs().max(1).to_string())
            .arg(container);
        tolerate_missing(cmd).await
    }

    async fn remove(&self, container: &str) -> Result<(), RunnerError> {
        let cmd = CommandSpec::new(&self.binary)
            .args(["rm", "-f"])
            .arg(container);
        tolerate_missing(cmd).await
    }
}

async fn tolerate_missing(command: CommandSpec) -> Result<(), RunnerError> {
    match process::checked(&command).await {
        Ok(_) => Ok(()),
        Err(RunnerError::CommandFailed { output, .. }) if output.contains("No such container") => {
            tracing::debug!(command = %command, "container already gone");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Runs commands in a throwaway container with the runner's mounts.
#[derive(Clone)]
pub struct ContainerExec {
    engine: Arc<dyn ContainerEngine>,
    image: String,
    mounts: Vec<(PathBuf, String, bool)>,
}

impl ContainerExec {
    fn spec(&self, command: &CommandSpec) -> ContainerSpec {
        let workdir = command
            .cwd
            .as_ref()
            .map_or_else(|| SOURCE_MOUNT.to_owned(), |p| p.to_string_lossy().into_owned());
        ContainerSpec {
            name: None,
            image: self.image.clone(),
            mounts: self.mounts.clone(),
            workdir: Some(workdir),
            ports: Vec::new(),
            envs: command.envs.clone(),
            command: std::iter::once(command.program.clone())
                .chain(command.args.iter().cloned())
                .collect(),
        }
    }
}

#[async_trait]
impl ExecEnvironment for ContainerExec {
    async fn run(&self, command: &CommandSpec) -> Result<ExecOutput, RunnerError> {
        process::output(&self.engine.run_command(&self.spec(command))).await
    }
}

pub struct ContainerRunner {
    spec: RunnerSpec,
    toolchain: Arc<dyn Toolchain>,
    engine: Arc<dyn ContainerEngine>,
    container: String,
    state: RunnerState,
    record: BuildRecord,
    process: Option<ManagedProcess>,
    exec: ContainerExec,
}

impl ContainerRunner {
    pub fn new(
        spec: RunnerSpec,
        toolchain: Arc<dyn Toolchain>,
        engine: Arc<dyn ContainerEngine>,
        image: impl Into<String>,
    ) -> Self {
        let container = container_name(&spec.service);
        let mut mounts = vec![
            (spec.source.clone(), SOURCE_MOUNT.to_owned(), false),
            (spec.cache.clone(), CACHE_MOUNT.to_owned(), false),
        ];
        // prebuilt binaries live outside the mounted cache
        let host_binary = toolchain.binary(&spec, &spec.host_layout());
        if !host_binary.starts_with(&spec.cache) {
            mounts.push((
                host_binary.clone(),
                host_binary.to_string_lossy().into_owned(),
                true,
            ));
        }
        let exec = ContainerExec {
            engine: Arc::clone(&engine),
            image: image.into(),
            mounts,
        };
        let record = BuildRecord::new(&spec.source);
        Self {
            spec,
            toolchain,
            engine,
            container,
            state: RunnerState::Uninitialized,
            record,
            process: None,
            exec,
        }
    }

    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    async fn stop_process(&mut self) -> Result<(), RunnerError> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let stopped = self
            .engine
            .stop(&self.container, self.spec.stop_grace)
            .await;
        process.stop(self.spec.stop_grace).await;
        self.state = RunnerState::Stopped;
        stopped
    }
}

/// Container name derived from `module/name`.
fn container_name(service: &str) -> String {
    let sanitized: String = service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("gga-{sanitized}")
}

#[async_trait]
impl RunnerEnvironment for ContainerRunner {
    fn context(&self) -> RuntimeContext {
        RuntimeContext::Container
    }

    fn state(&self) -> RunnerState {
        self.state
    }

    async fn init(&mut self) -> Result<(), RunnerError> {
        let layout = BuildLayout::container();
        if let Some(build) = self.toolchain.build_command(&self.spec, &layout) {
            let bin_dir = self.spec.cache.join("bin");
            tokio::fs::create_dir_all(&bin_dir)
                .await
                .map_err(|source| RunnerError::Io {
                    path: bin_dir,
                    source,
                })?;
            tracing::info!(
                service = %self.spec.service,
                engine = self.engine.name(),
                command = %build,
                "building service in container"
            );
            process::checked(&self.engine.run_command(&self.exec.spec(&build))).await?;
        }
        let binary = self.toolchain.binary(&self.spec, &self.spec.host_layout());
        if !binary.is_file() {
            return Err(RunnerError::MissingBinary(binary));
        }
        self.record.record();
        if self.process.is_none() {
            self.state = RunnerState::Built;
        }
        Ok(())
    }

    fn is_stale(&self) -> bool {
        self.toolchain
            .build_command(&self.spec, &BuildLayout::container())
            .is_some()
            && self.record.is_stale()
    }

    async fn spawn(&mut self, request: SpawnRequest) -> Result<ProcessInfo, RunnerError> {
        if self.state == RunnerState::Uninitialized {
            return Err(RunnerError::NotBuilt);
        }
        if let Err(e) = self.stop_process().await {
            tracing::warn!(service = %self.spec.service, error = %e, "failed to stop previous container");
        }
        let binary = self.toolchain.binary(&self.spec, &BuildLayout::container());
        let spec = ContainerSpec {
            name: Some(self.container.clone()),
            ports: request.ports,
            envs: request.envs,
            command: vec![binary.to_string_lossy().into_owned()],
            ..self.exec.spec(&CommandSpec::default())
        };
        let command = self.engine.run_command(&spec);
        let process =
            ManagedProcess::spawn(&self.spec.service, &command, Some(self.container.clone()))?;
        let info = process.info().clone();
        self.process = Some(process);
        self.state = RunnerState::Running;
        Ok(info)
    }

    async fn stop(&mut self) -> Result<(), RunnerError> {
        self.stop_process().await
    }

    async fn shutdown(&mut self) -> Result<(), RunnerError> {
        let stopped = self.stop_process().await;
        tracing::debug!(container = %self.container, "removing container");
        let removed = self.engine.remove(&self.container).await;
        stopped.and(removed)
    }

    fn exec(&self) -> &dyn ExecEnvironment {
        &self.exec
    }

    fn test_command(&self) -> Option<CommandSpec> {
        self.toolchain.test_command(&BuildLayout::container())
    }

    fn process(&self) -> Option<&ProcessInfo> {
        self.process.as_ref().map(ManagedProcess::info)
    }
}
