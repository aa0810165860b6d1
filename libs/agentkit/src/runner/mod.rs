//! Runner environments: building and running the service binary
//!
//! A [`RunnerEnvironment`] owns one build artifact and at most one running
//! process. Two variants exist:
//!
//! - [`native::NativeRunner`] builds and runs on the host
//! - [`container::ContainerRunner`] builds and runs inside containers via a
//!   [`container::ContainerEngine`]
//!
//! Switching between them is always stop-and-recreate; a runner never changes
//! its [`RuntimeContext`].

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use uuid::Uuid;

use crate::context::RuntimeContext;
use crate::dependency::DependencyDescriptor;

pub mod container;
pub mod log_forwarder;
pub mod native;
pub mod process;
pub mod toolchain;

pub use container::{ContainerEngine, ContainerRunner, ContainerSpec, DockerCli};
pub use native::NativeRunner;
pub use toolchain::{GoToolchain, PrebuiltBinary, Toolchain};

/// Default time a process gets between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Uninitialized,
    Built,
    Running,
    Stopped,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerState::Uninitialized => "uninitialized",
            RunnerState::Built => "built",
            RunnerState::Running => "running",
            RunnerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to run `{command}`")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("service binary {} is missing", .0.display())]
    MissingBinary(PathBuf),
    #[error("cannot spawn before the service is built")]
    NotBuilt,
    #[error("failed to prepare {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A program invocation, independent of where it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn envs(mut self, envs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.envs.extend(envs);
        self
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a command run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs auxiliary commands (tests, tooling) where the service is built.
#[async_trait]
pub trait ExecEnvironment: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> Result<ExecOutput, RunnerError>;
}

/// What a spawn needs beyond the built artifact.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub envs: Vec<(String, String)>,
    /// Ports the service binds; published when running in a container.
    pub ports: Vec<u16>,
}

/// A running service process.
#[derive(Clone)]
pub struct ProcessInfo {
    pub service: String,
    pub instance_id: Uuid,
    pub pid: Option<u32>,
    pub container: Option<String>,
    pub started_at: Instant,
}

impl fmt::Debug for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInfo")
            .field("service", &self.service)
            .field("instance_id", &self.instance_id)
            .field("pid", &self.pid)
            .field("container", &self.container)
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Owned build + execution adapter for the service binary.
#[async_trait]
pub trait RunnerEnvironment: Send + Sync {
    fn context(&self) -> RuntimeContext;

    fn state(&self) -> RunnerState;

    /// Build the service binary. Re-running overwrites the artifact.
    async fn init(&mut self) -> Result<(), RunnerError>;

    /// `true` when sources changed since the last successful build.
    fn is_stale(&self) -> bool;

    /// Start a fresh process. Callers stop the previous one first.
    async fn spawn(&mut self, request: SpawnRequest) -> Result<ProcessInfo, RunnerError>;

    /// Stop the running process, if any. Idempotent.
    async fn stop(&mut self) -> Result<(), RunnerError>;

    /// Release everything the environment created (containers included).
    async fn shutdown(&mut self) -> Result<(), RunnerError>;

    fn exec(&self) -> &dyn ExecEnvironment;

    /// Toolchain test command for this environment, if the toolchain has one.
    fn test_command(&self) -> Option<CommandSpec>;

    fn process(&self) -> Option<&ProcessInfo>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildFlags {
    pub debug_symbols: bool,
    pub race_detection: bool,
}

/// Where sources and cache live for a build, as seen by the build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub source: PathBuf,
    pub cache: PathBuf,
}

impl BuildLayout {
    /// Mount points used inside build and run containers.
    #[must_use]
    pub fn container() -> Self {
        Self {
            source: PathBuf::from(container::SOURCE_MOUNT),
            cache: PathBuf::from(container::CACHE_MOUNT),
        }
    }
}

/// Everything a runner needs to know about the service it builds.
#[derive(Debug, Clone)]
pub struct RunnerSpec {
    /// `module/name`, used in logs.
    pub service: String,
    /// Binary and container name component.
    pub name: String,
    pub source: PathBuf,
    pub cache: PathBuf,
    pub flags: BuildFlags,
    pub stop_grace: Duration,
}

impl RunnerSpec {
    #[must_use]
    pub fn host_layout(&self) -> BuildLayout {
        BuildLayout {
            source: self.source.clone(),
            cache: self.cache.clone(),
        }
    }
}

/// Tracks the source fingerprint of the last successful build.
#[derive(Debug)]
pub(crate) struct BuildRecord {
    sources: Option<DependencyDescriptor>,
    built: Option<String>,
}

impl BuildRecord {
    pub(crate) fn new(source: &Path) -> Self {
        let sources = match DependencyDescriptor::go_service(source) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "source fingerprinting disabled");
                None
            }
        };
        Self {
            sources,
            built: None,
        }
    }

    fn current(&self) -> Option<String> {
        self.sources.as_ref().and_then(|d| d.fingerprint().ok())
    }

    pub(crate) fn record(&mut self) {
        self.built = self.current();
    }

    pub(crate) fn is_stale(&self) -> bool {
        match &self.built {
            Some(built) => self.current().as_ref() != Some(built),
            None => false,
        }
    }
}

/// Creates runner environments for a runtime context.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    /// Whether the host toolchain can build natively.
    fn native_available(&self) -> bool;

    async fn create(
        &self,
        context: RuntimeContext,
        spec: RunnerSpec,
    ) -> Result<Box<dyn RunnerEnvironment>, RunnerError>;
}

/// Factory wiring a toolchain and a container engine into the two runners.
pub struct DefaultRunnerFactory {
    toolchain: Arc<dyn Toolchain>,
    engine: Arc<dyn ContainerEngine>,
    image: String,
}

impl DefaultRunnerFactory {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        engine: Arc<dyn ContainerEngine>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            toolchain,
            engine,
            image: image.into(),
        }
    }
}

#[async_trait]
impl RunnerFactory for DefaultRunnerFactory {
    fn native_available(&self) -> bool {
        self.toolchain.is_available()
    }

    async fn create(
        &self,
        context: RuntimeContext,
        spec: RunnerSpec,
    ) -> Result<Box<dyn RunnerEnvironment>, RunnerError> {
        tracing::debug!(
            service = %spec.service,
            context = %context,
            toolchain = self.toolchain.name(),
            "creating runner environment"
        );
        match context {
            RuntimeContext::Native => Ok(Box::new(NativeRunner::new(
                spec,
                Arc::clone(&self.toolchain),
            ))),
            RuntimeContext::Container => Ok(Box::new(ContainerRunner::new(
                spec,
                Arc::clone(&self.toolchain),
                Arc::clone(&self.engine),
                self.image.clone(),
            ))),
        }
    }
}
