//! The runtime lifecycle state machine
//!
//! One [`Runtime`] drives one service. Every operation takes the same async
//! mutex, so Load/Init/Start/Stop/Destroy/Test and the change handler never
//! interleave. State lives in [`RuntimeState`]: the current [`Phase`], the
//! pending [`DesiredAction`], the loaded session (present from Load on) and
//! the runner environment (present from Init on).

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::instrument;

use crate::codegen::{CodeGenerator, GenerationOutcome, GeneratorFactory};
use crate::configuration::{Configuration, filter_configurations};
use crate::context::RuntimeContext;
use crate::dependency::DependencyDescriptor;
use crate::endpoints::ServiceEndpoints;
use crate::env::{Environment, EnvironmentVariableManager};
use crate::error::{BuildError, LoadError, RuntimeError};
use crate::identity::ServiceIdentity;
use crate::lifecycle::{DesiredAction, Phase, Transition, classify_change};
use crate::network::{NetworkAccess, NetworkMapping, find_network_instance};
use crate::ports::{PortStillBound, wait_for_port_release};
use crate::runner::{
    BuildFlags, ExecOutput, ProcessInfo, RunnerEnvironment, RunnerError, RunnerFactory,
    RunnerSpec, RunnerState, SpawnRequest,
};
use crate::service::{Engage, Engagement, ServiceCapability};
use crate::settings::Settings;
use crate::watcher::{ChangeEvent, PauseGuard, WatchConfiguration, Watcher};

/// Service source directory, relative to the service location.
pub const SOURCE_DIR: &str = "code";
/// Build and generation cache, relative to the service location.
pub const CACHE_DIR: &str = ".cache";

/// Tunables of a [`Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeOptions {
    /// Time between SIGTERM and SIGKILL when stopping the service.
    #[serde(with = "crate::duration_serde")]
    pub stop_grace: Duration,
    pub port_release_attempts: u32,
    #[serde(with = "crate::duration_serde")]
    pub port_release_interval: Duration,
    #[serde(with = "crate::duration_serde")]
    pub watch_debounce: Duration,
    /// Capacity of the change event channel.
    pub change_buffer: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            stop_grace: crate::runner::DEFAULT_STOP_GRACE,
            port_release_attempts: 20,
            port_release_interval: Duration::from_millis(100),
            watch_debounce: crate::watcher::DEFAULT_DEBOUNCE,
            change_buffer: 64,
        }
    }
}

/// External collaborators the runtime delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn ServiceCapability>,
    pub runners: Arc<dyn RunnerFactory>,
    pub generators: Arc<dyn GeneratorFactory>,
}

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub identity: ServiceIdentity,
    pub environment: Environment,
}

#[derive(Debug, Clone, Default)]
pub struct InitRequest {
    pub network_mappings: Vec<NetworkMapping>,
    pub dependency_configurations: Vec<Configuration>,
    /// `None` lets the runtime probe the host.
    pub runtime_context: Option<RuntimeContext>,
}

#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub dependency_network_mappings: Vec<NetworkMapping>,
    pub fixture: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoadResponse {
    pub transition: Transition,
    pub endpoints: ServiceEndpoints,
}

#[derive(Debug, Clone)]
pub struct InitResponse {
    pub transition: Transition,
    pub runtime_context: RuntimeContext,
    pub generation: Option<GenerationOutcome>,
    /// Set when the build failed and the runtime waits for a change.
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StartResponse {
    pub transition: Transition,
    pub process: Option<ProcessInfo>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct StopResponse {
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy)]
pub struct DestroyResponse {
    pub transition: Transition,
}

#[derive(Debug, Clone)]
pub struct TestResponse {
    pub transition: Transition,
    /// `None` when the toolchain has no test command.
    pub output: Option<ExecOutput>,
}

impl TestResponse {
    #[must_use]
    pub fn success(&self) -> bool {
        self.output.as_ref().is_none_or(|o| o.success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InformationResponse {
    pub transition: Transition,
    pub identity: Option<ServiceIdentity>,
    pub settings: Option<Settings>,
    pub runtime_context: Option<RuntimeContext>,
    pub endpoints: Option<ServiceEndpoints>,
    pub runner: Option<RunnerState>,
    pub pid: Option<u32>,
}

/// Everything read at Load, valid until the next Load or Destroy.
struct Session {
    identity: ServiceIdentity,
    settings: Settings,
    endpoints: ServiceEndpoints,
    source: PathBuf,
    cache: PathBuf,
    generator: Arc<dyn CodeGenerator>,
    generation_failed: bool,
    watcher: Option<Watcher>,
    /// Environment and identity variables, fixed at Load.
    base_env: EnvironmentVariableManager,
    /// `base_env` plus what the last Init resolved.
    env: EnvironmentVariableManager,
}

impl Session {
    /// Keeps the watcher quiet across a regenerate-then-rebuild window.
    fn pause_watcher(&self) -> Option<PauseGuard> {
        self.watcher.as_ref().map(Watcher::pause_guard)
    }

    async fn generate(&mut self) -> Result<GenerationOutcome, BuildError> {
        let result = self.generator.generate().await;
        self.generation_failed = result.is_err();
        Ok(result?)
    }
}

struct RuntimeState {
    phase: Phase,
    desired: DesiredAction,
    session: Option<Session>,
    context: Option<RuntimeContext>,
    runner: Option<Box<dyn RunnerEnvironment>>,
    /// Ports of the service's own endpoints, waited on after Stop.
    owned_ports: Vec<u16>,
}

impl RuntimeState {
    fn transition(&self) -> Transition {
        Transition::new(self.phase, self.desired)
    }

    fn service_name(&self) -> String {
        self.session
            .as_ref()
            .map_or_else(String::new, |s| s.identity.unique())
    }
}

pub struct Runtime {
    collaborators: Collaborators,
    options: RuntimeOptions,
    state: Mutex<RuntimeState>,
    changes_tx: mpsc::Sender<ChangeEvent>,
    changes_rx: parking_lot::Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
}

fn precondition(operation: &'static str, phase: Phase, reason: &'static str) -> RuntimeError {
    RuntimeError::Precondition {
        operation,
        phase,
        reason,
    }
}

fn port_busy(service: String, phase: Phase, source: PortStillBound) -> RuntimeError {
    RuntimeError::PortBusy {
        service,
        port: source.port,
        phase,
        source,
    }
}

fn process_error(
    operation: &'static str,
    service: String,
    phase: Phase,
    source: RunnerError,
) -> RuntimeError {
    RuntimeError::Process {
        operation,
        service,
        phase,
        source,
    }
}

/// `error: cause: cause` for messages carried in responses.
fn describe(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn create_dir(path: &Path) -> Result<(), LoadError> {
    std::fs::create_dir_all(path).map_err(|source| LoadError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove everything inside `dir`, keeping `dir` itself.
async fn empty_dir(dir: &Path) -> std::io::Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

impl Runtime {
    #[must_use]
    pub fn new(collaborators: Collaborators, options: RuntimeOptions) -> Self {
        let (changes_tx, changes_rx) = mpsc::channel(options.change_buffer.max(1));
        Self {
            collaborators,
            options,
            state: Mutex::new(RuntimeState {
                phase: Phase::Unloaded,
                desired: DesiredAction::None,
                session: None,
                context: None,
                runner: None,
                owned_ports: Vec::new(),
            }),
            changes_tx,
            changes_rx: parking_lot::Mutex::new(Some(changes_rx)),
        }
    }

    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Receiver of watcher change events. Only the first call gets it.
    pub fn take_change_receiver(&self) -> Option<mpsc::Receiver<ChangeEvent>> {
        self.changes_rx.lock().take()
    }

    /// Sender feeding the change channel, for hosts that watch files themselves.
    #[must_use]
    pub fn change_sender(&self) -> mpsc::Sender<ChangeEvent> {
        self.changes_tx.clone()
    }

    pub fn communicate(&self, engage: Engage) -> Engagement {
        self.collaborators.service.communicate(engage)
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Pending desired action, cleared.
    pub async fn take_desired(&self) -> DesiredAction {
        std::mem::take(&mut self.state.lock().await.desired)
    }

    #[instrument(skip_all, fields(service = %req.identity.unique()))]
    pub async fn load(&self, req: LoadRequest) -> Result<LoadResponse, RuntimeError> {
        let mut state = self.state.lock().await;
        let phase = state.phase;
        if phase == Phase::Destroyed {
            return Err(precondition("load", phase, "runtime was destroyed"));
        }
        let service = req.identity.unique();
        let load_error = |source: LoadError| RuntimeError::Load {
            service: service.clone(),
            phase,
            source,
        };

        req.identity
            .validate()
            .map_err(|e| load_error(e.into()))?;

        let configuration = self
            .collaborators
            .service
            .load_configuration(&req.identity)
            .await
            .map_err(|e| load_error(e.into()))?;
        let endpoints = self
            .collaborators
            .service
            .load_endpoints(&req.identity, &configuration)
            .map_err(|e| load_error(e.into()))?;
        let settings = configuration.settings().clone();

        let previous = state.session.take();
        if let Some(mut runner) = state.runner.take() {
            if let Err(e) = runner.stop().await {
                tracing::warn!(error = %e, "failed to stop previous runner");
            }
            let same = previous
                .as_ref()
                .is_some_and(|p| p.identity == req.identity && p.settings == settings);
            if same {
                state.runner = Some(runner);
            } else {
                if let Err(e) = runner.shutdown().await {
                    tracing::warn!(error = %e, "failed to shut down previous runner");
                }
                state.context = None;
            }
        }
        if let Some(watcher) = previous.and_then(|p| p.watcher) {
            watcher.stop().await;
        }

        let location = req.identity.location();
        let source = location.join(SOURCE_DIR);
        let cache = location.join(CACHE_DIR);
        create_dir(&source).map_err(&load_error)?;
        create_dir(&cache).map_err(&load_error)?;

        let generator = self
            .collaborators
            .generators
            .create(&location, &cache)
            .map_err(|e| load_error(LoadError::Generator(e)))?;

        let mut env = EnvironmentVariableManager::new();
        env.set_environment(&req.environment);
        env.set_identity(&req.identity);

        let watcher = if settings.hot_reload {
            self.start_watcher(&location)
        } else {
            None
        };

        tracing::info!(
            environment = %req.environment,
            hot_reload = settings.hot_reload,
            rest = endpoints.rest.is_some(),
            "service loaded"
        );

        state.session = Some(Session {
            identity: req.identity,
            settings,
            endpoints: endpoints.clone(),
            source,
            cache,
            generator,
            generation_failed: false,
            watcher,
            env: env.clone(),
            base_env: env,
        });
        state.phase = Phase::Loaded;
        state.desired = DesiredAction::None;
        state.owned_ports.clear();

        Ok(LoadResponse {
            transition: state.transition(),
            endpoints,
        })
    }

    fn start_watcher(&self, location: &Path) -> Option<Watcher> {
        let descriptor = match DependencyDescriptor::go_service(location) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "cannot describe sources, hot reload disabled");
                return None;
            }
        };
        let configuration =
            WatchConfiguration::new(descriptor).with_debounce(self.options.watch_debounce);
        match Watcher::start(configuration, self.changes_tx.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(error = %describe(&e), "file watcher setup failed, hot reload disabled");
                None
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn init(&self, req: InitRequest) -> Result<InitResponse, RuntimeError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let phase = state.phase;
        let Some(session) = state.session.as_mut() else {
            return Err(precondition("init", phase, "service is not loaded"));
        };
        if phase == Phase::Destroyed {
            return Err(precondition("init", phase, "runtime was destroyed"));
        }
        let service = session.identity.unique();

        let context = RuntimeContext::resolve(
            req.runtime_context,
            self.collaborators.runners.native_available(),
        );
        tracing::info!(%context, "initializing service");

        let _paused = session.pause_watcher();
        let mut failure = match session.generate().await {
            Ok(outcome) => {
                tracing::debug!(?outcome, "code generation done");
                Ok(outcome)
            }
            Err(e) if session.settings.hot_reload => Err(e),
            Err(source) => {
                return Err(RuntimeError::Build {
                    service,
                    phase,
                    source,
                });
            }
        };

        let mut env = session.base_env.clone();
        env.set_runtime_context(context);
        let configurations = filter_configurations(&req.dependency_configurations, context);
        env.add_configurations(&configurations);

        let mut ports = Vec::new();
        for endpoint in session.endpoints.iter() {
            let instance =
                find_network_instance(&req.network_mappings, &endpoint.key, NetworkAccess::Native)
                    .map_err(|source| RuntimeError::Resolution {
                        service: service.clone(),
                        phase,
                        source,
                    })?;
            tracing::info!(endpoint = %endpoint.key, address = %instance.address, "endpoint bound");
            env.add_endpoint(&endpoint.key, instance);
            ports.push(instance.port);
        }
        session.env = env;
        state.owned_ports = ports;

        let spec = RunnerSpec {
            service: service.clone(),
            name: session.identity.name.clone(),
            source: session.source.clone(),
            cache: session.cache.clone(),
            flags: BuildFlags {
                debug_symbols: session.settings.debug_symbols,
                race_detection: session.settings.race_detection,
            },
            stop_grace: self.options.stop_grace,
        };
        let mut runner = match state.runner.take() {
            Some(mut existing) if existing.context() == context => {
                existing
                    .stop()
                    .await
                    .map_err(|e| process_error("init", service.clone(), phase, e))?;
                existing
            }
            previous => {
                if let Some(mut old) = previous {
                    tracing::info!(from = %old.context(), to = %context, "replacing runner environment");
                    if let Err(e) = old.stop().await {
                        tracing::warn!(error = %e, "failed to stop previous runner");
                    }
                    if let Err(e) = old.shutdown().await {
                        tracing::warn!(error = %e, "failed to tear down previous runner");
                    }
                }
                self.collaborators
                    .runners
                    .create(context, spec)
                    .await
                    .map_err(|e| process_error("init", service.clone(), phase, e))?
            }
        };
        state.context = Some(context);

        let generation = failure.as_ref().ok().copied();
        if failure.is_ok() {
            failure = runner
                .init()
                .await
                .map(|()| generation.unwrap_or(GenerationOutcome::Skipped))
                .map_err(BuildError::from);
        }
        state.runner = Some(runner);

        match failure {
            Ok(_) => {
                state.phase = Phase::Initialized;
                tracing::info!("service initialized");
                Ok(InitResponse {
                    transition: state.transition(),
                    runtime_context: context,
                    generation,
                    message: None,
                })
            }
            Err(e) if session.settings.hot_reload => {
                let message = describe(&e);
                tracing::warn!(error = %message, "build failed, waiting for a change");
                state.phase = Phase::AwaitingChange;
                Ok(InitResponse {
                    transition: state.transition(),
                    runtime_context: context,
                    generation,
                    message: Some(message),
                })
            }
            Err(source) => Err(RuntimeError::Build {
                service,
                phase,
                source,
            }),
        }
    }

    #[instrument(skip_all)]
    pub async fn start(&self, req: StartRequest) -> Result<StartResponse, RuntimeError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let phase = state.phase;
        match phase {
            Phase::Initialized | Phase::Running | Phase::Stopped | Phase::AwaitingChange => {}
            Phase::Destroyed => {
                return Err(precondition("start", phase, "runtime was destroyed"));
            }
            Phase::Unloaded | Phase::Loaded => {
                return Err(precondition("start", phase, "service is not initialized"));
            }
        }
        let (Some(session), Some(runner), Some(context)) =
            (state.session.as_mut(), state.runner.as_mut(), state.context)
        else {
            return Err(precondition("start", phase, "no runner, call init first"));
        };
        let service = session.identity.unique();

        if runner.state() == RunnerState::Running {
            tracing::debug!("stopping previous process before restart");
            runner
                .stop()
                .await
                .map_err(|e| process_error("start", service.clone(), phase, e))?;
            state.phase = Phase::Stopped;
        }
        self.wait_ports(&state.owned_ports)
            .await
            .map_err(|e| port_busy(service.clone(), phase, e))?;

        let needs_build = phase == Phase::AwaitingChange
            || runner.state() == RunnerState::Uninitialized
            || runner.is_stale();
        if needs_build {
            tracing::info!("rebuilding service");
            let _paused = session.pause_watcher();
            let built = if session.generation_failed {
                session.generate().await.map(|_| ())
            } else {
                Ok(())
            };
            let built = match built {
                Ok(()) => runner.init().await.map_err(BuildError::from),
                Err(e) => Err(e),
            };
            match built {
                Ok(()) => {}
                Err(e) if session.settings.hot_reload => {
                    let message = describe(&e);
                    tracing::warn!(error = %message, "rebuild failed, waiting for a change");
                    state.phase = Phase::AwaitingChange;
                    return Ok(StartResponse {
                        transition: state.transition(),
                        process: None,
                        message: Some(message),
                    });
                }
                Err(source) => {
                    return Err(RuntimeError::Build {
                        service,
                        phase,
                        source,
                    });
                }
            }
        }

        let mut env = session.env.clone();
        let access = context.dependency_access();
        for mapping in &req.dependency_network_mappings {
            let instance = find_network_instance(
                &req.dependency_network_mappings,
                &mapping.endpoint,
                access,
            )
            .map_err(|source| RuntimeError::Resolution {
                service: service.clone(),
                phase,
                source,
            })?;
            env.add_endpoint(&mapping.endpoint, instance);
        }
        if let Some(fixture) = &req.fixture {
            env.set_fixture(fixture);
        }

        let process = runner
            .spawn(SpawnRequest {
                envs: env.to_vec(),
                ports: state.owned_ports.clone(),
            })
            .await
            .map_err(|e| process_error("start", service, phase, e))?;

        state.phase = Phase::Running;
        tracing::info!(pid = ?process.pid, instance_id = %process.instance_id, "service started");
        Ok(StartResponse {
            transition: state.transition(),
            process: Some(process),
            message: None,
        })
    }

    async fn wait_ports(&self, ports: &[u16]) -> Result<(), PortStillBound> {
        for &port in ports {
            wait_for_port_release(
                port,
                self.options.port_release_attempts,
                self.options.port_release_interval,
            )
            .await?;
        }
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn stop(&self) -> Result<StopResponse, RuntimeError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let phase = state.phase;
        if matches!(phase, Phase::Unloaded | Phase::Destroyed) {
            return Ok(StopResponse {
                transition: state.transition(),
            });
        }
        let service = state.service_name();

        let mut first_error = None;
        if let Some(runner) = state.runner.as_mut() {
            let was_running = runner.state() == RunnerState::Running;
            if let Err(e) = runner.stop().await {
                first_error = Some(process_error("stop", service.clone(), phase, e));
            }
            if was_running
                && let Err(e) = self.wait_ports(&state.owned_ports).await
            {
                tracing::warn!(error = %e, "service port not released");
                first_error.get_or_insert(port_busy(service.clone(), phase, e));
            }
        }

        if let Err(source) = self.collaborators.service.stop().await {
            let hook = RuntimeError::Hook {
                service,
                phase,
                source,
            };
            first_error.get_or_insert(hook);
        }

        if phase == Phase::Running {
            state.phase = Phase::Stopped;
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("service stopped");
                Ok(StopResponse {
                    transition: state.transition(),
                })
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn destroy(&self) -> Result<DestroyResponse, RuntimeError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let phase = state.phase;
        if phase == Phase::Destroyed {
            return Ok(DestroyResponse {
                transition: state.transition(),
            });
        }
        let service = state.service_name();

        if let Some(watcher) = state.session.as_mut().and_then(|s| s.watcher.take()) {
            watcher.stop().await;
        }

        let mut first_error = None;
        if let Some(mut runner) = state.runner.take() {
            if let Err(e) = runner.stop().await {
                first_error = Some(process_error("destroy", service.clone(), phase, e));
            }
            if runner.context() == RuntimeContext::Container
                && let Err(e) = runner.shutdown().await
            {
                first_error.get_or_insert(process_error("destroy", service.clone(), phase, e));
            }
        }

        if let Some(cache) = state.session.as_ref().map(|s| s.cache.clone())
            && let Err(source) = empty_dir(&cache).await
        {
            first_error.get_or_insert(process_error(
                "destroy",
                service,
                phase,
                RunnerError::Io {
                    path: cache,
                    source,
                },
            ));
        }

        state.phase = Phase::Destroyed;
        state.desired = DesiredAction::None;
        state.context = None;
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("service destroyed");
                Ok(DestroyResponse {
                    transition: state.transition(),
                })
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn test(&self) -> Result<TestResponse, RuntimeError> {
        let state = self.state.lock().await;
        let phase = state.phase;
        let Some(runner) = state.runner.as_ref() else {
            return Err(precondition("test", phase, "no runner, call init first"));
        };
        let Some(command) = runner.test_command() else {
            tracing::info!("toolchain has no test command");
            return Ok(TestResponse {
                transition: state.transition(),
                output: None,
            });
        };
        let output = runner
            .exec()
            .run(&command)
            .await
            .map_err(|e| process_error("test", state.service_name(), phase, e))?;
        tracing::info!(success = output.success, "tests finished");
        Ok(TestResponse {
            transition: state.transition(),
            output: Some(output),
        })
    }

    pub async fn information(&self) -> InformationResponse {
        let state = self.state.lock().await;
        let session = state.session.as_ref();
        InformationResponse {
            transition: state.transition(),
            identity: session.map(|s| s.identity.clone()),
            settings: session.map(|s| s.settings.clone()),
            runtime_context: state.context,
            endpoints: session.map(|s| s.endpoints.clone()),
            runner: state.runner.as_ref().map(|r| r.state()),
            pid: state
                .runner
                .as_ref()
                .and_then(|r| r.process())
                .and_then(|p| p.pid),
        }
    }

    /// Record the action a source change calls for. Nothing is stopped or
    /// rebuilt here; the returned transition tells the scheduler what to do.
    pub async fn handle_change(&self, change: &ChangeEvent) -> Transition {
        let mut state = self.state.lock().await;
        if matches!(state.phase, Phase::Unloaded | Phase::Destroyed) {
            tracing::debug!(path = %change.path.display(), phase = %state.phase, "change ignored");
            return Transition::settled(state.phase);
        }
        let action = classify_change(&change.path);
        state.desired = state.desired.merge(action);
        tracing::info!(
            path = %change.path.display(),
            kind = ?change.kind,
            ?action,
            pending = ?state.desired,
            "source change"
        );
        state.transition()
    }
}
