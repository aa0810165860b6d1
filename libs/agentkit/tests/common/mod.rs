#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

//! Fake collaborators shared by the runtime integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

use agentkit::codegen::{CodeGenerator, GenerateError, GenerationOutcome, GeneratorFactory};
use agentkit::endpoints::ServiceEndpoints;
use agentkit::env::Environment;
use agentkit::network::{NetworkManager, NetworkMapping, PortStrategy};
use agentkit::runner::{
    CommandSpec, ExecEnvironment, ExecOutput, ProcessInfo, RunnerEnvironment, RunnerError,
    RunnerFactory, RunnerSpec, RunnerState, SpawnRequest,
};
use agentkit::runtime::{InitRequest, LoadRequest, RuntimeOptions};
use agentkit::service::GoGrpcService;
use agentkit::{Collaborators, Runtime, RuntimeContext, ServiceIdentity};

/// Shared, ordered record of what the fakes were asked to do.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Lifecycle entries only, without the recorded environments.
    pub fn calls(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| !e.starts_with("envs:"))
            .collect()
    }

    /// Environment handed to the most recent spawn.
    pub fn last_envs(&self) -> BTreeMap<String, String> {
        let entries = self.entries();
        let raw = entries
            .iter()
            .rev()
            .find_map(|e| e.strip_prefix("envs:"))
            .expect("no spawn recorded");
        serde_json::from_str::<Vec<(String, String)>>(raw)
            .unwrap()
            .into_iter()
            .collect()
    }
}

struct FakeExec;

#[async_trait]
impl ExecEnvironment for FakeExec {
    async fn run(&self, command: &CommandSpec) -> Result<ExecOutput, RunnerError> {
        Ok(ExecOutput {
            success: true,
            code: Some(0),
            stdout: format!("ran {command}"),
            stderr: String::new(),
        })
    }
}

pub struct FakeRunner {
    context: RuntimeContext,
    spec: RunnerSpec,
    journal: Journal,
    fail_build: Arc<AtomicBool>,
    next_pid: Arc<AtomicU32>,
    state: RunnerState,
    process: Option<ProcessInfo>,
    exec: FakeExec,
}

#[async_trait]
impl RunnerEnvironment for FakeRunner {
    fn context(&self) -> RuntimeContext {
        self.context
    }

    fn state(&self) -> RunnerState {
        self.state
    }

    async fn init(&mut self) -> Result<(), RunnerError> {
        self.journal.push(format!("init:{}", self.context));
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(RunnerError::CommandFailed {
                command: "go build".to_owned(),
                status: "exit code 1".to_owned(),
                output: "main.go:3: syntax error".to_owned(),
            });
        }
        if self.process.is_none() {
            self.state = RunnerState::Built;
        }
        Ok(())
    }

    fn is_stale(&self) -> bool {
        false
    }

    async fn spawn(&mut self, request: SpawnRequest) -> Result<ProcessInfo, RunnerError> {
        if self.state == RunnerState::Uninitialized {
            return Err(RunnerError::NotBuilt);
        }
        assert!(self.process.is_none(), "spawn while a process is running");
        self.journal.push(format!("spawn:{}", self.context));
        let info = ProcessInfo {
            service: self.spec.service.clone(),
            instance_id: Uuid::now_v7(),
            pid: Some(self.next_pid.fetch_add(1, Ordering::SeqCst)),
            container: None,
            started_at: Instant::now(),
        };
        self.journal
            .push(format!("envs:{}", serde_json::to_string(&request.envs).unwrap()));
        self.process = Some(info.clone());
        self.state = RunnerState::Running;
        Ok(info)
    }

    async fn stop(&mut self) -> Result<(), RunnerError> {
        if self.process.take().is_some() {
            self.journal.push(format!("stop:{}", self.context));
            self.state = RunnerState::Stopped;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), RunnerError> {
        self.stop().await?;
        self.journal.push(format!("shutdown:{}", self.context));
        Ok(())
    }

    fn exec(&self) -> &dyn ExecEnvironment {
        &self.exec
    }

    fn test_command(&self) -> Option<CommandSpec> {
        Some(CommandSpec::new("go").args(["test", "./..."]))
    }

    fn process(&self) -> Option<&ProcessInfo> {
        self.process.as_ref()
    }
}

#[derive(Clone, Default)]
pub struct FakeRunnerFactory {
    pub journal: Journal,
    pub native: Arc<AtomicBool>,
    pub fail_build: Arc<AtomicBool>,
    next_pid: Arc<AtomicU32>,
}

impl FakeRunnerFactory {
    pub fn new(native: bool) -> Self {
        Self {
            native: Arc::new(AtomicBool::new(native)),
            next_pid: Arc::new(AtomicU32::new(1000)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RunnerFactory for FakeRunnerFactory {
    fn native_available(&self) -> bool {
        self.native.load(Ordering::SeqCst)
    }

    async fn create(
        &self,
        context: RuntimeContext,
        spec: RunnerSpec,
    ) -> Result<Box<dyn RunnerEnvironment>, RunnerError> {
        self.journal.push(format!("create:{context}"));
        Ok(Box::new(FakeRunner {
            context,
            spec,
            journal: self.journal.clone(),
            fail_build: Arc::clone(&self.fail_build),
            next_pid: Arc::clone(&self.next_pid),
            state: RunnerState::Uninitialized,
            process: None,
            exec: FakeExec,
        }))
    }
}

#[derive(Default)]
struct FakeGenerator {
    fail: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CodeGenerator for FakeGenerator {
    async fn generate(&self) -> Result<GenerationOutcome, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenerateError::Tool {
                tool: "buf".to_owned(),
                source: std::io::Error::other("api.proto:1:1: syntax error"),
            });
        }
        Ok(GenerationOutcome::Generated)
    }
}

#[derive(Clone, Default)]
pub struct FakeGeneratorFactory {
    pub fail: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
}

impl GeneratorFactory for FakeGeneratorFactory {
    fn create(
        &self,
        _location: &Path,
        _cache: &Path,
    ) -> Result<Arc<dyn CodeGenerator>, GenerateError> {
        Ok(Arc::new(FakeGenerator {
            fail: Arc::clone(&self.fail),
            calls: Arc::clone(&self.calls),
        }))
    }
}

/// A service directory in a temporary workspace plus a runtime wired to fakes.
pub struct Harness {
    pub workspace: TempDir,
    pub identity: ServiceIdentity,
    pub runners: FakeRunnerFactory,
    pub generators: FakeGeneratorFactory,
    pub runtime: Arc<Runtime>,
}

pub fn service_yaml(settings: &str) -> String {
    format!(
        "name: svc\nmodule: mod\nversion: 0.0.0\nendpoints:\n  - name: api\n    api: grpc\n  - name: gw\n    api: rest\nagent:\n  settings:\n{settings}"
    )
}

impl Harness {
    /// `settings` is the indented body of `agent.settings`.
    pub fn new(settings: &str) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let identity = ServiceIdentity::new("svc", "mod", "0.0.0").in_workspace("ws", workspace.path());
        std::fs::create_dir_all(identity.location()).unwrap();
        std::fs::write(
            identity.location().join("service.yaml"),
            service_yaml(settings),
        )
        .unwrap();

        let runners = FakeRunnerFactory::new(true);
        let generators = FakeGeneratorFactory::default();
        let runtime = Arc::new(Runtime::new(
            Collaborators {
                service: Arc::new(GoGrpcService::new()),
                runners: Arc::new(runners.clone()),
                generators: Arc::new(generators.clone()),
            },
            RuntimeOptions {
                port_release_attempts: 3,
                port_release_interval: Duration::from_millis(10),
                watch_debounce: Duration::from_millis(50),
                ..RuntimeOptions::default()
            },
        ));
        Self {
            workspace,
            identity,
            runners,
            generators,
            runtime,
        }
    }

    pub fn location(&self) -> PathBuf {
        self.identity.location()
    }

    pub fn load_request(&self) -> LoadRequest {
        LoadRequest {
            identity: self.identity.clone(),
            environment: Environment::default(),
        }
    }

    pub fn init_request(&self, endpoints: &ServiceEndpoints) -> InitRequest {
        InitRequest {
            network_mappings: mappings(endpoints),
            ..InitRequest::default()
        }
    }
}

pub fn mappings(endpoints: &ServiceEndpoints) -> Vec<NetworkMapping> {
    NetworkManager::new(PortStrategy::Temporary)
        .generate_mappings(endpoints.iter())
        .unwrap()
}
