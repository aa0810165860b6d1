//! Host process runner.

use async_trait::async_trait;
use std::sync::Arc;

use super::process::{self, ManagedProcess};
use super::toolchain::Toolchain;
use super::{
    BuildRecord, CommandSpec, ExecEnvironment, ExecOutput, ProcessInfo, RunnerEnvironment,
    RunnerError, RunnerSpec, RunnerState, SpawnRequest,
};
use crate::context::RuntimeContext;

/// Runs commands directly on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostExec;

#[async_trait]
impl ExecEnvironment for HostExec {
    async fn run(&self, command: &CommandSpec) -> Result<ExecOutput, RunnerError> {
        process::output(command).await
    }
}

pub struct NativeRunner {
    spec: RunnerSpec,
    toolchain: Arc<dyn Toolchain>,
    state: RunnerState,
    record: BuildRecord,
    process: Option<ManagedProcess>,
    exec: HostExec,
}

impl NativeRunner {
    pub fn new(spec: RunnerSpec, toolchain: Arc<dyn Toolchain>) -> Self {
        let record = BuildRecord::new(&spec.source);
        Self {
            spec,
            toolchain,
            state: RunnerState::Uninitialized,
            record,
            process: None,
            exec: HostExec,
        }
    }
}

#[async_trait]
impl RunnerEnvironment for NativeRunner {
    fn context(&self) -> RuntimeContext {
        RuntimeContext::Native
    }

    fn state(&self) -> RunnerState {
        self.state
    }

    async fn init(&mut self) -> Result<(), RunnerError> {
        let layout = self.spec.host_layout();
        if let Some(build) = self.toolchain.build_command(&self.spec, &layout) {
            let bin_dir = layout.cache.join("bin");
            tokio::fs::create_dir_all(&bin_dir)
                .await
                .map_err(|source| RunnerError::Io {
                    path: bin_dir,
                    source,
                })?;
            tracing::info!(service = %self.spec.service, command = %build, "building service");
            process::checked(&build).await?;
        }
        let binary = self.toolchain.binary(&self.spec, &layout);
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
            .build_command(&self.spec, &self.spec.host_layout())
            .is_some()
            && self.record.is_stale()
    }

    async fn spawn(&mut self, request: SpawnRequest) -> Result<ProcessInfo, RunnerError> {
        if self.state == RunnerState::Uninitialized {
            return Err(RunnerError::NotBuilt);
        }
        if let Some(previous) = self.process.take() {
            previous.stop(self.spec.stop_grace).await;
        }
        let layout = self.spec.host_layout();
        let binary = self.toolchain.binary(&self.spec, &layout);
        let mut command = CommandSpec::new(binary.to_string_lossy()).envs(request.envs);
        if layout.source.is_dir() {
            command = command.current_dir(&layout.source);
        }
        let process = ManagedProcess::spawn(&self.spec.service, &command, None)?;
        let info = process.info().clone();
        self.process = Some(process);
        self.state = RunnerState::Running;
        Ok(info)
    }

    async fn stop(&mut self) -> Result<(), RunnerError> {
        if let Some(process) = self.process.take() {
            process.stop(self.spec.stop_grace).await;
            self.state = RunnerState::Stopped;
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), RunnerError> {
        self.stop().await
    }

    fn exec(&self) -> &dyn ExecEnvironment {
        &self.exec
    }

    fn test_command(&self) -> Option<CommandSpec> {
        self.toolchain.test_command(&self.spec.host_layout())
    }

    fn process(&self) -> Option<&ProcessInfo> {
        self.process.as_ref().map(ManagedProcess::info)
    }
}
