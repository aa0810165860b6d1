use std::path::PathBuf;

use crate::codegen::GenerateError;
use crate::identity::IdentityError;
use crate::lifecycle::Phase;
use crate::network::NetworkError;
use crate::ports::PortStillBound;
use crate::runner::RunnerError;
use crate::service::ConfigError;

/// Why a Load failed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("failed to create {}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set up code generation")]
    Generator(#[source] GenerateError),
}

/// Why a build failed: code generation or compilation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("code generation failed")]
    Generate(#[from] GenerateError),
    #[error("compilation failed")]
    Compile(#[from] RunnerError),
}

/// Errors returned by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{operation} is not allowed in phase {phase}: {reason}")]
    Precondition {
        operation: &'static str,
        phase: Phase,
        reason: &'static str,
    },
    #[error("cannot load {service}")]
    Load {
        service: String,
        phase: Phase,
        #[source]
        source: LoadError,
    },
    #[error("cannot resolve network for {service}")]
    Resolution {
        service: String,
        phase: Phase,
        #[source]
        source: NetworkError,
    },
    #[error("cannot build {service}")]
    Build {
        service: String,
        phase: Phase,
        #[source]
        source: BuildError,
    },
    #[error("{operation} of {service} failed")]
    Process {
        operation: &'static str,
        service: String,
        phase: Phase,
        #[source]
        source: RunnerError,
    },
    #[error("port {port} of {service} is still in use")]
    PortBusy {
        service: String,
        port: u16,
        phase: Phase,
        #[source]
        source: PortStillBound,
    },
    #[error("service hook failed for {service}")]
    Hook {
        service: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
}

impl RuntimeError {
    /// `false` for errors that repeat until the configuration is fixed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            RuntimeError::Load { .. }
                | RuntimeError::Resolution { .. }
                | RuntimeError::Precondition { .. }
        )
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            RuntimeError::Precondition { phase, .. }
            | RuntimeError::Load { phase, .. }
            | RuntimeError::Resolution { phase, .. }
            | RuntimeError::Build { phase, .. }
            | RuntimeError::Process { phase, .. }
            | RuntimeError::PortBusy { phase, .. }
            | RuntimeError::Hook { phase, .. } => *phase,
        }
    }
}
