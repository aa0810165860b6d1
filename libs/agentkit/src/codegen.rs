//! Code generation from `.proto` definitions

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

use crate::dependency::{DependencyDescriptor, PatternError};

/// File inside the cache directory holding the fingerprint of the last
/// successfully generated protos.
pub const PROTO_FINGERPRINT_FILE: &str = "proto.sha256";

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("failed to fingerprint protos under {}", path.display())]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("failed to run {tool}")]
    Tool {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("failed to update generation cache {}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Generated,
    /// Proto fingerprint matches the cached one.
    Unchanged,
    /// The service has no protos to generate from.
    Skipped,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self) -> Result<GenerationOutcome, GenerateError>;
}

/// Builds the generator bound to a service's location and cache at Load.
pub trait GeneratorFactory: Send + Sync {
    /// # Errors
    /// `GenerateError` when the generator cannot be set up.
    fn create(&self, location: &Path, cache: &Path)
    -> Result<Arc<dyn CodeGenerator>, GenerateError>;
}

/// Runs `buf generate` in the service location.
#[derive(Debug, Clone)]
pub struct BufGenerator {
    binary: PathBuf,
    location: PathBuf,
    cache: PathBuf,
    protos: DependencyDescriptor,
}

impl BufGenerator {
    /// # Errors
    /// `GenerateError::Pattern` if the proto descriptor cannot be built.
    pub fn new(
        binary: impl Into<PathBuf>,
        location: impl Into<PathBuf>,
        cache: impl Into<PathBuf>,
    ) -> Result<Self, GenerateError> {
        let location = location.into();
        let protos = DependencyDescriptor::protos(location.join("proto"))?;
        Ok(Self {
            binary: binary.into(),
            location,
            cache: cache.into(),
            protos,
        })
    }

    fn fingerprint_path(&self) -> PathBuf {
        self.cache.join(PROTO_FINGERPRINT_FILE)
    }

    fn fingerprint(&self) -> Result<String, GenerateError> {
        self.protos
            .fingerprint()
            .map_err(|source| GenerateError::Fingerprint {
                path: self.protos.root().to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl CodeGenerator for BufGenerator {
    async fn generate(&self) -> Result<GenerationOutcome, GenerateError> {
        if !self.protos.root().is_dir() {
            tracing::debug!(location = %self.location.display(), "no proto directory, skipping generation");
            return Ok(GenerationOutcome::Skipped);
        }

        let fingerprint = self.fingerprint()?;
        let cached = tokio::fs::read_to_string(self.fingerprint_path()).await.ok();
        if cached.as_deref().map(str::trim) == Some(fingerprint.as_str()) {
            tracing::debug!(%fingerprint, "protos unchanged, skipping generation");
            return Ok(GenerationOutcome::Unchanged);
        }

        let tool = self.binary.display().to_string();
        tracing::info!(location = %self.location.display(), "generating code with {tool}");
        let output = Command::new(&self.binary)
            .arg("generate")
            .current_dir(&self.location)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GenerateError::Tool {
                tool: tool.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(GenerateError::Failed {
                tool,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let path = self.fingerprint_path();
        tokio::fs::write(&path, &fingerprint)
            .await
            .map_err(|source| GenerateError::Cache { path, source })?;
        Ok(GenerationOutcome::Generated)
    }
}

/// Creates [`BufGenerator`]s using the given `buf` binary.
#[derive(Debug, Clone)]
pub struct BufGeneratorFactory {
    binary: PathBuf,
}

impl BufGeneratorFactory {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for BufGeneratorFactory {
    fn default() -> Self {
        Self::new("buf")
    }
}

impl GeneratorFactory for BufGeneratorFactory {
    fn create(
        &self,
        location: &Path,
        cache: &Path,
    ) -> Result<Arc<dyn CodeGenerator>, GenerateError> {
        Ok(Arc::new(BufGenerator::new(&self.binary, location, cache)?))
    }
}
