//! Toolchains that produce the service binary.

use std::path::PathBuf;

use super::{BuildLayout, CommandSpec, RunnerSpec};

pub trait Toolchain: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the toolchain can be used on this host.
    fn is_available(&self) -> bool;

    /// Command producing [`Toolchain::binary`], or `None` when nothing is built.
    fn build_command(&self, spec: &RunnerSpec, layout: &BuildLayout) -> Option<CommandSpec>;

    fn binary(&self, spec: &RunnerSpec, layout: &BuildLayout) -> PathBuf;

    fn test_command(&self, layout: &BuildLayout) -> Option<CommandSpec>;
}

/// The `go` command line.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    go: PathBuf,
}

impl GoToolchain {
    pub fn new(go: impl Into<PathBuf>) -> Self {
        Self { go: go.into() }
    }
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self::new("go")
    }
}

impl Toolchain for GoToolchain {
    fn name(&self) -> &str {
        "go"
    }

    fn is_available(&self) -> bool {
        match which::which(&self.go) {
            Ok(path) => {
                tracing::trace!(path = %path.display(), "found go toolchain");
                true
            }
            Err(_) => false,
        }
    }

    fn build_command(&self, spec: &RunnerSpec, layout: &BuildLayout) -> Option<CommandSpec> {
        let mut cmd = CommandSpec::new(self.go.to_string_lossy()).arg("build");
        if spec.flags.race_detection {
            cmd = cmd.arg("-race");
        }
        if spec.flags.debug_symbols {
            cmd = cmd.args(["-gcflags", "all=-N -l"]);
        }
        let output = self.binary(spec, layout);
        Some(
            cmd.arg("-o")
                .arg(output.to_string_lossy())
                .arg(".")
                .current_dir(&layout.source),
        )
    }

    fn binary(&self, spec: &RunnerSpec, layout: &BuildLayout) -> PathBuf {
        layout.cache.join("bin").join(&spec.name)
    }

    fn test_command(&self, layout: &BuildLayout) -> Option<CommandSpec> {
        Some(
            CommandSpec::new(self.go.to_string_lossy())
                .args(["test", "./..."])
                .current_dir(&layout.source),
        )
    }
}

/// An already built binary; nothing to compile or test.
#[derive(Debug, Clone)]
pub struct PrebuiltBinary {
    path: PathBuf,
}

impl PrebuiltBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Toolchain for PrebuiltBinary {
    fn name(&self) -> &str {
        "prebuilt"
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }

    fn build_command(&self, _spec: &RunnerSpec, _layout: &BuildLayout) -> Option<CommandSpec> {
        None
    }

    fn binary(&self, _spec: &RunnerSpec, _layout: &BuildLayout) -> PathBuf {
        self.path.clone()
    }

    fn test_command(&self, _layout: &BuildLayout) -> Option<CommandSpec> {
        None
    }
}
