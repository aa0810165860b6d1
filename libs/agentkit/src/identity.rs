//! Service identity

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors raised while validating a [`ServiceIdentity`].
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("service {field} must not be empty")]
    Empty { field: &'static str },
    #[error("service {field} '{value}' may only contain lowercase letters, digits and '-'")]
    InvalidName { field: &'static str, value: String },
    #[error("service location {} is not a directory", .0.display())]
    MissingLocation(PathBuf),
}

/// Immutable identifier of the service the agent runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub module: String,
    #[serde(default)]
    pub workspace: String,
    pub version: String,
    pub workspace_path: PathBuf,
    pub relative_to_workspace: PathBuf,
}

impl ServiceIdentity {
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let module = module.into();
        let relative_to_workspace = Path::new(&module).join(&name);
        Self {
            name,
            module,
            workspace: String::new(),
            version: version.into(),
            workspace_path: PathBuf::new(),
            relative_to_workspace,
        }
    }

    /// Place the service inside a workspace rooted at `path`.
    #[must_use]
    pub fn in_workspace(mut self, workspace: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self.workspace_path = path.into();
        self
    }

    /// Override the service directory relative to the workspace root.
    #[must_use]
    pub fn at(mut self, relative: impl Into<PathBuf>) -> Self {
        self.relative_to_workspace = relative.into();
        self
    }

    /// Absolute service directory.
    #[must_use]
    pub fn location(&self) -> PathBuf {
        self.workspace_path.join(&self.relative_to_workspace)
    }

    /// `module/name`, unique within a workspace.
    #[must_use]
    pub fn unique(&self) -> String {
        format!("{}/{}", self.module, self.name)
    }

    /// Check names, version and that the service directory exists.
    ///
    /// # Errors
    /// Returns `IdentityError` describing the first invalid field.
    pub fn validate(&self) -> Result<(), IdentityError> {
        validate_name("name", &self.name)?;
        validate_name("module", &self.module)?;
        if self.version.trim().is_empty() {
            return Err(IdentityError::Empty { field: "version" });
        }
        let location = self.location();
        if !location.is_dir() {
            return Err(IdentityError::MissingLocation(location));
        }
        Ok(())
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.unique(), self.version)
    }
}

fn validate_name(field: &'static str, value: &str) -> Result<(), IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::Empty { field });
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(IdentityError::InvalidName {
            field,
            value: value.to_owned(),
        });
    }
    Ok(())
}
