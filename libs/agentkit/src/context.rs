//! Runtime context resolution

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::network::NetworkAccess;

/// Where the service binary is built and executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeContext {
    Native,
    Container,
}

impl RuntimeContext {
    /// Pick the context for an Init call.
    ///
    /// An explicit container request always wins. Native (explicit or
    /// defaulted) requires the host toolchain; without it the service falls
    /// back to the container context.
    #[must_use]
    pub fn resolve(requested: Option<RuntimeContext>, toolchain_available: bool) -> Self {
        match requested {
            Some(RuntimeContext::Container) => RuntimeContext::Container,
            Some(RuntimeContext::Native) if !toolchain_available => {
                tracing::warn!("native runtime context requested but toolchain is missing, using container");
                RuntimeContext::Container
            }
            Some(RuntimeContext::Native) => RuntimeContext::Native,
            None if toolchain_available => RuntimeContext::Native,
            None => RuntimeContext::Container,
        }
    }

    /// Network access used to reach *other* services from this context.
    #[must_use]
    pub fn dependency_access(self) -> NetworkAccess {
        match self {
            RuntimeContext::Native => NetworkAccess::Native,
            RuntimeContext::Container => NetworkAccess::Container,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeContext::Native => "native",
            RuntimeContext::Container => "container",
        }
    }
}

impl fmt::Display for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
