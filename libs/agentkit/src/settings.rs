//! Agent settings persisted in the `agent.settings` section of `service.yaml`.

use serde::{Deserialize, Serialize};

/// Switches read at Load and consulted by Init/Start.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Rebuild/restart on source changes.
    #[serde(alias = "watch")]
    pub hot_reload: bool,
    /// Build without optimizations so a debugger can attach.
    #[serde(alias = "with-debug-symbols")]
    pub debug_symbols: bool,
    /// Build with the Go race detector.
    #[serde(alias = "with-race-condition-detection-run")]
    pub race_detection: bool,
    /// Serve the REST gateway next to gRPC.
    #[serde(alias = "create-rest-endpoint", alias = "with-rest-endpoint")]
    pub rest_endpoint: bool,
}
