//! Network mappings and instance resolution
//!
//! Every endpoint is reachable through one instance per [`NetworkAccess`]:
//! from the host (`Native`), from inside a container (`Container`) and from
//! outside the machine (`Public`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::TcpListener;

use crate::endpoints::{Api, Endpoint, EndpointKey};

/// Hostname a container uses to reach services bound on the host.
pub const CONTAINER_HOST: &str = "host.docker.internal";
pub const LOCALHOST: &str = "localhost";

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("no network mapping for endpoint {endpoint}")]
    MappingNotFound { endpoint: EndpointKey },
    #[error("{count} network mappings for endpoint {endpoint}, expected exactly one")]
    AmbiguousMapping { endpoint: EndpointKey, count: usize },
    #[error("no {access} network instance for endpoint {endpoint}")]
    InstanceNotFound {
        endpoint: EndpointKey,
        access: NetworkAccess,
    },
    #[error("{count} {access} network instances for endpoint {endpoint}, expected exactly one")]
    AmbiguousInstance {
        endpoint: EndpointKey,
        access: NetworkAccess,
        count: usize,
    },
    #[error("failed to allocate a port for endpoint {endpoint}")]
    Allocation {
        endpoint: EndpointKey,
        #[source]
        source: std::io::Error,
    },
    #[error("port range exhausted at base {base} for endpoint {endpoint}")]
    PortRangeExhausted { endpoint: EndpointKey, base: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkAccess {
    Native,
    Container,
    Public,
}

impl fmt::Display for NetworkAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkAccess::Native => f.write_str("native"),
            NetworkAccess::Container => f.write_str("container"),
            NetworkAccess::Public => f.write_str("public"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInstance {
    pub access: NetworkAccess,
    pub hostname: String,
    pub port: u16,
    pub address: String,
}

impl NetworkInstance {
    /// Build an instance with the address format of `api`.
    pub fn new(access: NetworkAccess, api: Api, hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        let address = match api {
            Api::Grpc => format!("{hostname}:{port}"),
            Api::Rest => format!("http://{hostname}:{port}"),
        };
        Self {
            access,
            hostname,
            port,
            address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMapping {
    pub endpoint: EndpointKey,
    #[serde(default)]
    pub instances: Vec<NetworkInstance>,
}

/// Find the single mapping for `endpoint`.
///
/// # Errors
/// `NetworkError` when zero or several mappings match.
pub fn find_network_mapping<'a>(
    mappings: &'a [NetworkMapping],
    endpoint: &EndpointKey,
) -> Result<&'a NetworkMapping, NetworkError> {
    let mut found = mappings.iter().filter(|m| &m.endpoint == endpoint);
    let first = found.next().ok_or_else(|| NetworkError::MappingNotFound {
        endpoint: endpoint.clone(),
    })?;
    let rest = found.count();
    if rest > 0 {
        return Err(NetworkError::AmbiguousMapping {
            endpoint: endpoint.clone(),
            count: rest + 1,
        });
    }
    Ok(first)
}

/// Find the single instance of `endpoint` reachable through `access`.
///
/// # Errors
/// `NetworkError` naming the endpoint and access when resolution is not unique.
pub fn find_network_instance<'a>(
    mappings: &'a [NetworkMapping],
    endpoint: &EndpointKey,
    access: NetworkAccess,
) -> Result<&'a NetworkInstance, NetworkError> {
    let mapping = find_network_mapping(mappings, endpoint)?;
    let matching: Vec<&NetworkInstance> = mapping
        .instances
        .iter()
        .filter(|i| i.access == access)
        .collect();
    match matching.as_slice() {
        [single] => Ok(single),
        [] => Err(NetworkError::InstanceNotFound {
            endpoint: endpoint.clone(),
            access,
        }),
        many => Err(NetworkError::AmbiguousInstance {
            endpoint: endpoint.clone(),
            access,
            count: many.len(),
        }),
    }
}

/// How [`NetworkManager`] picks ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PortStrategy {
    /// Ask the OS for a free port per endpoint.
    Temporary,
    /// Hand out `base`, `base + 1`, ... in endpoint order.
    Sequential { base: u16 },
}

/// Produces network mappings for endpoints when no platform provides them.
#[derive(Debug, Clone)]
pub struct NetworkManager {
    strategy: PortStrategy,
}

impl NetworkManager {
    #[must_use]
    pub fn new(strategy: PortStrategy) -> Self {
        Self { strategy }
    }

    /// One mapping per endpoint, with native, container and public instances
    /// sharing the allocated port.
    ///
    /// # Errors
    /// `NetworkError` when a port cannot be allocated.
    pub fn generate_mappings<'a>(
        &self,
        endpoints: impl IntoIterator<Item = &'a Endpoint>,
    ) -> Result<Vec<NetworkMapping>, NetworkError> {
        let mut mappings = Vec::new();
        for (offset, endpoint) in endpoints.into_iter().enumerate() {
            let port = self.allocate(&endpoint.key, offset)?;
            let api = endpoint.api();
            mappings.push(NetworkMapping {
                endpoint: endpoint.key.clone(),
                instances: vec![
                    NetworkInstance::new(NetworkAccess::Native, api, LOCALHOST, port),
                    NetworkInstance::new(NetworkAccess::Container, api, CONTAINER_HOST, port),
                    NetworkInstance::new(NetworkAccess::Public, api, LOCALHOST, port),
                ],
            });
        }
        tracing::debug!(count = mappings.len(), strategy = ?self.strategy, "generated network mappings");
        Ok(mappings)
    }

    fn allocate(&self, endpoint: &EndpointKey, offset: usize) -> Result<u16, NetworkError> {
        match self.strategy {
            PortStrategy::Temporary => free_port().map_err(|source| NetworkError::Allocation {
                endpoint: endpoint.clone(),
                source,
            }),
            PortStrategy::Sequential { base } => u16::try_from(offset)
                .ok()
                .and_then(|o| base.checked_add(o))
                .ok_or_else(|| NetworkError::PortRangeExhausted {
                    endpoint: endpoint.clone(),
                    base,
                }),
        }
    }
}

/// Bind to port 0 and return the port the OS chose.
///
/// # Errors
/// Propagates the bind error.
pub fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
