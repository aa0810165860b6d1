//! Endpoint declarations and discovery
//!
//! A service exposes at most one gRPC endpoint (mandatory) and one REST
//! gateway endpoint. Both are declared in `service.yaml`; their sources live
//! at fixed paths under the service location.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::identity::ServiceIdentity;

/// Relative path of the gRPC definition inside a service.
pub const PROTO_SOURCE: &str = "proto/api.proto";
/// Relative path of the generated OpenAPI document inside a service.
pub const OPENAPI_SOURCE: &str = "openapi/api.swagger.json";

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("service {service} declares more than one {api} endpoint")]
    Duplicate { service: String, api: Api },
    #[error("service {service} declares no {api} endpoint")]
    Missing { service: String, api: Api },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Api {
    Grpc,
    Rest,
}

impl Api {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Api::Grpc => "grpc",
            Api::Rest => "rest",
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    #[default]
    Module,
    Public,
}

/// One entry of the `endpoints` list in `service.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDeclaration {
    pub name: String,
    pub api: Api,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Reference to an endpoint owned by some service, used to match network
/// mappings and to derive environment variable names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub module: String,
    pub service: String,
    pub name: String,
    pub api: Api,
}

impl EndpointKey {
    pub fn new(
        module: impl Into<String>,
        service: impl Into<String>,
        name: impl Into<String>,
        api: Api,
    ) -> Self {
        Self {
            module: module.into(),
            service: service.into(),
            name: name.into(),
            api,
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}:{}", self.module, self.service, self.name, self.api)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub key: EndpointKey,
    pub visibility: Visibility,
    pub source: PathBuf,
}

impl Endpoint {
    #[must_use]
    pub fn api(&self) -> Api {
        self.key.api
    }
}

/// Endpoints discovered for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoints {
    pub grpc: Endpoint,
    pub rest: Option<Endpoint>,
}

impl ServiceEndpoints {
    /// Turn the declarations into endpoints of `identity`.
    ///
    /// gRPC is mandatory. REST must be declared when `with_rest` is set and
    /// is ignored otherwise.
    ///
    /// # Errors
    /// `EndpointError` on duplicate or missing declarations.
    pub fn discover(
        identity: &ServiceIdentity,
        declarations: &[EndpointDeclaration],
        with_rest: bool,
    ) -> Result<Self, EndpointError> {
        let location = identity.location();
        let grpc = single(identity, declarations, Api::Grpc)?.ok_or_else(|| {
            EndpointError::Missing {
                service: identity.unique(),
                api: Api::Grpc,
            }
        })?;
        let rest = single(identity, declarations, Api::Rest)?;
        let rest = match (with_rest, rest) {
            (true, None) => {
                return Err(EndpointError::Missing {
                    service: identity.unique(),
                    api: Api::Rest,
                });
            }
            (true, Some(decl)) => Some(endpoint(identity, &location, decl)),
            (false, _) => None,
        };
        Ok(Self {
            grpc: endpoint(identity, &location, grpc),
            rest,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        std::iter::once(&self.grpc).chain(self.rest.as_ref())
    }
}

fn single<'a>(
    identity: &ServiceIdentity,
    declarations: &'a [EndpointDeclaration],
    api: Api,
) -> Result<Option<&'a EndpointDeclaration>, EndpointError> {
    let mut matching = declarations.iter().filter(|d| d.api == api);
    let first = matching.next();
    if matching.next().is_some() {
        return Err(EndpointError::Duplicate {
            service: identity.unique(),
            api,
        });
    }
    Ok(first)
}

fn endpoint(identity: &ServiceIdentity, location: &Path, decl: &EndpointDeclaration) -> Endpoint {
    let source = match decl.api {
        Api::Grpc => location.join(PROTO_SOURCE),
        Api::Rest => location.join(OPENAPI_SOURCE),
    };
    Endpoint {
        key: EndpointKey::new(&identity.module, &identity.name, &decl.name, decl.api),
        visibility: decl.visibility,
        source,
    }
}
