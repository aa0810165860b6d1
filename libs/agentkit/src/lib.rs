#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Runtime library for the Go gRPC service agent.
//!
//! The agent drives one Go gRPC/REST service through its local lifecycle:
//!
//! - **Load**: validate the identity, read `service.yaml`, discover endpoints,
//!   open the source and cache directories, set up the file watcher
//! - **Init**: pick the runtime context, regenerate code from `.proto`,
//!   resolve network instances, (re)create the runner environment and build
//! - **Start**: stop the previous process, rebuild if stale, spawn a new one
//! - **Stop** / **Destroy**: tear the process (and container) down
//!
//! File changes never trigger transitions directly. The watcher sends
//! [`watcher::ChangeEvent`]s on a channel, [`runtime::Runtime::handle_change`]
//! turns them into a [`lifecycle::DesiredAction`], and the [`driver::Driver`]
//! (standing in for the platform scheduler) performs the transition.

pub mod codegen;
pub mod configuration;
pub mod context;
pub mod dependency;
pub mod duration_serde;
pub mod driver;
pub mod endpoints;
pub mod env;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod network;
pub mod ports;
pub mod runner;
pub mod runtime;
pub mod service;
pub mod settings;
pub mod watcher;

pub use context::RuntimeContext;
pub use error::RuntimeError;
pub use identity::ServiceIdentity;
pub use lifecycle::{DesiredAction, Phase, Transition};
pub use runtime::{Collaborators, Runtime, RuntimeOptions};
pub use settings::Settings;
