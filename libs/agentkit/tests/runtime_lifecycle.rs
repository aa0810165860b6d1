#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Lifecycle tests for `Runtime` driven through fake runners and generators.
//!
//! The service capability is the real `GoGrpcService` reading a `service.yaml`
//! from a temporary workspace.

mod common;

use std::error::Error as _;
use std::sync::atomic::Ordering;

use agentkit::configuration::{Configuration, ConfigurationInfo, ConfigurationValue};
use agentkit::endpoints::{Api, EndpointKey};
use agentkit::env::endpoint_key;
use agentkit::network::{NetworkAccess, NetworkInstance, NetworkMapping, find_network_instance};
use agentkit::runner::RunnerState;
use agentkit::runtime::{InitRequest, StartRequest};
use agentkit::service::{Capability, Engage, Engagement};
use agentkit::watcher::{ChangeEvent, ChangeKind};
use agentkit::{DesiredAction, Phase, RuntimeContext, RuntimeError};

use common::{Harness, service_yaml};

const REST: &str = "    create-rest-endpoint: true\n";
const HOT_RELOAD: &str = "    hot-reload: true\n";

#[tokio::test]
async fn test_load_init_start() {
    let h = Harness::new(REST);

    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    assert_eq!(loaded.transition.phase, Phase::Loaded);
    assert_eq!(
        loaded.endpoints.grpc.key,
        EndpointKey::new("mod", "svc", "api", Api::Grpc)
    );
    assert!(loaded.endpoints.rest.is_some());
    assert!(h.location().join("code").is_dir());
    assert!(h.location().join(".cache").is_dir());

    let mappings = common::mappings(&loaded.endpoints);
    let init = h
        .runtime
        .init(InitRequest {
            network_mappings: mappings.clone(),
            ..InitRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(init.transition.phase, Phase::Initialized);
    assert_eq!(init.runtime_context, RuntimeContext::Native);
    assert!(init.message.is_none());
    assert_eq!(h.generators.calls.load(Ordering::SeqCst), 1);

    let started = h.runtime.start(StartRequest::default()).await.unwrap();
    assert_eq!(started.transition.phase, Phase::Running);
    assert_eq!(started.process.unwrap().pid, Some(1000));
    assert_eq!(
        h.runners.journal.calls(),
        vec!["create:native", "init:native", "spawn:native"]
    );

    let envs = h.runners.journal.last_envs();
    assert_eq!(envs["SVCAGENT__ENVIRONMENT"], "local");
    assert_eq!(envs["SVCAGENT__SERVICE__VERSION"], "0.0.0");
    assert_eq!(envs["SVCAGENT__RUNTIME_CONTEXT"], "native");
    let grpc_port = mappings[0].instances[0].port;
    assert_eq!(
        envs[&endpoint_key(&loaded.endpoints.grpc.key)],
        format!("localhost:{grpc_port}")
    );
    let rest = loaded.endpoints.rest.as_ref().unwrap();
    assert!(envs[&endpoint_key(&rest.key)].starts_with("http://localhost:"));
}

#[tokio::test]
async fn test_start_before_init_is_rejected() {
    let h = Harness::new(REST);
    h.runtime.load(h.load_request()).await.unwrap();

    let err = h.runtime.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Precondition {
            operation: "start",
            phase: Phase::Loaded,
            ..
        }
    ));
    assert!(!err.is_retriable());
    assert!(h.runners.journal.entries().is_empty());
}

#[tokio::test]
async fn test_init_before_load_is_rejected() {
    let h = Harness::new(REST);
    let err = h.runtime.init(InitRequest::default()).await.unwrap_err();
    assert_eq!(err.phase(), Phase::Unloaded);
    assert!(matches!(err, RuntimeError::Precondition { .. }));
}

#[tokio::test]
async fn test_repeated_init_reuses_runner() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();

    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();

    assert_eq!(h.runners.journal.count("create:native"), 1);
    assert_eq!(h.runners.journal.count("init:native"), 2);
    assert_eq!(h.generators.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_repeated_start_stops_previous_process() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();

    let first = h.runtime.start(StartRequest::default()).await.unwrap();
    let second = h.runtime.start(StartRequest::default()).await.unwrap();

    assert_ne!(
        first.process.unwrap().instance_id,
        second.process.unwrap().instance_id
    );
    assert_eq!(
        h.runners.journal.calls(),
        vec![
            "create:native",
            "init:native",
            "spawn:native",
            "stop:native",
            "spawn:native"
        ]
    );
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    let first = h.runtime.stop().await.unwrap();
    let second = h.runtime.stop().await.unwrap();

    assert_eq!(first.transition.phase, Phase::Stopped);
    assert_eq!(second.transition.phase, Phase::Stopped);
    assert_eq!(h.runners.journal.count("stop:native"), 1);

    let info = h.runtime.information().await;
    assert_eq!(info.runner, Some(RunnerState::Stopped));
    assert_eq!(info.pid, None);

    // a stopped service starts again without rebuilding
    let restarted = h.runtime.start(StartRequest::default()).await.unwrap();
    assert_eq!(restarted.transition.phase, Phase::Running);
    assert_eq!(h.runners.journal.count("init:native"), 1);
}

#[tokio::test]
async fn test_stop_before_load_is_noop() {
    let h = Harness::new(REST);
    let stopped = h.runtime.stop().await.unwrap();
    assert_eq!(stopped.transition.phase, Phase::Unloaded);
}

#[tokio::test]
async fn test_context_switch_recreates_runner() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    let init = h
        .runtime
        .init(InitRequest {
            runtime_context: Some(RuntimeContext::Container),
            ..h.init_request(&loaded.endpoints)
        })
        .await
        .unwrap();

    assert_eq!(init.runtime_context, RuntimeContext::Container);
    assert_eq!(
        h.runners.journal.calls(),
        vec![
            "create:native",
            "init:native",
            "spawn:native",
            "stop:native",
            "shutdown:native",
            "create:container",
            "init:container"
        ]
    );
}

#[tokio::test]
async fn test_missing_toolchain_falls_back_to_container() {
    let h = Harness::new(REST);
    h.runners.native.store(false, Ordering::SeqCst);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();

    let init = h
        .runtime
        .init(InitRequest {
            runtime_context: Some(RuntimeContext::Native),
            ..h.init_request(&loaded.endpoints)
        })
        .await
        .unwrap();

    assert_eq!(init.runtime_context, RuntimeContext::Container);
    assert_eq!(h.runners.journal.count("create:container"), 1);
}

#[tokio::test]
async fn test_destroy_empties_cache_and_tears_down_container_once() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime
        .init(InitRequest {
            runtime_context: Some(RuntimeContext::Container),
            ..h.init_request(&loaded.endpoints)
        })
        .await
        .unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    let cache = h.location().join(".cache");
    std::fs::create_dir_all(cache.join("bin")).unwrap();
    std::fs::write(cache.join("bin/svc"), "binary").unwrap();
    std::fs::write(cache.join("proto.sha256"), "abc").unwrap();

    let destroyed = h.runtime.destroy().await.unwrap();
    assert_eq!(destroyed.transition.phase, Phase::Destroyed);
    assert!(cache.is_dir());
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 0);

    let again = h.runtime.destroy().await.unwrap();
    assert_eq!(again.transition.phase, Phase::Destroyed);
    assert_eq!(h.runners.journal.count("shutdown:container"), 1);
    assert_eq!(h.runners.journal.count("stop:container"), 1);
}

#[tokio::test]
async fn test_destroy_native_does_not_shut_down() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    h.runtime.destroy().await.unwrap();

    assert_eq!(h.runners.journal.count("stop:native"), 1);
    assert_eq!(h.runners.journal.count("shutdown:native"), 0);
}

#[tokio::test]
async fn test_operations_after_destroy() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.destroy().await.unwrap();

    let transition = h
        .runtime
        .handle_change(&ChangeEvent::new(
            h.location().join("code/main.go"),
            ChangeKind::Modified,
        ))
        .await;
    assert_eq!(transition.phase, Phase::Destroyed);
    assert_eq!(transition.desired, DesiredAction::None);
    assert_eq!(h.runtime.take_desired().await, DesiredAction::None);

    let err = h.runtime.load(h.load_request()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Precondition { .. }));
    let err = h.runtime.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Precondition { .. }));
}

#[tokio::test]
async fn test_resolution_error_names_endpoint() {
    let h = Harness::new(REST);
    h.runtime.load(h.load_request()).await.unwrap();

    let err = h.runtime.init(InitRequest::default()).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Resolution { .. }));
    assert!(!err.is_retriable());
    assert!(err.source().unwrap().to_string().contains("mod/svc/api:grpc"));
}

#[tokio::test]
async fn test_configurations_filtered_by_context() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();

    let value = |key: &str, value: &str, secret: bool| ConfigurationValue {
        key: key.to_owned(),
        value: value.to_owned(),
        secret,
    };
    let configurations = vec![
        Configuration {
            origin: "mod/db".to_owned(),
            runtime_context: Some(RuntimeContext::Container),
            infos: vec![ConfigurationInfo {
                name: "conn".to_owned(),
                values: vec![value("dsn", "postgres://db:5432", false)],
            }],
        },
        Configuration {
            origin: "ws".to_owned(),
            runtime_context: None,
            infos: vec![ConfigurationInfo {
                name: "log".to_owned(),
                values: vec![value("level", "debug", false), value("token", "s3cr3t", true)],
            }],
        },
    ];
    h.runtime
        .init(InitRequest {
            dependency_configurations: configurations,
            ..h.init_request(&loaded.endpoints)
        })
        .await
        .unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    let envs = h.runners.journal.last_envs();
    assert_eq!(envs["SVCAGENT__CONFIGURATION__WS__LOG__LEVEL"], "debug");
    assert_eq!(envs["SVCAGENT__SECRET_CONFIGURATION__WS__LOG__TOKEN"], "s3cr3t");
    assert!(!envs.contains_key("SVCAGENT__CONFIGURATION__MOD_DB__CONN__DSN"));
}

#[tokio::test]
async fn test_context_switch_drops_configurations_of_previous_context() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    let configurations = vec![Configuration {
        origin: "mod/db".to_owned(),
        runtime_context: Some(RuntimeContext::Container),
        infos: vec![ConfigurationInfo {
            name: "conn".to_owned(),
            values: vec![ConfigurationValue {
                key: "password".to_owned(),
                value: "container-only".to_owned(),
                secret: true,
            }],
        }],
    }];

    h.runtime
        .init(InitRequest {
            runtime_context: Some(RuntimeContext::Container),
            dependency_configurations: configurations.clone(),
            ..h.init_request(&loaded.endpoints)
        })
        .await
        .unwrap();
    h.runtime
        .init(InitRequest {
            runtime_context: Some(RuntimeContext::Native),
            dependency_configurations: configurations,
            ..h.init_request(&loaded.endpoints)
        })
        .await
        .unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    let envs = h.runners.journal.last_envs();
    assert_eq!(envs["SVCAGENT__RUNTIME_CONTEXT"], "native");
    assert!(!envs.contains_key("SVCAGENT__SECRET_CONFIGURATION__MOD_DB__CONN__PASSWORD"));
    assert_eq!(envs["SVCAGENT__SERVICE__NAME"], "svc");
}

#[tokio::test]
async fn test_dependency_variables_do_not_outlive_their_start() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();

    let dependency = EndpointKey::new("other", "dep", "api", Api::Grpc);
    h.runtime
        .start(StartRequest {
            dependency_network_mappings: vec![NetworkMapping {
                endpoint: dependency.clone(),
                instances: vec![NetworkInstance::new(
                    NetworkAccess::Native,
                    Api::Grpc,
                    "localhost",
                    7000,
                )],
            }],
            fixture: Some("seed".to_owned()),
        })
        .await
        .unwrap();
    assert_eq!(h.runners.journal.last_envs()[&endpoint_key(&dependency)], "localhost:7000");

    h.runtime.start(StartRequest::default()).await.unwrap();

    let envs = h.runners.journal.last_envs();
    assert!(!envs.contains_key(&endpoint_key(&dependency)));
    assert!(!envs.contains_key("SVCAGENT__FIXTURE"));
    assert!(envs.contains_key(&endpoint_key(&loaded.endpoints.grpc.key)));
}

#[tokio::test]
async fn test_start_after_reload_requires_init() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    h.runtime.load(h.load_request()).await.unwrap();
    let err = h.runtime.start(StartRequest::default()).await.unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::Precondition {
            operation: "start",
            phase: Phase::Loaded,
            ..
        }
    ));
    assert_eq!(h.runners.journal.count("spawn:native"), 1);

    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();
    let envs = h.runners.journal.last_envs();
    assert!(envs.contains_key(&endpoint_key(&loaded.endpoints.grpc.key)));
}

#[tokio::test]
async fn test_stop_reports_port_still_bound() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    let init = h.init_request(&loaded.endpoints);
    let grpc_port = find_network_instance(
        &init.network_mappings,
        &loaded.endpoints.grpc.key,
        NetworkAccess::Native,
    )
    .unwrap()
    .port;
    h.runtime.init(init).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    let squatter = std::net::TcpListener::bind(("127.0.0.1", grpc_port)).unwrap();
    let err = h.runtime.stop().await.unwrap_err();

    assert!(matches!(err, RuntimeError::PortBusy { port, .. } if port == grpc_port));
    assert!(err.is_retriable());
    assert_eq!(h.runtime.phase().await, Phase::Stopped);

    // a start over the held port is refused
    let err = h.runtime.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::PortBusy { port, .. } if port == grpc_port));
    assert_eq!(h.runners.journal.count("spawn:native"), 1);

    drop(squatter);
    let started = h.runtime.start(StartRequest::default()).await.unwrap();
    assert_eq!(started.transition.phase, Phase::Running);
    assert_eq!(h.runners.journal.count("spawn:native"), 2);
}

#[tokio::test]
async fn test_restart_refused_while_port_held() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    let init = h.init_request(&loaded.endpoints);
    let grpc_port = find_network_instance(
        &init.network_mappings,
        &loaded.endpoints.grpc.key,
        NetworkAccess::Native,
    )
    .unwrap()
    .port;
    h.runtime.init(init).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    let _squatter = std::net::TcpListener::bind(("127.0.0.1", grpc_port)).unwrap();
    let err = h.runtime.start(StartRequest::default()).await.unwrap_err();

    assert!(matches!(err, RuntimeError::PortBusy { port, .. } if port == grpc_port));
    assert!(err.to_string().contains(&grpc_port.to_string()));
    assert_eq!(
        h.runners.journal.calls(),
        vec!["create:native", "init:native", "spawn:native", "stop:native"]
    );
    assert_eq!(h.runtime.phase().await, Phase::Stopped);
}

#[tokio::test]
async fn test_start_resolves_dependencies_for_context() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime
        .init(InitRequest {
            runtime_context: Some(RuntimeContext::Container),
            ..h.init_request(&loaded.endpoints)
        })
        .await
        .unwrap();

    let dependency = EndpointKey::new("other", "dep", "api", Api::Grpc);
    let mapping = NetworkMapping {
        endpoint: dependency.clone(),
        instances: vec![
            NetworkInstance::new(NetworkAccess::Native, Api::Grpc, "localhost", 7000),
            NetworkInstance::new(
                NetworkAccess::Container,
                Api::Grpc,
                "host.docker.internal",
                7000,
            ),
        ],
    };
    h.runtime
        .start(StartRequest {
            dependency_network_mappings: vec![mapping],
            fixture: Some("seed".to_owned()),
        })
        .await
        .unwrap();

    let envs = h.runners.journal.last_envs();
    assert_eq!(
        envs[&endpoint_key(&dependency)],
        "host.docker.internal:7000"
    );
    assert_eq!(envs["SVCAGENT__FIXTURE"], "seed");
}

#[tokio::test]
async fn test_changes_are_classified_and_merged() {
    let h = Harness::new(REST);
    let change = |path: &str| ChangeEvent::new(h.location().join(path), ChangeKind::Modified);

    let before_load = h.runtime.handle_change(&change("code/main.go")).await;
    assert_eq!(before_load.desired, DesiredAction::None);

    h.runtime.load(h.load_request()).await.unwrap();

    let t = h.runtime.handle_change(&change("openapi/api.swagger.json")).await;
    assert_eq!(t.desired, DesiredAction::None);
    let t = h.runtime.handle_change(&change("code/main.go")).await;
    assert_eq!(t.desired, DesiredAction::Start);
    let t = h.runtime.handle_change(&change("proto/api.proto")).await;
    assert_eq!(t.desired, DesiredAction::Load);
    let t = h.runtime.handle_change(&change("code/handler.go")).await;
    assert_eq!(t.desired, DesiredAction::Load);

    assert_eq!(h.runtime.take_desired().await, DesiredAction::Load);
    assert_eq!(h.runtime.take_desired().await, DesiredAction::None);
    // recording a change never touches the runner
    assert!(h.runners.journal.entries().is_empty());
}

#[tokio::test]
async fn test_build_failure_under_hot_reload_awaits_change() {
    let h = Harness::new(HOT_RELOAD);
    h.runners.fail_build.store(true, Ordering::SeqCst);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();

    let init = h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    assert_eq!(init.transition.phase, Phase::AwaitingChange);
    assert!(init.message.unwrap().contains("syntax error"));

    let retry = h.runtime.start(StartRequest::default()).await.unwrap();
    assert_eq!(retry.transition.phase, Phase::AwaitingChange);
    assert!(retry.process.is_none());

    h.runners.fail_build.store(false, Ordering::SeqCst);
    let started = h.runtime.start(StartRequest::default()).await.unwrap();
    assert_eq!(started.transition.phase, Phase::Running);
    assert_eq!(h.runners.journal.count("init:native"), 3);
    assert_eq!(h.runners.journal.count("spawn:native"), 1);
}

#[tokio::test]
async fn test_build_failure_without_hot_reload_fails() {
    let h = Harness::new(REST);
    h.runners.fail_build.store(true, Ordering::SeqCst);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();

    let err = h
        .runtime
        .init(h.init_request(&loaded.endpoints))
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::Build { .. }));
    assert!(err.is_retriable());
    assert_eq!(h.runtime.phase().await, Phase::Loaded);
}

#[tokio::test]
async fn test_codegen_failure_under_hot_reload_is_retried_on_start() {
    let h = Harness::new(HOT_RELOAD);
    h.generators.fail.store(true, Ordering::SeqCst);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();

    let init = h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    assert_eq!(init.transition.phase, Phase::AwaitingChange);
    assert!(init.generation.is_none());
    assert_eq!(h.runners.journal.calls(), vec!["create:native"]);

    h.generators.fail.store(false, Ordering::SeqCst);
    let started = h.runtime.start(StartRequest::default()).await.unwrap();
    assert_eq!(started.transition.phase, Phase::Running);
    assert_eq!(h.generators.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_codegen_failure_without_hot_reload_fails() {
    let h = Harness::new(REST);
    h.generators.fail.store(true, Ordering::SeqCst);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();

    let err = h
        .runtime
        .init(h.init_request(&loaded.endpoints))
        .await
        .unwrap_err();

    assert!(matches!(err, RuntimeError::Build { .. }));
    assert!(h.runners.journal.entries().is_empty());
}

#[tokio::test]
async fn test_run_tests_needs_runner() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    assert!(matches!(
        h.runtime.test().await.unwrap_err(),
        RuntimeError::Precondition { .. }
    ));

    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    let tested = h.runtime.test().await.unwrap();
    assert!(tested.success());
    assert_eq!(tested.output.unwrap().stdout, "ran go test ./...");
}

#[tokio::test]
async fn test_information_and_communicate() {
    let h = Harness::new(REST);
    assert_eq!(
        h.runtime.communicate(Engage::Capabilities),
        Engagement::Capabilities(vec![Capability::Factory, Capability::Runtime])
    );
    assert_eq!(
        h.runtime.communicate(Engage::Settings),
        Engagement::Settings(None)
    );

    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    match h.runtime.communicate(Engage::Settings) {
        Engagement::Settings(Some(settings)) => assert!(settings.rest_endpoint),
        other => panic!("unexpected engagement {other:?}"),
    }

    let info = h.runtime.information().await;
    assert_eq!(info.transition.phase, Phase::Running);
    assert_eq!(info.identity.unwrap().unique(), "mod/svc");
    assert_eq!(info.runtime_context, Some(RuntimeContext::Native));
    assert_eq!(info.runner, Some(RunnerState::Running));
    assert_eq!(info.pid, Some(1000));
}

#[tokio::test]
async fn test_load_rejects_mismatched_configuration() {
    let h = Harness::new(REST);
    std::fs::write(
        h.location().join("service.yaml"),
        service_yaml(REST).replace("name: svc", "name: other"),
    )
    .unwrap();

    let err = h.runtime.load(h.load_request()).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Load { .. }));
    assert!(!err.is_retriable());
    assert_eq!(h.runtime.phase().await, Phase::Unloaded);
}

#[tokio::test]
async fn test_reload_keeps_runner_when_nothing_changed() {
    let h = Harness::new(REST);
    let loaded = h.runtime.load(h.load_request()).await.unwrap();
    h.runtime.init(h.init_request(&loaded.endpoints)).await.unwrap();
    h.runtime.start(StartRequest::default()).await.unwrap();

    h.runtime.load(h.load_request()).await.unwrap();
    assert_eq!(h.runners.journal.count("stop:native"), 1);
    assert_eq!(h.runners.journal.count("shutdown:native"), 0);

    std::fs::write(h.location().join("service.yaml"), service_yaml(HOT_RELOAD)).unwrap();
    let reloaded = h.runtime.load(h.load_request()).await.unwrap();
    assert!(reloaded.endpoints.rest.is_none());
    assert_eq!(h.runners.journal.count("shutdown:native"), 1);

    h.runtime.init(h.init_request(&reloaded.endpoints)).await.unwrap();
    assert_eq!(h.runners.journal.count("create:native"), 2);
}
