//! Drives the real `demo-calculator` binary over stdio.

use serde_json::json;

use toolbridge::config::{BridgeConfig, ProviderSpec};
use toolbridge::provider::{ConnectionState, ProviderError};
use toolbridge::{Dispatcher, ErrorKind, InvocationResult};

const CALCULATOR: &str = env!("CARGO_BIN_EXE_demo-calculator");

fn calculator_config(call_ms: u64) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.providers.insert(
        "calc".into(),
        ProviderSpec {
            command: CALCULATOR.into(),
            env: [("RUST_LOG".to_string(), "debug".to_string())].into_iter().collect(),
            ..ProviderSpec::default()
        },
    );
    config.timeouts.call_ms = call_ms;
    config.timeouts.shutdown_grace_ms = 1_000;
    config.retry.max_retries = 0;
    config
}

async fn started(call_ms: u64) -> Dispatcher {
    let dispatcher = Dispatcher::from_config(&calculator_config(call_ms)).unwrap();
    let failures = dispatcher.start_providers().await;
    assert!(failures.is_empty(), "calculator failed to start: {failures:?}");
    dispatcher
}

#[tokio::test]
async fn test_discovers_calculator_tools() {
    let dispatcher = started(5_000).await;

    let names: Vec<String> = dispatcher.list_all().into_iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec!["add", "divide", "multiply", "power", "sleep", "sqrt", "subtract"]
    );
    let health = &dispatcher.get_health()["calc"];
    assert_eq!(health.state, ConnectionState::Ready);
    assert_eq!(health.tool_count, 7);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_multiply_and_divide() {
    let dispatcher = started(5_000).await;

    let result = dispatcher.invoke("multiply", json!({"a": 2, "b": 3})).await;
    assert_eq!(result, InvocationResult::success(json!(6)));

    let result = dispatcher.invoke("divide", json!({"a": 5, "b": 2})).await;
    assert_eq!(result, InvocationResult::success(json!(2.5)));

    let result = dispatcher.invoke("divide", json!({"a": 1, "b": 0})).await;
    assert_eq!(
        result,
        InvocationResult::failure(ErrorKind::RemoteExecutionError, "Error: Division by zero")
    );

    let result = dispatcher.invoke("sqrt", json!({})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::InvalidArguments));

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_timeout_leaves_session_usable() {
    let dispatcher = started(300).await;

    let result = dispatcher.invoke("sleep", json!({"ms": 2_000})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));

    let result = dispatcher.invoke("add", json!({"a": 40, "b": 2})).await;
    assert_eq!(result, InvocationResult::success(json!(42)));
    assert_eq!(dispatcher.get_health()["calc"].restarts, 0);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_health_probe_and_shutdown() {
    let dispatcher = started(5_000).await;

    let transitions = dispatcher.health_monitor().probe_all().await;
    assert!(transitions.is_empty());
    assert!(dispatcher.get_health()["calc"].last_healthy_at.is_some());

    dispatcher.shutdown().await;
    assert_eq!(dispatcher.get_health()["calc"].state, ConnectionState::Closed);
    assert!(dispatcher.list_all().is_empty());
}

#[tokio::test]
async fn test_missing_binary_fails_to_start() {
    let mut config = calculator_config(1_000);
    config.providers.insert(
        "ghost".into(),
        ProviderSpec {
            command: "/nonexistent/toolbridge-ghost-server".into(),
            declared_tools: vec!["haunt".into()],
            ..ProviderSpec::default()
        },
    );
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let failures = dispatcher.start_providers().await;
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures["ghost"], ProviderError::ProviderStartup { .. }));

    let result = dispatcher.invoke("haunt", json!({})).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ProviderUnavailable));

    let result = dispatcher.invoke("multiply", json!({"a": 7, "b": 6})).await;
    assert_eq!(result, InvocationResult::success(json!(42)));

    dispatcher.shutdown().await;
}
