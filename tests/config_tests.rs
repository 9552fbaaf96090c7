//! Tests for loading the gateway configuration from YAML files

use gateway::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config_file() {
    let file = write_config(
        r#"
mount_path: /realtime
limits:
  max_connections: 500
  max_memberships: 5000
handler_timeout_ms: 2000
forwarded_headers:
  - host
  - x-request-id
stomp:
  enabled: true
  protocols: [v12.stomp]
  forward_transaction_commands: true
  server_name: chat-gateway
  heart_beat: "0,0"
"#,
    );

    let config = GatewayConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.mount_path, "/realtime");
    assert_eq!(config.limits.max_connections, Some(500));
    assert_eq!(config.limits.max_memberships, Some(5000));
    assert_eq!(config.handler_timeout_ms, Some(2000));
    assert_eq!(config.forwarded_headers, vec!["host", "x-request-id"]);
    assert_eq!(config.stomp.protocols, vec!["v12.stomp"]);
    assert!(config.stomp.forward_transaction_commands);
    assert_eq!(config.stomp.server_name, "chat-gateway");
}

#[test]
fn test_empty_file_yields_defaults() {
    let file = write_config("{}");

    let config = GatewayConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();
    let defaults = GatewayConfig::default_config();

    assert_eq!(config.mount_path, defaults.mount_path);
    assert_eq!(config.stomp.protocols, defaults.stomp.protocols);
    assert_eq!(config.forwarded_headers, defaults.forwarded_headers);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    assert!(GatewayConfig::from_yaml_file(path.to_str().unwrap()).is_err());
}

#[test]
fn test_malformed_yaml_is_an_error() {
    let file = write_config("mount_path: [unterminated");

    assert!(GatewayConfig::from_yaml_file(file.path().to_str().unwrap()).is_err());
}

#[test]
fn test_loaded_config_builds_a_host() {
    let file = write_config("mount_path: /gw\nlimits:\n  max_connections: 1\n");
    let config = GatewayConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();

    let host = GatewayBuilder::new()
        .with_config(config)
        .with_handlers(HandlerTable::new())
        .build_host()
        .unwrap();

    assert_eq!(host.config.mount_path, "/gw");
}
