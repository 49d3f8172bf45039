//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use peer_protocol::config::{
    ConnectionConfig, DecodeFailurePolicy, LoggingConfig, NodeConfig, NodeSection, DEFAULT_PORT,
    MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
use peer_protocol::core::identity::ProtocolIdentity;
use peer_protocol::utils::compression::CompressionKind;
use peer_protocol::Node;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NodeConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_bind_address() {
    let mut config = NodeConfig::default();
    config.node.bind_address = "not-an-ip".to_string();

    let errors = config.validate();
    assert!(!errors.is_empty(), "Should have validation errors");
    assert!(errors.iter().any(|e| e.contains("Invalid bind address")));
}

#[test]
fn test_empty_bind_address() {
    let mut config = NodeConfig::default();
    config.node.bind_address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_empty_advertised_address() {
    let mut config = NodeConfig::default();
    config.node.advertised_address = Some(String::new());

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Advertised address")));
}

#[test]
fn test_advertised_address_overrides_bind_address() {
    let mut config = NodeConfig::default();
    config.node.advertised_address = Some("node.example".to_string());
    assert_eq!(config.node.advertised_host(), "node.example");
    assert!(config.validate().is_empty());
}

#[test]
fn test_empty_protocol_fields() {
    let mut config = NodeConfig::default();
    config.node.subnet = String::new();
    config.node.encryption_method = String::new();
    config.node.protocol_version = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Subnet")));
    assert!(errors.iter().any(|e| e.contains("Encryption method")));
    assert!(errors.iter().any(|e| e.contains("Protocol version")));
}

#[test]
fn test_empty_identity_salt() {
    let mut config = NodeConfig::default();
    config.node.identity_salt = Some(String::new());

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Identity salt")));
}

#[test]
fn test_zero_max_frame_size() {
    let mut config = NodeConfig::default();
    config.connection.max_frame_size = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max frame size cannot be 0")));
}

#[test]
fn test_tiny_max_frame_size() {
    let mut config = NodeConfig::default();
    config.connection.max_frame_size = 100;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("too small")));
}

#[test]
fn test_compression_threshold_larger_than_max_frame() {
    let mut config = NodeConfig::default();
    config.connection.max_frame_size = 4096;
    config.connection.compression_threshold_bytes = 8192;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Compression threshold cannot be larger")));
}

#[test]
fn test_zero_outbound_queue() {
    let mut config = NodeConfig::default();
    config.connection.outbound_queue_capacity = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Outbound queue capacity must be greater than 0")));
}

#[test]
fn test_excessive_outbound_queue() {
    let mut config = NodeConfig::default();
    config.connection.outbound_queue_capacity = 2_000_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("too large")));
}

#[test]
fn test_duplicate_compression_method() {
    let mut config = NodeConfig::default();
    config.connection.compression = vec![CompressionKind::Lz4, CompressionKind::Lz4];

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("listed twice: lz4")));
}

#[test]
fn test_empty_compression_list_is_valid() {
    let mut config = NodeConfig::default();
    config.connection.compression = Vec::new();
    assert!(config.validate().is_empty());
    assert!(config.connection.offered_tags().is_empty());
}

#[test]
fn test_empty_app_name() {
    let mut config = NodeConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_long_app_name() {
    let mut config = NodeConfig::default();
    config.logging.app_name = "x".repeat(100);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Application name too long")));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = NodeConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let mut config = NodeConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_valid_config() {
    let config = NodeConfig::default();
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NodeConfig::default();
    config.node.subnet = String::new();

    let result = config.validate_strict();
    assert!(result.is_err());

    if let Err(e) = result {
        let error_str = e.to_string();
        assert!(error_str.contains("Configuration validation failed"));
    }
}

#[test]
fn test_node_refuses_invalid_config() {
    let mut config = NodeConfig::default();
    config.connection.outbound_queue_capacity = 0;
    assert!(Node::new(config).is_err());
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = NodeConfig::default();

    config.node.bind_address = String::new();
    config.node.subnet = String::new();
    config.connection.max_frame_size = 0;
    config.connection.outbound_queue_capacity = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_protocol_identity_follows_node_section() {
    let mut config = NodeConfig::default();
    config.node.subnet = "sync".to_string();

    let identity = config.protocol_identity();
    assert_eq!(identity, ProtocolIdentity::with_version("sync", "Plaintext", PROTOCOL_VERSION));
    assert_ne!(
        identity.fingerprint(),
        NodeConfig::default().protocol_identity().fingerprint()
    );
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.toml");

    let config = NodeConfig::default_with_overrides(|c| {
        c.node.bind_port = 5000;
        c.node.identity_salt = Some("stable".into());
        c.connection.compression = vec![CompressionKind::Zstd];
        c.connection.decode_failure_policy = DecodeFailurePolicy::Renegotiate;
        c.logging.log_level = Level::DEBUG;
    });
    config.save_to_file(&path).unwrap();

    let loaded = NodeConfig::from_file(&path).unwrap();
    assert_eq!(loaded.node.bind_port, 5000);
    assert_eq!(loaded.node.identity_salt.as_deref(), Some("stable"));
    assert_eq!(loaded.connection.compression, vec![CompressionKind::Zstd]);
    assert_eq!(
        loaded.connection.decode_failure_policy,
        DecodeFailurePolicy::Renegotiate
    );
    assert_eq!(loaded.logging.log_level, Level::DEBUG);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = NodeConfig::from_file("/nonexistent/node.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = NodeConfig::from_toml("[node\nbind_port = ").unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_unknown_compression_name_rejected() {
    let result = NodeConfig::from_toml(
        r#"
        [connection]
        max_frame_size = 65536
        compression = ["brotli"]
        outbound_queue_capacity = 8
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_valid_production_config() {
    let config = NodeConfig {
        node: NodeSection {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 7000,
            advertised_address: Some("10.0.0.12".to_string()),
            subnet: "prod".to_string(),
            encryption_method: "Plaintext".to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            identity_salt: Some("prod-node-12".to_string()),
        },
        connection: ConnectionConfig {
            max_frame_size: MAX_FRAME_SIZE,
            compression: vec![CompressionKind::Zstd, CompressionKind::Lz4],
            compression_threshold_bytes: 512,
            outbound_queue_capacity: 1024,
            decode_failure_policy: DecodeFailurePolicy::Renegotiate,
            auto_pong: true,
        },
        logging: LoggingConfig {
            app_name: "mesh-node".to_string(),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: true,
        },
    };

    let errors = config.validate();
    assert!(errors.is_empty(), "Production config should be valid, got: {:?}", errors);
    assert_ne!(config.node.bind_port, DEFAULT_PORT);
}
