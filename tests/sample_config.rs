//! ---
//! hamq_section: "15-testing-qa-runbook"
//! hamq_subsection: "integration-tests"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Integration and validation tests for the HAMQ stack."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use hamq_common::config::{AppConfig, CompressionKind, DeliveryMode};

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn shipped_config_parses_and_validates() {
    let config: AppConfig = read("configs/hamq.toml").parse().expect("valid config");
    assert_eq!(config.delivery_mode, DeliveryMode::ActivePassive);
    assert_eq!(config.consumer.max_concurrent, 2);
    assert_eq!(config.producer.batch_size, 10);
    assert_eq!(config.codec.compression, CompressionKind::Gzip);
    assert!(!config.metrics.enabled);
}

#[test]
fn shipped_config_keeps_endpoints_on_distinct_namespaces() {
    let config: AppConfig = read("configs/hamq.toml").parse().expect("valid config");
    assert_ne!(
        config.endpoints.primary.connection,
        config.endpoints.secondary.connection
    );
    for endpoint in [&config.endpoints.primary, &config.endpoints.secondary] {
        assert!(
            endpoint.connection.starts_with("memory://"),
            "daemon ships with the in-process transport only"
        );
    }
}
