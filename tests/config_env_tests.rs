//! Environment configuration, alone and layered over a YAML run file.
//!
//! Precedence is env > run file > defaults.

use openloop::classifier::ResponseClassifier;
use openloop::config::{Config, ConfigError};
use openloop::unit::DrainAccounting;
use openloop::yaml_config::YamlRunFile;
use serde_json::json;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;

/// Clear all env vars that could affect config parsing.
/// Must be called at the start of every test; execution order is not guaranteed.
fn clean_env() {
    for var in [
        "TARGET_URL",
        "WORKLOAD",
        "DRAIN_TIMEOUT",
        "RANDOM_SEED",
        "PAYLOAD_DIR",
        "PAYLOAD_CONTENT_TYPE",
        "SUCCESS_PATH",
        "REQUEST_TIMEOUT",
        "DRAIN_ACCOUNTING",
        "SKIP_TLS_VERIFY",
        "RESOLVE_TARGET_ADDR",
        "CUSTOM_HEADERS",
        "METRICS_PORT",
        "CONFIG_FILE",
    ] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn defaults_with_only_target() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost:8000/predict");

    let config = Config::from_env().unwrap();
    assert_eq!(config.target_url, "http://localhost:8000/predict");
    assert_eq!(config.workload.rates(), &[5, 5, 5]);
    assert_eq!(config.drain_timeout, Duration::from_secs(5));
    assert_eq!(config.seed, 42);
    assert_eq!(config.payload_dir, std::path::PathBuf::from("./test_images"));
    assert_eq!(config.content_type, "image/jpeg");
    assert_eq!(config.success_path, None);
    assert_eq!(config.request_timeout, None);
    assert_eq!(config.drain_accounting, DrainAccounting::CountSent);
    assert!(!config.skip_tls_verify);
    assert_eq!(config.metrics_port, None);
}

#[test]
#[serial]
fn missing_target_is_an_error() {
    clean_env();
    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::Missing("TARGET_URL"))
    ));
}

#[test]
#[serial]
fn target_must_be_http() {
    clean_env();
    env::set_var("TARGET_URL", "localhost:8000");
    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("TARGET_URL"), "error was: {}", err);
}

#[test]
#[serial]
fn all_variables_are_read() {
    clean_env();
    env::set_var("TARGET_URL", "https://inference.internal/v1/predict");
    env::set_var("WORKLOAD", "1 2 3 0");
    env::set_var("DRAIN_TIMEOUT", "1500ms");
    env::set_var("RANDOM_SEED", "1234");
    env::set_var("PAYLOAD_DIR", "/data/images");
    env::set_var("PAYLOAD_CONTENT_TYPE", "image/png");
    env::set_var("SUCCESS_PATH", "$.result.ok");
    env::set_var("REQUEST_TIMEOUT", "2s");
    env::set_var("DRAIN_ACCOUNTING", "discard-terminated");
    env::set_var("SKIP_TLS_VERIFY", "true");
    env::set_var("CUSTOM_HEADERS", "X-Run:ci");
    env::set_var("METRICS_PORT", "9100");

    let config = Config::from_env().unwrap();
    assert_eq!(config.workload.rates(), &[1, 2, 3, 0]);
    assert_eq!(config.drain_timeout, Duration::from_millis(1500));
    assert_eq!(config.seed, 1234);
    assert_eq!(config.content_type, "image/png");
    assert_eq!(config.success_path.as_deref(), Some("$.result.ok"));
    assert_eq!(config.request_timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.drain_accounting, DrainAccounting::DiscardTerminated);
    assert!(config.skip_tls_verify);
    assert_eq!(config.metrics_port, Some(9100));

    let scheduler = config.to_scheduler_config();
    assert_eq!(scheduler.endpoint, "https://inference.internal/v1/predict");
    assert_eq!(scheduler.seed, 1234);
    assert_eq!(scheduler.client.request_timeout, Some(Duration::from_secs(2)));
    assert_eq!(scheduler.client.custom_headers.as_deref(), Some("X-Run:ci"));

    clean_env();
}

#[test]
#[serial]
fn invalid_values_are_rejected() {
    for (var, value) in [
        ("WORKLOAD", "5,-1"),
        ("DRAIN_TIMEOUT", "soon"),
        ("RANDOM_SEED", "abc"),
        ("DRAIN_ACCOUNTING", "sometimes"),
        ("SUCCESS_PATH", "result.ok"),
        ("METRICS_PORT", "70000"),
    ] {
        clean_env();
        env::set_var("TARGET_URL", "http://localhost:8000/predict");
        env::set_var(var, value);
        assert!(
            Config::from_env().is_err(),
            "{}={} should be rejected",
            var,
            value
        );
    }
    clean_env();
}

#[test]
#[serial]
fn classifier_follows_success_path() {
    clean_env();
    env::set_var("TARGET_URL", "http://localhost:8000/predict");

    let body = json!({"success": false, "result": {"ok": true}});

    let default_classifier = Config::from_env().unwrap().classifier().unwrap();
    assert_eq!(default_classifier.classify("a.jpg", &body), Ok(false));

    env::set_var("SUCCESS_PATH", "$.result.ok");
    let path_classifier = Config::from_env().unwrap().classifier().unwrap();
    assert_eq!(path_classifier.classify("a.jpg", &body), Ok(true));

    clean_env();
}

#[test]
#[serial]
fn run_file_values_are_used_when_env_is_unset() {
    clean_env();
    let yaml = r#"
target: "http://yaml.example.com/predict"
workload: [10, 20]
drainTimeout: "8s"
seed: 5
drainAccounting: "discard-terminated"
"#;
    let base = YamlRunFile::from_str(yaml).unwrap();
    let config = Config::from_env_over(base).unwrap();

    assert_eq!(config.target_url, "http://yaml.example.com/predict");
    assert_eq!(config.workload.rates(), &[10, 20]);
    assert_eq!(config.drain_timeout, Duration::from_secs(8));
    assert_eq!(config.seed, 5);
    assert_eq!(config.drain_accounting, DrainAccounting::DiscardTerminated);
}

#[test]
#[serial]
fn env_overrides_run_file() {
    clean_env();
    env::set_var("TARGET_URL", "http://env.example.com/predict");
    env::set_var("WORKLOAD", "1,1");
    env::set_var("RANDOM_SEED", "99");

    let yaml = r#"
target: "http://yaml.example.com/predict"
workload: [10, 20]
seed: 5
contentType: "image/png"
"#;
    let config = Config::from_env_over(YamlRunFile::from_str(yaml).unwrap()).unwrap();

    assert_eq!(config.target_url, "http://env.example.com/predict");
    assert_eq!(config.workload.rates(), &[1, 1]);
    assert_eq!(config.seed, 99);
    // not overridden
    assert_eq!(config.content_type, "image/png");

    clean_env();
}

#[test]
#[serial]
fn config_file_is_loaded_from_disk() {
    clean_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "version: \"1.0\"\ntarget: \"http://file.example.com/predict\"\nworkload: [2, 4]\n"
    )
    .unwrap();
    env::set_var("CONFIG_FILE", file.path());

    let config = Config::from_env().unwrap();
    assert_eq!(config.target_url, "http://file.example.com/predict");
    assert_eq!(config.workload.total_requests(), 6);

    clean_env();
}

#[test]
#[serial]
fn unreadable_config_file_is_an_error() {
    clean_env();
    env::set_var("CONFIG_FILE", "/nonexistent/openloop-run.yaml");
    assert!(matches!(Config::from_env(), Err(ConfigError::File(_))));
    clean_env();
}
