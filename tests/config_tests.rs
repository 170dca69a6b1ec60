use logrelay::config::types::{ConditionConfig, ReadStart};
use logrelay::config::{generate::generate_starter_config, load_config, ConfigError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.yml");
    fs::write(&path, yaml).unwrap();
    path
}

fn validation_errors(yaml: &str) -> Vec<String> {
    let dir = TempDir::new().unwrap();
    match load_config(&write_config(&dir, yaml)) {
        Err(ConfigError::ValidationList(errors)) => errors,
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_generated_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = write_config(&temp_dir, &generate_starter_config());

    let config = load_config(&config_path).expect("Generated config should be valid");

    let agent = config.agent.expect("agent section");
    assert!(agent.file_forwarding);
    assert!(!agent.syslog);
    assert_eq!(agent.files[0].read.start, ReadStart::Beginning);
    assert_eq!(agent.forwarder.retry.max_total, Duration::from_secs(300));

    let store = config.store.expect("store section");
    assert_eq!(store.ingest.required_labels.len(), 3);
    match &store.alerting.rules[0].condition {
        ConditionConfig::CountOverTime { window, threshold } => {
            assert_eq!(*window, Duration::from_secs(300));
            assert_eq!(*threshold, 100.0);
        }
        other => panic!("unexpected condition {:?}", other),
    }
}

#[test]
fn test_store_only_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
store:
  listen: 127.0.0.1:3100
  relations:
    - application: tester
      model: lma
      model_uuid: abc
"#,
    );

    let config = load_config(&path).unwrap();
    assert!(config.agent.is_none());
    let store = config.store.unwrap();
    assert_eq!(store.relations[0].model_uuid, "abc");
    assert_eq!(store.query.default_limit, 100);
    assert_eq!(store.alerting.interval, Duration::from_secs(60));
}

#[test]
fn test_env_vars_expanded() {
    std::env::set_var("LOGRELAY_CFG_TEST_UUID", "uuid-from-env");
    std::env::set_var("LOGRELAY_CFG_TEST_DIR", "/var/log/from-env");

    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
agent:
  topology:
    application: tester
    model: lma
    model_uuid: $env{LOGRELAY_CFG_TEST_UUID}
  files:
    - path: $env{LOGRELAY_CFG_TEST_DIR}/app.log
"#,
    );

    let agent = load_config(&path).unwrap().agent.unwrap();
    assert_eq!(agent.topology.model_uuid, "uuid-from-env");
    assert_eq!(agent.files[0].path.to_str(), Some("/var/log/from-env/app.log"));

    std::env::remove_var("LOGRELAY_CFG_TEST_UUID");
    std::env::remove_var("LOGRELAY_CFG_TEST_DIR");
}

#[test]
fn test_all_errors_reported_together() {
    let errors = validation_errors(
        r#"
agent:
  listen: not-an-address
  topology:
    application: ""
    model: lma
    model_uuid: abc
  files:
    - path: /var/log/a.log
    - path: /var/log/a.log
  forwarder:
    lanes: 0
store:
  ingest:
    required_labels: ["9bad"]
"#,
    );

    assert!(errors.iter().any(|e| e.contains("agent.listen")));
    assert!(errors.iter().any(|e| e.contains("topology.application")));
    assert!(errors.iter().any(|e| e.contains("listed twice")));
    assert!(errors.iter().any(|e| e.contains("lanes")));
    assert!(errors.iter().any(|e| e.contains("9bad")));
}

#[test]
fn test_file_forwarding_without_files_rejected() {
    let errors = validation_errors(
        r#"
agent:
  topology: {application: tester, model: lma, model_uuid: abc}
  file_forwarding: true
"#,
    );
    assert!(errors.iter().any(|e| e.contains("agent.files is empty")));
}

#[test]
fn test_invalid_timestamp_pattern_rejected() {
    let errors = validation_errors(
        r#"
agent:
  topology: {application: tester, model: lma, model_uuid: abc}
  files:
    - path: /var/log/a.log
      timestamp:
        pattern: '^(?P<time>\S+)'
        format: iso8601
"#,
    );
    assert!(errors.iter().any(|e| e.contains("invalid timestamp config")));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = load_config(&dir.path().join("absent.yml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_unknown_condition_type_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
store:
  alerting:
    rules:
      - alert: Odd
        selector: '{job="x"}'
        condition: {type: median, window: 1m, threshold: 1}
"#,
    );
    assert!(matches!(load_config(&path), Err(ConfigError::YamlParse(_))));
}

#[test]
fn test_env_reference_in_comment_loads() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
# Values may reference $env{LOGRELAY_UNSET_IN_COMMENT}.
store:
  listen: 127.0.0.1:3100 # or $env{LOGRELAY_UNSET_TRAILING}
"#,
    );
    assert_eq!(load_config(&path).unwrap().store.unwrap().listen, "127.0.0.1:3100");
}

#[test]
fn test_unset_env_var_in_value_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "store:\n  listen: $env{LOGRELAY_CFG_NEVER_SET}\n");
    match load_config(&path) {
        Err(ConfigError::Validation(message)) => assert!(message.contains("LOGRELAY_CFG_NEVER_SET")),
        other => panic!("expected validation error, got {:?}", other.map(|_| ())),
    }
}
