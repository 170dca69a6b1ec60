use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use crate::labels::is_valid_label_name;
use crate::source::timestamp::TimestampExtractor;
use crate::store::selector::Selector;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    load_config_str(&yaml_string)
}

/// Parse and validate a config from YAML text.
pub fn load_config_str(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml_string);
    if unexpanded.is_empty() {
        return Ok(());
    }

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    if let Some(agent) = config.agent.as_mut() {
        for file in &mut agent.files {
            file.path = expand_tilde(&file.path);
        }
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.agent.is_none() && config.store.is_none() {
        errors.push("config must contain an 'agent' section, a 'store' section, or both".to_string());
    }

    if let Some(agent) = &config.agent {
        validate_agent(agent, &mut errors);
    }

    if let Some(store) = &config.store {
        validate_store(store, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_agent(agent: &AgentConfig, errors: &mut Vec<String>) {
    check_socket_addr("agent.listen", &agent.listen, errors);

    let topology = &agent.topology;
    for (name, value) in [
        ("application", &topology.application),
        ("model", &topology.model),
        ("model_uuid", &topology.model_uuid),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("agent.topology.{} must not be empty", name));
        }
    }

    if let Some(endpoint) = &agent.endpoint {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            errors.push(format!(
                "agent.endpoint '{}' must start with http:// or https://",
                endpoint
            ));
        }
    }

    if !agent.file_forwarding && !agent.syslog {
        errors.push("agent enables neither file_forwarding nor syslog".to_string());
    }

    if agent.file_forwarding {
        if agent.files.is_empty() {
            errors.push("agent.file_forwarding is enabled but agent.files is empty".to_string());
        }
        let mut seen = HashSet::new();
        for file in &agent.files {
            if !seen.insert(file.path.clone()) {
                errors.push(format!("file '{}' is listed twice", file.path.display()));
            }
            if let Some(ts) = &file.timestamp {
                if let Err(e) = TimestampExtractor::new(&ts.pattern, &ts.format) {
                    errors.push(format!(
                        "file '{}': invalid timestamp config: {}",
                        file.path.display(),
                        e
                    ));
                }
            }
        }
    }

    if agent.syslog {
        check_socket_addr("agent.syslog_receiver.listen", &agent.syslog_receiver.listen, errors);
        if agent.syslog_receiver.max_datagram_size == 0 {
            errors.push("agent.syslog_receiver.max_datagram_size must be positive".to_string());
        }
    }

    let forwarder = &agent.forwarder;
    if forwarder.batch_size == 0 {
        errors.push("agent.forwarder.batch_size must be at least 1".to_string());
    }
    if forwarder.batch_bytes == 0 {
        errors.push("agent.forwarder.batch_bytes must be positive".to_string());
    }
    if forwarder.lanes == 0 {
        errors.push("agent.forwarder.lanes must be at least 1".to_string());
    }
    if forwarder.max_pending_batches == 0 {
        errors.push("agent.forwarder.max_pending_batches must be at least 1".to_string());
    }
    if forwarder.retry.base_delay > forwarder.retry.max_delay {
        errors.push("agent.forwarder.retry.base_delay exceeds max_delay".to_string());
    }
    if forwarder.retry.max_attempts == Some(0) {
        errors.push("agent.forwarder.retry.max_attempts must be at least 1".to_string());
    }
    if agent.channel_capacity == 0 {
        errors.push("agent.channel_capacity must be at least 1".to_string());
    }
}

fn validate_store(store: &StoreConfig, errors: &mut Vec<String>) {
    check_socket_addr("store.listen", &store.listen, errors);

    for name in &store.ingest.required_labels {
        if !is_valid_label_name(name) {
            errors.push(format!("store.ingest.required_labels: invalid label name '{}'", name));
        }
    }

    if store.query.default_limit == 0 || store.query.default_limit > store.query.max_limit {
        errors.push("store.query.default_limit must be between 1 and max_limit".to_string());
    }

    for relation in &store.relations {
        if relation.application.is_empty() || relation.model.is_empty() || relation.model_uuid.is_empty() {
            errors.push(format!(
                "store.relations: relation for '{}' has empty fields",
                relation.application
            ));
        }
    }

    let mut alert_names = HashSet::new();
    for rule in &store.alerting.rules {
        if !alert_names.insert(rule.alert.as_str()) {
            errors.push(format!("alert rule '{}' is defined twice", rule.alert));
        }
        if let Err(e) = Selector::parse(&rule.selector) {
            errors.push(format!("alert rule '{}': {}", rule.alert, e));
        }
        let (window, threshold) = match &rule.condition {
            ConditionConfig::CountOverTime { window, threshold } => (window, threshold),
            ConditionConfig::Rate { window, threshold } => (window, threshold),
        };
        if window.is_zero() {
            errors.push(format!("alert rule '{}': window must be positive", rule.alert));
        }
        if !threshold.is_finite() || *threshold < 0.0 {
            errors.push(format!(
                "alert rule '{}': threshold must be a non-negative number",
                rule.alert
            ));
        }
        for name in rule.labels.keys().chain(rule.require_labels.iter()) {
            if !is_valid_label_name(name) {
                errors.push(format!("alert rule '{}': invalid label name '{}'", rule.alert, name));
            }
        }
    }

    if store.alerting.interval.is_zero() {
        errors.push("store.alerting.interval must be positive".to_string());
    }
}

fn check_socket_addr(field: &str, value: &str, errors: &mut Vec<String>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(format!("{}: '{}' is not a valid socket address", field, value));
    }
}
