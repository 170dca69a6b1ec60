pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGRELAY CONFIGURATION
# =============================================================================
# One binary, two roles. A role runs when its section is present:
#
#   agent:   tail files and receive syslog, label records, push them to a store
#   store:   accept pushes, index streams, answer queries, evaluate alert rules
#
# Both sections may live in one file; `logrelay agent` and `logrelay store`
# each read only their own section.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logrelay/config.yml
#   3. /etc/logrelay/config.yml
#
# Values may reference environment variables as $env{NAME}.

# =============================================================================
# AGENT
# =============================================================================

agent:
  # Status and control API (GET /agent/status, PUT|DELETE /agent/endpoint)
  listen: 127.0.0.1:9080

  # Store base URL. Leave unset until the relation to a store exists; records
  # are then held and retried, and eventually counted as lost.
  endpoint: http://127.0.0.1:3100

  # Deployment identity added to every record
  topology:
    application: my-app
    model: my-model
    model_uuid: 00000000-0000-0000-0000-000000000000
    # unit: my-app/0

  file_forwarding: true
  syslog: false

  files:
    - path: /var/log/my-app/app.log
      # job defaults to juju_<model>_<uuid prefix>_<application>
      # job: my-app
      # Optional: take the record timestamp from the line instead of read time.
      # Pattern needs a named 'ts' group; format is 'iso8601', 'epoch',
      # 'epoch_ms' or a strptime string.
      # timestamp:
      #   pattern: '^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?Z)'
      #   format: iso8601
      read:
        start: beginning    # beginning | end
        follow: true
        poll_interval: 250ms

  syslog_receiver:
    listen: 127.0.0.1:1514
    label_structured_data: true
    use_incoming_timestamp: false

  forwarder:
    batch_size: 1000
    batch_bytes: 1048576
    batch_wait: 1s
    lanes: 4
    max_pending_batches: 16
    timeout: 10s
    retry:
      max_attempts: 10
      base_delay: 500ms
      max_delay: 30s
      max_total: 5m

  channel_capacity: 10000
  shutdown_timeout: 5s

# =============================================================================
# STORE
# =============================================================================

store:
  listen: 0.0.0.0:3100

  ingest:
    required_labels: [juju_application, juju_model, juju_model_uuid]
    reject_old_samples_max_age: 1h
    creation_grace_period: 10m
    max_line_size: 262144
    # Reject pushes from applications without a relation below
    require_relation: false

  query:
    default_limit: 100
    max_limit: 5000

  # Relations known at startup. More can be added with
  # PUT /api/v1/relations/<application>.
  relations:
    - application: my-app
      model: my-model
      model_uuid: 00000000-0000-0000-0000-000000000000

  alerting:
    interval: 1m
    rules:
      - alert: TooManyErrors
        selector: '{juju_application="my-app", job=~".+"}'
        condition:
          type: count_over_time
          window: 5m
          threshold: 100
        labels:
          severity: warning
        annotations:
          summary: More than 100 lines in 5 minutes
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_str;

    #[test]
    fn test_starter_config_loads() {
        let config = load_config_str(&generate_starter_config()).unwrap();

        let agent = config.agent.unwrap();
        assert_eq!(agent.topology.application, "my-app");
        assert_eq!(agent.files.len(), 1);

        let store = config.store.unwrap();
        assert_eq!(store.alerting.rules.len(), 1);
        assert_eq!(store.relations[0].application, "my-app");
    }
}
