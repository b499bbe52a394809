//! Tests for configuration parsing and overrides.

use std::path::PathBuf;
use std::time::Duration;

use smsflow::config::SmsflowConfig;

#[test]
fn full_toml_is_parsed() {
    let config = SmsflowConfig::from_toml(
        r#"
[database]
path = "/var/lib/smsflow/events.db"

[server]
bind = "0.0.0.0:9000"
auth_token = "s3cret"

[scheduler]
endpoint = "https://smsflow.example.com/v1/events"
timeout_secs = 10
queue_name = "expirations"

[expiration]
default_duration_secs = 120

[logging]
level = "debug"
logs_dir = "/var/log/smsflow"
"#,
    )
    .expect("valid config");

    assert_eq!(config.database.path, PathBuf::from("/var/lib/smsflow/events.db"));
    assert_eq!(config.server.bind, "0.0.0.0:9000");
    assert_eq!(config.server.auth_token.as_deref(), Some("s3cret"));
    assert_eq!(config.scheduler.endpoint, "https://smsflow.example.com/v1/events");
    assert_eq!(config.scheduler.timeout_secs, 10);
    assert_eq!(config.scheduler.queue_name, "expirations");
    assert_eq!(config.expiration.default_duration_secs, 120);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.logs_dir, Some(PathBuf::from("/var/log/smsflow")));
}

#[test]
fn partial_toml_keeps_defaults() {
    let config = SmsflowConfig::from_toml(
        r#"
[expiration]
default_duration_secs = 30
"#,
    )
    .expect("valid config");

    assert_eq!(config.expiration.default_duration_secs, 30);
    assert_eq!(config.server.bind, "127.0.0.1:8000");
    assert_eq!(config.scheduler.timeout_secs, 30);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(SmsflowConfig::from_toml("[server\nbind = 1").is_err());
    assert!(SmsflowConfig::from_toml("[expiration]\ndefault_duration_secs = \"soon\"").is_err());
}

#[test]
fn env_overrides_win_over_file() {
    let mut config = SmsflowConfig::from_toml(
        r#"
[server]
bind = "0.0.0.0:9000"
auth_token = "from-file"
"#,
    )
    .expect("valid config");

    config.apply_overrides(|key| match key {
        "SMSFLOW_DATABASE_PATH" => Some("/tmp/override.db".to_owned()),
        "SMSFLOW_BIND" => Some("127.0.0.1:7000".to_owned()),
        "SMSFLOW_SCHEDULER_ENDPOINT" => Some("http://127.0.0.1:7000/v1/events".to_owned()),
        "SMSFLOW_SCHEDULER_TIMEOUT_SECS" => Some("3".to_owned()),
        "SMSFLOW_EXPIRATION_SECS" => Some("45".to_owned()),
        "SMSFLOW_LOG_LEVEL" => Some("smsflow=trace".to_owned()),
        "SMSFLOW_LOGS_DIR" => Some("/tmp/smsflow-logs".to_owned()),
        _ => None,
    });

    assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
    assert_eq!(config.server.bind, "127.0.0.1:7000");
    assert_eq!(config.server.auth_token.as_deref(), Some("from-file"));
    assert_eq!(config.scheduler.endpoint, "http://127.0.0.1:7000/v1/events");
    assert_eq!(config.scheduler.timeout_secs, 3);
    assert_eq!(config.expiration.default_duration_secs, 45);
    assert_eq!(config.logging.level, "smsflow=trace");
    assert_eq!(config.logging.logs_dir, Some(PathBuf::from("/tmp/smsflow-logs")));
}

#[test]
fn empty_auth_token_override_disables_auth() {
    let mut config = SmsflowConfig::default();
    config.server.auth_token = Some("from-file".to_owned());

    config.apply_overrides(|key| (key == "SMSFLOW_AUTH_TOKEN").then(String::new));

    assert!(config.server.auth_token.is_none());
}

#[test]
fn expiration_target_combines_sections() {
    let mut config = SmsflowConfig::default();
    config.server.auth_token = Some("token".to_owned());
    config.expiration.default_duration_secs = 90;

    let target = config.expiration_target();
    assert_eq!(target.endpoint, "http://127.0.0.1:8000/v1/events");
    assert_eq!(target.queue_name, "events");
    assert_eq!(target.auth_token.as_deref(), Some("token"));
    assert_eq!(target.default_duration, Duration::from_secs(90));
}
