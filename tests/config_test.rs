use hamustro::config::Config;
use hamustro::dialects::DialectKind;
use secrecy::ExposeSecret;
use std::time::Duration;

const S3_CONFIG: &str = r#"
dialect = "s3"
shared_secret = "ultrasafesecret"
maintenance_key = "letmein"
max_worker_size = 4
max_queue_size = 100
buffer_size = 2000
spread_buffer_size = true
retry_attempt = 5
auto_flush_interval = 300
masked_ip = true

[s3]
bucket = "events"
blob_path = "raw/{date}"
file_format = "csv"
region = "eu-west-1"
"#;

#[test]
fn config_parses_every_setting() {
    let config = Config::from_toml_str(S3_CONFIG).unwrap();
    config.validate().unwrap();

    assert_eq!(config.dialect_kind().unwrap(), DialectKind::S3);
    assert_eq!(config.shared_secret.expose_secret(), "ultrasafesecret");
    assert_eq!(
        config.maintenance_key.as_ref().unwrap().expose_secret(),
        "letmein"
    );
    assert_eq!(config.max_queue_size(), 100);
    assert_eq!(config.buffer_size(), 2000);
    assert_eq!(config.retry_attempt(), 5);
    assert_eq!(config.auto_flush_interval(), Some(Duration::from_secs(300)));
    assert!(config.spread_buffer_size);
    assert!(config.masked_ip);
    assert!(config.signature);

    let s3 = config.s3.as_ref().unwrap();
    assert_eq!(s3.bucket, "events");
    assert_eq!(s3.file_format, "csv");
    assert_eq!(s3.region.as_deref(), Some("eu-west-1"));

    let options = config.worker_options();
    assert_eq!(options.buffer_size, 2000);
    assert_eq!(options.retry_attempt, 5);
    assert!(options.spread_buffer);
}

#[test]
fn config_defaults_apply_for_zero_values() {
    let config = Config::from_toml_str(
        r#"
dialect = "file"
shared_secret = "s"

[file]
file_path = "/tmp/events"
file_format = "json"
"#,
    )
    .unwrap();
    config.validate().unwrap();

    assert_eq!(config.retry_attempt(), 3);
    assert_eq!(config.auto_flush_interval(), None);
    assert!(config.maintenance_key.is_none());
    assert!(!config.masked_ip);
    assert!(config.signature);
}

#[test]
fn signature_can_be_turned_off() {
    let config = Config::from_toml_str(
        r#"
dialect = "file"
shared_secret = "s"
signature = false
"#,
    )
    .unwrap();
    assert!(!config.signature);
}

#[test]
fn empty_maintenance_key_disables_flush_endpoint() {
    let config = Config::from_toml_str(
        r#"
dialect = "file"
shared_secret = "s"
maintenance_key = ""
"#,
    )
    .unwrap();
    assert!(config.maintenance_key.is_none());
}

#[test]
fn validate_requires_dialect_and_secret() {
    let missing_secret = Config::from_toml_str(r#"dialect = "file""#).unwrap();
    assert!(missing_secret.validate().is_err());

    let missing_dialect = Config::from_toml_str(r#"shared_secret = "s""#).unwrap();
    assert!(missing_dialect.validate().is_err());

    assert!(Config::default().validate().is_err());
}

#[test]
fn validate_rejects_unknown_dialect() {
    let config = Config::from_toml_str(
        r#"
dialect = "postgres"
shared_secret = "s"
"#,
    )
    .unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("postgres"));
}

#[test]
fn validate_requires_dialect_section() {
    let config = Config::from_toml_str(
        r#"
dialect = "s3"
shared_secret = "s"
"#,
    )
    .unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("[s3]"));
}

#[test]
fn validate_rejects_unknown_file_format() {
    let config = Config::from_toml_str(
        r#"
dialect = "file"
shared_secret = "s"

[file]
file_path = "/tmp/events"
file_format = "xml"
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn sns_section_is_parsed_and_validated() {
    let config = Config::from_toml_str(
        r#"
dialect = "SNS"
shared_secret = "s"

[sns]
topic_arn = "arn:aws:sns:eu-west-1:123456789012:events"
region = "eu-west-1"
"#,
    )
    .unwrap();
    config.validate().unwrap();
    assert_eq!(config.dialect_kind().unwrap(), DialectKind::Sns);
    assert_eq!(config.sns.as_ref().unwrap().region.as_deref(), Some("eu-west-1"));

    let missing_topic = Config::from_toml_str(
        r#"
dialect = "sns"
shared_secret = "s"

[sns]
topic_arn = ""
"#,
    )
    .unwrap();
    assert!(missing_topic.validate().is_err());

    let missing_section = Config::from_toml_str(
        r#"
dialect = "sns"
shared_secret = "s"
"#,
    )
    .unwrap();
    let err = missing_section.validate().unwrap_err();
    assert!(err.to_string().contains("[sns]"));
}

#[test]
fn file_compress_flag_defaults_off() {
    let config = Config::from_toml_str(
        r#"
dialect = "file"
shared_secret = "s"

[file]
file_path = "/tmp/events"
file_format = "csv"
compress = true
"#,
    )
    .unwrap();
    config.validate().unwrap();
    assert!(config.file.as_ref().unwrap().compress);

    let plain = Config::from_toml_str(
        r#"
[file]
file_path = "/tmp/events"
file_format = "csv"
"#,
    )
    .unwrap();
    assert!(!plain.file.as_ref().unwrap().compress);
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(Config::from_toml_str("dialect = ").is_err());
    assert!(Config::from_toml_str("max_worker_size = \"many\"").is_err());
}

#[test]
fn load_reads_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hamustro.toml");
    std::fs::write(&path, S3_CONFIG).unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.dialect, "s3");

    assert!(Config::load(&dir.path().join("missing.toml")).is_err());
}

// Every assertion on the worker count lives here: the override is process-wide.
#[test]
fn worker_count_prefers_env_then_file_then_cpus() {
    let from_file = Config::from_toml_str("max_worker_size = 4").unwrap();
    let unset = Config::from_toml_str("").unwrap();

    unsafe {
        std::env::remove_var("HAMUSTRO_MAX_WORKER_SIZE");
    }
    assert_eq!(from_file.max_worker_size(), 4);
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    assert_eq!(unset.max_worker_size(), cpus + 1);
    assert_eq!(from_file.dispatcher_config().max_workers, 4);

    unsafe {
        std::env::set_var("HAMUSTRO_MAX_WORKER_SIZE", "7");
    }
    assert_eq!(from_file.max_worker_size(), 7);
    assert_eq!(unset.max_worker_size(), 7);

    // Zero or garbage falls through to the file value.
    unsafe {
        std::env::set_var("HAMUSTRO_MAX_WORKER_SIZE", "0");
    }
    assert_eq!(from_file.max_worker_size(), 4);

    unsafe {
        std::env::remove_var("HAMUSTRO_MAX_WORKER_SIZE");
    }
}
