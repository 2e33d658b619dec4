//! Integration test: the on-disk JSON configuration format the CLI loads.

use postie::config::Config;

#[test]
fn minimal_config_fills_in_defaults() {
    let json = r#"{
        "servers": [
            { "host": "news.example.com", "port": 563, "ssl": true }
        ],
        "posting": {
            "default_from": "poster@example.com",
            "message_id_domain": "example.com"
        },
        "output_dir": "/var/postie/out"
    }"#;

    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.servers.len(), 1);
    assert_eq!(config.servers[0].max_connections, 10);
    assert!(config.servers[0].enabled);
    assert!(config.servers[0].post);
    assert!(!config.servers[0].check_only);
    assert_eq!(config.posting.article_size_bytes, 750_000);
    assert_eq!(config.posting.max_retries, 3);
    assert_eq!(config.posting.retry_delay, std::time::Duration::from_secs(5));
    assert_eq!(config.queue.lease_ms, 60_000);
    assert_eq!(config.queue.max_receives, 3);
    assert_eq!(config.output_dir, std::path::PathBuf::from("/var/postie/out"));
}

#[test]
fn round_trips_through_serialize_and_deserialize() {
    let json = r#"{
        "servers": [],
        "posting": { "default_from": "a@b.com", "message_id_domain": "b.com" },
        "output_dir": "/tmp/out"
    }"#;

    let config: Config = serde_json::from_str(json).unwrap();
    let serialized = serde_json::to_string(&config).unwrap();
    let round_tripped: Config = serde_json::from_str(&serialized).unwrap();

    assert_eq!(config.posting.article_size_bytes, round_tripped.posting.article_size_bytes);
    assert_eq!(config.output_dir, round_tripped.output_dir);
}

#[test]
fn rejects_config_missing_required_output_dir() {
    let json = r#"{ "servers": [] }"#;
    let result: Result<Config, _> = serde_json::from_str(json);
    assert!(result.is_err());
}
