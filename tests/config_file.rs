//! Loading run configuration from JSON files

use std::time::Duration;
use tripdata_loader::{ArtifactFormat, Config, StoreBackend};

#[test]
fn full_config_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loader.json");
    std::fs::write(
        &path,
        r#"{
            "schedule": {
                "start": "2019-01-01",
                "end": "2020-12-31",
                "categories": ["yellow", "green"],
                "format": "csv_gz"
            },
            "source": {
                "base_url": "https://github.com/DataTalksClub/nyc-tlc-data/releases/download/{category}/",
                "request_timeout": 300
            },
            "staging": { "dir": "/tmp/tripdata" },
            "destination": {
                "container": "nyc-taxi-raw",
                "prefix": "raw/",
                "backend": { "kind": "s3", "region": "eu-west-1" }
            },
            "retry": { "max_attempts": 5, "backoff": 2.5 },
            "workers": 8
        }"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.schedule.categories.len(), 2);
    assert_eq!(config.schedule.format, ArtifactFormat::CsvGz);
    assert_eq!(config.source.request_timeout, Duration::from_secs(300));
    assert_eq!(config.destination.prefix.as_deref(), Some("raw/"));
    assert_eq!(
        config.destination.backend,
        StoreBackend::S3 {
            region: Some("eu-west-1".into()),
            endpoint: None,
            allow_http: false,
        }
    );
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff, Duration::from_millis(2500));
    assert_eq!(config.workers, 8);
    // Unset values keep their defaults
    assert_eq!(config.destination.chunk_size, 8 * 1024 * 1024);
}

#[test]
fn invalid_file_values_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loader.json");
    std::fs::write(
        &path,
        r#"{ "destination": { "container": "trips" }, "workers": 0 }"#,
    )
    .unwrap();

    let err = Config::from_file(&path).unwrap_err();
    assert_eq!(err.code(), "config_error");
}

#[test]
fn unknown_category_label_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loader.json");
    std::fs::write(
        &path,
        r#"{ "schedule": { "categories": ["Yellow Cab"] }, "destination": { "container": "trips" } }"#,
    )
    .unwrap();

    let err = Config::from_file(&path).unwrap_err();
    assert_eq!(err.code(), "serialization_error");
}
