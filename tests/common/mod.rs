//! Common test utilities for tripdata-loader integration tests

#![allow(dead_code)]

use chrono::NaiveDate;
use std::path::Path;
use std::time::Duration;
use tripdata_loader::{Category, Config, Event, StoreBackend};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Parquet magic followed by a recognizable payload
pub fn parquet_body(label: &str) -> Vec<u8> {
    let mut body = b"PAR1".to_vec();
    body.extend_from_slice(label.as_bytes());
    body.extend_from_slice(b"PAR1");
    body
}

/// Serve `body` for one canonical name
pub async fn serve(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/trip-data/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Answer 404 for one canonical name
pub async fn not_published(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/trip-data/{}", name)))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

/// Configuration targeting the mock archive and a local-directory destination
pub fn local_config(
    server: &MockServer,
    staging: &Path,
    destination_root: &Path,
    start: NaiveDate,
    end: NaiveDate,
    categories: &[&str],
) -> Config {
    let mut config = Config::default();
    config.schedule.start = start;
    config.schedule.end = end;
    config.schedule.categories = categories
        .iter()
        .map(|c| Category::new(*c).unwrap())
        .collect();
    config.source.base_url = format!("{}/trip-data/", server.uri());
    config.source.request_timeout = Duration::from_secs(5);
    config.staging.dir = staging.to_path_buf();
    config.destination.container = "nyc-taxi-raw".to_string();
    config.destination.backend = StoreBackend::Local {
        root: destination_root.to_path_buf(),
    };
    config.retry.backoff = Duration::ZERO;
    config.workers = 2;
    config
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Drain every event currently buffered on `rx`
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
