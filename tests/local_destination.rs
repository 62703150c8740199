//! End-to-end runs against a mock archive and a local-directory destination

mod common;

use common::{date, drain, local_config, not_published, parquet_body, serve};
use tripdata_loader::{Event, Outcome, Phase, Pipeline};
use wiremock::MockServer;

#[tokio::test]
async fn delivers_published_months_and_reports_missing_ones() {
    let server = MockServer::start().await;
    let jan = parquet_body("2019-01");
    serve(&server, "yellow_tripdata_2019-01.parquet", jan.clone()).await;
    not_published(&server, "yellow_tripdata_2019-02.parquet").await;
    serve(&server, "yellow_tripdata_2019-03.parquet", parquet_body("2019-03")).await;

    let staging = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    let config = local_config(
        &server,
        staging.path(),
        destination.path(),
        date(2019, 1, 1),
        date(2019, 3, 31),
        &["yellow"],
    );

    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.delivered.len(), 2);
    assert_eq!(summary.fetch_failed.len(), 1);
    assert_eq!(summary.abandoned.len(), 0);
    assert_eq!(summary.exit_code(), 1);

    let uploaded = destination
        .path()
        .join("nyc-taxi-raw/yellow_tripdata_2019-01.parquet");
    assert_eq!(std::fs::read(uploaded).unwrap(), jan);
    assert!(
        !destination
            .path()
            .join("nyc-taxi-raw/yellow_tripdata_2019-02.parquet")
            .exists()
    );

    let report = summary.to_string();
    assert!(report.contains("delivered: 2, abandoned: 0, fetch-failed: 1, cancelled: 0"));
    assert!(report.contains("yellow_tripdata_2019-02.parquet"));
}

#[tokio::test]
async fn prefix_and_multiple_categories_land_under_deterministic_keys() {
    let server = MockServer::start().await;
    for name in [
        "yellow_tripdata_2020-11.parquet",
        "yellow_tripdata_2020-12.parquet",
        "green_tripdata_2020-11.parquet",
        "green_tripdata_2020-12.parquet",
    ] {
        serve(&server, name, parquet_body(name)).await;
    }

    let staging = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    let mut config = local_config(
        &server,
        staging.path(),
        destination.path(),
        date(2020, 11, 15),
        date(2020, 12, 1),
        &["yellow", "green"],
    );
    config.destination.prefix = Some("raw/".to_string());

    let pipeline = Pipeline::new(config).unwrap();
    let summary = pipeline.run().await.unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.exit_code(), 0);
    let names: Vec<&str> = summary.delivered.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "yellow_tripdata_2020-11.parquet",
            "yellow_tripdata_2020-12.parquet",
            "green_tripdata_2020-11.parquet",
            "green_tripdata_2020-12.parquet",
        ]
    );
    for name in names {
        let object = destination.path().join("nyc-taxi-raw/raw").join(name);
        assert!(object.is_file(), "{} missing", object.display());
    }
}

#[tokio::test]
async fn large_files_are_streamed_and_verified() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    serve(&server, "fhv_tripdata_2019-01.parquet", body.clone()).await;

    let staging = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    let mut config = local_config(
        &server,
        staging.path(),
        destination.path(),
        date(2019, 1, 1),
        date(2019, 1, 31),
        &["fhv"],
    );
    config.destination.chunk_size = 64 * 1024;

    let pipeline = Pipeline::new(config).unwrap();
    let mut events = pipeline.subscribe();
    let summary = pipeline.run().await.unwrap();

    assert!(summary.is_success());
    let record = &summary.delivered[0];
    assert_eq!(record.phase, Phase::Upload);
    assert_eq!(record.outcome, Outcome::Succeeded);
    assert_eq!(
        std::fs::read(
            destination
                .path()
                .join("nyc-taxi-raw/fhv_tripdata_2019-01.parquet")
        )
        .unwrap(),
        body
    );
    assert!(drain(&mut events).contains(&Event::Delivered {
        name: "fhv_tripdata_2019-01.parquet".into(),
        attempts: 1,
    }));
}

#[tokio::test]
async fn interrupted_staging_is_resumed_without_redownload() {
    let server = MockServer::start().await;
    serve(&server, "yellow_tripdata_2019-02.parquet", parquet_body("feb")).await;

    let staging = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    // January was staged by an earlier run that stopped before uploading.
    let earlier = parquet_body("staged earlier");
    std::fs::write(staging.path().join("yellow_tripdata_2019-01.parquet"), &earlier).unwrap();

    let config = local_config(
        &server,
        staging.path(),
        destination.path(),
        date(2019, 1, 1),
        date(2019, 2, 1),
        &["yellow"],
    );
    let pipeline = Pipeline::new(config).unwrap();
    let mut events = pipeline.subscribe();
    let summary = pipeline.run().await.unwrap();

    assert!(summary.is_success());
    assert!(drain(&mut events).contains(&Event::Staged {
        name: "yellow_tripdata_2019-01.parquet".into(),
        size_bytes: earlier.len() as u64,
        reused: true,
    }));
    assert_eq!(
        std::fs::read(
            destination
                .path()
                .join("nyc-taxi-raw/yellow_tripdata_2019-01.parquet")
        )
        .unwrap(),
        earlier
    );
}
