//! End-to-end harvest of a mocked Met API into a real data directory
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use std::sync::Arc;

use common::MemoryRepository;
use musea_harvest::harvester::source_status;
use musea_harvest::observer::MemoryObserver;
use musea_harvest::storage::ArtworkRepository;
use musea_harvest::{HarvestConfig, Harvester, RunState, SourceCode};

async fn mock_met(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 4, "objectIDs": [4, 3, 2, 1]})))
        .expect(1)
        .mount(server)
        .await;

    for id in 1..=4u64 {
        Mock::given(method("GET"))
            .and(path(format!("/objects/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objectID": id,
                "title": format!("Study {}", id),
                "artistDisplayName": "Winslow Homer",
                // Object 4 is still in copyright
                "isPublicDomain": id != 4,
                "primaryImage": format!("{}/images/{}.jpg", server.uri(), id),
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/images/{}.jpg", id)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(common::JPEG.to_vec()))
            .mount(server)
            .await;
    }
}

fn config(data_dir: &TempDir, server: &MockServer) -> HarvestConfig {
    let mut config = HarvestConfig {
        data_dir: data_dir.path().to_path_buf(),
        ..HarvestConfig::default()
    };
    for code in SourceCode::ALL {
        config.source_mut(code).enabled = false;
    }
    let met = config.source_mut(SourceCode::Met);
    met.enabled = true;
    met.base_url = server.uri();
    met.requests_per_second = 1000.0;
    met.error_retry_delay_secs = 0;
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn test_harvest_met_into_data_dir() {
    let server = MockServer::start().await;
    mock_met(&server).await;
    let data_dir = TempDir::new().unwrap();
    let config = config(&data_dir, &server);

    let harvester = Harvester::open(config.clone()).await.unwrap();
    let reports = harvester.run(&config.enabled_sources()).await;
    assert_eq!(reports.len(), 1);

    let summary = reports[0].result.as_ref().unwrap();
    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.successful, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_bytes, 3 * common::JPEG.len() as u64);

    let mut images: Vec<String> = std::fs::read_dir(config.images_dir(SourceCode::Met))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    images.sort();
    assert_eq!(images.len(), 3);
    assert!(images.iter().all(|name| name.starts_with("MET_")));
    assert!(images[0].contains("Study 1"));

    let status = source_status(&config, SourceCode::Met);
    assert!(status.started);
    assert_eq!(status.statistics.successful, 3);
    assert_eq!(status.error_breakdown.get("skipped"), Some(&1));
    assert!(config.candidates_path(SourceCode::Met).exists());
}

#[tokio::test]
async fn test_second_run_fetches_nothing_new() {
    let server = MockServer::start().await;
    mock_met(&server).await;
    let data_dir = TempDir::new().unwrap();
    let config = config(&data_dir, &server);

    let harvester = Harvester::open(config.clone()).await.unwrap();
    harvester.run(&[SourceCode::Met]).await;
    let image_requests = |requests: &[wiremock::Request]| {
        requests
            .iter()
            .filter(|r| r.url.path().starts_with("/images/"))
            .count()
    };
    let first = image_requests(&server.received_requests().await.unwrap());

    let harvester = Harvester::open(config.clone()).await.unwrap();
    let reports = harvester.run(&[SourceCode::Met]).await;
    let summary = reports[0].result.as_ref().unwrap();

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.run.downloaded, 0);
    assert_eq!(summary.successful, 3);
    assert_eq!(first, 3);
    assert_eq!(image_requests(&server.received_requests().await.unwrap()), first);
}

#[tokio::test]
async fn test_reset_removes_everything_for_source() {
    let server = MockServer::start().await;
    mock_met(&server).await;
    let data_dir = TempDir::new().unwrap();
    let config = config(&data_dir, &server);

    let harvester = Harvester::open(config.clone()).await.unwrap();
    harvester.run(&[SourceCode::Met]).await;

    let report = harvester.reset(SourceCode::Met, None).await.unwrap();
    assert_eq!(report.forgotten, 4);
    assert_eq!(report.images_removed, 3);
    assert_eq!(report.rows_deleted, 3);

    assert!(!config.candidates_path(SourceCode::Met).exists());
    assert_eq!(source_status(&config, SourceCode::Met).statistics.total_processed, 0);

    let repository = musea_harvest::storage::SqliteArtworkRepository::open(&config.database_path())
        .await
        .unwrap();
    assert_eq!(repository.count("met").await.unwrap(), 0);
}

#[tokio::test]
async fn test_panicking_source_keeps_sibling_report() {
    let server = MockServer::start().await;
    mock_met(&server).await;
    let data_dir = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    for id in [500u64, 501] {
        let body = json!({
            "id": id,
            "title": format!("Dump {}", id),
            "share_license_status": "CC0",
            "images": {"print": {"url": format!("{}/images/1.jpg", server.uri())}}
        });
        std::fs::write(dump.path().join(format!("{}.json", id)), body.to_string()).unwrap();
    }

    let mut config = config(&data_dir, &server);
    config.max_workers = 2;
    let cma = config.source_mut(SourceCode::CmaDump);
    cma.enabled = true;
    cma.dump_dir = Some(dump.path().to_path_buf());
    cma.error_retry_delay_secs = 0;
    config.validate().unwrap();

    let repository = Arc::new(MemoryRepository::new().crash_after_upsert("500"));
    let observer = Arc::new(MemoryObserver::new());
    let harvester = Harvester::new(config.clone(), repository.clone(), observer.clone());
    let reports = harvester.run(&[SourceCode::Met, SourceCode::CmaDump]).await;

    assert_eq!(reports.len(), 2);
    let met = reports.iter().find(|r| r.source == SourceCode::Met).unwrap();
    let summary = met.result.as_ref().unwrap();
    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.successful, 3);

    let cma = reports.iter().find(|r| r.source == SourceCode::CmaDump).unwrap();
    let error = cma.result.as_ref().unwrap_err();
    assert!(error.is_fatal());
    assert!(error.to_string().contains("simulated crash after storing 500"));

    let summaries = observer.summaries();
    assert!(summaries
        .iter()
        .any(|s| s.source == SourceCode::Met && s.state == RunState::Completed));
    assert!(summaries
        .iter()
        .any(|s| s.source == SourceCode::CmaDump && matches!(s.state, RunState::Failed { .. })));
    assert_eq!(repository.count("met").await.unwrap(), 3);
}
