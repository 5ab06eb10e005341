//! End-to-end runs through the public API against an in-memory network
//!
//! The run index is a real SQLite file in a temporary directory, so these tests
//! cover what one run leaves behind for the next.

mod common;

use common::{FakeNetwork, test_config};
use batchdl::types::{Track, TrackLists, TrackState, TrackType};
use batchdl::{BatchDownloader, Event, Services};

fn wanted() -> TrackLists {
    TrackLists::from_flattened([
        Track::new("Artist", "present", "", TrackType::Normal),
        Track::new("Artist", "missing", "", TrackType::Normal),
    ])
}

async fn downloader(network: &std::sync::Arc<FakeNetwork>, config: batchdl::Config) -> BatchDownloader {
    let services = Services::new(network.clone(), network.clone());
    BatchDownloader::new(config, wanted(), services)
        .await
        .unwrap()
}

#[tokio::test]
async fn first_run_downloads_what_it_finds() {
    let temp_dir = tempfile::tempdir().unwrap();
    let network = FakeNetwork::offering(["present"]);

    let downloader = downloader(&network, test_config(temp_dir.path())).await;
    let mut events = downloader.subscribe();
    let summary = downloader.run().await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_tracks.len(), 1);
    assert!(summary.failed_tracks[0].contains("missing"));
    assert!(temp_dir.path().join("Artist - present.mp3").exists());
    assert!(temp_dir.path().join("_index.db").exists());
    assert_eq!(downloader.run_index().unwrap().record_count(), 2);

    let mut saw_complete = false;
    while let Ok(event) = events.try_recv() {
        if let Event::RunComplete { summary } = event {
            assert_eq!(summary.downloaded, 1);
            saw_complete = true;
        }
    }
    assert!(saw_complete, "a finished run reports its summary");
}

#[tokio::test]
async fn second_run_resumes_from_the_index() {
    let temp_dir = tempfile::tempdir().unwrap();
    let network = FakeNetwork::offering(["present"]);

    let mut config = test_config(temp_dir.path());
    config.skip.skip_not_found = true;

    let first = downloader(&network, config.clone()).await;
    first.run().await.unwrap();
    drop(first);

    let second = downloader(&network, config).await;
    let summary = second.run().await.unwrap();

    assert_eq!(network.attempts_for("present"), 1, "found on disk the second time");
    assert_eq!(network.attempts_for("missing"), 1, "not retried after a miss");
    assert_eq!(summary.already_exist, 1);
    assert_eq!(summary.not_found_last_time, 1);
    assert_eq!(summary.downloaded, 0);

    let lists = second.lists().await;
    let states: Vec<TrackState> = lists.entries[0].list[0].iter().map(Track::state).collect();
    assert_eq!(states, [TrackState::AlreadyExists, TrackState::NotFoundLastTime]);
}

#[tokio::test]
async fn misses_are_retried_without_skip_not_found() {
    let temp_dir = tempfile::tempdir().unwrap();
    let network = FakeNetwork::offering(["present"]);
    let config = test_config(temp_dir.path());

    downloader(&network, config.clone()).await.run().await.unwrap();
    downloader(&network, config).await.run().await.unwrap();

    assert_eq!(network.attempts_for("missing"), 2);
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let network = FakeNetwork::offering([]);
    let mut config = test_config(temp_dir.path());
    config.download.concurrent_downloads = 0;

    let services = Services::new(network.clone(), network);
    let result = BatchDownloader::new(config, wanted(), services).await;

    assert!(matches!(result, Err(batchdl::Error::Config { .. })));
}
