use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::downloader::BatchDownloader;
use crate::downloader::test_helpers::*;
use crate::error::{Error, Result};
use crate::services::{RunIndex, Services, SessionClient, SessionState};
use crate::types::{
    Event, FailureReason, Track, TrackListEntry, TrackLists, TrackState, TrackType,
};

fn failed_before(track: &Track) -> (String, Track) {
    let mut previous = track.clone();
    previous.fail(FailureReason::NoSuitableFileFound);
    (track.key(), previous)
}

fn run_index(previous: impl IntoIterator<Item = (String, Track)>) -> Arc<dyn RunIndex> {
    Arc::new(MockRunIndex {
        previous: previous.into_iter().collect::<HashMap<_, _>>(),
        ..Default::default()
    })
}

fn album_source() -> Track {
    Track::new("Artist", "", "Record", TrackType::Album)
}

#[tokio::test]
async fn existing_files_are_not_downloaded() {
    let searcher = MockSearcher::new();
    let (downloader, _temp_dir) = create_test_downloader_with(
        plain_lists(&["one", "two"]),
        searcher.clone(),
        MockInteraction::with_answers([]),
        |c| c.skip.skip_existing = true,
    )
    .await;
    let downloader =
        downloader.with_output_index(MockFileIndex::with_files([("one", "/music/one.mp3")]));

    let summary = downloader.run().await.unwrap();

    assert_eq!(searcher.calls_for("one"), 0);
    assert_eq!(searcher.calls_for("two"), 1);
    assert_eq!(summary.already_exist, 1);
    assert_eq!(summary.downloaded, 1);

    let lists = downloader.lists().await;
    let one = &lists.entries[0].list[0][0];
    assert_eq!(one.state(), TrackState::AlreadyExists);
    assert_eq!(
        one.download_path.as_deref(),
        Some(std::path::Path::new("/music/one.mp3"))
    );
}

#[tokio::test]
async fn tracks_not_found_last_time_are_skipped() {
    let searcher = MockSearcher::new();
    let mut lists = plain_lists(&["one", "two"]);
    let previous = failed_before(&lists.entries[0].list[0][0]);
    lists.entries[0].index = Some(run_index([previous]));

    let (downloader, _temp_dir) = create_test_downloader_with(
        lists,
        searcher.clone(),
        MockInteraction::with_answers([]),
        |c| c.skip.skip_not_found = true,
    )
    .await;

    let summary = downloader.run().await.unwrap();

    assert_eq!(searcher.calls_for("one"), 0);
    assert_eq!(summary.not_found_last_time, 1);
    assert_eq!(summary.downloaded, 1);
}

#[tokio::test]
async fn album_not_found_last_time_is_skipped_without_searching() {
    let searcher = MockSearcher::new();
    let mut entry = TrackListEntry::new(album_source());
    entry.index = Some(run_index([failed_before(&album_source())]));
    let mut lists = TrackLists::new();
    lists.add_entry(entry);

    let (downloader, _temp_dir) = create_test_downloader_with(
        lists,
        searcher.clone(),
        MockInteraction::with_answers([]),
        |c| c.skip.skip_not_found = true,
    )
    .await;
    let mut events = downloader.subscribe();

    downloader.run().await.unwrap();

    assert_eq!(searcher.source_searches.load(Ordering::SeqCst), 0);
    let lists = downloader.lists().await;
    assert_eq!(lists.entries[0].source.state(), TrackState::NotFoundLastTime);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ItemSkipped {
            state: TrackState::NotFoundLastTime,
            ..
        }
    )));
}

#[tokio::test]
async fn album_search_without_results_fails_the_item() {
    let searcher = MockSearcher::new();
    let mut lists = TrackLists::new();
    lists.add_entry(TrackListEntry::new(album_source()));

    let (downloader, _temp_dir) = create_test_downloader(lists, searcher.clone()).await;
    let summary = downloader.run().await.unwrap();

    assert_eq!(searcher.source_searches.load(Ordering::SeqCst), 1);
    assert_eq!(searcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(summary.failed, 1);

    let lists = downloader.lists().await;
    assert_eq!(lists.entries[0].source.state(), TrackState::Failed);
    assert_eq!(
        lists.entries[0].source.failure_reason(),
        FailureReason::NoSuitableFileFound
    );
}

#[tokio::test]
async fn album_search_results_are_downloaded() {
    let searcher = MockSearcher::new();
    *searcher.albums.lock().unwrap() =
        vec![album_group("peer", "Users\\peer\\Record", &["01", "02"])];
    let mut lists = TrackLists::new();
    lists.add_entry(TrackListEntry::new(album_source()));

    let (downloader, _temp_dir) = create_test_downloader(lists, searcher.clone()).await;
    let mut events = downloader.subscribe();
    downloader.run().await.unwrap();

    let lists = downloader.lists().await;
    assert_eq!(lists.entries[0].source.state(), TrackState::Downloaded);
    assert!(!lists.entries[0].need_source_search);

    let events = drain_events(&mut events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::SearchFinished { groups: 1, .. }))
    );
    assert!(events.iter().any(|e| matches!(e, Event::RunComplete { .. })));
}

#[tokio::test]
async fn aggregate_results_are_checked_against_local_files() {
    let searcher = MockSearcher::new();
    *searcher.aggregate.lock().unwrap() = vec![
        Track::new("Artist", "x", "", TrackType::Normal),
        Track::new("Artist", "y", "", TrackType::Normal),
    ];
    let mut lists = TrackLists::new();
    lists.add_entry(TrackListEntry::new(Track::new(
        "Artist",
        "",
        "",
        TrackType::Aggregate,
    )));

    let (downloader, _temp_dir) = create_test_downloader_with(
        lists,
        searcher.clone(),
        MockInteraction::with_answers([]),
        |c| c.skip.skip_existing = true,
    )
    .await;
    let downloader = downloader.with_output_index(MockFileIndex::with_files([("x", "/music/x.mp3")]));

    downloader.run().await.unwrap();

    assert_eq!(searcher.calls_for("x"), 0);
    assert_eq!(searcher.calls_for("y"), 1);

    let lists = downloader.lists().await;
    let states: Vec<TrackState> = lists.entries[0].list[0].iter().map(Track::state).collect();
    assert_eq!(states, [TrackState::AlreadyExists, TrackState::Downloaded]);
}

#[tokio::test]
async fn album_aggregate_expands_into_album_items() {
    let searcher = MockSearcher::new();
    *searcher.aggregate_albums.lock().unwrap() = vec![
        vec![album_group("peer", "Users\\peer\\First", &["a1"])],
        vec![album_group("peer", "Users\\peer\\Second", &["b1"])],
    ];
    let mut entry = TrackListEntry::new(Track::new("Artist", "", "", TrackType::AlbumAggregate));
    entry.item_name = Some("discography".into());
    let mut lists = TrackLists::new();
    lists.add_entry(entry);

    let (downloader, _temp_dir) = create_test_downloader(lists, searcher.clone()).await;
    downloader.run().await.unwrap();

    assert_eq!(searcher.source_searches.load(Ordering::SeqCst), 1);
    assert_eq!(searcher.calls_for("a1"), 1);
    assert_eq!(searcher.calls_for("b1"), 1);

    let lists = downloader.lists().await;
    assert_eq!(lists.len(), 3);
    assert_eq!(
        lists.entries[0].source.state(),
        TrackState::Initial,
        "the aggregate itself is never downloaded"
    );
    for album in &lists.entries[1..] {
        assert_eq!(album.source.kind, TrackType::Album);
        assert_eq!(album.source.state(), TrackState::Downloaded);
        assert_eq!(album.item_name.as_deref(), Some("discography"));
        assert!(album.source_can_be_skipped);
    }
}

#[tokio::test]
async fn print_mode_plans_without_downloading() {
    let searcher = MockSearcher::new();
    let mut lists = plain_lists(&["one", "two"]);
    lists.add_entry(TrackListEntry::new(album_source()));

    let (downloader, _temp_dir) = create_test_downloader_with(
        lists,
        searcher.clone(),
        MockInteraction::with_answers([]),
        |c| c.download.print_tracks = true,
    )
    .await;
    let mut events = downloader.subscribe();

    downloader.run().await.unwrap();

    assert_eq!(searcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(searcher.source_searches.load(Ordering::SeqCst), 0);

    let events = drain_events(&mut events);
    let planned: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::TracksPlanned { tracks, .. } => Some(tracks.len()),
            _ => None,
        })
        .collect();
    assert_eq!(planned, [2, 1]);
    assert!(!events.iter().any(|e| matches!(e, Event::RunComplete { .. })));
}

#[tokio::test]
async fn parallel_searches_download_in_list_order() {
    let searcher = MockSearcher::new();
    {
        let mut albums = searcher.albums_by_source.lock().unwrap();
        albums.insert(
            "First".into(),
            vec![album_group("peer", "Users\\peer\\First", &["a1", "a2"])],
        );
        albums.insert(
            "Second".into(),
            vec![album_group("peer", "Users\\peer\\Second", &["b1", "b2"])],
        );
    }
    searcher
        .source_delays
        .lock()
        .unwrap()
        .insert("First".into(), std::time::Duration::from_millis(200));

    let mut lists = TrackLists::new();
    for album in ["First", "Second"] {
        lists.add_entry(TrackListEntry::new(Track::new(
            "Artist",
            "",
            album,
            TrackType::Album,
        )));
    }

    let (downloader, _temp_dir) = create_test_downloader_with(
        lists,
        searcher.clone(),
        MockInteraction::with_answers([]),
        |c| {
            c.download.parallel_album_search = true;
            c.album.browse_folder = false;
        },
    )
    .await;

    downloader.run().await.unwrap();

    assert_eq!(searcher.source_searches.load(Ordering::SeqCst), 2);
    assert_eq!(
        *searcher.source_search_order.lock().unwrap(),
        ["Second", "First"],
        "the slower first search finishes last"
    );

    let order = searcher.call_order.lock().unwrap().clone();
    assert_eq!(order.len(), 4);
    assert!(
        order[..2].iter().all(|k| k.starts_with('a'))
            && order[2..].iter().all(|k| k.starts_with('b')),
        "downloads follow list order, got {order:?}"
    );

    let lists = downloader.lists().await;
    assert!(
        lists
            .entries
            .iter()
            .all(|e| e.source.state() == TrackState::Downloaded)
    );
}

#[tokio::test]
async fn quitting_stops_the_run() {
    let searcher = MockSearcher::new();
    let mut lists = TrackLists::new();
    lists.add_entry(album_entry(vec![album_group("peer", "Users\\peer\\A", &["a1"])]));
    lists.add_entry(album_entry(vec![album_group("peer", "Users\\peer\\B", &["b1"])]));

    let (downloader, _temp_dir) = create_test_downloader_with(
        lists,
        searcher.clone(),
        MockInteraction::with_answers(["q"]),
        |c| c.download.interactive = true,
    )
    .await;
    let mut events = downloader.subscribe();

    downloader.run().await.unwrap();

    assert!(downloader.quit_requested());
    assert_eq!(searcher.calls.load(Ordering::SeqCst), 0);

    let events = drain_events(&mut events);
    let started: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::ItemStarted { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(started, [0]);
    assert!(!events.iter().any(|e| matches!(e, Event::RunComplete { .. })));
}

struct RefusingSession;

#[async_trait]
impl SessionClient for RefusingSession {
    fn state(&self) -> SessionState {
        SessionState::Disconnected
    }

    async fn connect(&self, _username: &str, _password: &str) -> Result<()> {
        Err(Error::session("login refused"))
    }
}

#[tokio::test]
async fn failed_login_ends_the_run() {
    let temp_dir = tempfile::tempdir().unwrap();
    let searcher = MockSearcher::new();
    let services = Services::new(Arc::new(RefusingSession), searcher.clone());
    let downloader = BatchDownloader::new(
        test_config(temp_dir.path()),
        plain_lists(&["one"]),
        services,
    )
    .await
    .unwrap();

    let result = downloader.run().await;

    assert!(matches!(result, Err(Error::Session { .. })));
    assert_eq!(searcher.calls.load(Ordering::SeqCst), 0);
}
