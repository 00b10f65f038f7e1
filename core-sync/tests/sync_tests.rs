//! Integration tests for complete sync runs
//!
//! Each test mirrors a [`FakeCatalog`] into a library in a temporary
//! directory using the real filesystem, PID lock and SQLite index.

mod common;

use bridge_traits::catalog::RemoteError;
use common::{exists, file_size, is_symlink, TestLibrary, ALBUM, FOLDER};
use core_library::{AlbumId, AssetId, LibraryIndex};
use core_runtime::config::LOCK_FILE_NAME;
use core_runtime::events::{CoreEvent, SyncEvent};
use core_sync::{ErrorClass, RunOutcome, WriteOperation};
use std::time::Duration;

async fn seed_two_photos(library: &TestLibrary) {
    let catalog = &library.catalog;
    catalog.add_photo("rec-1", "IMG_0001", "ck1", 100).await;
    catalog.add_photo("rec-2", "IMG_0002", "ck2", 200).await;
    catalog.add_album("summer", "Summer", ALBUM, None, &["rec-1"]).await;
}

// ============================================================================
// Mirroring
// ============================================================================

#[tokio::test]
async fn test_initial_sync_mirrors_catalog() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;

    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert_eq!(report.attempts, 1);
    let write = report.write.unwrap();
    assert_eq!(write.assets_downloaded, 2);
    assert_eq!(write.albums_added, 1);

    assert_eq!(file_size(&library.asset_file("ck1")).await, Some(100));
    assert_eq!(file_size(&library.asset_file("ck2")).await, Some(200));
    assert!(is_symlink(&library.path("Summer")).await);
    assert!(is_symlink(&library.path("Summer/IMG_0001.jpg")).await);
    assert_eq!(file_size(&library.path("Summer/IMG_0001.jpg")).await, Some(100));

    let snapshot = library.snapshot().await;
    assert_eq!(snapshot.assets.len(), 2);
    assert_eq!(snapshot.albums.len(), 1);
    assert_eq!(library.index.generation().await.unwrap(), 1);
    assert!(!exists(&library.path(LOCK_FILE_NAME)).await);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    let orchestrator = library.orchestrator();

    assert!(orchestrator.run().await.outcome.is_success());
    let report = orchestrator.run().await;

    assert!(report.outcome.is_success());
    let write = report.write.unwrap();
    assert_eq!(write.assets_downloaded, 0);
    assert_eq!(write.assets_deleted, 0);
    assert_eq!(write.albums_added, 0);
    assert_eq!(write.albums_deleted, 0);
    assert_eq!(library.catalog.downloads(), 2);
    assert_eq!(library.index.generation().await.unwrap(), 2);
}

#[tokio::test]
async fn test_existing_files_are_not_downloaded_again() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    assert!(library.orchestrator().run().await.outcome.is_success());

    // Lose the index but keep the files
    for id in ["ck1", "ck2"] {
        library.index.remove_asset(&AssetId::new(id)).await.unwrap();
    }

    let report = library.orchestrator().run().await;
    assert!(report.outcome.is_success());
    let write = report.write.unwrap();
    assert_eq!(write.assets_skipped, 2);
    assert_eq!(library.catalog.downloads(), 2);
    assert_eq!(library.snapshot().await.assets.len(), 2);
}

#[tokio::test]
async fn test_remote_deletion_removes_local_file() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    assert!(library.orchestrator().run().await.outcome.is_success());

    library.catalog.remove_photo("rec-2").await;
    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success());
    assert_eq!(report.write.unwrap().assets_deleted, 1);
    assert!(!exists(&library.asset_file("ck2")).await);
    assert!(exists(&library.asset_file("ck1")).await);
    assert!(!library.snapshot().await.assets.contains_key(&AssetId::new("ck2")));
}

#[tokio::test]
async fn test_truncated_asset_removed_remotely_is_deleted() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    assert!(library.orchestrator().run().await.outcome.is_success());

    tokio::fs::write(library.asset_file("ck1"), b"xx").await.unwrap();
    library.catalog.remove_photo("rec-1").await;
    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    let write = report.write.unwrap();
    assert_eq!(write.assets_deleted, 1);
    assert_eq!(write.assets_downloaded, 0);
    assert!(!exists(&library.asset_file("ck1")).await);
    assert!(!library.snapshot().await.assets.contains_key(&AssetId::new("ck1")));
    assert!(!exists(&library.path("Summer/IMG_0001.jpg")).await);
}

#[tokio::test]
async fn test_missing_asset_removed_remotely_drops_index_row() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    assert!(library.orchestrator().run().await.outcome.is_success());

    tokio::fs::remove_file(library.asset_file("ck2")).await.unwrap();
    library.catalog.remove_photo("rec-2").await;
    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert_eq!(report.write.unwrap().assets_deleted, 1);
    let snapshot = library.snapshot().await;
    assert!(!snapshot.assets.contains_key(&AssetId::new("ck2")));
    assert!(snapshot.assets.contains_key(&AssetId::new("ck1")));
}

#[tokio::test]
async fn test_truncated_asset_is_downloaded_again() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    assert!(library.orchestrator().run().await.outcome.is_success());

    tokio::fs::write(library.asset_file("ck1"), b"xx").await.unwrap();
    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    let write = report.write.unwrap();
    assert_eq!(write.assets_deleted, 1);
    assert_eq!(write.assets_downloaded, 1);
    assert_eq!(library.catalog.downloads(), 3);
    assert_eq!(file_size(&library.asset_file("ck1")).await, Some(100));
    assert_eq!(file_size(&library.path("Summer/IMG_0001.jpg")).await, Some(100));
    assert_eq!(library.snapshot().await.assets[&AssetId::new("ck1")].size, 100);
}

#[tokio::test]
async fn test_membership_change_refreshes_links() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    assert!(library.orchestrator().run().await.outcome.is_success());

    library.catalog.remove_album("summer").await;
    library
        .catalog
        .add_album("summer", "Summer", ALBUM, None, &["rec-2"])
        .await;
    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert!(!exists(&library.path("Summer/IMG_0001.jpg")).await);
    assert_eq!(file_size(&library.path("Summer/IMG_0002.jpg")).await, Some(200));
    // Unlinked asset files stay in the asset directory
    assert!(exists(&library.asset_file("ck1")).await);
}

#[tokio::test]
async fn test_remote_parent_cycle_is_skipped() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    let catalog = &library.catalog;
    catalog.add_album("loop-a", "Loop A", FOLDER, Some("loop-b"), &[]).await;
    catalog.add_album("loop-b", "Loop B", FOLDER, Some("loop-a"), &[]).await;
    catalog
        .add_album("inside", "Inside", ALBUM, Some("loop-a"), &["rec-2"])
        .await;

    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    let write = report.write.unwrap();
    assert_eq!(write.albums_added, 1);
    assert!(write.failures.is_empty());
    assert!(is_symlink(&library.path("Summer/IMG_0001.jpg")).await);
    assert!(!exists(&library.path("Loop A")).await);
    assert_eq!(library.snapshot().await.albums.len(), 1);
}

#[tokio::test]
async fn test_folder_rename_moves_children() {
    let library = TestLibrary::new().await;
    let catalog = &library.catalog;
    catalog.add_photo("rec-1", "IMG_0001", "ck1", 100).await;
    catalog.add_album("trips", "Trips", FOLDER, None, &[]).await;
    catalog
        .add_album("summer", "Summer", ALBUM, Some("trips"), &["rec-1"])
        .await;
    assert!(library.orchestrator().run().await.outcome.is_success());
    assert_eq!(file_size(&library.path("Trips/Summer/IMG_0001.jpg")).await, Some(100));

    catalog.rename_album("trips", "Journeys").await;
    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    let write = report.write.unwrap();
    assert_eq!(write.albums_deleted, 2);
    assert_eq!(write.albums_added, 2);
    assert!(!exists(&library.path("Trips")).await);
    assert_eq!(
        file_size(&library.path("Journeys/Summer/IMG_0001.jpg")).await,
        Some(100)
    );
    assert_eq!(library.catalog.downloads(), 1);
}

#[tokio::test]
async fn test_album_replaced_at_same_path() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    assert!(library.orchestrator().run().await.outcome.is_success());

    library.catalog.remove_album("summer").await;
    library
        .catalog
        .add_album("summer-2", "Summer", ALBUM, None, &["rec-2"])
        .await;
    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert_eq!(file_size(&library.path("Summer/IMG_0002.jpg")).await, Some(200));
    let snapshot = library.snapshot().await;
    assert!(snapshot.albums.contains_key(&AlbumId::new("summer-2")));
    assert!(!snapshot.albums.contains_key(&AlbumId::new("summer")));
}

// ============================================================================
// Failures and Retries
// ============================================================================

#[tokio::test]
async fn test_partial_failure_keeps_successful_writes() {
    let library = TestLibrary::new().await;
    for n in 1..=5 {
        library
            .catalog
            .add_photo(&format!("rec-{n}"), &format!("IMG_000{n}"), &format!("ck{n}"), 10)
            .await;
    }
    library.catalog.fail_download("ck2").await;
    library.catalog.fail_download("ck4").await;

    let report = library.orchestrator().run().await;

    let RunOutcome::PartialFailure(failures) = &report.outcome else {
        panic!("expected partial failure, got {:?}", report.outcome);
    };
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.operation == WriteOperation::AddAsset));
    let mut failed: Vec<_> = failures.iter().map(|f| f.id.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["ck2", "ck4"]);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.outcome.class(), Some(ErrorClass::PartialWriteFailure));

    for ok in ["ck1", "ck3", "ck5"] {
        assert!(exists(&library.asset_file(ok)).await);
    }
    assert!(!exists(&library.asset_file("ck2")).await);
    assert_eq!(library.snapshot().await.assets.len(), 3);

    library.catalog.clear_download_failures().await;
    let report = library.orchestrator().run().await;
    assert!(report.outcome.is_success());
    assert_eq!(report.write.unwrap().assets_downloaded, 2);
    assert_eq!(library.catalog.downloads(), 7);
}

#[tokio::test]
async fn test_transient_errors_exhaust_retries() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    library
        .catalog
        .fail_fetches(vec![
            RemoteError::Network("timeout".into()),
            RemoteError::Quota("throttled".into()),
            RemoteError::Network("timeout".into()),
        ])
        .await;

    let report = library.orchestrator().run().await;

    let RunOutcome::RetriesExhausted { attempts, last_error } = &report.outcome else {
        panic!("expected exhausted retries, got {:?}", report.outcome);
    };
    assert_eq!(*attempts, 3);
    assert_eq!(last_error.class(), ErrorClass::TransientRemote);
    assert_eq!(library.catalog.fetches(), 3);
    assert_eq!(library.catalog.refreshes(), 2);
    assert_eq!(library.catalog.downloads(), 0);
    assert!(!exists(&library.path(LOCK_FILE_NAME)).await);
}

#[tokio::test]
async fn test_transient_error_recovers_on_retry() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    library
        .catalog
        .fail_fetches(vec![RemoteError::Network("reset".into())])
        .await;

    let report = library.orchestrator().run().await;

    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert_eq!(report.attempts, 2);
    assert_eq!(library.catalog.refreshes(), 1);
}

#[tokio::test]
async fn test_auth_error_aborts_without_retry() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    library
        .catalog
        .fail_fetches(vec![RemoteError::Auth("session expired".into())])
        .await;

    let report = library.orchestrator().run().await;

    match &report.outcome {
        RunOutcome::Aborted { kind, .. } => assert_eq!(*kind, ErrorClass::PermanentRemote),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(library.catalog.fetches(), 1);
    assert_eq!(library.catalog.refreshes(), 0);
}

#[tokio::test]
async fn test_schema_mismatch_aborts_before_fetch() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    sqlx::query("UPDATE library_meta SET value = '99' WHERE key = 'schema_version'")
        .execute(library.index.pool())
        .await
        .unwrap();

    let report = library.orchestrator().run().await;

    match &report.outcome {
        RunOutcome::Aborted { kind, .. } => assert_eq!(*kind, ErrorClass::LocalStateCorruption),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(library.catalog.fetches(), 0);
}

#[tokio::test]
async fn test_run_timeout_interrupts_writes() {
    let library = TestLibrary::new().await;
    for n in 1..=4 {
        library
            .catalog
            .add_photo(&format!("rec-{n}"), &format!("IMG_000{n}"), &format!("ck{n}"), 10)
            .await;
    }
    library
        .catalog
        .set_download_delay(Duration::from_millis(500))
        .await;
    let config = library
        .config()
        .download_concurrency(1)
        .run_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let report = library
        .orchestrator_with(config, core_runtime::events::EventSender::disabled())
        .run()
        .await;

    match &report.outcome {
        RunOutcome::Aborted { kind, .. } => assert_eq!(*kind, ErrorClass::Interrupted),
        other => panic!("expected interruption, got {other:?}"),
    }
    if let Some(write) = &report.write {
        assert!(write.interrupted);
        assert!(write.assets_downloaded < 4);
    }
    assert!(library.catalog.downloads() < 4);
    assert_eq!(library.index.generation().await.unwrap(), 0);
    assert!(!exists(&library.path(LOCK_FILE_NAME)).await);
}

// ============================================================================
// Locking and Events
// ============================================================================

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_live_lock_holder_blocks_run() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    // PID 1 is always alive
    tokio::fs::write(library.path(LOCK_FILE_NAME), "1").await.unwrap();

    let report = library.orchestrator().run().await;

    match &report.outcome {
        RunOutcome::Aborted { kind, .. } => assert_eq!(*kind, ErrorClass::ConcurrencyConflict),
        other => panic!("expected lock conflict, got {other:?}"),
    }
    assert_eq!(report.attempts, 0);
    assert_eq!(library.catalog.fetches(), 0);

    let forced = library.config().force_lock(true).build().unwrap();
    let report = library
        .orchestrator_with(forced, core_runtime::events::EventSender::disabled())
        .run()
        .await;
    assert!(report.outcome.is_success(), "{:?}", report.outcome);
    assert!(!exists(&library.path(LOCK_FILE_NAME)).await);
}

#[tokio::test]
async fn test_run_emits_lifecycle_events() {
    let library = TestLibrary::new().await;
    seed_two_photos(&library).await;
    let config = library.config().event_buffer_size(256).build().unwrap();
    let (sender, mut stream) = config.event_channel();

    let report = library.orchestrator_with(config, sender).run().await;
    assert!(report.outcome.is_success());

    let mut events = Vec::new();
    while let Some(event) = stream.try_recv() {
        events.push(event);
    }

    assert!(matches!(
        events.first(),
        Some(CoreEvent::Sync(SyncEvent::Started { run_id })) if *run_id == report.run_id.to_string()
    ));
    assert!(matches!(
        events.last(),
        Some(CoreEvent::Sync(SyncEvent::Done { failures: 0, .. }))
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::DiffCompleted))));
}
