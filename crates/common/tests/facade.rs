//! Integration tests for the storage facade

mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};

use ::common::entry::FileTimes;
use ::common::error::StorageError;
use ::common::facade::NotifyOutcome;
use ::common::shadow::SyncAction;

use common::{path, setup_with_settings, test_settings, write_source, Op};

#[tokio::test]
async fn test_put_then_head_round_trips_times() {
    let (facade, _client, temp) = common::setup_test_env().await;
    let times = FileTimes {
        creation: Utc.timestamp_opt(1_500_000_000, 123_456_789).unwrap(),
        last_access: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
        last_write: Utc.timestamp_opt(1_650_000_000, 987_654_321).unwrap(),
        change: Utc.timestamp_opt(1_650_000_001, 0).unwrap(),
    };
    let source = write_source(&temp, "doc", b"hello").await;

    facade
        .put_object(&path("b/doc.txt"), &times, Some(&source))
        .await
        .unwrap();

    let entry = facade.head_object(&path("b/doc.txt")).await.unwrap();
    assert_eq!(entry.size, 5);
    assert_eq!(entry.times(), times);
}

#[tokio::test]
async fn test_put_clears_negative_entry() {
    let (facade, _client, _temp) = common::setup_test_env().await;

    let err = facade.head_object(&path("b/new")).await.unwrap_err();
    assert!(err.is_not_found());

    facade
        .put_object(&path("b/new"), &FileTimes::uniform(Utc::now()), None)
        .await
        .unwrap();
    assert_eq!(facade.head_object(&path("b/new")).await.unwrap().size, 0);
}

#[tokio::test]
async fn test_large_put_uses_session() {
    let (facade, client, temp) = common::setup_test_env().await;
    let source = write_source(&temp, "big", &[7u8; 20]).await;

    facade
        .put_object(&path("b/big"), &FileTimes::uniform(Utc::now()), Some(&source))
        .await
        .unwrap();

    assert_eq!(client.calls(Op::CreateSession), 1);
    assert_eq!(client.calls(Op::UploadPart), 5);
    assert_eq!(client.object("b/big").unwrap().data, vec![7u8; 20]);
    assert!(facade.locks().is_empty());
}

#[tokio::test]
async fn test_container_lookups() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.add_container("far", "ap-south-9");
    client.deny_region("ap-south-9");

    // Resolving the region is what lets the listing hide it
    let err = facade.head_container("far").await.unwrap_err();
    assert!(err.is_not_found());

    let containers = facade.list_containers().await.unwrap();
    assert_eq!(containers.len(), 2);
    assert!(containers[1].is_hidden());
    assert_eq!(facade.head_object(&path("b")).await.unwrap().name, "b");
}

#[tokio::test]
async fn test_materialize_downloads_then_reuses() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/data.bin", b"0123456789abcdef!");

    let first = facade.materialize(&path("b/data.bin")).await.unwrap();
    assert_eq!(first.action, SyncAction::Download);
    assert_eq!(client.calls(Op::GetRange), 5);
    assert_eq!(
        tokio::fs::read(&first.local).await.unwrap(),
        b"0123456789abcdef!"
    );

    let second = facade.materialize(&path("b/data.bin")).await.unwrap();
    assert_eq!(second.action, SyncAction::Reuse);
    assert_eq!(second.local, first.local);
    assert_eq!(client.calls(Op::GetRange), 5);
}

#[tokio::test]
async fn test_materialize_empty_object_truncates() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/empty", b"");

    let shadow = facade.materialize(&path("b/empty")).await.unwrap();
    assert_eq!(shadow.action, SyncAction::Truncate);
    assert_eq!(tokio::fs::metadata(&shadow.local).await.unwrap().len(), 0);
    assert_eq!(client.calls(Op::GetRange), 0);
}

#[tokio::test]
async fn test_materialize_rejects_directories_and_missing_objects() {
    let (facade, _client, _temp) = common::setup_test_env().await;

    let err = facade.materialize(&path("b/dir/")).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidPath(_)));
    let err = facade.materialize(&path("b/missing")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_same_path_reads_are_serialized() {
    let (facade, client, temp) = common::setup_test_env().await;
    client.insert("b/x", b"xxxx");
    client.set_read_delay(StdDuration::from_millis(50));
    let out_a = write_source(&temp, "a", b"").await;
    let out_b = write_source(&temp, "b", b"").await;

    let p = path("b/x");
    let (a, b) = tokio::join!(
        facade.get_object_and_write_file(&p, 0, 4, &out_a),
        facade.get_object_and_write_file(&p, 0, 4, &out_b),
    );
    assert_eq!(a.unwrap(), 4);
    assert_eq!(b.unwrap(), 4);

    let windows = client.read_windows();
    assert_eq!(windows.len(), 2);
    let (first, second) = if windows[0].start <= windows[1].start {
        (&windows[0], &windows[1])
    } else {
        (&windows[1], &windows[0])
    };
    assert!(first.end <= second.start);
}

#[tokio::test]
async fn test_distinct_path_reads_overlap() {
    let (facade, client, temp) = common::setup_test_env().await;
    client.insert("b/x", b"xxxx");
    client.insert("b/y", b"yyyy");
    client.set_read_delay(StdDuration::from_millis(50));
    let out_a = write_source(&temp, "a", b"").await;
    let out_b = write_source(&temp, "b", b"").await;

    let (x, y) = (path("b/x"), path("b/y"));
    let (a, b) = tokio::join!(
        facade.get_object_and_write_file(&x, 0, 4, &out_a),
        facade.get_object_and_write_file(&y, 0, 4, &out_b),
    );
    a.unwrap();
    b.unwrap();

    let windows = client.read_windows();
    assert!(windows[0].start < windows[1].end && windows[1].start < windows[0].end);
}

#[tokio::test]
async fn test_rename_file_moves_object_and_shadow() {
    let (facade, client, _temp) = common::setup_test_env().await;
    let written = Utc.with_ymd_and_hms(2021, 6, 1, 10, 0, 0).unwrap();
    client.insert_at("b/a.txt", b"payload", written);

    let shadow = facade.materialize(&path("b/a.txt")).await.unwrap();
    facade
        .rename_object(&path("b/a.txt"), &path("b/c.txt"))
        .await
        .unwrap();

    assert!(client.object("b/a.txt").is_none());
    assert_eq!(client.object("b/c.txt").unwrap().data, b"payload");
    assert!(facade.head_object(&path("b/a.txt")).await.is_err());
    let moved = facade.head_object(&path("b/c.txt")).await.unwrap();
    assert_eq!(moved.last_write_time, written);

    let target = facade.shadow().path_for(&path("b/c.txt"));
    assert!(tokio::fs::metadata(&shadow.local).await.is_err());
    assert_eq!(tokio::fs::read(&target).await.unwrap(), b"payload");
    assert!(facade.locks().is_empty());
}

#[tokio::test]
async fn test_rename_file_to_directory_shaped_name() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/x", b"payload");
    assert!(facade.head_object(&path("b/y")).await.unwrap_err().is_not_found());

    let held = facade.locks().lock("b/y").await;
    let from = path("b/x");
    let to = path("b/y/");
    let rename = facade.rename_object(&from, &to);
    tokio::pin!(rename);
    let blocked = tokio::time::timeout(StdDuration::from_millis(50), &mut rename).await;
    assert!(blocked.is_err(), "rename must wait for the file-shaped lock");
    drop(held);
    rename.await.unwrap();

    assert_eq!(client.object("b/y").unwrap().data, b"payload");
    assert!(client.object("b/y/").is_none());
    // the cached negative head for the file-shaped name is gone
    assert_eq!(facade.head_object(&path("b/y")).await.unwrap().size, 7);
    assert!(facade.locks().is_empty());
}

#[tokio::test]
async fn test_rename_without_local_copy_fetches_first() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/a.txt", b"payload");

    facade
        .rename_object(&path("b/a.txt"), &path("b/d.txt"))
        .await
        .unwrap();
    assert_eq!(client.calls(Op::GetRange), 1);
    assert_eq!(client.object("b/d.txt").unwrap().data, b"payload");
}

#[tokio::test]
async fn test_rename_refused_when_local_copy_diverges() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/a.txt", b"payload");

    let shadow = facade.materialize(&path("b/a.txt")).await.unwrap();
    tokio::fs::write(&shadow.local, b"edited locally").await.unwrap();

    let err = facade
        .rename_object(&path("b/a.txt"), &path("b/c.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Inconsistent(_)));
    assert_eq!(err.errno(), libc::EBUSY);
    assert!(client.object("b/a.txt").is_some());
    assert!(client.object("b/c.txt").is_none());
    assert_eq!(
        tokio::fs::read(&shadow.local).await.unwrap(),
        b"edited locally"
    );
}

#[tokio::test]
async fn test_rename_non_empty_directory_is_refused() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/d/", b"");
    client.insert("b/d/child", b"c");

    let err = facade
        .rename_object(&path("b/d/"), &path("b/e/"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DirectoryNotEmpty(_)));
    assert_eq!(err.errno(), libc::ENOTEMPTY);
    assert!(client.object("b/d/child").is_some());
}

#[tokio::test]
async fn test_rename_empty_directory_moves_marker() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/empty/", b"");

    facade
        .rename_object(&path("b/empty/"), &path("b/moved/"))
        .await
        .unwrap();
    assert!(client.object("b/empty/").is_none());
    assert!(client.object("b/moved/").is_some());
    assert!(facade.head_object(&path("b/moved/")).await.unwrap().is_dir());
}

#[tokio::test]
async fn test_delete_invalidates_listing() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/a", b"a");
    client.insert("b/b", b"b");

    assert_eq!(facade.list_objects(&path("b"), None).await.unwrap().len(), 2);
    facade.delete_object(&path("b/a")).await.unwrap();
    assert_eq!(facade.list_objects(&path("b"), None).await.unwrap().len(), 1);

    facade
        .delete_objects("b", &["b".to_string()])
        .await
        .unwrap();
    assert!(facade.list_objects(&path("b"), None).await.unwrap().is_empty());
    assert_eq!(client.calls(Op::ListObjects), 3);
}

#[tokio::test]
async fn test_delete_removes_shadow_file() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/gone.txt", b"gone");
    client.insert("b/batch", b"batch");
    let gone = facade.materialize(&path("b/gone.txt")).await.unwrap();
    let batch = facade.materialize(&path("b/batch")).await.unwrap();

    facade.delete_object(&path("b/gone.txt")).await.unwrap();
    assert!(!gone.local.exists());
    assert!(client.object("b/gone.txt").is_none());

    facade
        .delete_objects("b", &["batch".to_string()])
        .await
        .unwrap();
    assert!(!batch.local.exists());
}

#[tokio::test]
async fn test_delete_keeps_shadow_when_backend_fails() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/kept", b"kept");
    let kept = facade.materialize(&path("b/kept")).await.unwrap();

    client.fail(Op::DeleteObject);
    facade.delete_object(&path("b/kept")).await.unwrap_err();
    assert!(kept.local.exists());
    assert!(client.object("b/kept").is_some());
}

#[tokio::test]
async fn test_delete_directory_removes_its_files() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/d/", b"");
    client.insert("b/d/child", b"child");
    client.insert("b/d/other", b"other");
    client.insert("b/d/sub/deep", b"deep");
    let child = facade.materialize(&path("b/d/child")).await.unwrap();

    facade.delete_object(&path("b/d/")).await.unwrap();

    assert!(client.object("b/d/").is_none());
    assert!(client.object("b/d/child").is_none());
    assert!(client.object("b/d/other").is_none());
    assert!(!child.local.exists());
    // subdirectories are not descended into
    assert!(client.object("b/d/sub/deep").is_some());
    assert!(facade.head_object(&path("b/d/child")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_on_timer_evicts_expired_entries() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut settings = test_settings(temp.path());
    settings.object_cache_expiry = Duration::milliseconds(200);
    let (facade, client) = setup_with_settings(settings);
    client.insert("b/a", b"a");

    facade.head_object(&path("b/a")).await.unwrap();
    assert_eq!(facade.on_timer(), 0);

    tokio::time::sleep(StdDuration::from_millis(250)).await;
    assert_eq!(facade.on_timer(), 1);
    facade.head_object(&path("b/a")).await.unwrap();
    assert_eq!(client.calls(Op::HeadObject), 2);
}

#[tokio::test]
async fn test_on_idle_prunes_old_shadow_files() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/old", b"old");
    client.insert("b/fresh", b"fresh");

    let old = facade.materialize(&path("b/old")).await.unwrap();
    facade.materialize(&path("b/fresh")).await.unwrap();
    common::age_file(&old.local, Utc::now() - Duration::days(3));

    let summary = facade.on_idle().await.unwrap();
    assert!(summary.containers_reloaded);
    assert_eq!(summary.pruned.files, 1);
    assert_eq!(summary.pruned.dirs, 0);

    // Fresh list, nothing to reload
    assert!(!facade.on_idle().await.unwrap().containers_reloaded);
}

#[tokio::test]
async fn test_on_idle_keeps_freshly_materialized_file() {
    let (facade, _client, temp) = common::setup_test_env().await;
    let source = write_source(&temp, "doc", b"weekly report").await;
    let week_old = FileTimes::uniform(Utc::now() - Duration::days(7));
    facade
        .put_object(&path("b/doc.txt"), &week_old, Some(&source))
        .await
        .unwrap();

    let shadow = facade.materialize(&path("b/doc.txt")).await.unwrap();
    assert_eq!(shadow.action, SyncAction::Download);

    let summary = facade.on_idle().await.unwrap();
    assert_eq!(summary.pruned.files, 0);
    assert!(shadow.local.exists());
    let again = facade.materialize(&path("b/doc.txt")).await.unwrap();
    assert_eq!(again.action, SyncAction::Reuse);
}

#[tokio::test]
async fn test_on_idle_survives_reload_failure() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.fail(Op::ListContainers);

    let summary = facade.on_idle().await.unwrap();
    assert!(!summary.containers_reloaded);
}

#[tokio::test]
async fn test_notify_clear_cache_and_report() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/a", b"a");
    facade.list_containers().await.unwrap();
    facade.head_object(&path("b/a")).await.unwrap();
    facade.head_object(&path("b/missing")).await.unwrap_err();

    let report = match facade.on_notify("print-report").await.unwrap() {
        NotifyOutcome::Report(report) => report,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(report.buckets.containers, 1);
    assert_eq!(report.objects.heads.positive_entries, 1);
    assert_eq!(report.objects.heads.negative_entries, 1);
    assert_eq!(report.path_locks, 0);
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["objects"]["heads"].is_object());

    match facade.on_notify("clear-cache").await.unwrap() {
        NotifyOutcome::Cleared { entries } => assert_eq!(entries, 2),
        other => panic!("unexpected outcome {other:?}"),
    }
    facade.head_object(&path("b/a")).await.unwrap();
    assert_eq!(client.calls(Op::HeadObject), 3);
    // The idle hook run by clear-cache reloaded the list
    assert_eq!(client.calls(Op::ListContainers), 2);

    assert!(matches!(
        facade.on_notify("reboot").await.unwrap(),
        NotifyOutcome::Ignored
    ));
}

#[tokio::test]
async fn test_concurrent_materialize_downloads_once() {
    let (facade, client, _temp) = common::setup_test_env().await;
    client.insert("b/shared", b"shared bytes");
    client.set_read_delay(StdDuration::from_millis(20));

    let p = path("b/shared");
    let results = futures::future::join_all((0..4).map(|_| facade.materialize(&p))).await;
    let actions: Vec<_> = results.into_iter().map(|r| r.unwrap().action).collect();

    assert_eq!(
        actions.iter().filter(|a| **a == SyncAction::Download).count(),
        1
    );
    assert_eq!(client.calls(Op::GetRange), 3);
}
