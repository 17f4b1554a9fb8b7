//! 同期ディスパッチャのシナリオテスト。

mod support;

use pretty_assertions::assert_eq;
use souko_domain::{
    record::{RecordChange, RecordKind, SyncStatus},
    warehouse::WarehouseTable,
};
use souko_infra::{
    mock::ScriptedFailure,
    repository::RecordRepository,
};
use support::{SyncHarness, completed_record, test_subject};

#[tokio::test]
async fn test_完了エッジでウェアハウスへ同期されsyncedになる() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();

    assert_eq!(harness.warehouse.total_rows(), 1);
    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Synced);
    assert_eq!(reloaded.synced_at(), Some(harness.now));
    assert!(harness.retry_queue.all().is_empty());
    assert!(harness.dead_letters.all().is_empty());
}

#[tokio::test]
async fn test_完了エッジでない変更では発火しない() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());

    // completed → completed の再通知（エッジなし）
    harness
        .dispatcher()
        .handle(RecordChange {
            before: Some(record.clone()),
            after: record.clone(),
        })
        .await
        .unwrap();

    assert_eq!(harness.warehouse.upsert_attempts(), 0);
    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Unsynced);
}

#[tokio::test]
async fn test_リトライ可能な失敗でタスク投入とデッドレター開設が行われる() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());
    harness
        .warehouse
        .push_failure(ScriptedFailure::Retryable("接続タイムアウト".to_string()));

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();

    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Failed);
    assert_eq!(reloaded.sync_retry_count(), 0);
    assert!(reloaded.sync_error().unwrap().contains("接続タイムアウト"));

    let tasks = harness.retry_queue.all();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].attempt_count, 0);
    assert_eq!(tasks[0].table, WarehouseTable::Sessions);
    // 初回リトライは 1 秒後
    assert_eq!(tasks[0].next_eligible_at, harness.now + chrono::Duration::seconds(1));

    let entries = harness.dead_letters.all();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].status(),
        souko_domain::dead_letter::DeadLetterStatus::Pending
    );
}

#[tokio::test]
async fn test_リトライ不可の失敗はタスクなしでデッドレター直行() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Profile, harness.now);
    harness.records.add_record(record.clone());
    harness
        .warehouse
        .push_failure(ScriptedFailure::Permanent("スキーマ不一致".to_string()));

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();

    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Failed);
    assert!(harness.retry_queue.all().is_empty());
    assert_eq!(harness.dead_letters.all().len(), 1);
}

#[tokio::test]
async fn test_ウェアハウス行は仮名キーで生の識別子を含まない() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();

    let rows = harness.warehouse.rows_in(WarehouseTable::Sessions);
    assert_eq!(rows.len(), 1);
    let expected = harness.pseudonymizer.pseudonymize(subject.id());
    assert_eq!(rows[0].subject_pseudonym, expected);

    // シリアライズした行に生のサブジェクト ID が現れない
    let json = serde_json::to_string(&rows[0]).unwrap();
    assert!(!json.contains(&subject.id().to_string()));
    // 準識別子は粗視化されている
    assert_eq!(rows[0].device_class, "iphone");
    assert_eq!(rows[0].language, "ja");
}

#[tokio::test]
async fn test_同期済みレコードの再同期は冪等() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());
    let dispatcher = harness.dispatcher();

    dispatcher
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();
    // 明示的な再同期（before なしのスナップショット再発行）
    let synced = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    dispatcher
        .handle(RecordChange {
            before: None,
            after: synced,
        })
        .await
        .unwrap();

    assert_eq!(harness.warehouse.total_rows(), 1);
    assert_eq!(harness.warehouse.upsert_attempts(), 2);
}
