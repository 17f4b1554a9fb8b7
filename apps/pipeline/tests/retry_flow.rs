//! リトライワーカーとデッドレター再キューのシナリオテスト。

mod support;

use std::sync::Arc;

use chrono::Duration;
use pretty_assertions::assert_eq;
use souko_domain::{
    clock::FixedClock,
    dead_letter::DeadLetterStatus,
    record::{RecordChange, RecordId, RecordKind, SyncStatus},
    retry::RetryTask,
    subject::SubjectId,
    warehouse::WarehouseTable,
};
use souko_infra::{mock::ScriptedFailure, queue::RetryQueue, repository::RecordRepository};
use souko_pipeline::usecase::DeadLetterAdmin;
use support::{SyncHarness, completed_record, test_subject};

#[tokio::test]
async fn test_2回失敗した後のリトライで同期に成功する() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());

    // 初回ディスパッチと 1 回目のリトライが失敗し、2 回目のリトライで成功する
    harness
        .warehouse
        .push_failure(ScriptedFailure::Retryable("一時障害 1".to_string()));
    harness
        .warehouse
        .push_failure(ScriptedFailure::Retryable("一時障害 2".to_string()));

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();

    harness
        .worker_at(harness.now + Duration::days(1))
        .run_once()
        .await
        .unwrap();
    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Failed);
    assert_eq!(reloaded.sync_retry_count(), 1);

    harness
        .worker_at(harness.now + Duration::days(2))
        .run_once()
        .await
        .unwrap();

    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Synced);
    assert_eq!(harness.warehouse.total_rows(), 1);
    assert_eq!(harness.warehouse.upsert_attempts(), 3);
    assert!(harness.retry_queue.all().is_empty());

    // デッドレターはリトライ成功で解決される
    let entries = harness.dead_letters.all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status(), DeadLetterStatus::Resolved);
}

#[tokio::test]
async fn test_リトライ上限の10回に達したら断念される() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());

    // 初回ディスパッチ + リトライ 10 回 = 11 回の失敗
    for i in 0..11 {
        harness
            .warehouse
            .push_failure(ScriptedFailure::Retryable(format!("一時障害 {i}")));
    }

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();

    for day in 1..=10 {
        harness
            .worker_at(harness.now + Duration::days(day))
            .run_once()
            .await
            .unwrap();
    }

    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Abandoned);
    assert_eq!(reloaded.sync_retry_count(), 10);
    assert_eq!(harness.warehouse.upsert_attempts(), 11);
    assert!(harness.retry_queue.all().is_empty());

    let entries = harness.dead_letters.all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status(), DeadLetterStatus::Abandoned);

    // 断念後は自動では再キューされない
    harness
        .worker_at(harness.now + Duration::days(11))
        .run_once()
        .await
        .unwrap();
    assert_eq!(harness.warehouse.upsert_attempts(), 11);
}

#[tokio::test]
async fn test_リトライ不可の失敗は残り試行を消費せず即断念する() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Profile, harness.now);
    harness.records.add_record(record.clone());

    harness
        .warehouse
        .push_failure(ScriptedFailure::Retryable("一時障害".to_string()));
    harness
        .warehouse
        .push_failure(ScriptedFailure::Permanent("恒久的な拒否".to_string()));

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();
    harness
        .worker_at(harness.now + Duration::days(1))
        .run_once()
        .await
        .unwrap();

    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Abandoned);
    // 2 回の試行のみで打ち切られている
    assert_eq!(harness.warehouse.upsert_attempts(), 2);
    assert!(harness.retry_queue.all().is_empty());
    assert_eq!(
        harness.dead_letters.all()[0].status(),
        DeadLetterStatus::Abandoned
    );
}

#[tokio::test]
async fn test_旧タスクの除去が失敗してもリトライの連鎖は途切れない() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());

    harness
        .warehouse
        .push_failure(ScriptedFailure::Retryable("一時障害 1".to_string()));
    harness
        .warehouse
        .push_failure(ScriptedFailure::Retryable("一時障害 2".to_string()));

    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();

    // 後継タスクの投入後、旧タスクの除去がキュー障害で失敗する
    harness.retry_queue.fail_next_remove();
    harness
        .worker_at(harness.now + Duration::days(1))
        .run_once()
        .await
        .unwrap();

    // 後継タスクは投入済み。旧タスクは残留するが連鎖は続く
    let tasks = harness.retry_queue.all();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().any(|t| t.attempt_count == 1));

    // 復旧後の実行で同期が完了し、残留した旧タスクも後始末される
    harness
        .worker_at(harness.now + Duration::days(2))
        .run_once()
        .await
        .unwrap();

    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Synced);
    assert!(harness.retry_queue.all().is_empty());
    assert_eq!(
        harness.dead_letters.all()[0].status(),
        DeadLetterStatus::Resolved
    );
}

#[tokio::test]
async fn test_消去済みレコードのタスクは破棄され復活しない() {
    let harness = SyncHarness::new();

    // 対応するレコードが存在しないタスク
    let orphan = RetryTask::initial(
        SubjectId::new(),
        RecordId::new(),
        WarehouseTable::Sessions,
        &harness.policy,
        harness.now,
    );
    harness.retry_queue.enqueue(&orphan).await.unwrap();

    harness
        .worker_at(harness.now + Duration::days(1))
        .run_once()
        .await
        .unwrap();

    assert!(harness.retry_queue.all().is_empty());
    assert_eq!(harness.warehouse.upsert_attempts(), 0);
}

#[tokio::test]
async fn test_手動解決エンドポイントで断念済み同期が再キューされ成功する() {
    let harness = SyncHarness::new();
    let subject = test_subject(harness.now);
    let record = completed_record(subject.id(), RecordKind::Session, harness.now);
    harness.records.add_record(record.clone());

    // 初回 + リトライ 10 回をすべて失敗させて断念まで進める
    for i in 0..11 {
        harness
            .warehouse
            .push_failure(ScriptedFailure::Retryable(format!("一時障害 {i}")));
    }
    harness
        .dispatcher()
        .handle(RecordChange {
            before: None,
            after: record.clone(),
        })
        .await
        .unwrap();
    for day in 1..=10 {
        harness
            .worker_at(harness.now + Duration::days(day))
            .run_once()
            .await
            .unwrap();
    }
    let entry_id = harness.dead_letters.all()[0].id().clone();

    // 手動再キュー
    let admin_now = harness.now + Duration::days(12);
    let admin = DeadLetterAdmin::new(
        Arc::new(harness.dead_letters.clone()),
        Arc::new(harness.records.clone()),
        Arc::new(harness.retry_queue.clone()),
        harness.policy.clone(),
        Arc::new(FixedClock::new(admin_now)),
    );
    let reopened = admin.resolve(&entry_id).await.unwrap();
    assert_eq!(reopened.status(), DeadLetterStatus::Pending);
    assert_eq!(harness.retry_queue.all().len(), 1);
    assert_eq!(harness.retry_queue.all()[0].attempt_count, 0);

    // 障害が復旧していればリトライで同期が完了し、エントリも解決される
    harness
        .worker_at(harness.now + Duration::days(13))
        .run_once()
        .await
        .unwrap();

    let reloaded = harness
        .records
        .find_by_id(record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sync_status(), SyncStatus::Synced);
    assert_eq!(
        harness.dead_letters.all()[0].status(),
        DeadLetterStatus::Resolved
    );
}
