//! シナリオテスト共通のフィクスチャとハーネス。

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use souko_domain::{
    clock::FixedClock,
    pseudonym::{Pseudonymizer, SaltConfig},
    record::{NewRecord, Record, RecordId, RecordKind, RecordPayload},
    retry::BackoffPolicy,
    subject::{EmailAddress, Subject, SubjectId},
};
use souko_infra::mock::{
    MockDeadLetterRepository,
    MockRecordRepository,
    MockRetryQueue,
    MockWarehouse,
};
use souko_pipeline::usecase::{RetryWorker, SyncDispatcher};

/// テスト全体で使う固定基準時刻
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn test_pseudonymizer() -> Pseudonymizer {
    Pseudonymizer::new(SaltConfig::new(1, "test-salt-secret").unwrap(), None)
}

pub fn test_subject(now: DateTime<Utc>) -> Subject {
    Subject::from_db(
        SubjectId::new(),
        EmailAddress::new("subject@example.com").unwrap(),
        None,
        None,
        now,
    )
}

/// 完了済み・未同期のレコードを作る
pub fn completed_record(
    subject_id: &SubjectId,
    kind: RecordKind,
    now: DateTime<Utc>,
) -> Record {
    let record = Record::new(NewRecord {
        id: RecordId::new(),
        subject_id: subject_id.clone(),
        kind,
        payload: RecordPayload {
            device_model: Some("iPhone15,2".to_string()),
            locale: Some("ja-JP".to_string()),
            app_version: Some("3.1.0".to_string()),
            duration_seconds: Some(420),
            ip_address: None,
        },
        now,
    });
    record.completed(now).unwrap()
}

/// ディスパッチャ・リトライワーカーとモック一式
pub struct SyncHarness {
    pub records: MockRecordRepository,
    pub warehouse: MockWarehouse,
    pub retry_queue: MockRetryQueue,
    pub dead_letters: MockDeadLetterRepository,
    pub pseudonymizer: Arc<Pseudonymizer>,
    pub policy: BackoffPolicy,
    pub now: DateTime<Utc>,
}

impl SyncHarness {
    pub fn new() -> Self {
        Self {
            records: MockRecordRepository::new(),
            warehouse: MockWarehouse::new(),
            retry_queue: MockRetryQueue::new(),
            dead_letters: MockDeadLetterRepository::new(),
            pseudonymizer: Arc::new(test_pseudonymizer()),
            policy: BackoffPolicy::default(),
            now: fixed_now(),
        }
    }

    /// 基準時刻固定のディスパッチャを作る
    pub fn dispatcher(&self) -> SyncDispatcher {
        SyncDispatcher::new(
            Arc::new(self.records.clone()),
            Arc::new(self.warehouse.clone()),
            Arc::new(self.retry_queue.clone()),
            Arc::new(self.dead_letters.clone()),
            self.pseudonymizer.clone(),
            self.policy.clone(),
            Arc::new(FixedClock::new(self.now)),
        )
    }

    /// 指定時刻のリトライワーカーを作る
    ///
    /// バックオフの遅延は最大 1 時間なので、基準時刻から十分進んだ
    /// 時刻を渡せばキュー内の全タスクが実行対象になる。
    pub fn worker_at(&self, now: DateTime<Utc>) -> RetryWorker {
        RetryWorker::new(
            Arc::new(self.records.clone()),
            Arc::new(self.warehouse.clone()),
            Arc::new(self.retry_queue.clone()),
            Arc::new(self.dead_letters.clone()),
            self.pseudonymizer.clone(),
            self.policy.clone(),
            Arc::new(FixedClock::new(now)),
            2,
        )
    }
}
