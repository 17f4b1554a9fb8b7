//! # テスト用モック実装
//!
//! ユースケーステストで使用するインメモリのモックリポジトリ・ストア。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! souko-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use souko_domain::{
    audit::{ErasureAuditEntry, ErasureStep},
    dead_letter::{DeadLetterEntry, DeadLetterEntryId, DeadLetterStatus},
    erasure::{ErasureRequest, ErasureRequestId},
    pseudonym::Pseudonym,
    record::{Record, RecordId, SyncStatus},
    retry::RetryTask,
    subject::{Subject, SubjectId},
    warehouse::{WarehouseRow, WarehouseTable},
};

use crate::{
    audit_log::ErasureAuditLog,
    deletion::{DeletionResult, ErasureTarget, SubjectDeleter},
    error::InfraError,
    queue::RetryQueue,
    repository::{
        DeadLetterRepository,
        ErasureRequestRepository,
        RecordRepository,
        SubjectRepository,
    },
    warehouse::WarehouseClient,
};

// ===== MockErasureRequestRepository =====

#[derive(Clone, Default)]
pub struct MockErasureRequestRepository {
    requests: Arc<Mutex<Vec<ErasureRequest>>>,
}

impl MockErasureRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// サブジェクトに保留中のリクエストがあるか
    pub fn has_pending(&self, subject_id: &SubjectId) -> bool {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.subject_id() == subject_id && r.is_pending())
    }

    pub fn all(&self) -> Vec<ErasureRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErasureRequestRepository for MockErasureRequestRepository {
    async fn insert(&self, request: &ErasureRequest) -> Result<(), InfraError> {
        let mut requests = self.requests.lock().unwrap();
        if request.is_pending()
            && requests
                .iter()
                .any(|r| r.subject_id() == request.subject_id() && r.is_pending())
        {
            return Err(InfraError::conflict(
                "ErasureRequest",
                request.subject_id().to_string(),
            ));
        }
        requests.push(request.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ErasureRequestId,
    ) -> Result<Option<ErasureRequest>, InfraError> {
        Ok(self
            .requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id() == id)
            .cloned())
    }

    async fn find_pending_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<ErasureRequest>, InfraError> {
        Ok(self
            .requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.subject_id() == subject_id && r.is_pending())
            .cloned())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ErasureRequest>, InfraError> {
        let mut due: Vec<ErasureRequest> = self
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_deletion_date());
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn transition_from_pending(&self, request: &ErasureRequest) -> Result<(), InfraError> {
        let mut requests = self.requests.lock().unwrap();
        let Some(pos) = requests
            .iter()
            .position(|r| r.id() == request.id() && r.is_pending())
        else {
            return Err(InfraError::conflict(
                "ErasureRequest",
                request.id().to_string(),
            ));
        };
        requests[pos] = request.clone();
        Ok(())
    }
}

// ===== MockRecordRepository =====

#[derive(Clone, Default)]
pub struct MockRecordRepository {
    records: Arc<Mutex<Vec<Record>>>,
    erasure: Option<MockErasureRequestRepository>,
}

impl MockRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 消去リクエストリポジトリと状態を共有し、保留中消去の書き込み拒否を
    /// 実際の実装と同様に再現する
    pub fn with_erasure_guard(erasure: MockErasureRequestRepository) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            erasure: Some(erasure),
        }
    }

    pub fn add_record(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    /// サブジェクトのレコードを削除し、削除件数を返す（消去テスト用）
    pub fn remove_by_subject(&self, subject_id: &SubjectId) -> u64 {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.subject_id() != subject_id);
        (before - records.len()) as u64
    }

    pub fn count_by_subject(&self, subject_id: &SubjectId) -> u64 {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.subject_id() == subject_id)
            .count() as u64
    }

    fn ensure_not_under_erasure(&self, subject_id: &SubjectId) -> Result<(), InfraError> {
        if let Some(erasure) = &self.erasure
            && erasure.has_pending(subject_id)
        {
            return Err(InfraError::conflict("Subject", subject_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordRepository for MockRecordRepository {
    async fn insert(&self, record: &Record) -> Result<(), InfraError> {
        self.ensure_not_under_erasure(record.subject_id())?;
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn save(&self, record: &Record) -> Result<(), InfraError> {
        self.ensure_not_under_erasure(record.subject_id())?;
        let mut records = self.records.lock().unwrap();
        if let Some(pos) = records.iter().position(|r| r.id() == record.id()) {
            records[pos] = record.clone();
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Record>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id() == id)
            .cloned())
    }

    async fn find_by_subject(&self, subject_id: &SubjectId) -> Result<Vec<Record>, InfraError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.subject_id() == subject_id)
            .cloned()
            .collect())
    }

    async fn update_sync_state(
        &self,
        record: &Record,
        expected: SyncStatus,
    ) -> Result<(), InfraError> {
        let mut records = self.records.lock().unwrap();
        let Some(pos) = records
            .iter()
            .position(|r| r.id() == record.id() && r.sync_status() == expected)
        else {
            return Err(InfraError::conflict("Record", record.id().to_string()));
        };
        records[pos] = record.clone();
        Ok(())
    }
}

// ===== MockSubjectRepository =====

#[derive(Clone, Default)]
pub struct MockSubjectRepository {
    subjects: Arc<Mutex<Vec<Subject>>>,
}

impl MockSubjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subject(&self, subject: Subject) {
        self.subjects.lock().unwrap().push(subject);
    }

    /// サブジェクトを削除し、削除件数を返す（消去テスト用）
    pub fn remove(&self, subject_id: &SubjectId) -> u64 {
        let mut subjects = self.subjects.lock().unwrap();
        let before = subjects.len();
        subjects.retain(|s| s.id() != subject_id);
        (before - subjects.len()) as u64
    }

    pub fn contains(&self, subject_id: &SubjectId) -> bool {
        self.subjects
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.id() == subject_id)
    }
}

#[async_trait]
impl SubjectRepository for MockSubjectRepository {
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, InfraError> {
        Ok(self
            .subjects
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id() == id)
            .cloned())
    }
}

// ===== MockDeadLetterRepository =====

#[derive(Clone, Default)]
pub struct MockDeadLetterRepository {
    entries: Arc<Mutex<Vec<DeadLetterEntry>>>,
}

impl MockDeadLetterRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterRepository for MockDeadLetterRepository {
    async fn save(&self, entry: &DeadLetterEntry) -> Result<(), InfraError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|e| e.id() == entry.id()) {
            entries[pos] = entry.clone();
        } else {
            entries.push(entry.clone());
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &DeadLetterEntryId,
    ) -> Result<Option<DeadLetterEntry>, InfraError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id() == id)
            .cloned())
    }

    async fn find_pending_by_record(
        &self,
        record_id: &RecordId,
    ) -> Result<Option<DeadLetterEntry>, InfraError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.record_id() == record_id && e.status() == DeadLetterStatus::Pending)
            .cloned())
    }

    async fn list(
        &self,
        status: Option<DeadLetterStatus>,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, InfraError> {
        let mut entries: Vec<DeadLetterEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| status.is_none_or(|s| e.status() == s))
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at()));
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(entries)
    }
}

// ===== MockWarehouse =====

/// 台本化された失敗の種類
pub enum ScriptedFailure {
    /// 一時的な失敗（リトライ可能）
    Retryable(String),
    /// 恒久的な失敗（リトライ不可）
    Permanent(String),
}

/// インメモリのウェアハウス
///
/// `push_failure` で登録した失敗をアップサート時に先頭から消費する。
/// 「2 回失敗してから成功」のようなリトライシナリオを再現できる。
#[derive(Clone, Default)]
pub struct MockWarehouse {
    rows: Arc<Mutex<HashMap<WarehouseTable, HashMap<(String, RecordId), WarehouseRow>>>>,
    upsert_failures: Arc<Mutex<VecDeque<ScriptedFailure>>>,
    upsert_attempts: Arc<Mutex<u64>>,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次回以降のアップサートで消費される失敗を登録する
    pub fn push_failure(&self, failure: ScriptedFailure) {
        self.upsert_failures.lock().unwrap().push_back(failure);
    }

    /// アップサートの総試行回数（失敗を含む）
    pub fn upsert_attempts(&self) -> u64 {
        *self.upsert_attempts.lock().unwrap()
    }

    pub fn rows_in(&self, table: WarehouseTable) -> Vec<WarehouseRow> {
        self.rows
            .lock()
            .unwrap()
            .get(&table)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn total_rows(&self) -> u64 {
        self.rows
            .lock()
            .unwrap()
            .values()
            .map(|m| m.len() as u64)
            .sum()
    }
}

#[async_trait]
impl WarehouseClient for MockWarehouse {
    async fn upsert(&self, table: WarehouseTable, row: &WarehouseRow) -> Result<(), InfraError> {
        *self.upsert_attempts.lock().unwrap() += 1;

        if let Some(failure) = self.upsert_failures.lock().unwrap().pop_front() {
            return Err(match failure {
                ScriptedFailure::Retryable(msg) => InfraError::unavailable(msg),
                ScriptedFailure::Permanent(msg) => InfraError::invalid_input(msg),
            });
        }

        self.rows.lock().unwrap().entry(table).or_default().insert(
            (
                row.subject_pseudonym.as_str().to_string(),
                row.record_id.clone(),
            ),
            row.clone(),
        );
        Ok(())
    }

    async fn delete_by_pseudonym(
        &self,
        table: WarehouseTable,
        pseudonym: &Pseudonym,
    ) -> Result<u64, InfraError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(table_rows) = rows.get_mut(&table) else {
            return Ok(0);
        };
        let before = table_rows.len();
        table_rows.retain(|(p, _), _| p != pseudonym.as_str());
        Ok((before - table_rows.len()) as u64)
    }

    async fn count_by_pseudonym(
        &self,
        table: WarehouseTable,
        pseudonym: &Pseudonym,
    ) -> Result<u64, InfraError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&table)
            .map(|m| m.keys().filter(|(p, _)| p == pseudonym.as_str()).count() as u64)
            .unwrap_or(0))
    }
}

// ===== MockRetryQueue =====

#[derive(Clone, Default)]
pub struct MockRetryQueue {
    tasks: Arc<Mutex<Vec<RetryTask>>>,
    fail_next_remove: Arc<Mutex<bool>>,
}

impl MockRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<RetryTask> {
        self.tasks.lock().unwrap().clone()
    }

    /// 次の remove 呼び出しを 1 回だけ失敗させる（障害シナリオ用）
    pub fn fail_next_remove(&self) {
        *self.fail_next_remove.lock().unwrap() = true;
    }
}

#[async_trait]
impl RetryQueue for MockRetryQueue {
    async fn enqueue(&self, task: &RetryTask) -> Result<(), InfraError> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryTask>, InfraError> {
        let mut due: Vec<RetryTask> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_eligible_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn remove(&self, task: &RetryTask) -> Result<(), InfraError> {
        let mut fail = self.fail_next_remove.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(InfraError::unavailable("キューに接続できません"));
        }
        drop(fail);
        self.tasks.lock().unwrap().retain(|t| t != task);
        Ok(())
    }

    async fn len(&self) -> Result<u64, InfraError> {
        Ok(self.tasks.lock().unwrap().len() as u64)
    }
}

// ===== MockErasureAuditLog =====

#[derive(Clone, Default)]
pub struct MockErasureAuditLog {
    entries: Arc<Mutex<Vec<ErasureAuditEntry>>>,
}

impl MockErasureAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ErasureAuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErasureAuditLog for MockErasureAuditLog {
    async fn record(&self, entry: &ErasureAuditEntry) -> Result<(), InfraError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn find_by_pseudonym(
        &self,
        pseudonym: &Pseudonym,
    ) -> Result<Vec<ErasureAuditEntry>, InfraError> {
        let mut entries: Vec<ErasureAuditEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subject_pseudonym == *pseudonym)
            .cloned()
            .collect();
        entries.sort_by_key(ErasureAuditEntry::sort_key);
        Ok(entries)
    }
}

// ===== インメモリ Deleter =====

/// 運用レコード Deleter のモック（消去ステップ a）
pub struct MockRecordsDeleter {
    records:     MockRecordRepository,
    should_fail: Arc<Mutex<bool>>,
}

impl MockRecordsDeleter {
    pub fn new(records: MockRecordRepository) -> Self {
        Self {
            records,
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    /// 以降の delete 呼び出しを失敗させる（部分失敗シナリオ用）
    pub fn set_failing(&self, failing: bool) {
        *self.should_fail.lock().unwrap() = failing;
    }
}

#[async_trait]
impl SubjectDeleter for MockRecordsDeleter {
    fn name(&self) -> &'static str {
        "postgres:records"
    }

    fn step(&self) -> ErasureStep {
        ErasureStep::OperationalRecords
    }

    async fn delete(&self, target: &ErasureTarget) -> Result<DeletionResult, InfraError> {
        if *self.should_fail.lock().unwrap() {
            return Err(InfraError::unavailable("records ストアに接続できません"));
        }
        Ok(DeletionResult {
            deleted_count: self.records.remove_by_subject(&target.subject_id),
        })
    }

    async fn count(&self, target: &ErasureTarget) -> Result<u64, InfraError> {
        Ok(self.records.count_by_subject(&target.subject_id))
    }
}

/// サブジェクトルート Deleter のモック（消去ステップ b）
pub struct MockSubjectRootDeleter {
    subjects: MockSubjectRepository,
}

impl MockSubjectRootDeleter {
    pub fn new(subjects: MockSubjectRepository) -> Self {
        Self { subjects }
    }
}

#[async_trait]
impl SubjectDeleter for MockSubjectRootDeleter {
    fn name(&self) -> &'static str {
        "postgres:subjects"
    }

    fn step(&self) -> ErasureStep {
        ErasureStep::SubjectRoot
    }

    async fn delete(&self, target: &ErasureTarget) -> Result<DeletionResult, InfraError> {
        Ok(DeletionResult {
            deleted_count: self.subjects.remove(&target.subject_id),
        })
    }

    async fn count(&self, target: &ErasureTarget) -> Result<u64, InfraError> {
        Ok(u64::from(self.subjects.contains(&target.subject_id)))
    }
}

/// 認証アイデンティティ Deleter のモック（消去ステップ d）
#[derive(Clone, Default)]
pub struct MockAuthIdentityDeleter {
    identities: Arc<Mutex<HashSet<SubjectId>>>,
}

impl MockAuthIdentityDeleter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_identity(&self, subject_id: SubjectId) {
        self.identities.lock().unwrap().insert(subject_id);
    }

    pub fn contains(&self, subject_id: &SubjectId) -> bool {
        self.identities.lock().unwrap().contains(subject_id)
    }
}

#[async_trait]
impl SubjectDeleter for MockAuthIdentityDeleter {
    fn name(&self) -> &'static str {
        "auth:identities"
    }

    fn step(&self) -> ErasureStep {
        ErasureStep::AuthIdentity
    }

    async fn delete(&self, target: &ErasureTarget) -> Result<DeletionResult, InfraError> {
        let removed = self.identities.lock().unwrap().remove(&target.subject_id);
        Ok(DeletionResult {
            deleted_count: u64::from(removed),
        })
    }

    async fn count(&self, target: &ErasureTarget) -> Result<u64, InfraError> {
        Ok(u64::from(self.contains(&target.subject_id)))
    }
}
