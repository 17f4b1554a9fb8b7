//! # デッドレター
//!
//! 同期に失敗したレコードの失敗文脈を記録する。エントリは削除されず、
//! 解決・断念いずれの場合も履歴として無期限に保持される。
//!
//! レコードごとに「未解決（pending）のエントリは高々 1 件」で、
//! リトライ中の再失敗は新規エントリを積まず既存エントリの
//! 失敗理由を更新する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{DomainError, record::RecordId, subject::SubjectId, warehouse::WarehouseTable};

define_uuid_id! {
    /// デッドレターエントリ ID
    pub struct DeadLetterEntryId;
}

/// デッドレターの状態
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum DeadLetterStatus {
    /// 未解決（リトライ進行中、または手動対応待ち）
    Pending,
    /// 解決済み（リトライ成功、または手動再キュー後の成功）
    Resolved,
    /// 断念（リトライ上限到達、またはリトライ不可の失敗）
    Abandoned,
}

impl std::str::FromStr for DeadLetterStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(DomainError::Validation(format!(
                "不正なデッドレターステータス: {}",
                s
            ))),
        }
    }
}

/// デッドレターエントリ
///
/// 終端時刻は resolved / abandoned 共通で `resolved_at` に記録する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEntry {
    id: DeadLetterEntryId,
    subject_id: SubjectId,
    record_id: RecordId,
    table: WarehouseTable,
    failure_reason: String,
    status: DeadLetterStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl DeadLetterEntry {
    /// 新しい未解決エントリを開く
    pub fn open(
        subject_id: SubjectId,
        record_id: RecordId,
        table: WarehouseTable,
        failure_reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeadLetterEntryId::new(),
            subject_id,
            record_id,
            table,
            failure_reason: failure_reason.into(),
            status: DeadLetterStatus::Pending,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    /// 既存のデータから復元する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 終端状態なのに resolved_at が無い場合
    #[allow(clippy::too_many_arguments)]
    pub fn from_db(
        id: DeadLetterEntryId,
        subject_id: SubjectId,
        record_id: RecordId,
        table: WarehouseTable,
        failure_reason: String,
        status: DeadLetterStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        if matches!(
            status,
            DeadLetterStatus::Resolved | DeadLetterStatus::Abandoned
        ) && resolved_at.is_none()
        {
            return Err(DomainError::Validation(format!(
                "{} エントリには resolved_at が必要です",
                status
            )));
        }

        Ok(Self {
            id,
            subject_id,
            record_id,
            table,
            failure_reason,
            status,
            created_at,
            updated_at,
            resolved_at,
        })
    }

    pub fn id(&self) -> &DeadLetterEntryId {
        &self.id
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    pub fn table(&self) -> WarehouseTable {
        self.table
    }

    pub fn failure_reason(&self) -> &str {
        &self.failure_reason
    }

    pub fn status(&self) -> DeadLetterStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// 再失敗で失敗理由を更新した新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: pending 以外の状態で呼び出した場合
    pub fn refreshed(self, failure_reason: impl Into<String>, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != DeadLetterStatus::Pending {
            return Err(DomainError::Validation(
                "未解決エントリのみ失敗理由を更新できます".to_string(),
            ));
        }
        Ok(Self {
            failure_reason: failure_reason.into(),
            updated_at: now,
            ..self
        })
    }

    /// 解決済みにした新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: pending 以外の状態で呼び出した場合
    pub fn resolved(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != DeadLetterStatus::Pending {
            return Err(DomainError::Validation(
                "未解決エントリのみ解決できます".to_string(),
            ));
        }
        Ok(Self {
            status: DeadLetterStatus::Resolved,
            updated_at: now,
            resolved_at: Some(now),
            ..self
        })
    }

    /// 断念にした新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: pending 以外の状態で呼び出した場合
    pub fn abandoned(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != DeadLetterStatus::Pending {
            return Err(DomainError::Validation(
                "未解決エントリのみ断念できます".to_string(),
            ));
        }
        Ok(Self {
            status: DeadLetterStatus::Abandoned,
            updated_at: now,
            resolved_at: Some(now),
            ..self
        })
    }

    /// 手動再キューのために未解決へ戻した新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: abandoned 以外の状態で呼び出した場合
    pub fn reopened(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != DeadLetterStatus::Abandoned {
            return Err(DomainError::Validation(
                "断念済みエントリのみ再オープンできます".to_string(),
            ));
        }
        Ok(Self {
            status: DeadLetterStatus::Pending,
            updated_at: now,
            resolved_at: None,
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[fixture]
    fn entry(now: DateTime<Utc>) -> DeadLetterEntry {
        DeadLetterEntry::open(
            SubjectId::new(),
            RecordId::new(),
            WarehouseTable::Sessions,
            "warehouse timeout",
            now,
        )
    }

    #[rstest]
    fn test_新規エントリは未解決(entry: DeadLetterEntry) {
        assert_eq!(entry.status(), DeadLetterStatus::Pending);
        assert_eq!(entry.resolved_at(), None);
    }

    #[rstest]
    fn test_解決で終端時刻が打刻される(entry: DeadLetterEntry, now: DateTime<Utc>) {
        let sut = entry.resolved(now).unwrap();

        assert_eq!(sut.status(), DeadLetterStatus::Resolved);
        assert_eq!(sut.resolved_at(), Some(now));
    }

    #[rstest]
    fn test_断念で終端時刻が打刻される(entry: DeadLetterEntry, now: DateTime<Utc>) {
        let sut = entry.abandoned(now).unwrap();

        assert_eq!(sut.status(), DeadLetterStatus::Abandoned);
        assert_eq!(sut.resolved_at(), Some(now));
    }

    #[rstest]
    fn test_解決済みエントリの再解決はエラー(entry: DeadLetterEntry, now: DateTime<Utc>) {
        let resolved = entry.resolved(now).unwrap();

        assert!(resolved.resolved(now).is_err());
    }

    #[rstest]
    fn test_再失敗で失敗理由が更新される(entry: DeadLetterEntry, now: DateTime<Utc>) {
        let sut = entry.refreshed("connection refused", now).unwrap();

        assert_eq!(sut.status(), DeadLetterStatus::Pending);
        assert_eq!(sut.failure_reason(), "connection refused");
    }

    #[rstest]
    fn test_断念済みエントリは再オープンできる(entry: DeadLetterEntry, now: DateTime<Utc>) {
        let abandoned = entry.abandoned(now).unwrap();

        let sut = abandoned.reopened(now).unwrap();

        assert_eq!(sut.status(), DeadLetterStatus::Pending);
        assert_eq!(sut.resolved_at(), None);
    }

    #[rstest]
    fn test_未解決エントリの再オープンはエラー(entry: DeadLetterEntry, now: DateTime<Utc>) {
        assert!(entry.reopened(now).is_err());
    }

    #[rstest]
    fn test_from_db_終端状態でresolved_at欠損はエラー(now: DateTime<Utc>) {
        let result = DeadLetterEntry::from_db(
            DeadLetterEntryId::new(),
            SubjectId::new(),
            RecordId::new(),
            WarehouseTable::Sessions,
            "reason".to_string(),
            DeadLetterStatus::Resolved,
            now,
            now,
            None,
        );

        assert!(result.is_err());
    }
}
