//! # 運用レコード
//!
//! 運用ストアに保存されるサブジェクト単位のレコード（セッション・プロフィール）を
//! 管理する。ライフサイクル状態と同期状態をそれぞれ ADT（代数的データ型）で表現し、
//! 不正な状態の組み合わせを型レベルで防止する。
//!
//! レコードは終端状態（completed）に達するまでサブジェクト向けロジックが所有し、
//! 以降は同期パイプラインが `synced` / `abandoned` まで所有する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{DomainError, subject::{IpAddress, SubjectId}};

define_uuid_id! {
    /// レコード ID
    pub struct RecordId;
}

/// レコード種別
///
/// ウェアハウスの宛先テーブルはこの種別から決まる。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum RecordKind {
    /// セッションレコード
    Session,
    /// プロフィールスナップショット
    Profile,
}

impl std::str::FromStr for RecordKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "profile" => Ok(Self::Profile),
            _ => Err(DomainError::Validation(format!(
                "不正なレコード種別: {}",
                s
            ))),
        }
    }
}

/// レコードのライフサイクルステータス（DB 保存用フラット表現）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum RecordStatus {
    /// 進行中
    Active,
    /// 完了（同期対象の終端状態）
    Completed,
    /// 取り消し（同期対象外の終端状態）
    Cancelled,
}

impl std::str::FromStr for RecordStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(DomainError::Validation(format!(
                "不正なレコードステータス: {}",
                s
            ))),
        }
    }
}

/// ライフサイクル状態（ADT）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// 進行中
    Active,
    /// 完了
    Completed {
        /// 終端状態への遷移日時。ウェアハウス行の必須カラムになる
        completed_at: DateTime<Utc>,
    },
    /// 取り消し
    Cancelled {
        cancelled_at: DateTime<Utc>,
    },
}

/// 同期ステータス（DB 保存用フラット表現）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum SyncStatus {
    /// 未同期
    Unsynced,
    /// 同期済み
    Synced,
    /// 失敗（リトライ中）
    Failed,
    /// 断念（リトライ上限到達。手動対応のみ）
    Abandoned,
}

impl std::str::FromStr for SyncStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsynced" => Ok(Self::Unsynced),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(DomainError::Validation(format!(
                "不正な同期ステータス: {}",
                s
            ))),
        }
    }
}

/// 同期状態（ADT）
///
/// `Synced` は「対応するウェアハウス行が存在する」ことを意味する。
/// `unsynced → synced` は明示的な再同期を除き単調で、巻き戻らない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// 未同期
    Unsynced,
    /// 同期済み
    Synced {
        synced_at: DateTime<Utc>,
    },
    /// 失敗（リトライキューで再配送中）
    Failed {
        error:       String,
        retry_count: u32,
    },
    /// 断念（リトライ上限到達）
    Abandoned {
        error:       String,
        retry_count: u32,
    },
}

/// 運用ペイロード
///
/// ウェアハウスに渡る前に一般化される準識別子と、決して渡らない PII を保持する。
/// `ip_address` は PII 型のため Debug 出力もマスクされる。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordPayload {
    /// 端末モデル（準識別子。ウェアハウスでは端末クラスに粗化される）
    pub device_model: Option<String>,
    /// ロケール（準識別子。ウェアハウスでは言語タグに粗化される）
    pub locale: Option<String>,
    /// アプリバージョン
    pub app_version: Option<String>,
    /// セッション長（秒）
    pub duration_seconds: Option<i64>,
    /// 接続元 IP（PII。運用ストアの外に出ない）
    pub ip_address: Option<IpAddress>,
}

/// 運用レコードエンティティ
///
/// ライフサイクル状態と同期状態を分離して保持する。
/// 遷移メソッドは `self` を消費して新しいインスタンスを返す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: RecordId,
    subject_id: SubjectId,
    kind: RecordKind,
    payload: RecordPayload,
    state: RecordState,
    sync: SyncState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// レコードの新規作成パラメータ
pub struct NewRecord {
    pub id: RecordId,
    pub subject_id: SubjectId,
    pub kind: RecordKind,
    pub payload: RecordPayload,
    pub now: DateTime<Utc>,
}

/// レコードの DB 復元パラメータ
///
/// DB スキーマのフラット構造を表現する。`from_db()` で不変条件を検証して ADT に変換する。
pub struct RecordRow {
    pub id: RecordId,
    pub subject_id: SubjectId,
    pub kind: RecordKind,
    pub payload: RecordPayload,
    pub status: RecordStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub sync_retry_count: u32,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// 新しいレコードを作成する（active / unsynced）
    pub fn new(params: NewRecord) -> Self {
        Self {
            id: params.id,
            subject_id: params.subject_id,
            kind: params.kind,
            payload: params.payload,
            state: RecordState::Active,
            sync: SyncState::Unsynced,
            created_at: params.now,
            updated_at: params.now,
        }
    }

    /// 既存のデータから復元する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 不変条件違反
    ///   （例: completed なのに completed_at が無い、synced なのに未完了）
    pub fn from_db(row: RecordRow) -> Result<Self, DomainError> {
        let state = match row.status {
            RecordStatus::Active => RecordState::Active,
            RecordStatus::Completed => {
                let completed_at = row.completed_at.ok_or_else(|| {
                    DomainError::Validation(
                        "completed レコードには completed_at が必要です".to_string(),
                    )
                })?;
                RecordState::Completed { completed_at }
            }
            RecordStatus::Cancelled => {
                let cancelled_at = row.cancelled_at.ok_or_else(|| {
                    DomainError::Validation(
                        "cancelled レコードには cancelled_at が必要です".to_string(),
                    )
                })?;
                RecordState::Cancelled { cancelled_at }
            }
        };

        let sync = match row.sync_status {
            SyncStatus::Unsynced => SyncState::Unsynced,
            SyncStatus::Synced => {
                if row.status != RecordStatus::Completed {
                    return Err(DomainError::Validation(
                        "synced は completed レコードに対してのみ有効です".to_string(),
                    ));
                }
                let synced_at = row.synced_at.ok_or_else(|| {
                    DomainError::Validation(
                        "synced レコードには synced_at が必要です".to_string(),
                    )
                })?;
                SyncState::Synced { synced_at }
            }
            SyncStatus::Failed => {
                let error = row.sync_error.ok_or_else(|| {
                    DomainError::Validation(
                        "failed レコードには sync_error が必要です".to_string(),
                    )
                })?;
                SyncState::Failed {
                    error,
                    retry_count: row.sync_retry_count,
                }
            }
            SyncStatus::Abandoned => {
                let error = row.sync_error.ok_or_else(|| {
                    DomainError::Validation(
                        "abandoned レコードには sync_error が必要です".to_string(),
                    )
                })?;
                SyncState::Abandoned {
                    error,
                    retry_count: row.sync_retry_count,
                }
            }
        };

        Ok(Self {
            id: row.id,
            subject_id: row.subject_id,
            kind: row.kind,
            payload: row.payload,
            state,
            sync,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    // Getter メソッド

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn payload(&self) -> &RecordPayload {
        &self.payload
    }

    pub fn status(&self) -> RecordStatus {
        match &self.state {
            RecordState::Active => RecordStatus::Active,
            RecordState::Completed { .. } => RecordStatus::Completed,
            RecordState::Cancelled { .. } => RecordStatus::Cancelled,
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        match &self.sync {
            SyncState::Unsynced => SyncStatus::Unsynced,
            SyncState::Synced { .. } => SyncStatus::Synced,
            SyncState::Failed { .. } => SyncStatus::Failed,
            SyncState::Abandoned { .. } => SyncStatus::Abandoned,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, RecordState::Completed { .. })
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            RecordState::Completed { completed_at } => Some(*completed_at),
            _ => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            RecordState::Cancelled { cancelled_at } => Some(*cancelled_at),
            _ => None,
        }
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        match &self.sync {
            SyncState::Synced { synced_at } => Some(*synced_at),
            _ => None,
        }
    }

    pub fn sync_error(&self) -> Option<&str> {
        match &self.sync {
            SyncState::Failed { error, .. } | SyncState::Abandoned { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn sync_retry_count(&self) -> u32 {
        match &self.sync {
            SyncState::Failed { retry_count, .. } | SyncState::Abandoned { retry_count, .. } => {
                *retry_count
            }
            _ => 0,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 状態への直接アクセス（パターンマッチ用）
    pub fn state(&self) -> &RecordState {
        &self.state
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    // 遷移メソッド

    /// レコードを完了した新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: active 以外の状態で呼び出した場合
    pub fn completed(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            RecordState::Active => Ok(Self {
                state: RecordState::Completed { completed_at: now },
                updated_at: now,
                ..self
            }),
            _ => Err(DomainError::Validation(
                "進行中のレコードのみ完了できます".to_string(),
            )),
        }
    }

    /// レコードを取り消した新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: active 以外の状態で呼び出した場合
    pub fn cancelled(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            RecordState::Active => Ok(Self {
                state: RecordState::Cancelled { cancelled_at: now },
                updated_at: now,
                ..self
            }),
            _ => Err(DomainError::Validation(
                "進行中のレコードのみ取り消せます".to_string(),
            )),
        }
    }

    /// 同期成功を記録した新しいインスタンスを返す
    ///
    /// エラーをクリアし、リトライカウントをリセットし、synced_at を打刻する。
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 未完了レコードに対して呼び出した場合
    ///   （synced はウェアハウス行の存在を意味するため、完了が前提）
    pub fn mark_synced(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if !self.is_completed() {
            return Err(DomainError::Validation(
                "完了済みレコードのみ synced にできます".to_string(),
            ));
        }
        Ok(Self {
            sync: SyncState::Synced { synced_at: now },
            updated_at: now,
            ..self
        })
    }

    /// 同期失敗を記録した新しいインスタンスを返す
    pub fn mark_failed(
        self,
        error: impl Into<String>,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sync: SyncState::Failed {
                error: error.into(),
                retry_count,
            },
            updated_at: now,
            ..self
        }
    }

    /// 同期断念を記録した新しいインスタンスを返す
    ///
    /// 以後は手動・管理操作によってのみ再キューされる。
    pub fn mark_abandoned(
        self,
        error: impl Into<String>,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sync: SyncState::Abandoned {
                error: error.into(),
                retry_count,
            },
            updated_at: now,
            ..self
        }
    }
}

/// レコード変更通知（チェンジフィードの要素）
///
/// 変更前後のスナップショットを運ぶ。ディスパッチャは
/// 「completed への遷移エッジ」でのみ発火する。
#[derive(Debug, Clone)]
pub struct RecordChange {
    /// 変更前スナップショット（新規作成時は `None`）
    pub before: Option<Record>,
    /// 変更後スナップショット
    pub after:  Record,
}

impl RecordChange {
    /// completed への遷移エッジかどうか
    ///
    /// `after` が completed で、かつ `before` が completed で**ない**場合のみ真。
    /// completed → completed の再通知では発火しない（エッジトリガ契約）。
    pub fn is_completion_edge(&self) -> bool {
        let before_completed = self.before.as_ref().is_some_and(Record::is_completed);
        self.after.is_completed() && !before_completed
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
    fn test_record(now: DateTime<Utc>) -> Record {
        Record::new(NewRecord {
            id: RecordId::new(),
            subject_id: SubjectId::new(),
            kind: RecordKind::Session,
            payload: RecordPayload {
                device_model: Some("iPhone15,2".to_string()),
                locale: Some("ja-JP".to_string()),
                app_version: Some("2.4.1".to_string()),
                duration_seconds: Some(312),
                ip_address: None,
            },
            now,
        })
    }

    /// Record の getter から RecordRow を構築するヘルパー。
    /// 構造体更新構文 `..row_from(&record)` と組み合わせて、
    /// テストで差異のあるフィールドだけを指定するために使用する。
    fn row_from(record: &Record) -> RecordRow {
        RecordRow {
            id: record.id().clone(),
            subject_id: record.subject_id().clone(),
            kind: record.kind(),
            payload: record.payload().clone(),
            status: record.status(),
            completed_at: record.completed_at(),
            cancelled_at: record.cancelled_at(),
            sync_status: record.sync_status(),
            sync_error: record.sync_error().map(String::from),
            sync_retry_count: record.sync_retry_count(),
            synced_at: record.synced_at(),
            created_at: record.created_at(),
            updated_at: record.updated_at(),
        }
    }

    #[rstest]
    fn test_新規作成の初期状態(test_record: Record) {
        assert_eq!(test_record.status(), RecordStatus::Active);
        assert_eq!(test_record.sync_status(), SyncStatus::Unsynced);

        let expected = Record::from_db(row_from(&test_record)).unwrap();
        assert_eq!(test_record, expected);
    }

    #[rstest]
    fn test_完了後の状態(test_record: Record, now: DateTime<Utc>) {
        let before = test_record.clone();
        let sut = test_record.completed(now).unwrap();

        let expected = Record::from_db(RecordRow {
            status: RecordStatus::Completed,
            completed_at: Some(now),
            updated_at: now,
            ..row_from(&before)
        })
        .unwrap();
        assert_eq!(sut, expected);
    }

    #[rstest]
    fn test_完了済みからの再完了はエラー(test_record: Record, now: DateTime<Utc>) {
        let record = test_record.completed(now).unwrap();

        assert!(record.completed(now).is_err());
    }

    #[rstest]
    fn test_取り消し後の状態(test_record: Record, now: DateTime<Utc>) {
        let sut = test_record.cancelled(now).unwrap();

        assert_eq!(sut.status(), RecordStatus::Cancelled);
        assert_eq!(sut.cancelled_at(), Some(now));
    }

    #[rstest]
    fn test_取り消し済みからの完了はエラー(test_record: Record, now: DateTime<Utc>) {
        let record = test_record.cancelled(now).unwrap();

        assert!(record.completed(now).is_err());
    }

    #[rstest]
    fn test_mark_syncedでエラーとリトライカウントがリセットされる(
        test_record: Record,
        now: DateTime<Utc>,
    ) {
        let record = test_record
            .completed(now)
            .unwrap()
            .mark_failed("timeout", 3, now);

        let sut = record.mark_synced(now).unwrap();

        assert_eq!(sut.sync_status(), SyncStatus::Synced);
        assert_eq!(sut.synced_at(), Some(now));
        assert_eq!(sut.sync_error(), None);
        assert_eq!(sut.sync_retry_count(), 0);
    }

    #[rstest]
    fn test_未完了レコードのmark_syncedはエラー(test_record: Record, now: DateTime<Utc>) {
        assert!(test_record.mark_synced(now).is_err());
    }

    #[rstest]
    fn test_mark_failedでエラーとリトライカウントが記録される(
        test_record: Record,
        now: DateTime<Utc>,
    ) {
        let record = test_record.completed(now).unwrap();

        let sut = record.mark_failed("warehouse timeout", 2, now);

        assert_eq!(sut.sync_status(), SyncStatus::Failed);
        assert_eq!(sut.sync_error(), Some("warehouse timeout"));
        assert_eq!(sut.sync_retry_count(), 2);
    }

    #[rstest]
    fn test_mark_abandonedで断念状態になる(test_record: Record, now: DateTime<Utc>) {
        let record = test_record.completed(now).unwrap();

        let sut = record.mark_abandoned("max attempts", 10, now);

        assert_eq!(sut.sync_status(), SyncStatus::Abandoned);
        assert_eq!(sut.sync_error(), Some("max attempts"));
        assert_eq!(sut.sync_retry_count(), 10);
    }

    // --- from_db() 不変条件バリデーション ---

    #[rstest]
    fn test_from_db_completedでcompleted_at欠損はエラー(test_record: Record) {
        let result = Record::from_db(RecordRow {
            status: RecordStatus::Completed,
            completed_at: None,
            ..row_from(&test_record)
        });

        assert!(result.is_err());
    }

    #[rstest]
    fn test_from_db_syncedでsynced_at欠損はエラー(
        test_record: Record,
        now: DateTime<Utc>,
    ) {
        let record = test_record.completed(now).unwrap();
        let result = Record::from_db(RecordRow {
            sync_status: SyncStatus::Synced,
            synced_at: None,
            ..row_from(&record)
        });

        assert!(result.is_err());
    }

    #[rstest]
    fn test_from_db_未完了なのにsyncedはエラー(test_record: Record, now: DateTime<Utc>) {
        let result = Record::from_db(RecordRow {
            sync_status: SyncStatus::Synced,
            synced_at: Some(now),
            ..row_from(&test_record)
        });

        assert!(result.is_err());
    }

    #[rstest]
    fn test_from_db_failedでsync_error欠損はエラー(test_record: Record) {
        let result = Record::from_db(RecordRow {
            sync_status: SyncStatus::Failed,
            sync_error: None,
            sync_retry_count: 1,
            ..row_from(&test_record)
        });

        assert!(result.is_err());
    }

    // --- RecordChange エッジ判定 ---

    #[rstest]
    fn test_active_から_completed_はエッジ(test_record: Record, now: DateTime<Utc>) {
        let before = test_record.clone();
        let after = test_record.completed(now).unwrap();

        let change = RecordChange {
            before: Some(before),
            after,
        };

        assert!(change.is_completion_edge());
    }

    #[rstest]
    fn test_completed_から_completed_はエッジではない(
        test_record: Record,
        now: DateTime<Utc>,
    ) {
        let completed = test_record.completed(now).unwrap();

        let change = RecordChange {
            before: Some(completed.clone()),
            after:  completed,
        };

        assert!(!change.is_completion_edge());
    }

    #[rstest]
    fn test_beforeなしで最初からcompletedはエッジ(test_record: Record, now: DateTime<Utc>) {
        let change = RecordChange {
            before: None,
            after:  test_record.completed(now).unwrap(),
        };

        assert!(change.is_completion_edge());
    }

    #[rstest]
    fn test_active_への変更はエッジではない(test_record: Record) {
        let change = RecordChange {
            before: None,
            after:  test_record,
        };

        assert!(!change.is_completion_edge());
    }
}
