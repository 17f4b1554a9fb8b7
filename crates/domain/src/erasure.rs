//! # 消去リクエスト
//!
//! サブジェクトによる忘れられる権利の行使を表す。リクエストには猶予期間があり、
//! `scheduled_deletion_date` を過ぎると削除スケジューラが消去シーケンスを実行する。
//! 猶予期間中はサブジェクトが取り消せる。
//!
//! 状態は ADT で表現する。保存用ステータスには前方互換のため `failed` が
//! 存在するが、スケジューラは部分失敗のリクエストを pending のまま残して
//! 次回実行で全ステップをやり直すため、`failed` を生成するコードパスは無い。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{DomainError, subject::SubjectId};

define_uuid_id! {
    /// 消去リクエスト ID
    pub struct ErasureRequestId;
}

/// 消去リクエストのステータス（DB 保存用フラット表現）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "snake_case")]
pub enum ErasureRequestStatus {
    /// 猶予期間中、または消去実行待ち
    Pending,
    /// 猶予期間中に取り消された
    Cancelled,
    /// 消去シーケンス完了（終端。再活性化しない）
    Completed,
    /// 前方互換のために予約。現行のスケジューラは生成しない
    Failed,
}

impl std::str::FromStr for ErasureRequestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(DomainError::Validation(format!(
                "不正な消去リクエストステータス: {}",
                s
            ))),
        }
    }
}

/// 消去リクエストの状態（ADT）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErasureRequestState {
    /// 猶予期間中、または消去実行待ち
    Pending {
        /// この日時以降、スケジューラが消去を実行する
        scheduled_deletion_date: DateTime<Utc>,
    },
    /// 取り消し済み
    Cancelled {
        cancelled_at: DateTime<Utc>,
    },
    /// 消去完了
    Completed {
        completed_at: DateTime<Utc>,
    },
}

/// 消去リクエストエンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasureRequest {
    id: ErasureRequestId,
    subject_id: SubjectId,
    requested_at: DateTime<Utc>,
    state: ErasureRequestState,
}

impl ErasureRequest {
    /// 新しい消去リクエストを作成する
    ///
    /// `scheduled_deletion_date = now + grace_period`。
    pub fn new(subject_id: SubjectId, grace_period: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: ErasureRequestId::new(),
            subject_id,
            requested_at: now,
            state: ErasureRequestState::Pending {
                scheduled_deletion_date: now + grace_period,
            },
        }
    }

    /// 既存のデータから復元する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: ステータスと日時カラムの組み合わせが不正な場合
    pub fn from_db(
        id: ErasureRequestId,
        subject_id: SubjectId,
        requested_at: DateTime<Utc>,
        status: ErasureRequestStatus,
        scheduled_deletion_date: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        let state = match status {
            ErasureRequestStatus::Pending => {
                let scheduled_deletion_date = scheduled_deletion_date.ok_or_else(|| {
                    DomainError::Validation(
                        "pending リクエストには scheduled_deletion_date が必要です".to_string(),
                    )
                })?;
                ErasureRequestState::Pending {
                    scheduled_deletion_date,
                }
            }
            ErasureRequestStatus::Cancelled => {
                let cancelled_at = cancelled_at.ok_or_else(|| {
                    DomainError::Validation(
                        "cancelled リクエストには cancelled_at が必要です".to_string(),
                    )
                })?;
                ErasureRequestState::Cancelled { cancelled_at }
            }
            ErasureRequestStatus::Completed => {
                let completed_at = completed_at.ok_or_else(|| {
                    DomainError::Validation(
                        "completed リクエストには completed_at が必要です".to_string(),
                    )
                })?;
                ErasureRequestState::Completed { completed_at }
            }
            ErasureRequestStatus::Failed => {
                return Err(DomainError::Validation(
                    "failed ステータスの消去リクエストは現行スキーマでは生成されません"
                        .to_string(),
                ));
            }
        };

        Ok(Self {
            id,
            subject_id,
            requested_at,
            state,
        })
    }

    pub fn id(&self) -> &ErasureRequestId {
        &self.id
    }

    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn state(&self) -> &ErasureRequestState {
        &self.state
    }

    pub fn status(&self) -> ErasureRequestStatus {
        match &self.state {
            ErasureRequestState::Pending { .. } => ErasureRequestStatus::Pending,
            ErasureRequestState::Cancelled { .. } => ErasureRequestStatus::Cancelled,
            ErasureRequestState::Completed { .. } => ErasureRequestStatus::Completed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ErasureRequestState::Pending { .. })
    }

    pub fn scheduled_deletion_date(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            ErasureRequestState::Pending {
                scheduled_deletion_date,
            } => Some(*scheduled_deletion_date),
            _ => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            ErasureRequestState::Cancelled { cancelled_at } => Some(*cancelled_at),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            ErasureRequestState::Completed { completed_at } => Some(*completed_at),
            _ => None,
        }
    }

    /// スケジューラによる消去の実行対象かどうか
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match &self.state {
            ErasureRequestState::Pending {
                scheduled_deletion_date,
            } => *scheduled_deletion_date <= now,
            _ => false,
        }
    }

    /// 取り消した新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: pending 以外の状態で呼び出した場合
    pub fn cancelled(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            ErasureRequestState::Pending { .. } => Ok(Self {
                state: ErasureRequestState::Cancelled { cancelled_at: now },
                ..self
            }),
            _ => Err(DomainError::Validation(
                "保留中の消去リクエストのみ取り消せます".to_string(),
            )),
        }
    }

    /// 完了にした新しいインスタンスを返す
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: pending 以外の状態で呼び出した場合
    pub fn completed(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            ErasureRequestState::Pending { .. } => Ok(Self {
                state: ErasureRequestState::Completed { completed_at: now },
                ..self
            }),
            _ => Err(DomainError::Validation(
                "保留中の消去リクエストのみ完了にできます".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[fixture]
    fn request(now: DateTime<Utc>) -> ErasureRequest {
        ErasureRequest::new(SubjectId::new(), Duration::days(30), now)
    }

    #[rstest]
    fn test_新規リクエストは猶予期間付きのpending(
        request: ErasureRequest,
        now: DateTime<Utc>,
    ) {
        assert!(request.is_pending());
        assert_eq!(
            request.scheduled_deletion_date(),
            Some(now + Duration::days(30))
        );
    }

    #[rstest]
    fn test_猶予期間満了前は実行対象ではない(request: ErasureRequest, now: DateTime<Utc>) {
        assert!(!request.is_due(now));
        assert!(!request.is_due(now + Duration::days(29)));
    }

    #[rstest]
    fn test_猶予期間満了後は実行対象になる(request: ErasureRequest, now: DateTime<Utc>) {
        assert!(request.is_due(now + Duration::days(30)));
        assert!(request.is_due(now + Duration::days(31)));
    }

    #[rstest]
    fn test_取り消し後の状態(request: ErasureRequest, now: DateTime<Utc>) {
        let sut = request.cancelled(now).unwrap();

        assert_eq!(sut.status(), ErasureRequestStatus::Cancelled);
        assert_eq!(sut.cancelled_at(), Some(now));
        assert!(!sut.is_due(now + Duration::days(365)));
    }

    #[rstest]
    fn test_完了後の状態(request: ErasureRequest, now: DateTime<Utc>) {
        let sut = request.completed(now).unwrap();

        assert_eq!(sut.status(), ErasureRequestStatus::Completed);
        assert_eq!(sut.completed_at(), Some(now));
    }

    #[rstest]
    fn test_完了済みリクエストは取り消せない(request: ErasureRequest, now: DateTime<Utc>) {
        let completed = request.completed(now).unwrap();

        assert!(completed.cancelled(now).is_err());
    }

    #[rstest]
    fn test_完了済みリクエストは再完了できない(
        request: ErasureRequest,
        now: DateTime<Utc>,
    ) {
        let completed = request.completed(now).unwrap();

        assert!(completed.completed(now).is_err());
    }

    #[rstest]
    fn test_取り消し済みリクエストは完了できない(
        request: ErasureRequest,
        now: DateTime<Utc>,
    ) {
        let cancelled = request.cancelled(now).unwrap();

        assert!(cancelled.completed(now).is_err());
    }

    #[rstest]
    fn test_from_db_pendingで削除予定日欠損はエラー(now: DateTime<Utc>) {
        let result = ErasureRequest::from_db(
            ErasureRequestId::new(),
            SubjectId::new(),
            now,
            ErasureRequestStatus::Pending,
            None,
            None,
            None,
        );

        assert!(result.is_err());
    }
}
