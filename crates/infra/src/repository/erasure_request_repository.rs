//! # ErasureRequestRepository
//!
//! 消去リクエストの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **サブジェクトあたり保留中 1 件**: 部分ユニークインデックス
//!   （`WHERE status = 'pending'`）を第一の防衛線とし、一意制約違反を
//!   `Conflict` に変換する
//! - **条件付き状態遷移**: 取り消し・完了の UPDATE は `WHERE status = 'pending'`
//!   を含め、スケジューラとキャンセル経路の競合をアトミックに解決する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use souko_domain::{
    erasure::{ErasureRequest, ErasureRequestId, ErasureRequestStatus},
    subject::SubjectId,
};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::InfraError;

/// 消去リクエストリポジトリトレイト
#[async_trait]
pub trait ErasureRequestRepository: Send + Sync {
    /// 消去リクエストを新規作成する
    ///
    /// # 戻り値
    ///
    /// - `Err(Conflict)`: サブジェクトに既に保留中のリクエストがある場合
    async fn insert(&self, request: &ErasureRequest) -> Result<(), InfraError>;

    /// ID でリクエストを取得する
    async fn find_by_id(&self, id: &ErasureRequestId)
    -> Result<Option<ErasureRequest>, InfraError>;

    /// サブジェクトの保留中リクエストを取得する
    async fn find_pending_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<ErasureRequest>, InfraError>;

    /// 削除予定日を過ぎた保留中リクエストを古い順に取得する
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ErasureRequest>, InfraError>;

    /// 保留中リクエストの状態遷移を保存する
    ///
    /// DB 上のステータスが `pending` の場合のみ更新する。
    ///
    /// # 戻り値
    ///
    /// - `Err(Conflict)`: 既に pending でなかった場合
    ///   （並行する取り消し・完了に負けた）
    async fn transition_from_pending(&self, request: &ErasureRequest) -> Result<(), InfraError>;
}

/// PostgreSQL 実装の ErasureRequestRepository
#[derive(Debug, Clone)]
pub struct PostgresErasureRequestRepository {
    pool: PgPool,
}

impl PostgresErasureRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ErasureRequestRepository for PostgresErasureRequestRepository {
    #[tracing::instrument(skip_all, fields(subject_id = %request.subject_id()))]
    async fn insert(&self, request: &ErasureRequest) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            INSERT INTO erasure_requests (
                id, subject_id, requested_at, status,
                scheduled_deletion_date, cancelled_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(request.id().as_uuid())
        .bind(request.subject_id().as_uuid())
        .bind(request.requested_at())
        .bind(request.status().to_string())
        .bind(request.scheduled_deletion_date())
        .bind(request.cancelled_at())
        .bind(request.completed_at())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // 部分ユニークインデックス違反 = 保留中リクエストの重複
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                InfraError::conflict("ErasureRequest", request.subject_id().to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip_all, fields(request_id = %id))]
    async fn find_by_id(
        &self,
        id: &ErasureRequestId,
    ) -> Result<Option<ErasureRequest>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, requested_at, status,
                   scheduled_deletion_date, cancelled_at, completed_at
            FROM erasure_requests
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    #[tracing::instrument(skip_all, fields(subject_id = %subject_id))]
    async fn find_pending_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<ErasureRequest>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, requested_at, status,
                   scheduled_deletion_date, cancelled_at, completed_at
            FROM erasure_requests
            WHERE subject_id = $1 AND status = 'pending'
            "#,
        )
        .bind(subject_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_request).transpose()
    }

    #[tracing::instrument(skip_all, fields(limit))]
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ErasureRequest>, InfraError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, requested_at, status,
                   scheduled_deletion_date, cancelled_at, completed_at
            FROM erasure_requests
            WHERE status = 'pending' AND scheduled_deletion_date <= $1
            ORDER BY scheduled_deletion_date ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_request).collect()
    }

    #[tracing::instrument(skip_all, fields(request_id = %request.id(), status = %request.status()))]
    async fn transition_from_pending(&self, request: &ErasureRequest) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE erasure_requests SET
                status = $2,
                scheduled_deletion_date = NULL,
                cancelled_at = $3,
                completed_at = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(request.id().as_uuid())
        .bind(request.status().to_string())
        .bind(request.cancelled_at())
        .bind(request.completed_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::conflict(
                "ErasureRequest",
                request.id().to_string(),
            ));
        }
        Ok(())
    }
}

/// DB 行を ErasureRequest に変換する
fn row_to_request(row: PgRow) -> Result<ErasureRequest, InfraError> {
    let status: String = row.try_get("status")?;

    ErasureRequest::from_db(
        ErasureRequestId::from_uuid(row.try_get("id")?),
        SubjectId::from_uuid(row.try_get("subject_id")?),
        row.try_get("requested_at")?,
        status
            .parse::<ErasureRequestStatus>()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
        row.try_get::<Option<DateTime<Utc>>, _>("scheduled_deletion_date")?,
        row.try_get::<Option<DateTime<Utc>>, _>("cancelled_at")?,
        row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
    )
    .map_err(|e| InfraError::unexpected(e.to_string()))
}
