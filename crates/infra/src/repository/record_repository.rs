//! # RecordRepository
//!
//! 運用レコードの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **消去リクエスト保留中の書き込み拒否**: 保留中の消去リクエストがある
//!   サブジェクトのレコード集合は読み取り専用。新規作成・フィールド更新は
//!   `Conflict` で拒否する（同期状態の更新は対象外。進行中の同期まで
//!   止めると保留中レコードが宙吊りになるため）
//! - **条件付き UPDATE**: 同期状態の更新は期待する現在値を `WHERE` 句に含め、
//!   並行する更新との競合をアトミックに検出する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use souko_domain::{
    record::{Record, RecordId, RecordKind, RecordRow, RecordStatus, SyncStatus},
    subject::{IpAddress, SubjectId},
};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::InfraError;

/// 運用レコードリポジトリトレイト
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// レコードを新規作成する
    ///
    /// # 戻り値
    ///
    /// - `Err(Conflict)`: サブジェクトに保留中の消去リクエストがある場合
    async fn insert(&self, record: &Record) -> Result<(), InfraError>;

    /// ライフサイクル状態・ペイロードを保存する
    ///
    /// # 戻り値
    ///
    /// - `Err(Conflict)`: サブジェクトに保留中の消去リクエストがある場合
    async fn save(&self, record: &Record) -> Result<(), InfraError>;

    /// ID でレコードを取得する
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Record>, InfraError>;

    /// サブジェクトのレコード一覧を取得する
    async fn find_by_subject(&self, subject_id: &SubjectId) -> Result<Vec<Record>, InfraError>;

    /// 同期状態を条件付きで更新する
    ///
    /// `expected` が DB 上の現在の同期ステータスと一致する場合のみ更新する。
    ///
    /// # 戻り値
    ///
    /// - `Err(Conflict)`: 現在値が `expected` と一致しなかった場合
    ///   （並行する更新に負けた。呼び出し元は再読込して判断をやり直す）
    async fn update_sync_state(
        &self,
        record: &Record,
        expected: SyncStatus,
    ) -> Result<(), InfraError>;
}

/// PostgreSQL 実装の RecordRepository
#[derive(Debug, Clone)]
pub struct PostgresRecordRepository {
    pool: PgPool,
}

impl PostgresRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// サブジェクトに保留中の消去リクエストがあれば Conflict を返す
    async fn ensure_not_under_erasure(&self, subject_id: &SubjectId) -> Result<(), InfraError> {
        let pending: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM erasure_requests WHERE subject_id = $1 AND status = 'pending')",
        )
        .bind(subject_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        if pending {
            return Err(InfraError::conflict("Subject", subject_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordRepository for PostgresRecordRepository {
    #[tracing::instrument(skip_all, fields(record_id = %record.id()))]
    async fn insert(&self, record: &Record) -> Result<(), InfraError> {
        self.ensure_not_under_erasure(record.subject_id()).await?;

        sqlx::query(
            r#"
            INSERT INTO records (
                id, subject_id, kind,
                device_model, locale, app_version, duration_seconds, ip_address,
                status, completed_at, cancelled_at,
                sync_status, sync_error, sync_retry_count, synced_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.subject_id().as_uuid())
        .bind(record.kind().to_string())
        .bind(record.payload().device_model.as_deref())
        .bind(record.payload().locale.as_deref())
        .bind(record.payload().app_version.as_deref())
        .bind(record.payload().duration_seconds)
        .bind(record.payload().ip_address.as_ref().map(IpAddress::as_str))
        .bind(record.status().to_string())
        .bind(record.completed_at())
        .bind(record.cancelled_at())
        .bind(record.sync_status().to_string())
        .bind(record.sync_error())
        .bind(i32::try_from(record.sync_retry_count()).unwrap_or(i32::MAX))
        .bind(record.synced_at())
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(record_id = %record.id()))]
    async fn save(&self, record: &Record) -> Result<(), InfraError> {
        self.ensure_not_under_erasure(record.subject_id()).await?;

        sqlx::query(
            r#"
            UPDATE records SET
                device_model = $2,
                locale = $3,
                app_version = $4,
                duration_seconds = $5,
                ip_address = $6,
                status = $7,
                completed_at = $8,
                cancelled_at = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.payload().device_model.as_deref())
        .bind(record.payload().locale.as_deref())
        .bind(record.payload().app_version.as_deref())
        .bind(record.payload().duration_seconds)
        .bind(record.payload().ip_address.as_ref().map(IpAddress::as_str))
        .bind(record.status().to_string())
        .bind(record.completed_at())
        .bind(record.cancelled_at())
        .bind(record.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(record_id = %id))]
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Record>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, subject_id, kind,
                device_model, locale, app_version, duration_seconds, ip_address,
                status, completed_at, cancelled_at,
                sync_status, sync_error, sync_retry_count, synced_at,
                created_at, updated_at
            FROM records
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }

    #[tracing::instrument(skip_all, fields(subject_id = %subject_id))]
    async fn find_by_subject(&self, subject_id: &SubjectId) -> Result<Vec<Record>, InfraError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, subject_id, kind,
                device_model, locale, app_version, duration_seconds, ip_address,
                status, completed_at, cancelled_at,
                sync_status, sync_error, sync_retry_count, synced_at,
                created_at, updated_at
            FROM records
            WHERE subject_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(subject_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    #[tracing::instrument(skip_all, fields(record_id = %record.id(), expected = %expected))]
    async fn update_sync_state(
        &self,
        record: &Record,
        expected: SyncStatus,
    ) -> Result<(), InfraError> {
        let result = sqlx::query(
            r#"
            UPDATE records SET
                sync_status = $3,
                sync_error = $4,
                sync_retry_count = $5,
                synced_at = $6,
                updated_at = $7
            WHERE id = $1 AND sync_status = $2
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(expected.to_string())
        .bind(record.sync_status().to_string())
        .bind(record.sync_error())
        .bind(i32::try_from(record.sync_retry_count()).unwrap_or(i32::MAX))
        .bind(record.synced_at())
        .bind(record.updated_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::conflict("Record", record.id().to_string()));
        }
        Ok(())
    }
}

/// DB 行を Record に変換する
fn row_to_record(row: PgRow) -> Result<Record, InfraError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let sync_status: String = row.try_get("sync_status")?;
    let ip_address: Option<String> = row.try_get("ip_address")?;
    let sync_retry_count: i32 = row.try_get("sync_retry_count")?;

    let payload = souko_domain::record::RecordPayload {
        device_model: row.try_get("device_model")?,
        locale: row.try_get("locale")?,
        app_version: row.try_get("app_version")?,
        duration_seconds: row.try_get("duration_seconds")?,
        ip_address: ip_address
            .map(IpAddress::new)
            .transpose()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
    };

    Record::from_db(RecordRow {
        id: RecordId::from_uuid(row.try_get("id")?),
        subject_id: SubjectId::from_uuid(row.try_get("subject_id")?),
        kind: kind
            .parse::<RecordKind>()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
        payload,
        status: status
            .parse::<RecordStatus>()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        cancelled_at: row.try_get::<Option<DateTime<Utc>>, _>("cancelled_at")?,
        sync_status: sync_status
            .parse::<SyncStatus>()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
        sync_error: row.try_get("sync_error")?,
        sync_retry_count: u32::try_from(sync_retry_count).unwrap_or(0),
        synced_at: row.try_get::<Option<DateTime<Utc>>, _>("synced_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
    .map_err(|e| InfraError::unexpected(e.to_string()))
}
