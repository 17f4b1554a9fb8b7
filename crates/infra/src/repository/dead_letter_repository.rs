//! # DeadLetterRepository
//!
//! デッドレターエントリの永続化を担当するリポジトリ。
//!
//! エントリは削除されない。解決・断念後も履歴として残り、
//! 内部管理 API から一覧・手動解決の対象になる。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use souko_domain::{
    dead_letter::{DeadLetterEntry, DeadLetterEntryId, DeadLetterStatus},
    record::RecordId,
    subject::SubjectId,
    warehouse::WarehouseTable,
};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::InfraError;

/// デッドレターリポジトリトレイト
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    /// エントリを保存する（新規作成または状態更新）
    async fn save(&self, entry: &DeadLetterEntry) -> Result<(), InfraError>;

    /// ID でエントリを取得する
    async fn find_by_id(
        &self,
        id: &DeadLetterEntryId,
    ) -> Result<Option<DeadLetterEntry>, InfraError>;

    /// レコードの未解決エントリを取得する
    ///
    /// レコードごとに未解決エントリは高々 1 件の前提で運用する。
    async fn find_pending_by_record(
        &self,
        record_id: &RecordId,
    ) -> Result<Option<DeadLetterEntry>, InfraError>;

    /// エントリ一覧を新しい順に取得する
    async fn list(
        &self,
        status: Option<DeadLetterStatus>,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, InfraError>;
}

/// PostgreSQL 実装の DeadLetterRepository
#[derive(Debug, Clone)]
pub struct PostgresDeadLetterRepository {
    pool: PgPool,
}

impl PostgresDeadLetterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterRepository for PostgresDeadLetterRepository {
    #[tracing::instrument(skip_all, fields(entry_id = %entry.id()))]
    async fn save(&self, entry: &DeadLetterEntry) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO dead_letter_entries (
                id, subject_id, record_id, "table", failure_reason,
                status, created_at, updated_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                failure_reason = EXCLUDED.failure_reason,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                resolved_at = EXCLUDED.resolved_at
            "#,
        )
        .bind(entry.id().as_uuid())
        .bind(entry.subject_id().as_uuid())
        .bind(entry.record_id().as_uuid())
        .bind(entry.table().to_string())
        .bind(entry.failure_reason())
        .bind(entry.status().to_string())
        .bind(entry.created_at())
        .bind(entry.updated_at())
        .bind(entry.resolved_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(entry_id = %id))]
    async fn find_by_id(
        &self,
        id: &DeadLetterEntryId,
    ) -> Result<Option<DeadLetterEntry>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, record_id, "table", failure_reason,
                   status, created_at, updated_at, resolved_at
            FROM dead_letter_entries
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_entry).transpose()
    }

    #[tracing::instrument(skip_all, fields(record_id = %record_id))]
    async fn find_pending_by_record(
        &self,
        record_id: &RecordId,
    ) -> Result<Option<DeadLetterEntry>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, record_id, "table", failure_reason,
                   status, created_at, updated_at, resolved_at
            FROM dead_letter_entries
            WHERE record_id = $1 AND status = 'pending'
            "#,
        )
        .bind(record_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_entry).transpose()
    }

    #[tracing::instrument(skip_all, fields(limit))]
    async fn list(
        &self,
        status: Option<DeadLetterStatus>,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, InfraError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, record_id, "table", failure_reason,
                   status, created_at, updated_at, resolved_at
            FROM dead_letter_entries
            WHERE $1::text IS NULL OR status = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }
}

/// DB 行を DeadLetterEntry に変換する
fn row_to_entry(row: PgRow) -> Result<DeadLetterEntry, InfraError> {
    let table: String = row.try_get("table")?;
    let status: String = row.try_get("status")?;

    DeadLetterEntry::from_db(
        DeadLetterEntryId::from_uuid(row.try_get("id")?),
        SubjectId::from_uuid(row.try_get("subject_id")?),
        RecordId::from_uuid(row.try_get("record_id")?),
        table
            .parse::<WarehouseTable>()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
        row.try_get("failure_reason")?,
        status
            .parse::<DeadLetterStatus>()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
        row.try_get::<Option<DateTime<Utc>>, _>("resolved_at")?,
    )
    .map_err(|e| InfraError::unexpected(e.to_string()))
}
