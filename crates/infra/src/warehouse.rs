//! # ウェアハウスクライアント
//!
//! 分析用ウェアハウスへの書き込み・削除を抽象化する。
//!
//! ## 設計方針
//!
//! - **冪等なアップサート**: (subject_pseudonym, record_id) をキーとした
//!   `ON CONFLICT DO UPDATE`。at-least-once 配送の重複を吸収する
//! - **仮名キーでの削除**: 消去シーケンスが仮名を再計算して行を特定するため、
//!   削除は仮名単位で全テーブルを横断する
//! - **エラーのリトライ分類**: 戻り値の [`InfraError`] の
//!   [`is_retryable()`](InfraError::is_retryable) がディスパッチャの分岐を決める

use async_trait::async_trait;
use souko_domain::{
    pseudonym::Pseudonym,
    warehouse::{WarehouseRow, WarehouseTable},
};
use sqlx::PgPool;

use crate::error::InfraError;

/// ウェアハウスクライアントトレイト
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// 行をアップサートする
    ///
    /// 同一キー (subject_pseudonym, record_id) の既存行は上書きされる。
    async fn upsert(&self, table: WarehouseTable, row: &WarehouseRow) -> Result<(), InfraError>;

    /// 仮名でキーされた行をすべて削除し、削除件数を返す
    async fn delete_by_pseudonym(
        &self,
        table: WarehouseTable,
        pseudonym: &Pseudonym,
    ) -> Result<u64, InfraError>;

    /// 仮名でキーされた行数を返す
    async fn count_by_pseudonym(
        &self,
        table: WarehouseTable,
        pseudonym: &Pseudonym,
    ) -> Result<u64, InfraError>;
}

/// PostgreSQL 実装の WarehouseClient
///
/// テーブル名は [`WarehouseTable::table_name`] の固定値のみを使用する
/// （SQL 文字列への外部入力の混入は構造的に発生しない）。
#[derive(Debug, Clone)]
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WarehouseClient for PostgresWarehouse {
    #[tracing::instrument(skip_all, fields(table = %table, record_id = %row.record_id))]
    async fn upsert(&self, table: WarehouseTable, row: &WarehouseRow) -> Result<(), InfraError> {
        let sql = format!(
            r#"
            INSERT INTO {} (
                record_id, subject_pseudonym, completed_at,
                device_class, language, app_version, duration_seconds
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (subject_pseudonym, record_id) DO UPDATE SET
                completed_at = EXCLUDED.completed_at,
                device_class = EXCLUDED.device_class,
                language = EXCLUDED.language,
                app_version = EXCLUDED.app_version,
                duration_seconds = EXCLUDED.duration_seconds
            "#,
            table.table_name()
        );

        sqlx::query(&sql)
            .bind(row.record_id.as_uuid())
            .bind(row.subject_pseudonym.as_str())
            .bind(row.completed_at)
            .bind(&row.device_class)
            .bind(&row.language)
            .bind(&row.app_version)
            .bind(row.duration_seconds)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(table = %table, pseudonym = %pseudonym))]
    async fn delete_by_pseudonym(
        &self,
        table: WarehouseTable,
        pseudonym: &Pseudonym,
    ) -> Result<u64, InfraError> {
        let sql = format!(
            "DELETE FROM {} WHERE subject_pseudonym = $1",
            table.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(pseudonym.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip_all, fields(table = %table, pseudonym = %pseudonym))]
    async fn count_by_pseudonym(
        &self,
        table: WarehouseTable,
        pseudonym: &Pseudonym,
    ) -> Result<u64, InfraError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE subject_pseudonym = $1",
            table.table_name()
        );

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(pseudonym.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
