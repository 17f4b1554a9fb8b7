//! # 単純な PostgreSQL Deleter
//!
//! 単一テーブルの `DELETE FROM ... WHERE <カラム> = $1` パターンを
//! 共通化するマクロと、それを利用した Deleter 実装を提供する。

use async_trait::async_trait;
use souko_domain::audit::ErasureStep;
use sqlx::PgPool;

use super::{DeletionResult, ErasureTarget, SubjectDeleter};
use crate::error::InfraError;

/// 単一テーブルの Deleter を定義するマクロ
macro_rules! define_simple_postgres_deleter {
    (
        name: $name:ident,
        deleter_name: $deleter_name:literal,
        step: $step:expr,
        delete_sql: $delete_sql:literal,
        count_sql: $count_sql:literal,
        doc: $doc:literal
    ) => {
        #[doc = $doc]
        pub struct $name {
            pool: PgPool,
        }

        impl $name {
            pub fn new(pool: PgPool) -> Self {
                Self { pool }
            }
        }

        #[async_trait]
        impl SubjectDeleter for $name {
            fn name(&self) -> &'static str {
                $deleter_name
            }

            fn step(&self) -> ErasureStep {
                $step
            }

            async fn delete(&self, target: &ErasureTarget) -> Result<DeletionResult, InfraError> {
                let result = sqlx::query($delete_sql)
                    .bind(target.subject_id.as_uuid())
                    .execute(&self.pool)
                    .await?;

                Ok(DeletionResult {
                    deleted_count: result.rows_affected(),
                })
            }

            async fn count(&self, target: &ErasureTarget) -> Result<u64, InfraError> {
                let count: i64 = sqlx::query_scalar($count_sql)
                    .bind(target.subject_id.as_uuid())
                    .fetch_one(&self.pool)
                    .await?;

                Ok(u64::try_from(count).unwrap_or(0))
            }
        }
    };
}

define_simple_postgres_deleter!(
    name: PostgresRecordsDeleter,
    deleter_name: "postgres:records",
    step: ErasureStep::OperationalRecords,
    delete_sql: "DELETE FROM records WHERE subject_id = $1",
    count_sql: "SELECT COUNT(*) FROM records WHERE subject_id = $1",
    doc: "運用ストアの子レコード Deleter（消去ステップ a）"
);

define_simple_postgres_deleter!(
    name: PostgresSubjectRootDeleter,
    deleter_name: "postgres:subjects",
    step: ErasureStep::SubjectRoot,
    delete_sql: "DELETE FROM subjects WHERE id = $1",
    count_sql: "SELECT COUNT(*) FROM subjects WHERE id = $1",
    doc: "サブジェクトルートレコード Deleter（消去ステップ b）\n\nこのステップ実行後、消去リクエストは取り消し不能になる。"
);

define_simple_postgres_deleter!(
    name: PostgresAuthIdentityDeleter,
    deleter_name: "auth:identities",
    step: ErasureStep::AuthIdentity,
    delete_sql: "DELETE FROM auth_identities WHERE subject_id = $1",
    count_sql: "SELECT COUNT(*) FROM auth_identities WHERE subject_id = $1",
    doc: "認証ストアのアイデンティティ Deleter（消去ステップ d）"
);
