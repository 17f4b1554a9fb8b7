//! # SubjectRepository
//!
//! サブジェクト（レコード所有者）の読み出しを担当するリポジトリ。
//!
//! サブジェクトの作成・更新はサブジェクト向けエンドポイント（本クレートの
//! 範囲外）が行うため、パイプラインは読み出しのみを必要とする。
//! 消去の取り消し経路がルートレコードの存在確認に使用する。

use async_trait::async_trait;
use souko_domain::subject::{AvatarUrl, DisplayName, EmailAddress, Subject, SubjectId};
use sqlx::{PgPool, Row};

use crate::error::InfraError;

/// サブジェクトリポジトリトレイト
#[async_trait]
pub trait SubjectRepository: Send + Sync {
    /// ID でサブジェクトを取得する
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, InfraError>;
}

/// PostgreSQL 実装の SubjectRepository
#[derive(Debug, Clone)]
pub struct PostgresSubjectRepository {
    pool: PgPool,
}

impl PostgresSubjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubjectRepository for PostgresSubjectRepository {
    #[tracing::instrument(skip_all, fields(subject_id = %id))]
    async fn find_by_id(&self, id: &SubjectId) -> Result<Option<Subject>, InfraError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, display_name, avatar_url, created_at
            FROM subjects
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let email: String = row.try_get("email")?;
        let display_name: Option<String> = row.try_get("display_name")?;
        let avatar_url: Option<String> = row.try_get("avatar_url")?;

        let subject = Subject::from_db(
            SubjectId::from_uuid(row.try_get("id")?),
            EmailAddress::new(email).map_err(|e| InfraError::unexpected(e.to_string()))?,
            display_name
                .map(DisplayName::new)
                .transpose()
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            avatar_url
                .map(AvatarUrl::new)
                .transpose()
                .map_err(|e| InfraError::unexpected(e.to_string()))?,
            row.try_get("created_at")?,
        );

        Ok(Some(subject))
    }
}
