//! # デッドレターハンドラ
//!
//! 断念・失敗した同期の棚卸しと手動再キューのエンドポイント。
//!
//! ```text
//! GET  /internal/dead-letters?status=abandoned&limit=50
//! POST /internal/dead-letters/{entry_id}/resolve
//! ```

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use souko_domain::dead_letter::{DeadLetterEntry, DeadLetterEntryId, DeadLetterStatus};
use uuid::Uuid;

use crate::{error::PipelineError, usecase::DeadLetterAdmin};

/// 一覧取得時のデフォルト件数
const DEFAULT_LIST_LIMIT: i64 = 50;

/// デッドレターハンドラの State
pub struct DeadLetterState {
    pub admin: DeadLetterAdmin,
}

/// 一覧取得のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// 絞り込むステータス（`pending` / `resolved` / `abandoned`）
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// デッドレター DTO
#[derive(Debug, Serialize)]
pub struct DeadLetterDto {
    pub id: String,
    pub subject_id: String,
    pub record_id: String,
    pub table: String,
    pub failure_reason: String,
    pub status: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl DeadLetterDto {
    fn from_entry(entry: &DeadLetterEntry) -> Self {
        Self {
            id: entry.id().to_string(),
            subject_id: entry.subject_id().to_string(),
            record_id: entry.record_id().to_string(),
            table: entry.table().to_string(),
            failure_reason: entry.failure_reason().to_string(),
            status: entry.status().to_string(),
            created_at: entry.created_at().to_rfc3339(),
            resolved_at: entry.resolved_at().map(|t| t.to_rfc3339()),
        }
    }
}

/// デッドレターを一覧する
///
/// `GET /internal/dead-letters`
pub async fn list_dead_letters(
    State(state): State<Arc<DeadLetterState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, PipelineError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<DeadLetterStatus>()
                .map_err(|_| PipelineError::BadRequest(format!("不正なステータスです: {s}")))
        })
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    let entries = state.admin.list(status, limit).await?;
    let dtos: Vec<DeadLetterDto> = entries.iter().map(DeadLetterDto::from_entry).collect();

    Ok(Json(dtos).into_response())
}

/// デッドレターを手動で解決し、同期を再キューする
///
/// `POST /internal/dead-letters/{entry_id}/resolve`
pub async fn resolve_dead_letter(
    State(state): State<Arc<DeadLetterState>>,
    Path(entry_id): Path<Uuid>,
) -> Result<Response, PipelineError> {
    let id = DeadLetterEntryId::from_uuid(entry_id);
    let entry = state.admin.resolve(&id).await?;

    Ok(Json(DeadLetterDto::from_entry(&entry)).into_response())
}
