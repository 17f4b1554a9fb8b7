//! # 同期状態ハンドラ
//!
//! レコードの同期状態の読み取りと、明示的な再同期のトリガーを提供する。
//!
//! ```text
//! GET  /internal/records/{record_id}/sync-status
//! POST /internal/records/{record_id}/resync
//! ```

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use souko_domain::record::{Record, RecordChange, RecordId};
use souko_infra::repository::RecordRepository;
use uuid::Uuid;

use crate::{change_feed::ChangeFeed, error::PipelineError};

/// 同期状態ハンドラの State
pub struct SyncStatusState {
    pub records: Arc<dyn RecordRepository>,
    pub feed: ChangeFeed,
}

/// 同期状態 DTO
#[derive(Debug, Serialize)]
pub struct SyncStatusDto {
    pub record_id: String,
    pub sync_status: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub synced_at: Option<String>,
}

impl SyncStatusDto {
    fn from_record(record: &Record) -> Self {
        Self {
            record_id: record.id().to_string(),
            sync_status: record.sync_status().to_string(),
            retry_count: record.sync_retry_count(),
            last_error: record.sync_error().map(ToString::to_string),
            synced_at: record.synced_at().map(|t| t.to_rfc3339()),
        }
    }
}

/// レコードの同期状態を取得する
///
/// `GET /internal/records/{record_id}/sync-status`
pub async fn get_sync_status(
    State(state): State<Arc<SyncStatusState>>,
    Path(record_id): Path<Uuid>,
) -> Result<Response, PipelineError> {
    let id = RecordId::from_uuid(record_id);
    let record = state.records.find_by_id(&id).await?.ok_or_else(|| {
        PipelineError::NotFound(format!("レコードが見つかりません: {id}"))
    })?;

    Ok(Json(SyncStatusDto::from_record(&record)).into_response())
}

/// レコードの再同期を明示的にトリガーする
///
/// `POST /internal/records/{record_id}/resync`
///
/// 完了済みレコードの変更スナップショット（before なし）をチェンジフィードへ
/// 発行する。アップサートは冪等なので、同期済みレコードへの再実行も安全。
pub async fn resync_record(
    State(state): State<Arc<SyncStatusState>>,
    Path(record_id): Path<Uuid>,
) -> Result<Response, PipelineError> {
    let id = RecordId::from_uuid(record_id);
    let record = state.records.find_by_id(&id).await?.ok_or_else(|| {
        PipelineError::NotFound(format!("レコードが見つかりません: {id}"))
    })?;

    if !record.is_completed() {
        return Err(PipelineError::Conflict(
            "完了済みレコードのみ再同期できます".to_string(),
        ));
    }

    state
        .feed
        .publish(RecordChange {
            before: None,
            after: record,
        })
        .await?;

    Ok(StatusCode::ACCEPTED.into_response())
}
