//! # 消去リクエストハンドラ
//!
//! 保留中の消去リクエストのキャンセルを提供する。
//! サブジェクト向けサービスがサブジェクトの意思を受けて呼び出す委譲先で、
//! 削除スケジューラとのレース判定はユースケース側が行う。
//!
//! ```text
//! POST /internal/subjects/{subject_id}/erasure-request/cancel
//! ```

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use souko_domain::{erasure::ErasureRequest, subject::SubjectId};
use uuid::Uuid;

use crate::{error::PipelineError, usecase::ErasureUseCase};

/// 消去リクエストハンドラの State
pub struct ErasureState {
    pub erasure: ErasureUseCase,
}

/// 消去リクエスト DTO
#[derive(Debug, Serialize)]
pub struct ErasureRequestDto {
    pub id: String,
    pub subject_id: String,
    pub status: String,
    pub requested_at: String,
    pub scheduled_deletion_date: Option<String>,
    pub cancelled_at: Option<String>,
}

impl ErasureRequestDto {
    fn from_request(request: &ErasureRequest) -> Self {
        Self {
            id: request.id().to_string(),
            subject_id: request.subject_id().to_string(),
            status: request.status().to_string(),
            requested_at: request.requested_at().to_rfc3339(),
            scheduled_deletion_date: request
                .scheduled_deletion_date()
                .map(|t| t.to_rfc3339()),
            cancelled_at: request.cancelled_at().map(|t| t.to_rfc3339()),
        }
    }
}

/// 保留中の消去リクエストをキャンセルする
///
/// `POST /internal/subjects/{subject_id}/erasure-request/cancel`
pub async fn cancel_erasure_request(
    State(state): State<Arc<ErasureState>>,
    Path(subject_id): Path<Uuid>,
) -> Result<Response, PipelineError> {
    let id = SubjectId::from_uuid(subject_id);
    let cancelled = state.erasure.cancel(&id).await?;

    Ok(Json(ErasureRequestDto::from_request(&cancelled)).into_response())
}
