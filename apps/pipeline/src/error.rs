//! # パイプラインエラー定義
//!
//! パイプライン固有のエラーと、内部管理 API の HTTP レスポンスへの変換を定義する。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use souko_domain::DomainError;
use thiserror::Error;

/// エラーレスポンス（RFC 7807 Problem Details）
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

/// パイプラインで発生するエラー
#[derive(Debug, Error)]
pub enum PipelineError {
    /// リソースが見つからない
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// 不正なリクエスト
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),

    /// 競合（条件付き更新の失敗・キャンセル不可など）
    #[error("競合が発生しました: {0}")]
    Conflict(String),

    /// インフラストラクチャエラー
    #[error("インフラストラクチャエラー: {0}")]
    Infra(#[from] souko_infra::InfraError),

    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl From<DomainError> for PipelineError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => PipelineError::BadRequest(msg),
            DomainError::NotFound { entity_type, id } => {
                PipelineError::NotFound(format!("{entity_type}: {id}"))
            }
            DomainError::Conflict(msg) => PipelineError::Conflict(msg),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, error_type, title, detail) = match &self {
            PipelineError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "https://souko.example.com/errors/not-found",
                "Not Found",
                msg.clone(),
            ),
            PipelineError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "https://souko.example.com/errors/bad-request",
                "Bad Request",
                msg.clone(),
            ),
            PipelineError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "https://souko.example.com/errors/conflict",
                "Conflict",
                msg.clone(),
            ),
            PipelineError::Infra(e) => {
                if let Some((entity, id)) = e.as_conflict() {
                    (
                        StatusCode::CONFLICT,
                        "https://souko.example.com/errors/conflict",
                        "Conflict",
                        format!("{entity}: {id}"),
                    )
                } else {
                    tracing::error!("インフラストラクチャエラー: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "https://souko.example.com/errors/internal-error",
                        "Internal Server Error",
                        "内部エラーが発生しました".to_string(),
                    )
                }
            }
            PipelineError::Internal(msg) => {
                tracing::error!("内部エラー: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "https://souko.example.com/errors/internal-error",
                    "Internal Server Error",
                    "内部エラーが発生しました".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error_type: error_type.to_string(),
                title: title.to_string(),
                status: status.as_u16(),
                detail,
            }),
        )
            .into_response()
    }
}
