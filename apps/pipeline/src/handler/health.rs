//! # ヘルスチェックハンドラ
//!
//! パイプラインワーカーの稼働状態を確認するためのエンドポイント。
//!
//! ```text
//! GET /health
//! ```

use axum::Json;
use souko_shared::HealthResponse;

/// ヘルスチェックエンドポイント
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status:  "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
