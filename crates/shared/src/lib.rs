//! # Souko 共有ユーティリティ
//!
//! Souko パイプラインの各クレートから使用される共通ユーティリティを提供する。
//!
//! ## 設計方針
//!
//! - 他のすべてのクレート（domain, infra, pipeline）から依存される
//! - ビジネスロジックを含まない純粋なユーティリティのみを配置
//! - 外部クレートへの依存は最小限に抑える

pub mod health;
pub mod observability;

pub use health::HealthResponse;
