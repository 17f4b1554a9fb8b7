//! # souko-infra
//!
//! Souko パイプラインのインフラストラクチャ層。
//!
//! 各データストアへのアクセスを抽象化する:
//!
//! - **PostgreSQL（運用ストア）**: レコード・サブジェクト・消去リクエスト・
//!   デッドレターの永続化（sqlx）
//! - **PostgreSQL（ウェアハウス）**: 仮名キーのフラット行のアップサートと削除
//! - **Redis**: リトライタスクのソート済みセットキュー
//! - **DynamoDB**: 消去監査ログ（追記専用）
//!
//! リポジトリはトレイトで抽象化され、`test-utils` feature で
//! インメモリモックを提供する。

pub mod audit_log;
pub mod db;
pub mod deletion;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod queue;
pub mod repository;
pub mod warehouse;

pub use error::{InfraError, InfraErrorKind};
