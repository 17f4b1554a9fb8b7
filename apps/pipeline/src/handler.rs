//! # 内部管理 API ハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、ロジックはユースケース層に委譲
//!
//! この API は内部ネットワーク専用の運用サーフェスで、サブジェクト向けの
//! エンドポイントは含まない。

pub mod dead_letter;
pub mod erasure;
pub mod health;
pub mod sync_status;

pub use dead_letter::{DeadLetterState, list_dead_letters, resolve_dead_letter};
pub use erasure::{ErasureState, cancel_erasure_request};
pub use health::health_check;
pub use sync_status::{SyncStatusState, get_sync_status, resync_record};
