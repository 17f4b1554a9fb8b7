//! # ユースケース層
//!
//! パイプラインの中核ロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリ・ストアクライアントを `Arc<dyn Trait>` で外部から注入
//! - **障害の封じ込め**: 1 レコード・1 リクエストの失敗が他の処理を止めない
//!
//! ## モジュール構成
//!
//! - `dispatcher`: 完了エッジ駆動の同期ディスパッチャ
//! - `retry_worker`: バックオフ付きリトライワーカー
//! - `deletion_scheduler`: 猶予期間経過後のクロスストア消去
//! - `dead_letter`: デッドレターの閲覧・手動再キュー
//! - `erasure`: 消去リクエストのキャンセル

pub(crate) mod helpers;

pub mod dead_letter;
pub mod deletion_scheduler;
pub mod dispatcher;
pub mod erasure;
pub mod retry_worker;

pub use dead_letter::DeadLetterAdmin;
pub use deletion_scheduler::DeletionScheduler;
pub use dispatcher::SyncDispatcher;
pub use erasure::ErasureUseCase;
pub use retry_worker::RetryWorker;
