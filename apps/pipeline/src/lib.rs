//! # Souko パイプラインライブラリ
//!
//! 同期ディスパッチャ・リトライワーカー・削除スケジューラと
//! 内部管理 API のハンドラを公開する。シナリオテストから
//! ユースケース層へアクセスするためのライブラリクレート。

pub mod change_feed;
pub mod config;
pub mod error;
pub mod handler;
pub mod usecase;
