//! # サブジェクトデータ削除基盤
//!
//! 消去リクエスト実行時のクロスストア削除を安全に行うための基盤モジュール。
//!
//! ## 概要
//!
//! 各データストア（運用 PostgreSQL、ウェアハウス、認証ストア）に対応する
//! [`SubjectDeleter`] 実装を [`DeletionRegistry`] に消去シーケンスの順序で
//! 登録する。削除スケジューラはレジストリの順序どおりにステップを実行し、
//! 各ステップを監査ログに記録する。
//!
//! 各 Deleter は冪等であり、同じ対象への再実行は削除件数 0 で成功する。

mod postgres_simple;
mod registry;
mod warehouse_rows;

use async_trait::async_trait;
pub use postgres_simple::{
    PostgresAuthIdentityDeleter,
    PostgresRecordsDeleter,
    PostgresSubjectRootDeleter,
};
pub use registry::DeletionRegistry;
use souko_domain::{audit::ErasureStep, pseudonym::Pseudonym, subject::SubjectId};
pub use warehouse_rows::WarehouseRowsDeleter;

use crate::error::InfraError;

/// 消去対象
///
/// 生のサブジェクト ID（運用ストア・認証ストア用）と、
/// 再計算済みの仮名（ウェアハウス用。ソルトローテーション猶予中は
/// 新旧両世代分）を運ぶ。
#[derive(Debug, Clone)]
pub struct ErasureTarget {
    pub subject_id: SubjectId,
    pub pseudonyms: Vec<Pseudonym>,
}

/// サブジェクトデータの削除結果
#[derive(Debug, Clone)]
pub struct DeletionResult {
    /// 削除された件数
    pub deleted_count: u64,
}

/// サブジェクトデータ削除トレイト
///
/// 各データストアがこのトレイトを実装し、消去シーケンスの 1 ステップを提供する。
#[async_trait]
pub trait SubjectDeleter: Send + Sync {
    /// この Deleter の名前（例: `"postgres:records"`）
    fn name(&self) -> &'static str;

    /// 対応する消去シーケンスのステップ
    fn step(&self) -> ErasureStep;

    /// 対象サブジェクトのデータを削除する
    async fn delete(&self, target: &ErasureTarget) -> Result<DeletionResult, InfraError>;

    /// 対象サブジェクトのデータ件数を返す
    async fn count(&self, target: &ErasureTarget) -> Result<u64, InfraError>;
}
