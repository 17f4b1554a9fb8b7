//! # DeletionRegistry
//!
//! 全データストアの `SubjectDeleter` を消去シーケンスの順序で集約する。

use std::{collections::HashMap, sync::Arc};

use sqlx::PgPool;

use super::{
    DeletionResult,
    ErasureTarget,
    PostgresAuthIdentityDeleter,
    PostgresRecordsDeleter,
    PostgresSubjectRootDeleter,
    SubjectDeleter,
    WarehouseRowsDeleter,
};
use crate::{error::InfraError, warehouse::WarehouseClient};

/// サブジェクトデータ削除レジストリ
///
/// 全データストアの `SubjectDeleter` を登録順 = 消去シーケンスの実行順で保持する。
/// 削除スケジューラは [`deleters()`](Self::deleters) を順に実行し、
/// ステップごとに監査ログを記録する。
pub struct DeletionRegistry {
    deleters: Vec<Box<dyn SubjectDeleter>>,
}

impl Default for DeletionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeletionRegistry {
    /// 空のレジストリを生成する
    pub fn new() -> Self {
        Self {
            deleters: Vec::new(),
        }
    }

    /// Deleter を登録する
    pub fn register(&mut self, deleter: Box<dyn SubjectDeleter>) {
        self.deleters.push(deleter);
    }

    /// 全データストアの Deleter を消去シーケンス順に登録済みのレジストリを生成する
    ///
    /// 順序は消去シーケンスの (a)〜(d) に対応する:
    /// 子レコード → サブジェクトルート → ウェアハウス行 → 認証アイデンティティ。
    /// records.subject_id → subjects(id) の FK があるため、
    /// 子レコードをルートより先に削除する。
    pub fn with_all_deleters(
        operational_pool: PgPool,
        warehouse_client: Arc<dyn WarehouseClient>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(PostgresRecordsDeleter::new(
            operational_pool.clone(),
        )));
        registry.register(Box::new(PostgresSubjectRootDeleter::new(
            operational_pool.clone(),
        )));
        registry.register(Box::new(WarehouseRowsDeleter::new(warehouse_client)));
        registry.register(Box::new(PostgresAuthIdentityDeleter::new(operational_pool)));
        registry
    }

    /// 期待される Deleter 名の一覧を返す（登録漏れ検出テスト用）
    pub fn expected_deleter_names() -> Vec<&'static str> {
        vec![
            "postgres:records",
            "postgres:subjects",
            "warehouse:rows",
            "auth:identities",
        ]
    }

    /// 登録済み Deleter の名前一覧を返す
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.deleters.iter().map(|d| d.name()).collect()
    }

    /// 登録済み Deleter を実行順に返す
    pub fn deleters(&self) -> &[Box<dyn SubjectDeleter>] {
        &self.deleters
    }

    /// 全 Deleter でサブジェクトデータの件数を取得する
    ///
    /// 各 Deleter の件数を名前をキーとした HashMap で返す。
    /// 消去完了検証（全ストアで 0 件）に使用する。
    pub async fn count_all(
        &self,
        target: &ErasureTarget,
    ) -> Result<HashMap<&'static str, u64>, InfraError> {
        let mut results = HashMap::new();
        for deleter in &self.deleters {
            let count = deleter.count(target).await?;
            results.insert(deleter.name(), count);
        }
        Ok(results)
    }
}
