//! # ウェアハウス行 Deleter
//!
//! 消去ステップ (c): 消去対象の全仮名について、全ウェアハウステーブルを
//! 横断して行を削除する。

use std::sync::Arc;

use async_trait::async_trait;
use souko_domain::{audit::ErasureStep, warehouse::WarehouseTable};

use super::{DeletionResult, ErasureTarget, SubjectDeleter};
use crate::{error::InfraError, warehouse::WarehouseClient};

/// ウェアハウス行 Deleter（消去ステップ c）
///
/// ソルトローテーション猶予中は [`ErasureTarget::pseudonyms`] に新旧両世代の
/// 仮名が入り、旧仮名でキーされた行も取り残さず削除する。
pub struct WarehouseRowsDeleter {
    client: Arc<dyn WarehouseClient>,
}

impl WarehouseRowsDeleter {
    pub fn new(client: Arc<dyn WarehouseClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubjectDeleter for WarehouseRowsDeleter {
    fn name(&self) -> &'static str {
        "warehouse:rows"
    }

    fn step(&self) -> ErasureStep {
        ErasureStep::WarehouseRows
    }

    async fn delete(&self, target: &ErasureTarget) -> Result<DeletionResult, InfraError> {
        let mut deleted_count = 0;
        for table in WarehouseTable::all() {
            for pseudonym in &target.pseudonyms {
                deleted_count += self.client.delete_by_pseudonym(table, pseudonym).await?;
            }
        }
        Ok(DeletionResult { deleted_count })
    }

    async fn count(&self, target: &ErasureTarget) -> Result<u64, InfraError> {
        let mut count = 0;
        for table in WarehouseTable::all() {
            for pseudonym in &target.pseudonyms {
                count += self.client.count_by_pseudonym(table, pseudonym).await?;
            }
        }
        Ok(count)
    }
}
