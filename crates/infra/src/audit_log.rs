//! # 消去監査ログストア
//!
//! 消去シーケンスの監査エントリを DynamoDB に追記する。
//!
//! ## 設計方針
//!
//! - **DynamoDB**: 監査ログは DynamoDB に格納（PostgreSQL ではない）
//! - **仮名キー**: PK = subject_pseudonym。生のサブジェクト ID は保存せず、
//!   監査ログ自体は消去の対象外となる
//! - **時系列ソート**: SK = `{occurred_at}#{entry_id}` でレキシカル順ソート

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{Client, types::AttributeValue};
use chrono::DateTime;
use souko_domain::{
    audit::{ErasureAuditEntry, ErasureStep, StepOutcome},
    pseudonym::Pseudonym,
};

use crate::InfraError;

/// 消去監査ログトレイト
#[async_trait]
pub trait ErasureAuditLog: Send + Sync {
    /// 監査エントリを記録する
    async fn record(&self, entry: &ErasureAuditEntry) -> Result<(), InfraError>;

    /// 仮名の監査エントリを古い順に取得する
    async fn find_by_pseudonym(
        &self,
        pseudonym: &Pseudonym,
    ) -> Result<Vec<ErasureAuditEntry>, InfraError>;
}

/// DynamoDB 実装の ErasureAuditLog
pub struct DynamoDbErasureAuditLog {
    client:     Client,
    table_name: String,
}

impl DynamoDbErasureAuditLog {
    pub fn new(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl ErasureAuditLog for DynamoDbErasureAuditLog {
    #[tracing::instrument(skip_all, fields(step = %entry.step, outcome = %entry.outcome))]
    async fn record(&self, entry: &ErasureAuditEntry) -> Result<(), InfraError> {
        let mut item = HashMap::new();
        item.insert(
            "subject_pseudonym".to_string(),
            AttributeValue::S(entry.subject_pseudonym.as_str().to_string()),
        );
        item.insert("sk".to_string(), AttributeValue::S(entry.sort_key()));
        item.insert(
            "entry_id".to_string(),
            AttributeValue::S(entry.entry_id.to_string()),
        );
        item.insert("step".to_string(), AttributeValue::S(entry.step.to_string()));
        item.insert(
            "outcome".to_string(),
            AttributeValue::S(entry.outcome.to_string()),
        );
        item.insert(
            "occurred_at".to_string(),
            AttributeValue::S(entry.occurred_at.to_rfc3339()),
        );

        if let Some(detail) = &entry.detail {
            item.insert("detail".to_string(), AttributeValue::S(detail.clone()));
        }

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("監査ログの記録に失敗: {e}")))?;

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(pseudonym = %pseudonym))]
    async fn find_by_pseudonym(
        &self,
        pseudonym: &Pseudonym,
    ) -> Result<Vec<ErasureAuditEntry>, InfraError> {
        let output = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("subject_pseudonym = :p")
            .expression_attribute_values(
                ":p",
                AttributeValue::S(pseudonym.as_str().to_string()),
            )
            .scan_index_forward(true) // 古い順
            .send()
            .await
            .map_err(|e| InfraError::dynamo_db(format!("監査ログの検索に失敗: {e}")))?;

        output
            .items()
            .iter()
            .map(convert_item_to_entry)
            .collect()
    }
}

/// DynamoDB アイテムを ErasureAuditEntry に変換する
fn convert_item_to_entry(
    item: &HashMap<String, AttributeValue>,
) -> Result<ErasureAuditEntry, InfraError> {
    let pseudonym = get_s(item, "subject_pseudonym")?;
    let entry_id_str = get_s(item, "entry_id")?;
    let step_str = get_s(item, "step")?;
    let outcome_str = get_s(item, "outcome")?;
    let occurred_at_str = get_s(item, "occurred_at")?;

    let detail = item.get("detail").and_then(|v| v.as_s().ok()).cloned();

    let entry_id = uuid::Uuid::parse_str(&entry_id_str)
        .map_err(|e| InfraError::dynamo_db(format!("entry_id のパースに失敗: {e}")))?;
    let step: ErasureStep = serde_json::from_value(serde_json::Value::String(step_str))
        .map_err(|e| InfraError::dynamo_db(format!("step のパースに失敗: {e}")))?;
    let outcome: StepOutcome = serde_json::from_value(serde_json::Value::String(outcome_str))
        .map_err(|e| InfraError::dynamo_db(format!("outcome のパースに失敗: {e}")))?;
    let occurred_at = DateTime::parse_from_rfc3339(&occurred_at_str)
        .map_err(|e| InfraError::dynamo_db(format!("occurred_at のパースに失敗: {e}")))?
        .to_utc();

    Ok(ErasureAuditEntry {
        entry_id,
        subject_pseudonym: Pseudonym::from_string(pseudonym),
        step,
        outcome,
        detail,
        occurred_at,
    })
}

/// DynamoDB アイテムから文字列属性を取得する
fn get_s(item: &HashMap<String, AttributeValue>, key: &str) -> Result<String, InfraError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| InfraError::dynamo_db(format!("属性 '{key}' が見つかりません")))
}
