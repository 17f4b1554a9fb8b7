//! # 消去監査ログ
//!
//! 消去シーケンスの各ステップの実行結果を記録する追記専用エントリ。
//!
//! 監査ログ自体は消去の対象外となるため、サブジェクトの生 ID ではなく
//! 仮名のみを保持する。エントリは仮名をパーティションキー、
//! `{occurred_at}#{entry_id}` をソートキーとして時系列に格納される。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::pseudonym::Pseudonym;

/// 消去シーケンスのステップ
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErasureStep {
    /// (a) 運用ストアの子レコード削除
    OperationalRecords,
    /// (b) サブジェクトルートレコード削除
    SubjectRoot,
    /// (c) ウェアハウス行削除（全テーブル横断）
    WarehouseRows,
    /// (d) 認証ストアのアイデンティティ削除
    AuthIdentity,
    /// (e) リクエスト完了マーク
    Completed,
}

/// ステップの実行結果
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
}

/// 消去監査エントリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureAuditEntry {
    /// エントリ ID（ソートキーの一意性担保用）
    pub entry_id: Uuid,
    /// 仮名化済みサブジェクト識別子（パーティションキー）
    pub subject_pseudonym: Pseudonym,
    pub step: ErasureStep,
    pub outcome: StepOutcome,
    /// 補足情報（削除件数、失敗理由など）
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErasureAuditEntry {
    pub fn new(
        subject_pseudonym: Pseudonym,
        step: ErasureStep,
        outcome: StepOutcome,
        detail: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            subject_pseudonym,
            step,
            outcome,
            detail,
            occurred_at,
        }
    }

    /// 時系列ソートキー: `{occurred_at RFC3339}#{entry_id}`
    ///
    /// 同一ミリ秒の重複エントリでもキーが衝突しないよう ID を連結する。
    pub fn sort_key(&self) -> String {
        format!("{}#{}", self.occurred_at.to_rfc3339(), self.entry_id)
    }
}
