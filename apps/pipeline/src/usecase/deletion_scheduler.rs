//! # 削除スケジューラ
//!
//! 猶予期間の満了した消去リクエストを定期的に掃き出し、登録順の
//! 削除ステップを実行する:
//!
//! 1. 運用ストアの子レコード削除
//! 2. サブジェクトルート削除
//! 3. 全テーブル・全消去対象仮名のウェアハウス行削除
//! 4. 認証アイデンティティ削除
//! 5. リクエストを `completed` にする
//!
//! 各ステップは冪等で、結果は仮名キーで監査ログに記録される。
//! ステップ 1 と 2 の直前にリクエスト状態を再読込し、キャンセルを
//! 観測したら副作用ゼロで中断する。ステップ途中の失敗はリクエストを
//! `pending` のまま残し、次回実行時にシーケンス全体を再実行する。

use std::{sync::Arc, time::Duration};

use souko_domain::{
    audit::{ErasureAuditEntry, ErasureStep, StepOutcome},
    clock::Clock,
    erasure::ErasureRequest,
    pseudonym::{Pseudonym, Pseudonymizer},
};
use souko_infra::{
    audit_log::ErasureAuditLog,
    deletion::{DeletionRegistry, ErasureTarget},
    repository::ErasureRequestRepository,
};

use crate::error::PipelineError;

/// 1 回の実行の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// 全ステップ完了
    Completed,
    /// キャンセルを観測して中断
    Aborted,
}

/// 消去リクエストを駆動するスケジューラ
#[derive(Clone)]
pub struct DeletionScheduler {
    requests: Arc<dyn ErasureRequestRepository>,
    registry: Arc<DeletionRegistry>,
    audit: Arc<dyn ErasureAuditLog>,
    pseudonymizer: Arc<Pseudonymizer>,
    clock: Arc<dyn Clock>,
    run_cap: i64,
}

impl DeletionScheduler {
    pub fn new(
        requests: Arc<dyn ErasureRequestRepository>,
        registry: Arc<DeletionRegistry>,
        audit: Arc<dyn ErasureAuditLog>,
        pseudonymizer: Arc<Pseudonymizer>,
        clock: Arc<dyn Clock>,
        run_cap: i64,
    ) -> Self {
        Self {
            requests,
            registry,
            audit,
            pseudonymizer,
            clock,
            run_cap,
        }
    }

    /// 一定間隔で掃き出しを実行し続ける
    pub async fn run(self, sweep_interval: Duration) {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!("消去リクエストの掃き出しに失敗しました: {}", e);
            }
        }
    }

    /// 期限到来済みリクエストを上限件数まで処理する
    ///
    /// 1 リクエストの失敗は他のリクエストを止めない。上限を超えた分は
    /// 次回実行に繰り越される。
    #[tracing::instrument(skip_all)]
    pub async fn run_once(&self) -> Result<(), PipelineError> {
        let now = self.clock.now();
        let due = self.requests.list_due(now, self.run_cap).await?;
        if due.is_empty() {
            return Ok(());
        }

        tracing::info!(count = due.len(), "期限到来済みの消去リクエストを処理します");

        for request in due {
            if let Err(e) = self.execute(&request).await {
                tracing::error!(
                    request_id = %request.id(),
                    "消去シーケンスが失敗しました。リクエストは pending のまま残ります: {}",
                    e
                );
            }
        }

        Ok(())
    }

    /// 1 件の消去リクエストに対して削除シーケンスを実行する
    #[tracing::instrument(skip_all, fields(request_id = %request.id()))]
    pub async fn execute(&self, request: &ErasureRequest) -> Result<SweepOutcome, PipelineError> {
        let subject_id = request.subject_id().clone();
        let primary = self.pseudonymizer.pseudonymize(&subject_id);
        let target = ErasureTarget {
            pseudonyms: self.pseudonymizer.erasure_pseudonyms(&subject_id),
            subject_id,
        };

        for deleter in self.registry.deleters() {
            let step = deleter.step();

            // 不可逆ステップの直前にキャンセルの有無を確認する。
            // サブジェクトルート削除以降はキャンセル不可
            if matches!(step, ErasureStep::OperationalRecords | ErasureStep::SubjectRoot)
                && !self.still_pending(request).await?
            {
                tracing::info!("キャンセルを観測したため消去を中断します");
                return Ok(SweepOutcome::Aborted);
            }

            match deleter.delete(&target).await {
                Ok(result) => {
                    self.record_audit(
                        &primary,
                        step,
                        StepOutcome::Succeeded,
                        Some(format!("{} 件削除", result.deleted_count)),
                    )
                    .await?;
                }
                Err(e) => {
                    self.record_audit(&primary, step, StepOutcome::Failed, Some(e.to_string()))
                        .await?;
                    return Err(e.into());
                }
            }
        }

        let completed = request.clone().completed(self.clock.now())?;
        self.requests.transition_from_pending(&completed).await?;
        self.record_audit(&primary, ErasureStep::Completed, StepOutcome::Succeeded, None)
            .await?;

        tracing::info!("消去シーケンスが完了しました");
        Ok(SweepOutcome::Completed)
    }

    /// リクエストがまだ pending かを最新の読み取りで確認する
    async fn still_pending(&self, request: &ErasureRequest) -> Result<bool, PipelineError> {
        let current = self.requests.find_by_id(request.id()).await?;
        Ok(current.is_some_and(|r| r.is_pending()))
    }

    async fn record_audit(
        &self,
        pseudonym: &Pseudonym,
        step: ErasureStep,
        outcome: StepOutcome,
        detail: Option<String>,
    ) -> Result<(), PipelineError> {
        let entry =
            ErasureAuditEntry::new(pseudonym.clone(), step, outcome, detail, self.clock.now());
        self.audit.record(&entry).await?;
        Ok(())
    }
}
