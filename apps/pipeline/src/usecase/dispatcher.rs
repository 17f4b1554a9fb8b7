//! # 同期ディスパッチャ
//!
//! チェンジフィードから `RecordChange` を消費し、完了エッジ
//! （`after.completed && !before.completed`）でのみウェアハウス同期を発火する。
//! completed → completed の再通知では発火しない。
//!
//! 失敗分類:
//!
//! - リトライ可能（接続断・タイムアウト等）: `failed` マーク + リトライタスク
//!   投入 + 未解決デッドレターを開く
//! - リトライ不可（変換エラー・恒久的拒否）: `failed` マーク + デッドレター直行。
//!   リトライタスクは投入しない

use std::sync::Arc;

use souko_domain::{
    clock::Clock,
    pseudonym::Pseudonymizer,
    record::RecordChange,
    retry::{BackoffPolicy, RetryTask},
    warehouse::WarehouseTable,
};
use souko_infra::{
    queue::RetryQueue,
    repository::{DeadLetterRepository, RecordRepository},
    warehouse::WarehouseClient,
};
use tokio::sync::mpsc;

use crate::{
    error::PipelineError,
    usecase::helpers::{
        apply_sync_update,
        open_or_refresh_dead_letter,
        resolve_dead_letter,
        upsert_to_warehouse,
    },
};

/// 完了エッジ駆動の同期ディスパッチャ
///
/// 呼び出し間で状態を持たない。並行する複数レコードの処理に順序保証はない。
#[derive(Clone)]
pub struct SyncDispatcher {
    records: Arc<dyn RecordRepository>,
    warehouse: Arc<dyn WarehouseClient>,
    retry_queue: Arc<dyn RetryQueue>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    pseudonymizer: Arc<Pseudonymizer>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl SyncDispatcher {
    pub fn new(
        records: Arc<dyn RecordRepository>,
        warehouse: Arc<dyn WarehouseClient>,
        retry_queue: Arc<dyn RetryQueue>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        pseudonymizer: Arc<Pseudonymizer>,
        policy: BackoffPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            warehouse,
            retry_queue,
            dead_letters,
            pseudonymizer,
            policy,
            clock,
        }
    }

    /// チェンジフィードを消費し続ける
    ///
    /// 変更ごとにタスクを spawn するため、レコード間の処理は並行する。
    /// 1 レコードの失敗は他のレコードに影響しない。
    pub async fn run(self, mut feed: mpsc::Receiver<RecordChange>) {
        while let Some(change) = feed.recv().await {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                let record_id = change.after.id().clone();
                if let Err(e) = dispatcher.handle(change).await {
                    tracing::error!(record_id = %record_id, "同期ディスパッチに失敗しました: {}", e);
                }
            });
        }
        tracing::info!("チェンジフィードが閉じられたためディスパッチャを停止します");
    }

    /// 変更スナップショットを 1 件処理する
    #[tracing::instrument(skip_all, fields(record_id = %change.after.id()))]
    pub async fn handle(&self, change: RecordChange) -> Result<(), PipelineError> {
        if !change.is_completion_edge() {
            return Ok(());
        }

        let record = change.after;
        let expected = record.sync_status();
        let now = self.clock.now();

        match upsert_to_warehouse(&*self.warehouse, &self.pseudonymizer, &record).await {
            Ok(_) => {
                let synced = record.mark_synced(now)?;
                apply_sync_update(&*self.records, &synced, expected).await?;
                resolve_dead_letter(&*self.dead_letters, &synced, now).await?;
                tracing::debug!("ウェアハウスへ同期しました");
            }
            Err(failure) if failure.retryable => {
                let table = WarehouseTable::for_kind(record.kind());
                let task = RetryTask::initial(
                    record.subject_id().clone(),
                    record.id().clone(),
                    table,
                    &self.policy,
                    now,
                );
                let failed = record.mark_failed(&failure.reason, 0, now);
                apply_sync_update(&*self.records, &failed, expected).await?;
                self.retry_queue.enqueue(&task).await?;
                open_or_refresh_dead_letter(
                    &*self.dead_letters,
                    &failed,
                    table,
                    &failure.reason,
                    now,
                )
                .await?;
                tracing::warn!("同期に失敗しました。リトライをスケジュールします: {}", failure.reason);
            }
            Err(failure) => {
                let table = WarehouseTable::for_kind(record.kind());
                let failed = record.mark_failed(&failure.reason, 0, now);
                apply_sync_update(&*self.records, &failed, expected).await?;
                open_or_refresh_dead_letter(
                    &*self.dead_letters,
                    &failed,
                    table,
                    &failure.reason,
                    now,
                )
                .await?;
                tracing::warn!(
                    "リトライ不可の同期失敗です。デッドレターに記録しました: {}",
                    failure.reason
                );
            }
        }

        Ok(())
    }
}
