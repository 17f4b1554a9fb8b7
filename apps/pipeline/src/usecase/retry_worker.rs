//! # リトライワーカー
//!
//! Redis ソート済みセットから実行時刻の到来したタスクを取り出し、
//! 宛先テーブルごとに同時実行数を制限しながら再同期を試みる。
//!
//! 各試行はレコードの最新状態を再読込する。削除済み・未完了のレコードは
//! タスクごと破棄し、二度と復活させない。試行上限（10 回）に達したら
//! レコードを `abandoned` にし、デッドレターも断念状態へ移す。
//! 以後の再キューは手動解決エンドポイントのみが行う。

use std::{sync::Arc, time::Duration};

use souko_domain::{
    clock::Clock,
    pseudonym::Pseudonymizer,
    record::{Record, SyncStatus},
    retry::{BackoffPolicy, RetryTask},
    warehouse::WarehouseTable,
};
use souko_infra::{
    queue::RetryQueue,
    repository::{DeadLetterRepository, RecordRepository},
    warehouse::WarehouseClient,
};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    error::PipelineError,
    usecase::helpers::{
        abandon_dead_letter,
        apply_sync_update,
        open_or_refresh_dead_letter,
        resolve_dead_letter,
        upsert_to_warehouse,
    },
};

/// 1 回のポーリングで取り出すタスク数の上限
const RETRY_BATCH_SIZE: usize = 100;

/// バックオフ付きリトライワーカー
#[derive(Clone)]
pub struct RetryWorker {
    records: Arc<dyn RecordRepository>,
    warehouse: Arc<dyn WarehouseClient>,
    retry_queue: Arc<dyn RetryQueue>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    pseudonymizer: Arc<Pseudonymizer>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    sessions_slots: Arc<Semaphore>,
    profiles_slots: Arc<Semaphore>,
}

impl RetryWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Arc<dyn RecordRepository>,
        warehouse: Arc<dyn WarehouseClient>,
        retry_queue: Arc<dyn RetryQueue>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        pseudonymizer: Arc<Pseudonymizer>,
        policy: BackoffPolicy,
        clock: Arc<dyn Clock>,
        concurrency_per_table: usize,
    ) -> Self {
        Self {
            records,
            warehouse,
            retry_queue,
            dead_letters,
            pseudonymizer,
            policy,
            clock,
            sessions_slots: Arc::new(Semaphore::new(concurrency_per_table)),
            profiles_slots: Arc::new(Semaphore::new(concurrency_per_table)),
        }
    }

    /// 一定間隔でキューをポーリングし続ける
    pub async fn run(self, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!("リトライキューのポーリングに失敗しました: {}", e);
            }
        }
    }

    /// 実行時刻の到来したタスクを 1 バッチ処理する
    ///
    /// タスクごとに spawn し、宛先テーブルのセマフォで同時実行数を抑える。
    /// 1 タスクの失敗は他のタスクに影響しない。
    #[tracing::instrument(skip_all)]
    pub async fn run_once(&self) -> Result<(), PipelineError> {
        let now = self.clock.now();
        let tasks = self.retry_queue.due(now, RETRY_BATCH_SIZE).await?;
        if tasks.is_empty() {
            return Ok(());
        }

        let queue_depth = self.retry_queue.len().await?;
        tracing::debug!(
            count = tasks.len(),
            queue_depth,
            "実行時刻の到来したリトライタスクを処理します"
        );

        let mut join_set = JoinSet::new();
        for task in tasks {
            let worker = self.clone();
            let slots = self.slots_for(task.table);
            join_set.spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return;
                };
                if let Err(e) = worker.process_task(&task).await {
                    tracing::error!(
                        record_id = %task.record_id,
                        attempt = task.attempt_count,
                        "リトライ試行に失敗しました: {}",
                        e
                    );
                }
            });
        }
        while join_set.join_next().await.is_some() {}

        Ok(())
    }

    fn slots_for(&self, table: WarehouseTable) -> Arc<Semaphore> {
        match table {
            WarehouseTable::Sessions => Arc::clone(&self.sessions_slots),
            WarehouseTable::Profiles => Arc::clone(&self.profiles_slots),
        }
    }

    /// リトライタスクを 1 件処理する
    #[tracing::instrument(skip_all, fields(record_id = %task.record_id, attempt = task.attempt_count))]
    async fn process_task(&self, task: &RetryTask) -> Result<(), PipelineError> {
        let now = self.clock.now();

        // 最新状態を再読込する。消去済み・未完了ならタスクを破棄
        let Some(record) = self.records.find_by_id(&task.record_id).await? else {
            tracing::info!("レコードが存在しないためタスクを破棄します");
            self.retry_queue.remove(task).await?;
            return Ok(());
        };
        if !record.is_completed() {
            tracing::info!("レコードが完了状態でないためタスクを破棄します");
            self.retry_queue.remove(task).await?;
            return Ok(());
        }
        if record.sync_status() == SyncStatus::Synced {
            // 並行する別経路が既に同期済み。後始末のみ行う
            self.retry_queue.remove(task).await?;
            resolve_dead_letter(&*self.dead_letters, &record, now).await?;
            return Ok(());
        }

        let expected = record.sync_status();
        match upsert_to_warehouse(&*self.warehouse, &self.pseudonymizer, &record).await {
            Ok(_) => {
                let synced = record.mark_synced(now)?;
                apply_sync_update(&*self.records, &synced, expected).await?;
                self.retry_queue.remove(task).await?;
                resolve_dead_letter(&*self.dead_letters, &synced, now).await?;
                tracing::info!("リトライで同期に成功しました");
            }
            Err(failure) if failure.retryable => {
                match task.next_attempt(&self.policy, now) {
                    Some(next) => {
                        let failed =
                            record.mark_failed(&failure.reason, next.attempt_count, now);
                        apply_sync_update(&*self.records, &failed, expected).await?;
                        open_or_refresh_dead_letter(
                            &*self.dead_letters,
                            &failed,
                            task.table,
                            &failure.reason,
                            now,
                        )
                        .await?;
                        // 後継タスクを積んでから旧タスクを除去する。間でクラッシュしても
                        // 残るのは重複タスクであり、再読込で同期済みとして後始末される
                        self.retry_queue.enqueue(&next).await?;
                        self.retry_queue.remove(task).await?;
                        tracing::warn!(
                            next_attempt = next.attempt_count,
                            next_eligible_at = %next.next_eligible_at,
                            "リトライに失敗しました。次回試行をスケジュールします"
                        );
                    }
                    None => {
                        self.abandon(&record, task, expected, &failure.reason, now)
                            .await?;
                    }
                }
            }
            Err(failure) => {
                // リトライ不可。残り試行回数を消費せず直ちに断念する
                self.abandon(&record, task, expected, &failure.reason, now)
                    .await?;
            }
        }

        Ok(())
    }

    /// レコードとデッドレターを断念状態にし、タスクをキューから除去する
    async fn abandon(
        &self,
        record: &Record,
        task: &RetryTask,
        expected: SyncStatus,
        reason: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), PipelineError> {
        let abandoned = record
            .clone()
            .mark_abandoned(reason, task.attempt_count + 1, now);
        apply_sync_update(&*self.records, &abandoned, expected).await?;
        self.retry_queue.remove(task).await?;
        abandon_dead_letter(&*self.dead_letters, &abandoned, task.table, reason, now).await?;
        tracing::warn!(
            retry_count = task.attempt_count + 1,
            "同期を断念しました。手動解決が必要です: {}",
            reason
        );
        Ok(())
    }
}
