//! # デッドレター管理
//!
//! 断念された同期の棚卸しと手動再キューを提供する。
//! 自動リトライの上限に達したレコードは、ここを経由した管理操作でのみ
//! パイプラインに復帰する。

use std::sync::Arc;

use souko_domain::{
    clock::Clock,
    dead_letter::{DeadLetterEntry, DeadLetterEntryId, DeadLetterStatus},
    record::SyncStatus,
    retry::{BackoffPolicy, RetryTask},
};
use souko_infra::{
    queue::RetryQueue,
    repository::{DeadLetterRepository, RecordRepository},
};

use crate::{error::PipelineError, usecase::helpers::apply_sync_update};

/// デッドレターの閲覧・手動再キューユースケース
#[derive(Clone)]
pub struct DeadLetterAdmin {
    dead_letters: Arc<dyn DeadLetterRepository>,
    records: Arc<dyn RecordRepository>,
    retry_queue: Arc<dyn RetryQueue>,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl DeadLetterAdmin {
    pub fn new(
        dead_letters: Arc<dyn DeadLetterRepository>,
        records: Arc<dyn RecordRepository>,
        retry_queue: Arc<dyn RetryQueue>,
        policy: BackoffPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dead_letters,
            records,
            retry_queue,
            policy,
            clock,
        }
    }

    /// デッドレターを一覧する（新しい順）
    pub async fn list(
        &self,
        status: Option<DeadLetterStatus>,
        limit: i64,
    ) -> Result<Vec<DeadLetterEntry>, PipelineError> {
        Ok(self.dead_letters.list(status, limit).await?)
    }

    /// デッドレターを手動で解決し、同期を再キューする
    ///
    /// - 断念済みエントリは未解決に戻し、レコードを `failed`（リトライ回数 0）
    ///   に巻き戻してリトライタスクを初回から投入する
    /// - レコードが既に同期済みならエントリの解決のみ行う
    /// - レコードが消去済み・未完了の場合は `Conflict`
    #[tracing::instrument(skip(self), fields(entry_id = %id))]
    pub async fn resolve(&self, id: &DeadLetterEntryId) -> Result<DeadLetterEntry, PipelineError> {
        let entry = self.dead_letters.find_by_id(id).await?.ok_or_else(|| {
            PipelineError::NotFound(format!("デッドレターが見つかりません: {id}"))
        })?;
        let now = self.clock.now();

        let pending = match entry.status() {
            DeadLetterStatus::Resolved => {
                return Err(PipelineError::Conflict(
                    "既に解決済みのデッドレターです".to_string(),
                ));
            }
            DeadLetterStatus::Abandoned => entry.reopened(now)?,
            DeadLetterStatus::Pending => entry,
        };

        let Some(record) = self.records.find_by_id(pending.record_id()).await? else {
            return Err(PipelineError::Conflict(
                "対象レコードが存在しません（消去済みの可能性があります）".to_string(),
            ));
        };
        if !record.is_completed() {
            return Err(PipelineError::Conflict(
                "対象レコードが完了状態でないため再キューできません".to_string(),
            ));
        }

        // 既に同期済みなら再キューは不要。エントリを閉じるだけ
        if record.sync_status() == SyncStatus::Synced {
            let resolved = pending.resolved(now)?;
            self.dead_letters.save(&resolved).await?;
            return Ok(resolved);
        }

        let expected = record.sync_status();
        let table = pending.table();
        let task = RetryTask::initial(
            record.subject_id().clone(),
            record.id().clone(),
            table,
            &self.policy,
            now,
        );
        let failed = record.mark_failed(pending.failure_reason(), 0, now);
        apply_sync_update(&*self.records, &failed, expected).await?;
        self.retry_queue.enqueue(&task).await?;
        self.dead_letters.save(&pending).await?;

        tracing::info!(record_id = %pending.record_id(), "デッドレターを再キューしました");
        Ok(pending)
    }
}
