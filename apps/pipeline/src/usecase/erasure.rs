//! # 消去リクエスト操作
//!
//! サブジェクト起点のキャンセルを扱う。リクエストの作成はサブジェクト向け
//! サービス側の責務で、パイプラインは状態と削除予定日のみを読む。

use std::sync::Arc;

use souko_domain::{clock::Clock, erasure::ErasureRequest, subject::SubjectId};
use souko_infra::repository::{ErasureRequestRepository, SubjectRepository};

use crate::error::PipelineError;

/// 消去リクエストのキャンセルユースケース
#[derive(Clone)]
pub struct ErasureUseCase {
    requests: Arc<dyn ErasureRequestRepository>,
    subjects: Arc<dyn SubjectRepository>,
    clock: Arc<dyn Clock>,
}

impl ErasureUseCase {
    pub fn new(
        requests: Arc<dyn ErasureRequestRepository>,
        subjects: Arc<dyn SubjectRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests,
            subjects,
            clock,
        }
    }

    /// 保留中の消去リクエストをキャンセルする
    ///
    /// スケジューラとのレースは最新の読み取り同士で安全に決着する:
    /// サブジェクトルートが既に削除されていればシーケンスはステップ (b) を
    /// 越えており、キャンセルは `Conflict` で拒否される。スケジューラ側が
    /// 同時に完了へ遷移させた場合も条件付き更新が競合を検出する。
    ///
    /// # Errors
    ///
    /// - `PipelineError::NotFound`: 保留中のリクエストが存在しない
    /// - `PipelineError::Conflict`: 削除シーケンスが既に不可逆段階へ進んでいる
    #[tracing::instrument(skip(self), fields(subject_id = %subject_id))]
    pub async fn cancel(&self, subject_id: &SubjectId) -> Result<ErasureRequest, PipelineError> {
        let request = self
            .requests
            .find_pending_by_subject(subject_id)
            .await?
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "保留中の消去リクエストがありません: {subject_id}"
                ))
            })?;

        if self.subjects.find_by_id(subject_id).await?.is_none() {
            return Err(PipelineError::Conflict(
                "削除シーケンスが既に開始されているためキャンセルできません".to_string(),
            ));
        }

        let cancelled = request.cancelled(self.clock.now())?;
        self.requests.transition_from_pending(&cancelled).await?;

        tracing::info!(request_id = %cancelled.id(), "消去リクエストをキャンセルしました");
        Ok(cancelled)
    }
}
