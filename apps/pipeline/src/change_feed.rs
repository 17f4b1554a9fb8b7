//! # チェンジフィード
//!
//! 運用ストアのレコード変更スナップショットをディスパッチャへ流す
//! インプロセスのチャネル。変更元（サブジェクト向け API・手動再同期）は
//! `ChangeFeed` 経由で発行し、ディスパッチャが `Receiver` を消費する。

use souko_domain::record::RecordChange;
use tokio::sync::mpsc;

use crate::error::PipelineError;

/// チェンジフィードの発行側ハンドル
#[derive(Clone)]
pub struct ChangeFeed {
    tx: mpsc::Sender<RecordChange>,
}

/// チェンジフィードを作成する
///
/// 返り値の `Receiver` をディスパッチャの `run` に渡す。
pub fn change_feed(capacity: usize) -> (ChangeFeed, mpsc::Receiver<RecordChange>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChangeFeed { tx }, rx)
}

impl ChangeFeed {
    /// 変更スナップショットを発行する
    ///
    /// # Errors
    ///
    /// - `PipelineError::Internal`: ディスパッチャが停止している場合
    pub async fn publish(&self, change: RecordChange) -> Result<(), PipelineError> {
        self.tx
            .send(change)
            .await
            .map_err(|_| PipelineError::Internal("チェンジフィードが閉じられています".to_string()))
    }
}
