//! # リトライキュー
//!
//! Redis ソート済みセットを使用したリトライタスクキュー。
//!
//! ## Redis キー設計
//!
//! | キー | 型 | メンバー | スコア |
//! |-----|-----|---------|-------|
//! | `retry_queue` | ZSET | RetryTask (JSON) | `next_eligible_at` のエポックミリ秒 |
//!
//! 実行可能なタスクの取得は `ZRANGEBYSCORE -inf {now}` で行い、
//! スコア順（= 実行可能になった順）に返る。個々の操作は単一タスク単位で、
//! キュー全体のロックは行わない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use souko_domain::retry::RetryTask;

use crate::InfraError;

/// リトライキューの Redis キー
const RETRY_QUEUE_KEY: &str = "retry_queue";

/// リトライキュートレイト
#[async_trait]
pub trait RetryQueue: Send + Sync {
    /// タスクを投入する
    ///
    /// `task.next_eligible_at` がスコアになり、その時刻まで
    /// [`due`](Self::due) の結果に現れない。
    async fn enqueue(&self, task: &RetryTask) -> Result<(), InfraError>;

    /// 実行可能なタスクを古い順に取得する
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryTask>, InfraError>;

    /// タスクをキューから取り除く
    ///
    /// 存在しないタスクを取り除いても成功とする。
    async fn remove(&self, task: &RetryTask) -> Result<(), InfraError>;

    /// キューの長さを返す
    async fn len(&self) -> Result<u64, InfraError>;
}

/// Redis を使用したリトライキュー
pub struct RedisRetryQueue {
    conn: ConnectionManager,
}

impl RedisRetryQueue {
    /// 新しい RedisRetryQueue を作成する
    ///
    /// # 引数
    ///
    /// - `redis_url`: Redis 接続 URL（例: `redis://localhost:6379`）
    pub async fn new(redis_url: &str) -> Result<Self, InfraError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RetryQueue for RedisRetryQueue {
    #[tracing::instrument(skip_all, fields(record_id = %task.record_id, attempt = task.attempt_count))]
    async fn enqueue(&self, task: &RetryTask) -> Result<(), InfraError> {
        let member = serde_json::to_string(task)?;
        let score = task.next_eligible_at.timestamp_millis();

        let mut conn = self.conn.clone();
        let _: () = conn.zadd(RETRY_QUEUE_KEY, member, score).await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(limit))]
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryTask>, InfraError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore_limit(
                RETRY_QUEUE_KEY,
                "-inf",
                now.timestamp_millis(),
                0,
                limit as isize,
            )
            .await?;

        members
            .iter()
            .map(|m| serde_json::from_str(m).map_err(InfraError::from))
            .collect()
    }

    #[tracing::instrument(skip_all, fields(record_id = %task.record_id))]
    async fn remove(&self, task: &RetryTask) -> Result<(), InfraError> {
        let member = serde_json::to_string(task)?;

        let mut conn = self.conn.clone();
        let _: () = conn.zrem(RETRY_QUEUE_KEY, member).await?;

        Ok(())
    }

    async fn len(&self) -> Result<u64, InfraError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(RETRY_QUEUE_KEY).await?;
        Ok(count)
    }
}
