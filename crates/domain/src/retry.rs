//! # リトライポリシー
//!
//! 同期失敗時の再試行タスクと指数バックオフポリシーを定義する。
//!
//! バックオフは `delay(n) = min(上限, 下限 * 2^n)` で計算し、
//! 上限到達までは厳密に単調増加する。試行回数が上限に達したタスクは
//! 再キューされず、レコードは abandoned に遷移する。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{record::RecordId, subject::SubjectId, warehouse::WarehouseTable};

/// リトライタスク
///
/// Redis ソート済みセットに JSON でシリアライズして格納し、
/// `next_eligible_at` のエポックミリ秒をスコアとする。
/// レコード本体は保持せず、実行時に最新状態を再読込する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTask {
    pub subject_id: SubjectId,
    pub record_id: RecordId,
    pub table: WarehouseTable,
    /// 実行済みの再試行回数（初回タスクは 0）
    pub attempt_count: u32,
    /// このタスクが実行可能になる時刻
    pub next_eligible_at: DateTime<Utc>,
}

impl RetryTask {
    /// 初回失敗時のタスクを作成する（attempt_count = 0）
    pub fn initial(
        subject_id: SubjectId,
        record_id: RecordId,
        table: WarehouseTable,
        policy: &BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id,
            record_id,
            table,
            attempt_count: 0,
            next_eligible_at: now + policy.delay_for(0),
        }
    }

    /// 次の試行タスクを返す。上限到達時は `None`（断念）
    pub fn next_attempt(&self, policy: &BackoffPolicy, now: DateTime<Utc>) -> Option<Self> {
        let attempt_count = self.attempt_count + 1;
        if attempt_count >= policy.max_attempts() {
            return None;
        }
        Some(Self {
            attempt_count,
            next_eligible_at: now + policy.delay_for(attempt_count),
            ..self.clone()
        })
    }

    /// 実行可能かどうか
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at <= now
    }
}

/// 指数バックオフポリシー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    floor: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    /// 既定値: 下限 1 秒、上限 1 時間、最大 10 回
    fn default() -> Self {
        Self {
            floor: Duration::seconds(1),
            cap: Duration::hours(1),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn new(floor: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            floor,
            cap,
            max_attempts,
        }
    }

    /// n 回目の試行の待機時間: `min(cap, floor * 2^n)`
    ///
    /// シフトのオーバーフローを避けるため、2^n が上限を超えることが
    /// 確定した時点で上限を返す。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt >= 31 {
            return self.cap;
        }
        let scaled = self
            .floor
            .checked_mul(1 << attempt)
            .unwrap_or(self.cap);
        scaled.min(self.cap)
    }

    /// 試行回数の上限。attempt_count がこの値に達したタスクは断念される
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn task(attempt_count: u32) -> RetryTask {
        RetryTask {
            subject_id: SubjectId::new(),
            record_id: RecordId::new(),
            table: WarehouseTable::Sessions,
            attempt_count,
            next_eligible_at: now(),
        }
    }

    #[rstest]
    #[case(0, Duration::seconds(1))]
    #[case(1, Duration::seconds(2))]
    #[case(2, Duration::seconds(4))]
    #[case(9, Duration::seconds(512))]
    #[case(11, Duration::seconds(2048))]
    #[case(12, Duration::hours(1))]
    #[case(100, Duration::hours(1))]
    fn test_バックオフ遅延の計算(#[case] attempt: u32, #[case] expected: Duration) {
        let sut = BackoffPolicy::default();

        assert_eq!(sut.delay_for(attempt), expected);
    }

    #[test]
    fn test_遅延は上限まで厳密に単調増加する() {
        let sut = BackoffPolicy::default();
        let mut previous = Duration::zero();

        for attempt in 0..12 {
            let delay = sut.delay_for(attempt);
            if delay < sut.cap {
                assert!(delay > previous, "attempt {} で単調増加が崩れた", attempt);
            }
            previous = delay;
        }
    }

    #[test]
    fn test_初回タスクはattempt_count_0で初回遅延が乗る() {
        let policy = BackoffPolicy::default();

        let sut = RetryTask::initial(
            SubjectId::new(),
            RecordId::new(),
            WarehouseTable::Sessions,
            &policy,
            now(),
        );

        assert_eq!(sut.attempt_count, 0);
        assert_eq!(sut.next_eligible_at, now() + Duration::seconds(1));
    }

    #[test]
    fn test_next_attemptで回数が増えて遅延が伸びる() {
        let policy = BackoffPolicy::default();

        let sut = task(2).next_attempt(&policy, now()).unwrap();

        assert_eq!(sut.attempt_count, 3);
        assert_eq!(sut.next_eligible_at, now() + Duration::seconds(8));
    }

    #[test]
    fn test_上限到達でnext_attemptはnoneを返す() {
        let policy = BackoffPolicy::default();

        // attempt_count 9 のタスクが 10 回目の失敗をした時点で打ち止め
        assert!(task(9).next_attempt(&policy, now()).is_none());
        assert!(task(8).next_attempt(&policy, now()).is_some());
    }

    #[test]
    fn test_実行可能判定() {
        let sut = task(0);

        assert!(sut.is_due(now()));
        assert!(sut.is_due(now() + Duration::seconds(1)));
        assert!(!sut.is_due(now() - Duration::seconds(1)));
    }

    #[test]
    fn test_jsonシリアライズの往復() {
        let sut = task(3);

        let json = serde_json::to_string(&sut).unwrap();
        let restored: RetryTask = serde_json::from_str(&json).unwrap();

        assert_eq!(sut, restored);
    }
}
