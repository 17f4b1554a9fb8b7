//! # パイプライン設定
//!
//! 環境変数からパイプラインワーカーの設定を読み込む。
//! 必須変数の欠落は起動時に即座に失敗させる（フェイルクローズ）。

use std::env;

use souko_domain::pseudonym::{Pseudonymizer, SaltConfig};

/// パイプラインワーカーの設定
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// バインドアドレス（内部管理 API 用）
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// 運用ストア・ウェアハウスの PostgreSQL 接続 URL
    pub database_url: String,
    /// リトライキューの Redis 接続 URL
    pub redis_url: String,
    /// 消去監査ログの DynamoDB テーブル名
    pub audit_log_table: String,
    /// 仮名化ソルト設定
    pub salt: SaltSettings,
    /// 削除スケジューラの実行間隔（秒）
    pub deletion_sweep_interval_secs: u64,
    /// 削除スケジューラの 1 回あたり処理上限
    pub deletion_run_cap: i64,
    /// リトライワーカーのポーリング間隔（秒）
    pub retry_poll_interval_secs: u64,
    /// 宛先テーブルごとの同時リトライ数上限
    pub retry_concurrency_per_table: usize,
}

/// 仮名化ソルトの設定
///
/// ローテーション期間中は `previous` に旧世代のソルトを設定し、
/// 進行中の消去が新旧両方の仮名を照合できるようにする。
#[derive(Debug, Clone)]
pub struct SaltSettings {
    /// 現行ソルトの世代番号
    pub epoch: u32,
    /// 現行ソルトのシークレット
    pub secret: String,
    /// 旧世代ソルト（世代番号, シークレット）
    pub previous: Option<(u32, String)>,
}

impl PipelineConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT は有効なポート番号である必要があります"),
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL が設定されていません"),
            redis_url: env::var("REDIS_URL").expect("REDIS_URL が設定されていません"),
            audit_log_table: env::var("AUDIT_LOG_TABLE")
                .expect("AUDIT_LOG_TABLE が設定されていません"),
            salt: SaltSettings::from_env(),
            deletion_sweep_interval_secs: parse_var("DELETION_SWEEP_INTERVAL_SECS", 86_400),
            deletion_run_cap: parse_var("DELETION_RUN_CAP", 100),
            retry_poll_interval_secs: parse_var("RETRY_POLL_INTERVAL_SECS", 30),
            retry_concurrency_per_table: parse_var("RETRY_CONCURRENCY_PER_TABLE", 4),
        })
    }
}

impl SaltSettings {
    /// 環境変数からソルト設定を読み込む
    ///
    /// `PSEUDONYM_SALT` は必須。`PSEUDONYM_SALT_PREVIOUS` を設定する場合は
    /// `PSEUDONYM_SALT_PREVIOUS_EPOCH` も必須となる。
    fn from_env() -> Self {
        let secret = env::var("PSEUDONYM_SALT")
            .expect("PSEUDONYM_SALT が設定されていません（仮名化ソルトなしでは起動できません）");
        let epoch = parse_var("PSEUDONYM_SALT_EPOCH", 1);
        let previous = env::var("PSEUDONYM_SALT_PREVIOUS").ok().map(|prev_secret| {
            let prev_epoch = env::var("PSEUDONYM_SALT_PREVIOUS_EPOCH")
                .expect("PSEUDONYM_SALT_PREVIOUS_EPOCH が設定されていません")
                .parse()
                .expect("PSEUDONYM_SALT_PREVIOUS_EPOCH は数値である必要があります");
            (prev_epoch, prev_secret)
        });

        Self {
            epoch,
            secret,
            previous,
        }
    }

    /// ソルト設定から Pseudonymizer を構築する
    ///
    /// シークレットが空の場合はエラー（フェイルクローズ）。
    pub fn build_pseudonymizer(&self) -> Result<Pseudonymizer, souko_domain::DomainError> {
        let current = SaltConfig::new(self.epoch, self.secret.clone())?;
        let previous = self
            .previous
            .as_ref()
            .map(|(epoch, secret)| SaltConfig::new(*epoch, secret.clone()))
            .transpose()?;

        Ok(Pseudonymizer::new(current, previous))
    }
}

/// 環境変数を数値としてパースする（未設定ならデフォルト値）
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    env::var(name).map_or(default, |value| {
        value
            .parse()
            .unwrap_or_else(|e| panic!("{name} のパースに失敗しました: {e:?}"))
    })
}
