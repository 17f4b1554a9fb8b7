//! # Souko パイプラインワーカー
//!
//! 運用ストアと分析ウェアハウスを同期させる常駐ワーカー。
//!
//! ## 役割
//!
//! - **同期ディスパッチャ**: チェンジフィードの完了エッジでウェアハウスへ
//!   仮名化済みの行をアップサートする
//! - **リトライワーカー**: 失敗した同期を指数バックオフで再試行する
//! - **削除スケジューラ**: 猶予期間の満了した消去リクエストを実行する
//! - **内部管理 API**: 同期状態の読み取り・デッドレターの棚卸しと再キュー・
//!   消去リクエストのキャンセル
//!
//! ## アクセス制御
//!
//! 内部管理 API は内部ネットワークからのみアクセス可能とする。
//! サブジェクト向けのエンドポイントは別サービスの責務。
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `PORT` | No | ポート番号（デフォルト: `8080`） |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `REDIS_URL` | **Yes** | Redis 接続 URL |
//! | `AUDIT_LOG_TABLE` | **Yes** | 消去監査ログの DynamoDB テーブル名 |
//! | `PSEUDONYM_SALT` | **Yes** | 仮名化ソルトのシークレット |
//! | `PSEUDONYM_SALT_EPOCH` | No | ソルト世代番号（デフォルト: `1`） |
//! | `PSEUDONYM_SALT_PREVIOUS` | No | ローテーション中の旧ソルト |
//! | `PSEUDONYM_SALT_PREVIOUS_EPOCH` | No* | 旧ソルトの世代番号（旧ソルト設定時は必須） |
//! | `DELETION_SWEEP_INTERVAL_SECS` | No | 削除スケジューラの間隔（デフォルト: `86400`） |
//! | `DELETION_RUN_CAP` | No | 1 回の掃き出し上限（デフォルト: `100`） |
//! | `RETRY_POLL_INTERVAL_SECS` | No | リトライポーリング間隔（デフォルト: `30`） |
//! | `RETRY_CONCURRENCY_PER_TABLE` | No | テーブルごとの同時リトライ数（デフォルト: `4`） |
//!
//! ## 起動方法
//!
//! ```bash
//! DATABASE_URL=postgres://... REDIS_URL=redis://... \
//! AUDIT_LOG_TABLE=erasure-audit PSEUDONYM_SALT=... \
//! cargo run -p souko-pipeline
//! ```

mod change_feed;
mod config;
mod error;
mod handler;
mod usecase;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post},
};
use config::PipelineConfig;
use handler::{
    DeadLetterState,
    ErasureState,
    SyncStatusState,
    cancel_erasure_request,
    get_sync_status,
    health_check,
    list_dead_letters,
    resolve_dead_letter,
    resync_record,
};
use souko_domain::{clock::SystemClock, retry::BackoffPolicy};
use souko_infra::{
    audit_log::DynamoDbErasureAuditLog,
    db,
    deletion::DeletionRegistry,
    queue::RedisRetryQueue,
    repository::{
        PostgresDeadLetterRepository,
        PostgresErasureRequestRepository,
        PostgresRecordRepository,
        PostgresSubjectRepository,
    },
    warehouse::{PostgresWarehouse, WarehouseClient},
};
use souko_shared::observability::{TracingConfig, init_tracing};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use usecase::{DeadLetterAdmin, DeletionScheduler, ErasureUseCase, RetryWorker, SyncDispatcher};

/// パイプラインワーカーのエントリーポイント
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    // トレーシング初期化
    init_tracing(TracingConfig::from_env("souko-pipeline"));

    // 設定読み込み（必須変数の欠落はここで失敗する）
    let config = PipelineConfig::from_env().expect("設定の読み込みに失敗しました");
    let pseudonymizer = Arc::new(
        config
            .salt
            .build_pseudonymizer()
            .expect("仮名化ソルトの構成が不正です"),
    );

    tracing::info!(
        "パイプラインワーカーを起動します: {}:{}",
        config.host,
        config.port
    );

    // データストア接続
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("データベース接続に失敗しました");
    db::run_migrations(&pool)
        .await
        .expect("マイグレーションの適用に失敗しました");
    tracing::info!("データベースに接続しました");

    let retry_queue = Arc::new(
        RedisRetryQueue::new(&config.redis_url)
            .await
            .expect("Redis 接続に失敗しました"),
    );
    tracing::info!("Redis に接続しました");

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;
    let audit_log = Arc::new(DynamoDbErasureAuditLog::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        config.audit_log_table.clone(),
    ));

    // 依存コンポーネントを初期化
    let records = Arc::new(PostgresRecordRepository::new(pool.clone()));
    let subjects = Arc::new(PostgresSubjectRepository::new(pool.clone()));
    let erasure_requests = Arc::new(PostgresErasureRequestRepository::new(pool.clone()));
    let dead_letters = Arc::new(PostgresDeadLetterRepository::new(pool.clone()));
    let warehouse: Arc<dyn WarehouseClient> = Arc::new(PostgresWarehouse::new(pool.clone()));
    let clock = Arc::new(SystemClock);
    let policy = BackoffPolicy::default();

    // チェンジフィードとディスパッチャ
    let (feed, feed_rx) = change_feed::change_feed(1024);
    let dispatcher = SyncDispatcher::new(
        records.clone(),
        warehouse.clone(),
        retry_queue.clone(),
        dead_letters.clone(),
        pseudonymizer.clone(),
        policy.clone(),
        clock.clone(),
    );
    tokio::spawn(dispatcher.run(feed_rx));

    // リトライワーカー
    let retry_worker = RetryWorker::new(
        records.clone(),
        warehouse.clone(),
        retry_queue.clone(),
        dead_letters.clone(),
        pseudonymizer.clone(),
        policy.clone(),
        clock.clone(),
        config.retry_concurrency_per_table,
    );
    tokio::spawn(retry_worker.run(Duration::from_secs(config.retry_poll_interval_secs)));

    // 削除スケジューラ
    let registry = Arc::new(DeletionRegistry::with_all_deleters(
        pool.clone(),
        warehouse.clone(),
    ));
    let scheduler = DeletionScheduler::new(
        erasure_requests.clone(),
        registry,
        audit_log,
        pseudonymizer.clone(),
        clock.clone(),
        config.deletion_run_cap,
    );
    tokio::spawn(scheduler.run(Duration::from_secs(config.deletion_sweep_interval_secs)));

    // 内部管理 API
    let sync_status_state = Arc::new(SyncStatusState {
        records: records.clone(),
        feed,
    });
    let dead_letter_state = Arc::new(DeadLetterState {
        admin: DeadLetterAdmin::new(
            dead_letters.clone(),
            records.clone(),
            retry_queue.clone(),
            policy,
            clock.clone(),
        ),
    });
    let erasure_state = Arc::new(ErasureState {
        erasure: ErasureUseCase::new(erasure_requests, subjects, clock.clone()),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/internal/records/{record_id}/sync-status",
            get(get_sync_status),
        )
        .route("/internal/records/{record_id}/resync", post(resync_record))
        .with_state(sync_status_state)
        .route("/internal/dead-letters", get(list_dead_letters))
        .route(
            "/internal/dead-letters/{entry_id}/resolve",
            post(resolve_dead_letter),
        )
        .with_state(dead_letter_state)
        .route(
            "/internal/subjects/{subject_id}/erasure-request/cancel",
            post(cancel_erasure_request),
        )
        .with_state(erasure_state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("内部管理 API を待ち受けます: {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
