//! ディスパッチャとリトライワーカーで共有する同期処理の部品。

use chrono::{DateTime, Utc};
use souko_domain::{
    dead_letter::DeadLetterEntry,
    pseudonym::Pseudonymizer,
    record::{Record, SyncStatus},
    warehouse::{WarehouseTable, to_warehouse_row},
};
use souko_infra::{
    repository::{DeadLetterRepository, RecordRepository},
    warehouse::WarehouseClient,
};

use crate::error::PipelineError;

/// ウェアハウスへの書き込み失敗
///
/// `retryable` がリトライキュー行きかデッドレター直行かを分ける。
pub(crate) struct UpsertFailure {
    pub reason: String,
    pub retryable: bool,
}

/// 仮名化・変換・アップサートを 1 レコードに対して実行する
///
/// 変換エラー（必須フィールド欠損）はリトライ不可として扱う。
/// 成功時は書き込んだ宛先テーブルを返す。
pub(crate) async fn upsert_to_warehouse(
    warehouse: &dyn WarehouseClient,
    pseudonymizer: &Pseudonymizer,
    record: &Record,
) -> Result<WarehouseTable, UpsertFailure> {
    let pseudonym = pseudonymizer.pseudonymize(record.subject_id());
    let row = to_warehouse_row(record, &pseudonym).map_err(|e| UpsertFailure {
        reason: e.to_string(),
        retryable: false,
    })?;

    let table = WarehouseTable::for_kind(record.kind());
    warehouse
        .upsert(table, &row)
        .await
        .map_err(|e| UpsertFailure {
            reason: e.to_string(),
            retryable: e.is_retryable(),
        })?;

    Ok(table)
}

/// 同期状態の条件付き更新を適用する
///
/// 競合（並行する更新に負けた）は致命的ではない。アップサートは冪等で、
/// 勝った側の更新が最新の実態を反映しているため、警告ログのみで握り潰す。
pub(crate) async fn apply_sync_update(
    records: &dyn RecordRepository,
    updated: &Record,
    expected: SyncStatus,
) -> Result<(), PipelineError> {
    match records.update_sync_state(updated, expected).await {
        Ok(()) => Ok(()),
        Err(e) if e.as_conflict().is_some() => {
            tracing::warn!(
                record_id = %updated.id(),
                "同期状態の更新が競合しました（並行更新に敗北）"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// 未解決デッドレターを開くか、既存エントリの失敗理由を更新する
pub(crate) async fn open_or_refresh_dead_letter(
    dead_letters: &dyn DeadLetterRepository,
    record: &Record,
    table: WarehouseTable,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    let entry = match dead_letters.find_pending_by_record(record.id()).await? {
        Some(existing) => existing.refreshed(reason, now)?,
        None => DeadLetterEntry::open(
            record.subject_id().clone(),
            record.id().clone(),
            table,
            reason,
            now,
        ),
    };
    dead_letters.save(&entry).await?;
    Ok(())
}

/// デッドレターを断念状態にする（なければ開いてから断念）
pub(crate) async fn abandon_dead_letter(
    dead_letters: &dyn DeadLetterRepository,
    record: &Record,
    table: WarehouseTable,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    let entry = match dead_letters.find_pending_by_record(record.id()).await? {
        Some(existing) => existing.refreshed(reason, now)?,
        None => DeadLetterEntry::open(
            record.subject_id().clone(),
            record.id().clone(),
            table,
            reason,
            now,
        ),
    };
    dead_letters.save(&entry.abandoned(now)?).await?;
    Ok(())
}

/// レコードに対応する未解決デッドレターがあれば解決する
pub(crate) async fn resolve_dead_letter(
    dead_letters: &dyn DeadLetterRepository,
    record: &Record,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    if let Some(entry) = dead_letters.find_pending_by_record(record.id()).await? {
        dead_letters.save(&entry.resolved(now)?).await?;
    }
    Ok(())
}
