//! # ウェアハウススキーマ変換
//!
//! 運用レコードを分析用ウェアハウスの固定フラットスキーマに変換する。
//!
//! ## 設計方針
//!
//! - **純関数**: [`to_warehouse_row`] は入出力以外に作用を持たず、
//!   同じ入力に対して常にバイト単位で同一の行を返す（冪等なアップサートの前提）。
//! - **構造的 PII 排除**: [`WarehouseRow`] には PII を保持するフィールドが
//!   存在しない。メール・表示名・IP がウェアハウスに渡るコードパスは
//!   型レベルで構成できない。
//! - **変換失敗はリトライ不可**: 入力が決定的に不正な場合のエラーであり、
//!   再試行しても結果は変わらないため、ディスパッチャは即座に
//!   デッドレター行きと判断できる。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use thiserror::Error;

use crate::{
    pseudonym::{Pseudonym, generalize_device_model, generalize_locale},
    record::{Record, RecordId, RecordKind},
};

/// ウェアハウスの宛先テーブル
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WarehouseTable {
    /// セッション分析テーブル
    Sessions,
    /// プロフィールスナップショットテーブル
    Profiles,
}

impl WarehouseTable {
    /// レコード種別から宛先テーブルを決定する
    pub fn for_kind(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Session => Self::Sessions,
            RecordKind::Profile => Self::Profiles,
        }
    }

    /// 全テーブルの列挙（消去シーケンスが横断的に削除する際に使用）
    pub fn all() -> [Self; 2] {
        [Self::Sessions, Self::Profiles]
    }

    /// 物理テーブル名
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Sessions => "warehouse_sessions",
            Self::Profiles => "warehouse_profiles",
        }
    }
}

impl std::str::FromStr for WarehouseTable {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sessions" => Ok(Self::Sessions),
            "profiles" => Ok(Self::Profiles),
            _ => Err(crate::DomainError::Validation(format!(
                "不正なウェアハウステーブル: {}",
                s
            ))),
        }
    }
}

/// ウェアハウス行
///
/// (subject_pseudonym, record_id) をキーとするアップサート単位。
/// 準識別子はすべて粗化済みの値のみを保持する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRow {
    /// レコード ID（アップサートキーの一部）
    pub record_id: RecordId,
    /// 仮名化済みサブジェクト識別子（アップサートキーの一部）
    pub subject_pseudonym: Pseudonym,
    /// レコード完了日時
    pub completed_at: DateTime<Utc>,
    /// 粗化済み端末クラス（欠損時 "unknown"）
    pub device_class: String,
    /// 粗化済み言語タグ（欠損時 "und"）
    pub language: String,
    /// アプリバージョン（欠損時 空文字）
    pub app_version: String,
    /// セッション長（秒。欠損時 0）
    pub duration_seconds: i64,
}

/// スキーマ変換エラー
///
/// 入力が決定的に不正な場合にのみ発生する。**常にリトライ不可**であり、
/// ディスパッチャはこのエラーを受けたらリトライキューを経由せず
/// 直接デッドレターに記録する。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    /// 必須フィールドの欠損
    #[error("必須フィールドが欠損しています: {field}")]
    MissingRequiredField {
        field: &'static str,
    },
}

/// 運用レコードをウェアハウス行に変換する
///
/// PII（IP アドレス）は構造的に落とし、準識別子は粗化する:
///
/// - 端末モデル → 端末クラス（[`generalize_device_model`]）
/// - ロケール → 言語タグ（[`generalize_locale`]）
///
/// 任意フィールドの欠損は既定値で埋める（端末クラス `"unknown"`、
/// 言語 `"und"`、アプリバージョン空文字、セッション長 `0`）。
///
/// # Errors
///
/// - `TransformError::MissingRequiredField`: 未完了レコード
///   （`completed_at` 無し）を渡した場合
pub fn to_warehouse_row(
    record: &Record,
    pseudonym: &Pseudonym,
) -> Result<WarehouseRow, TransformError> {
    let completed_at = record
        .completed_at()
        .ok_or(TransformError::MissingRequiredField {
            field: "completed_at",
        })?;

    let payload = record.payload();

    Ok(WarehouseRow {
        record_id: record.id().clone(),
        subject_pseudonym: pseudonym.clone(),
        completed_at,
        device_class: payload
            .device_model
            .as_deref()
            .map_or_else(|| "unknown".to_string(), generalize_device_model),
        language: payload
            .locale
            .as_deref()
            .map_or_else(|| "und".to_string(), generalize_locale),
        app_version: payload.app_version.clone().unwrap_or_default(),
        duration_seconds: payload.duration_seconds.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        pseudonym::{Pseudonymizer, SaltConfig},
        record::{NewRecord, RecordPayload},
        subject::SubjectId,
    };

    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn completed_record(payload: RecordPayload, now: DateTime<Utc>) -> Record {
        Record::new(NewRecord {
            id: RecordId::new(),
            subject_id: SubjectId::new(),
            kind: RecordKind::Session,
            payload,
            now,
        })
        .completed(now)
        .unwrap()
    }

    fn pseudonym_for(record: &Record) -> Pseudonym {
        Pseudonymizer::new(SaltConfig::new(1, "test-salt").unwrap(), None)
            .pseudonymize(record.subject_id())
    }

    #[rstest]
    fn test_完了レコードが行に変換される(now: DateTime<Utc>) {
        let record = completed_record(
            RecordPayload {
                device_model: Some("iPhone15,2".to_string()),
                locale: Some("ja-JP".to_string()),
                app_version: Some("2.4.1".to_string()),
                duration_seconds: Some(312),
                ip_address: None,
            },
            now,
        );
        let pseudonym = pseudonym_for(&record);

        let sut = to_warehouse_row(&record, &pseudonym).unwrap();

        let expected = WarehouseRow {
            record_id: record.id().clone(),
            subject_pseudonym: pseudonym,
            completed_at: now,
            device_class: "iphone".to_string(),
            language: "ja".to_string(),
            app_version: "2.4.1".to_string(),
            duration_seconds: 312,
        };
        assert_eq!(sut, expected);
    }

    #[rstest]
    fn test_同じ入力からは同一の行が生成される(now: DateTime<Utc>) {
        let record = completed_record(RecordPayload::default(), now);
        let pseudonym = pseudonym_for(&record);

        assert_eq!(
            to_warehouse_row(&record, &pseudonym).unwrap(),
            to_warehouse_row(&record, &pseudonym).unwrap()
        );
    }

    #[rstest]
    fn test_任意フィールド欠損は既定値で埋まる(now: DateTime<Utc>) {
        let record = completed_record(RecordPayload::default(), now);
        let pseudonym = pseudonym_for(&record);

        let sut = to_warehouse_row(&record, &pseudonym).unwrap();

        assert_eq!(sut.device_class, "unknown");
        assert_eq!(sut.language, "und");
        assert_eq!(sut.app_version, "");
        assert_eq!(sut.duration_seconds, 0);
    }

    #[rstest]
    fn test_未完了レコードの変換はエラー(now: DateTime<Utc>) {
        let record = Record::new(NewRecord {
            id: RecordId::new(),
            subject_id: SubjectId::new(),
            kind: RecordKind::Session,
            payload: RecordPayload::default(),
            now,
        });
        let pseudonym = pseudonym_for(&record);

        let result = to_warehouse_row(&record, &pseudonym);

        assert_eq!(
            result,
            Err(TransformError::MissingRequiredField {
                field: "completed_at"
            })
        );
    }

    #[rstest]
    fn test_ipアドレスは行のどこにも現れない(now: DateTime<Utc>) {
        let record = completed_record(
            RecordPayload {
                ip_address: Some(crate::subject::IpAddress::new("203.0.113.7").unwrap()),
                ..RecordPayload::default()
            },
            now,
        );
        let pseudonym = pseudonym_for(&record);

        let row = to_warehouse_row(&record, &pseudonym).unwrap();
        let json = serde_json::to_string(&row).unwrap();

        assert!(!json.contains("203.0.113.7"));
    }

    #[rstest]
    #[case(RecordKind::Session, WarehouseTable::Sessions)]
    #[case(RecordKind::Profile, WarehouseTable::Profiles)]
    fn test_レコード種別から宛先テーブルが決まる(
        #[case] kind: RecordKind,
        #[case] expected: WarehouseTable,
    ) {
        assert_eq!(WarehouseTable::for_kind(kind), expected);
    }
}
