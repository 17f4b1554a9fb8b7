//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! ## 設計方針
//!
//! - **型による分類**: エラーの種類を列挙型で明示し、パターンマッチで処理可能に
//! - **thiserror 活用**: `#[error(...)]` マクロでエラーメッセージを自動生成
//! - **リトライ可否の判定**: パイプラインがエラー種別からリトライ戦略を決定できる

use thiserror::Error;

/// ドメイン層で発生するエラー
///
/// ビジネスロジックの実行中に発生する例外状態を表現する。
/// スキーマ変換の失敗は別途 [`TransformError`](crate::warehouse::TransformError)
/// として定義され、常にリトライ不可として扱われる。
#[derive(Debug, Error)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// 入力値がビジネスルールに違反している場合に使用する。
    ///
    /// # 例
    ///
    /// - 必須フィールドが未入力
    /// - 不正な状態遷移（完了済みレコードの再完了など）
    /// - DB 復元時の不変条件違反
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// エンティティが見つからない
    ///
    /// 指定された ID のエンティティが存在しない場合に使用する。
    /// `entity_type` にはエンティティの種類（"Record", "ErasureRequest" など）を指定する。
    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        /// エンティティの種類（"Record", "Subject", "ErasureRequest" など）
        entity_type: &'static str,
        /// 検索に使用した識別子
        id:          String,
    },

    /// 競合エラー
    ///
    /// 同時更新による競合、または消去リクエスト保留中のサブジェクトへの
    /// 書き込み試行で発生する。このエラーが発生した場合、呼び出し元は
    /// 最新状態を再取得してから判断をやり直す必要がある。
    #[error("競合が発生しました: {0}")]
    Conflict(String),
}
