//! # Souko ドメイン層
//!
//! 運用ストアと分析ウェアハウスを同期するパイプラインのドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! このクレートは DDD（ドメイン駆動設計）の原則に従い、以下を提供する:
//!
//! - **エンティティ**: 一意の識別子を持つオブジェクト（例: Record, ErasureRequest）
//! - **値オブジェクト**: 識別子を持たない不変オブジェクト（例: Pseudonym, SaltConfig）
//! - **純粋関数**: スキーマ変換・バックオフ計算などの副作用を持たないロジック
//! - **ドメインエラー**: ビジネスルール違反を表現するエラー型
//!
//! ## 依存関係の方向
//!
//! ```text
//! pipeline → infra → domain
//! ```
//!
//! ドメイン層はインフラ層（DB、Redis、DynamoDB）に一切依存しない。
//! 仮名化・スキーマ変換・バックオフ計算はすべて純粋関数として実装され、
//! インフラなしでテスト可能である。
//!
//! ## モジュール構成
//!
//! - [`record`] - 運用レコードのライフサイクルと同期状態
//! - [`subject`] - レコードを所有する本人（サブジェクト）と PII 値オブジェクト
//! - [`pseudonym`] - 決定的・一方向の識別子変換（仮名化）
//! - [`warehouse`] - ウェアハウス行の固定スキーマと変換関数
//! - [`retry`] - リトライタスクと指数バックオフポリシー
//! - [`dead_letter`] - デッドレターエントリ
//! - [`erasure`] - 消去リクエストのライフサイクル
//! - [`audit`] - 消去監査ログエントリ
//! - [`clock`] - テスト可能な時刻プロバイダ
//! - [`error`] - ドメイン層エラー定義

#[macro_use]
mod macros;

pub mod audit;
pub mod clock;
pub mod dead_letter;
pub mod erasure;
pub mod error;
pub mod pseudonym;
pub mod record;
pub mod retry;
pub mod subject;
pub mod warehouse;

pub use error::DomainError;
