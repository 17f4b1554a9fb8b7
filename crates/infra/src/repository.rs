//! # リポジトリ層
//!
//! 運用ストア（PostgreSQL）の永続化を担当するリポジトリ群。
//!
//! 各リポジトリはトレイトで抽象化され、ユースケース層は具象実装に依存しない。
//! テストでは `test-utils` feature のインメモリモックに差し替える。

mod dead_letter_repository;
mod erasure_request_repository;
mod record_repository;
mod subject_repository;

pub use dead_letter_repository::{DeadLetterRepository, PostgresDeadLetterRepository};
pub use erasure_request_repository::{ErasureRequestRepository, PostgresErasureRequestRepository};
pub use record_repository::{PostgresRecordRepository, RecordRepository};
pub use subject_repository::{PostgresSubjectRepository, SubjectRepository};
