//! 에러 타입 정의.

use thiserror::Error;

use kostock_core::SeriesKind;
use kostock_data::DataError;

/// Collector 에러 타입
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 데이터베이스 에러
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 데이터 소스/저장소 에러
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 체크포인트 저장/로드 에러
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// 워커 → 컨슈머 채널이 닫힘
    #[error("Pipeline channel closed")]
    ChannelClosed,

    /// 워커 재시작 한도 초과
    #[error("{kind} worker abandoned after {failures} consecutive failures")]
    WorkerAbandoned { kind: SeriesKind, failures: u32 },

    /// 비동기 작업 실패 (패닉 등)
    #[error("Task failed: {0}")]
    Task(String),

    /// 일반 에러
    #[error("Error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl CollectorError {
    /// 해당 작업만 건너뛰고 계속할 수 있는 오류인지 여부
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Data(e) if e.is_transient())
    }
}

impl From<std::io::Error> for CollectorError {
    fn from(err: std::io::Error) -> Self {
        Self::Checkpoint(err.to_string())
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Checkpoint(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CollectorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
