//! Resumable daily chart update pipeline for Korean equities.
//!
//! 이 crate는 일봉 차트 업데이트 파이프라인과 이를 실행하는 바이너리를 제공합니다:
//! - 업데이트 계획 (종목별 수집 범위 계산)
//! - 시리즈별 수집 워커 (가격, 투자자 수급) 및 수정주가 감지
//! - 적재 컨슈머 (두 시리즈 완료 시 워터마크 갱신)
//! - 워커 재시작을 관리하는 슈퍼바이저와 체크포인트 저장소

pub mod config;
pub mod error;
pub mod modules;
pub mod stats;

pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
pub use stats::{ConsumerReport, UpdateStatus, UpdateSummary, WorkerReport};
