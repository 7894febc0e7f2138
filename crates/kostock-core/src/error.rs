//! 도메인 타입 에러.

use thiserror::Error;

/// 도메인 값 파싱/검증 에러.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// 잘못된 종목 코드
    #[error("잘못된 종목 코드: {0}")]
    InvalidInstrument(String),

    /// 알 수 없는 시리즈 종류
    #[error("알 수 없는 시리즈 종류: {0}")]
    UnknownSeriesKind(String),

    /// 날짜 파싱 실패
    #[error("날짜 파싱 실패: {0}")]
    InvalidDate(String),

    /// 잘못된 날짜 범위
    #[error("잘못된 날짜 범위: {start} > {end}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

/// 도메인 작업 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;
