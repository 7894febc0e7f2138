//! # KoStock Core
//!
//! 국내 주식 일봉 차트 업데이트 파이프라인의 핵심 도메인 타입을 제공합니다.
//!
//! 이 크레이트는 파이프라인 전반에서 사용되는 기본 타입을 제공합니다:
//! - 종목 코드 및 시리즈 종류 (가격 / 투자자 수급)
//! - 차트 레코드 (OHLCV, 투자자별 순매수 수량)
//! - 업데이트 작업 및 체크포인트 대기 작업
//! - 거래일 계산
//! - 로깅 인프라

pub mod calendar;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use calendar::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
