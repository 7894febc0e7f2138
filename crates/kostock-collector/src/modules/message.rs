//! 워커 → 컨슈머 채널 메시지.

use chrono::NaiveDate;

use kostock_core::{Instrument, Record, SeriesKind};

/// 공유 채널로 전달되는 메시지.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartMessage {
    /// 조회한 청크의 레코드 (날짜 오름차순)
    Records(Vec<Record>),
    /// 한 종목의 한 시리즈 조회 완료 표시
    TaskEnd {
        instrument: Instrument,
        kind: SeriesKind,
        /// 이 작업이 수집을 보장하는 마지막 날짜
        through: NaiveDate,
    },
    /// 컨슈머 종료 신호
    Stop,
}
