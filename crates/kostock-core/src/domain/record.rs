//! 차트 레코드.
//!
//! 데이터 소스에서 조회된 일별 레코드입니다. 생성 후에는 변경되지 않으며,
//! 수집 워커에서 적재 컨슈머로 소유권이 이동합니다.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Instrument, SeriesKind};

/// 일봉 가격 레코드 (수정주가 기준).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub instrument: Instrument,
    pub date: NaiveDate,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    /// 거래량 (주)
    pub volume: i64,
}

/// 투자자별 순매수 수량 레코드.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub instrument: Instrument,
    pub date: NaiveDate,
    /// 외국인 순매수 수량
    pub foreign_qty: i64,
    /// 기관 순매수 수량
    pub institution_qty: i64,
    /// 개인 순매수 수량
    pub individual_qty: i64,
}

/// 시리즈 종류별 레코드.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Price(PriceRecord),
    Flow(FlowRecord),
}

impl Record {
    /// 레코드의 종목.
    pub fn instrument(&self) -> &Instrument {
        match self {
            Self::Price(r) => &r.instrument,
            Self::Flow(r) => &r.instrument,
        }
    }

    /// 레코드의 거래일.
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Price(r) => r.date,
            Self::Flow(r) => r.date,
        }
    }

    /// 레코드의 시리즈 종류.
    pub fn kind(&self) -> SeriesKind {
        match self {
            Self::Price(_) => SeriesKind::Price,
            Self::Flow(_) => SeriesKind::Flow,
        }
    }

    /// 가격 레코드의 종가 (수급 레코드는 None).
    pub fn close(&self) -> Option<Decimal> {
        match self {
            Self::Price(r) => Some(r.close),
            Self::Flow(_) => None,
        }
    }
}

impl From<PriceRecord> for Record {
    fn from(record: PriceRecord) -> Self {
        Self::Price(record)
    }
}

impl From<FlowRecord> for Record {
    fn from(record: FlowRecord) -> Self {
        Self::Flow(record)
    }
}
