//! 차트 저장소.
//!
//! - PostgreSQL 저장소: 운영용 (`daily_chart`, `chart_meta` 테이블)
//! - 메모리 저장소: 테스트 및 dry-run용
//!
//! 가격 컬럼과 수급 컬럼은 같은 (종목, 거래일) 행에 독립적으로 기록되며,
//! 같은 레코드를 여러 번 적재해도 결과 행은 한 번 적재한 것과 같습니다.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use kostock_core::{Instrument, Record};

use crate::error::Result;

pub use memory::MemoryChartStore;
pub use postgres::PgChartStore;

/// 종목별 업데이트 메타데이터.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    /// 상장일
    pub listing_date: Option<NaiveDate>,
    /// 마지막 적재 완료일 (워터마크)
    pub last_update: Option<NaiveDate>,
}

/// 일별 차트 행 (가격 + 투자자 수급).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRow {
    pub open: Option<Decimal>,
    pub close: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<i64>,
    pub foreign_qty: Option<i64>,
    pub institution_qty: Option<i64>,
    pub individual_qty: Option<i64>,
}

impl ChartRow {
    /// 레코드의 컬럼을 행에 덮어씁니다 (다른 시리즈 컬럼은 유지).
    pub fn apply(&mut self, record: &Record) {
        match record {
            Record::Price(p) => {
                self.open = Some(p.open);
                self.close = Some(p.close);
                self.high = Some(p.high);
                self.low = Some(p.low);
                self.volume = Some(p.volume);
            }
            Record::Flow(f) => {
                self.foreign_qty = Some(f.foreign_qty);
                self.institution_qty = Some(f.institution_qty);
                self.individual_qty = Some(f.individual_qty);
            }
        }
    }
}

/// 차트 데이터 저장소.
#[async_trait]
pub trait ChartStore: Send + Sync {
    /// 레코드 하나를 멱등하게 저장합니다.
    async fn upsert(&self, record: &Record) -> Result<()>;

    /// 여러 레코드를 저장하고 저장한 수를 반환합니다.
    async fn upsert_batch(&self, records: &[Record]) -> Result<usize> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(records.len())
    }

    /// `on_or_before` 당일 또는 그 이전의 가장 최근 종가.
    async fn last_close(
        &self,
        instrument: &Instrument,
        on_or_before: NaiveDate,
    ) -> Result<Option<Decimal>>;

    /// 모든 종목의 업데이트 메타데이터 (종목 코드 순).
    async fn metadata(&self) -> Result<BTreeMap<Instrument, InstrumentMeta>>;

    /// 종목의 워터마크를 기록합니다.
    async fn set_watermark(&self, instrument: &Instrument, date: NaiveDate) -> Result<()>;

    /// 종목을 등록하거나 상장일을 갱신합니다 (워터마크는 유지).
    async fn register_instrument(
        &self,
        instrument: &Instrument,
        listing_date: Option<NaiveDate>,
    ) -> Result<()>;
}
