//! 메모리 차트 저장소.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use kostock_core::{Instrument, Record};

use super::{ChartRow, ChartStore, InstrumentMeta};
use crate::error::Result;

/// 프로세스 메모리에 차트를 보관하는 저장소.
#[derive(Debug, Default)]
pub struct MemoryChartStore {
    rows: RwLock<BTreeMap<Instrument, BTreeMap<NaiveDate, ChartRow>>>,
    meta: RwLock<BTreeMap<Instrument, InstrumentMeta>>,
}

impl MemoryChartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 특정 거래일의 행 조회.
    pub async fn row(&self, instrument: &Instrument, date: NaiveDate) -> Option<ChartRow> {
        self.rows
            .read()
            .await
            .get(instrument)
            .and_then(|rows| rows.get(&date).cloned())
    }

    /// 종목의 저장된 행 수.
    pub async fn row_count(&self, instrument: &Instrument) -> usize {
        self.rows
            .read()
            .await
            .get(instrument)
            .map_or(0, BTreeMap::len)
    }

    /// 종목의 워터마크 조회.
    pub async fn watermark(&self, instrument: &Instrument) -> Option<NaiveDate> {
        self.meta
            .read()
            .await
            .get(instrument)
            .and_then(|meta| meta.last_update)
    }
}

#[async_trait]
impl ChartStore for MemoryChartStore {
    async fn upsert(&self, record: &Record) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.entry(record.instrument().clone())
            .or_default()
            .entry(record.date())
            .or_default()
            .apply(record);
        Ok(())
    }

    async fn last_close(
        &self,
        instrument: &Instrument,
        on_or_before: NaiveDate,
    ) -> Result<Option<Decimal>> {
        let rows = self.rows.read().await;
        Ok(rows.get(instrument).and_then(|series| {
            series
                .range(..=on_or_before)
                .rev()
                .find_map(|(_, row)| row.close)
        }))
    }

    async fn metadata(&self) -> Result<BTreeMap<Instrument, InstrumentMeta>> {
        Ok(self.meta.read().await.clone())
    }

    async fn set_watermark(&self, instrument: &Instrument, date: NaiveDate) -> Result<()> {
        self.meta
            .write()
            .await
            .entry(instrument.clone())
            .or_default()
            .last_update = Some(date);
        Ok(())
    }

    async fn register_instrument(
        &self,
        instrument: &Instrument,
        listing_date: Option<NaiveDate>,
    ) -> Result<()> {
        self.meta
            .write()
            .await
            .entry(instrument.clone())
            .or_default()
            .listing_date = listing_date;
        Ok(())
    }
}
