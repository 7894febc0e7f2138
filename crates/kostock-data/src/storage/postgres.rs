//! PostgreSQL 차트 저장소.
//!
//! # 테이블
//!
//! - `daily_chart`: (종목, 거래일) 기본키의 일봉 + 투자자 수급 행
//! - `chart_meta`: 종목별 상장일과 워터마크(`last_update`)
//!
//! 가격/수급 레코드는 각자 자기 컬럼만 `ON CONFLICT DO UPDATE`로 덮어쓰므로
//! 두 시리즈가 어떤 순서로 도착해도 같은 행으로 합쳐집니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use kostock_core::{FlowRecord, Instrument, PriceRecord, Record};

use super::{ChartStore, InstrumentMeta};
use crate::error::{DataError, Result};

/// UNNEST 일괄 삽입 단위.
const UPSERT_CHUNK: usize = 500;

/// PostgreSQL 차트 저장소.
#[derive(Clone)]
pub struct PgChartStore {
    pool: PgPool,
}

impl PgChartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 테이블이 없으면 생성합니다.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_chart (
                ticker          VARCHAR(6) NOT NULL,
                trade_date      DATE NOT NULL,
                open            NUMERIC,
                close           NUMERIC,
                high            NUMERIC,
                low             NUMERIC,
                volume          BIGINT,
                foreign_qty     BIGINT,
                institution_qty BIGINT,
                individual_qty  BIGINT,
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (ticker, trade_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chart_meta (
                ticker       VARCHAR(6) PRIMARY KEY,
                listing_date DATE,
                last_update  DATE,
                updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("차트 저장소 스키마 확인 완료");
        Ok(())
    }

    async fn upsert_prices(&self, records: &[&PriceRecord]) -> Result<usize> {
        let mut written = 0;

        for chunk in records.chunks(UPSERT_CHUNK) {
            let tickers: Vec<&str> = chunk.iter().map(|r| r.instrument.code()).collect();
            let dates: Vec<NaiveDate> = chunk.iter().map(|r| r.date).collect();
            let opens: Vec<Decimal> = chunk.iter().map(|r| r.open).collect();
            let closes: Vec<Decimal> = chunk.iter().map(|r| r.close).collect();
            let highs: Vec<Decimal> = chunk.iter().map(|r| r.high).collect();
            let lows: Vec<Decimal> = chunk.iter().map(|r| r.low).collect();
            let volumes: Vec<i64> = chunk.iter().map(|r| r.volume).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO daily_chart (ticker, trade_date, open, close, high, low, volume)
                SELECT * FROM UNNEST(
                    $1::varchar[], $2::date[],
                    $3::numeric[], $4::numeric[], $5::numeric[], $6::numeric[], $7::bigint[]
                )
                ON CONFLICT (ticker, trade_date) DO UPDATE SET
                    open = EXCLUDED.open,
                    close = EXCLUDED.close,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    volume = EXCLUDED.volume,
                    updated_at = NOW()
                "#,
            )
            .bind(&tickers)
            .bind(&dates)
            .bind(&opens)
            .bind(&closes)
            .bind(&highs)
            .bind(&lows)
            .bind(&volumes)
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

            written += result.rows_affected() as usize;
        }

        Ok(written)
    }

    async fn upsert_flows(&self, records: &[&FlowRecord]) -> Result<usize> {
        let mut written = 0;

        for chunk in records.chunks(UPSERT_CHUNK) {
            let tickers: Vec<&str> = chunk.iter().map(|r| r.instrument.code()).collect();
            let dates: Vec<NaiveDate> = chunk.iter().map(|r| r.date).collect();
            let foreign: Vec<i64> = chunk.iter().map(|r| r.foreign_qty).collect();
            let institution: Vec<i64> = chunk.iter().map(|r| r.institution_qty).collect();
            let individual: Vec<i64> = chunk.iter().map(|r| r.individual_qty).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO daily_chart (ticker, trade_date, foreign_qty, institution_qty, individual_qty)
                SELECT * FROM UNNEST(
                    $1::varchar[], $2::date[], $3::bigint[], $4::bigint[], $5::bigint[]
                )
                ON CONFLICT (ticker, trade_date) DO UPDATE SET
                    foreign_qty = EXCLUDED.foreign_qty,
                    institution_qty = EXCLUDED.institution_qty,
                    individual_qty = EXCLUDED.individual_qty,
                    updated_at = NOW()
                "#,
            )
            .bind(&tickers)
            .bind(&dates)
            .bind(&foreign)
            .bind(&institution)
            .bind(&individual)
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

            written += result.rows_affected() as usize;
        }

        Ok(written)
    }
}

#[async_trait]
impl ChartStore for PgChartStore {
    async fn upsert(&self, record: &Record) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(record)).await.map(|_| ())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_batch(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let prices: Vec<&PriceRecord> = records
            .iter()
            .filter_map(|r| match r {
                Record::Price(p) => Some(p),
                Record::Flow(_) => None,
            })
            .collect();
        let flows: Vec<&FlowRecord> = records
            .iter()
            .filter_map(|r| match r {
                Record::Flow(f) => Some(f),
                Record::Price(_) => None,
            })
            .collect();

        let written = self.upsert_prices(&prices).await? + self.upsert_flows(&flows).await?;
        debug!(written = written, "차트 레코드 저장");
        Ok(written)
    }

    async fn last_close(
        &self,
        instrument: &Instrument,
        on_or_before: NaiveDate,
    ) -> Result<Option<Decimal>> {
        let result: Option<(Decimal,)> = sqlx::query_as(
            r#"
            SELECT close FROM daily_chart
            WHERE ticker = $1 AND trade_date <= $2 AND close IS NOT NULL
            ORDER BY trade_date DESC
            LIMIT 1
            "#,
        )
        .bind(instrument.code())
        .bind(on_or_before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.map(|(close,)| close))
    }

    async fn metadata(&self) -> Result<BTreeMap<Instrument, InstrumentMeta>> {
        let rows: Vec<(String, Option<NaiveDate>, Option<NaiveDate>)> = sqlx::query_as(
            r#"
            SELECT ticker, listing_date, last_update
            FROM chart_meta
            ORDER BY ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut meta = BTreeMap::new();
        for (ticker, listing_date, last_update) in rows {
            match Instrument::new(&ticker) {
                Ok(instrument) => {
                    meta.insert(
                        instrument,
                        InstrumentMeta {
                            listing_date,
                            last_update,
                        },
                    );
                }
                Err(e) => warn!(ticker = %ticker, error = %e, "잘못된 종목 코드, 건너뜀"),
            }
        }
        Ok(meta)
    }

    async fn set_watermark(&self, instrument: &Instrument, date: NaiveDate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chart_meta (ticker, last_update, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (ticker) DO UPDATE SET
                last_update = EXCLUDED.last_update,
                updated_at = NOW()
            "#,
        )
        .bind(instrument.code())
        .bind(date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn register_instrument(
        &self,
        instrument: &Instrument,
        listing_date: Option<NaiveDate>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chart_meta (ticker, listing_date, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (ticker) DO UPDATE SET
                listing_date = EXCLUDED.listing_date,
                updated_at = NOW()
            "#,
        )
        .bind(instrument.code())
        .bind(listing_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
