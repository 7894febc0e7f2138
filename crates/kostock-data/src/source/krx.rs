//! KRX(한국거래소) 차트 데이터 소스.
//!
//! KRX 정보데이터시스템에서 개별 종목의 일별 시세(수정주가)와
//! 투자자별 순매수 수량을 조회합니다. 한 번의 요청은 `chunk_days` 일 범위로
//! 제한되며, 세션별 요청 한도(`request_budget`)를 모두 쓰면
//! `FetchStatus::QuotaExhausted`를 반환합니다.
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use kostock_data::source::{KrxConnector, KrxSourceConfig, SourceConnector};
//!
//! let connector = KrxConnector::new(KrxSourceConfig::default());
//! let source = connector.connect(SeriesKind::Price).await?;
//! let chunk = source.fetch(&samsung, SeriesKind::Price, from, to).await?;
//! ```

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use kostock_core::{FlowRecord, Instrument, PriceRecord, Record, SeriesKind};

use super::{DataSource, FetchResponse, RequestQuota, SourceConnector};
use crate::error::{DataError, Result};

/// KRX API 기본 URL.
const KRX_API_URL: &str = "https://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd";

/// KRX 정보데이터시스템 Referer.
const KRX_REFERER: &str = "https://data.krx.co.kr/contents/MDC/MDI/outerLoader/index.cmd";

/// KRX 개별종목 시세 추이 bld.
const BLD_STOCK_OHLCV: &str = "dbms/MDC/STAT/standard/MDCSTAT01701";

/// KRX 투자자별 거래실적 개별종목 일별추이 bld.
const BLD_STOCK_INVESTOR: &str = "dbms/MDC/STAT/standard/MDCSTAT02302";

/// KRX 소스 설정.
#[derive(Debug, Clone)]
pub struct KrxSourceConfig {
    /// 요청 하나가 다루는 최대 일수
    pub chunk_days: i64,
    /// 세션 하나에 허용된 요청 수
    pub request_budget: u32,
    /// 요청 간 최소 간격
    pub request_delay: Duration,
}

impl Default for KrxSourceConfig {
    fn default() -> Self {
        Self {
            chunk_days: 365,
            request_budget: 1000,
            request_delay: Duration::from_millis(250),
        }
    }
}

/// KRX 정보데이터시스템 API 응답 구조.
#[derive(Debug, Deserialize)]
struct KrxApiResponse<T> {
    #[serde(default = "Vec::new")]
    output: Vec<T>,
}

/// KRX 개별종목 시세 레코드.
#[derive(Debug, Deserialize)]
struct KrxOhlcvRow {
    /// 거래일자 (YYYY/MM/DD)
    #[serde(rename = "TRD_DD")]
    trd_dd: String,
    #[serde(rename = "TDD_OPNPRC", default)]
    open: String,
    #[serde(rename = "TDD_HGPRC", default)]
    high: String,
    #[serde(rename = "TDD_LWPRC", default)]
    low: String,
    #[serde(rename = "TDD_CLSPRC", default)]
    close: String,
    #[serde(rename = "ACC_TRDVOL", default)]
    volume: String,
}

/// KRX 투자자별 순매수 레코드 (거래량 기준).
#[derive(Debug, Deserialize)]
struct KrxInvestorRow {
    #[serde(rename = "TRD_DD")]
    trd_dd: String,
    /// 기관합계
    #[serde(rename = "TRDVAL1", default)]
    institution: String,
    /// 개인
    #[serde(rename = "TRDVAL3", default)]
    individual: String,
    /// 외국인합계
    #[serde(rename = "TRDVAL4", default)]
    foreign: String,
}

/// KRX 차트 데이터 소스 (세션 하나).
pub struct KrxChartSource {
    client: reqwest::Client,
    config: KrxSourceConfig,
    quota: RequestQuota,
    last_request: Mutex<Option<Instant>>,
}

impl KrxChartSource {
    /// 새로운 KRX 세션 생성.
    pub fn new(config: KrxSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::SessionError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            client,
            quota: RequestQuota::new(config.request_budget),
            config,
            last_request: Mutex::new(None),
        })
    }

    /// 남은 요청 수.
    pub fn remaining_requests(&self) -> u32 {
        self.quota.remaining()
    }

    /// 요청 간격 유지.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.config.request_delay {
                tokio::time::sleep(self.config.request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, params: &[(&str, &str)]) -> Result<Vec<T>> {
        self.throttle().await;

        let response = self
            .client
            .post(KRX_API_URL)
            .header("Referer", KRX_REFERER)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DataError::FetchError(format!(
                "KRX API 오류: {}",
                response.status()
            )));
        }

        let text = response.text().await?;
        debug!(response_len = text.len(), "KRX API 응답 수신");

        let parsed: KrxApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
            DataError::ParseError(format!(
                "JSON 파싱 실패: {} - {}",
                e,
                preview(&text, 200)
            ))
        })?;
        Ok(parsed.output)
    }

    async fn fetch_price(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Record>> {
        let isin_cd = format!("KR7{}003", instrument.code());
        let strt_dd = from.format("%Y%m%d").to_string();
        let end_dd = to.format("%Y%m%d").to_string();
        let params = [
            ("bld", BLD_STOCK_OHLCV),
            ("isuCd", isin_cd.as_str()),
            ("strtDd", strt_dd.as_str()),
            ("endDd", end_dd.as_str()),
            ("adjStkPrc", "2"), // 수정주가 사용
        ];

        let rows: Vec<KrxOhlcvRow> = self.post(&params).await?;
        rows.iter()
            .filter_map(|row| match convert_price_row(instrument, row) {
                Ok(Some(record)) => Some(Ok(record)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    async fn fetch_flow(
        &self,
        instrument: &Instrument,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Record>> {
        let isin_cd = format!("KR7{}003", instrument.code());
        let strt_dd = from.format("%Y%m%d").to_string();
        let end_dd = to.format("%Y%m%d").to_string();
        let params = [
            ("bld", BLD_STOCK_INVESTOR),
            ("isuCd", isin_cd.as_str()),
            ("strtDd", strt_dd.as_str()),
            ("endDd", end_dd.as_str()),
            ("askBid", "3"),    // 순매수
            ("trdVolVal", "1"), // 거래량
        ];

        let rows: Vec<KrxInvestorRow> = self.post(&params).await?;
        rows.iter()
            .map(|row| convert_flow_row(instrument, row))
            .collect()
    }
}

#[async_trait]
impl DataSource for KrxChartSource {
    async fn fetch(
        &self,
        instrument: &Instrument,
        kind: SeriesKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<FetchResponse> {
        if from > to {
            return Ok(FetchResponse::complete(Vec::new()));
        }

        if !self.quota.try_acquire() {
            info!(
                instrument = %instrument,
                kind = %kind,
                limit = self.quota.limit(),
                "KRX 요청 한도 소진"
            );
            return Ok(FetchResponse::exhausted(Vec::new()));
        }

        let chunk_end = chunk_end(from, to, self.config.chunk_days);
        debug!(
            instrument = %instrument,
            kind = %kind,
            from = %from,
            to = %chunk_end,
            remaining = self.remaining_requests(),
            "KRX 청크 조회"
        );

        let mut rows = match kind {
            SeriesKind::Price => self.fetch_price(instrument, from, chunk_end).await?,
            SeriesKind::Flow => self.fetch_flow(instrument, from, chunk_end).await?,
        };
        rows.retain(|r| r.date() >= from && r.date() <= chunk_end);
        rows.sort_by_key(Record::date);

        Ok(match chunk_end.succ_opt() {
            Some(next) if chunk_end < to => FetchResponse::partial(rows, next),
            _ => FetchResponse::complete(rows),
        })
    }
}

/// KRX 세션 커넥터.
///
/// KRX 정보데이터시스템은 별도 로그인이 없으므로 새 HTTP 클라이언트와
/// 새 요청 한도를 가진 세션을 만듭니다.
#[derive(Debug, Clone, Default)]
pub struct KrxConnector {
    config: KrxSourceConfig,
}

impl KrxConnector {
    pub fn new(config: KrxSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceConnector for KrxConnector {
    async fn connect(&self, kind: SeriesKind) -> Result<Arc<dyn DataSource>> {
        let source = KrxChartSource::new(self.config.clone())?;
        info!(
            kind = %kind,
            budget = self.config.request_budget,
            "KRX 세션 생성"
        );
        Ok(Arc::new(source))
    }
}

/// 청크 마지막 날짜 (`from`부터 `chunk_days`일, `to`를 넘지 않음).
fn chunk_end(from: NaiveDate, to: NaiveDate, chunk_days: i64) -> NaiveDate {
    let span = ChronoDuration::days(chunk_days.max(1) - 1);
    from.checked_add_signed(span)
        .map(|end| end.min(to))
        .unwrap_or(to)
}

fn convert_price_row(instrument: &Instrument, row: &KrxOhlcvRow) -> Result<Option<Record>> {
    let close = parse_krx_number(&row.close)?;
    // 거래정지 등으로 종가가 0이면 스킵
    if close.is_zero() {
        return Ok(None);
    }

    Ok(Some(Record::Price(PriceRecord {
        instrument: instrument.clone(),
        date: parse_krx_date(&row.trd_dd)?,
        open: parse_krx_number(&row.open)?,
        close,
        high: parse_krx_number(&row.high)?,
        low: parse_krx_number(&row.low)?,
        volume: parse_krx_int(&row.volume)?,
    })))
}

fn convert_flow_row(instrument: &Instrument, row: &KrxInvestorRow) -> Result<Record> {
    Ok(Record::Flow(FlowRecord {
        instrument: instrument.clone(),
        date: parse_krx_date(&row.trd_dd)?,
        foreign_qty: parse_krx_int(&row.foreign)?,
        institution_qty: parse_krx_int(&row.institution)?,
        individual_qty: parse_krx_int(&row.individual)?,
    }))
}

/// 오류 메시지용 응답 앞부분 (문자 단위로 자름).
fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// KRX 날짜 문자열 파싱 (YYYY/MM/DD 또는 YYYYMMDD).
fn parse_krx_date(s: &str) -> Result<NaiveDate> {
    let format = if s.contains('/') { "%Y/%m/%d" } else { "%Y%m%d" };
    NaiveDate::parse_from_str(s.trim(), format)
        .map_err(|e| DataError::ParseError(format!("날짜 파싱 실패: {} - {}", s, e)))
}

/// KRX 숫자 문자열 파싱 (쉼표 제거).
fn parse_krx_number(s: &str) -> Result<Decimal> {
    let cleaned = s.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return Ok(Decimal::ZERO);
    }

    Decimal::from_str(&cleaned)
        .map_err(|e| DataError::ParseError(format!("숫자 파싱 실패: {} - {}", s, e)))
}

/// KRX 정수 문자열 파싱 (쉼표 제거, 부호 허용).
fn parse_krx_int(s: &str) -> Result<i64> {
    let cleaned = s.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return Ok(0);
    }

    cleaned
        .parse::<i64>()
        .map_err(|e| DataError::ParseError(format!("정수 파싱 실패: {} - {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_krx_date() {
        assert_eq!(parse_krx_date("2020/08/07").unwrap(), date(2020, 8, 7));
        assert_eq!(parse_krx_date("20200807").unwrap(), date(2020, 8, 7));
        assert!(parse_krx_date("2020-08-07").is_err());
    }

    #[test]
    fn test_parse_krx_numbers() {
        assert_eq!(parse_krx_number("1,234,567").unwrap(), Decimal::from(1234567));
        assert_eq!(parse_krx_number("").unwrap(), Decimal::ZERO);
        assert_eq!(parse_krx_int("-1,200").unwrap(), -1200);
        assert_eq!(parse_krx_int("-").unwrap(), 0);
        assert!(parse_krx_int("12a").is_err());
    }

    #[test]
    fn test_preview_keeps_multibyte_chars_whole() {
        let body = format!("{}오류 페이지", "a".repeat(199));
        let head = preview(&body, 200);
        assert_eq!(head.chars().count(), 200);
        assert!(head.ends_with('오'));

        assert_eq!(preview("짧은 응답", 200), "짧은 응답");
    }

    #[test]
    fn test_chunk_end() {
        let from = date(2020, 1, 1);
        assert_eq!(chunk_end(from, date(2020, 12, 31), 10), date(2020, 1, 10));
        assert_eq!(chunk_end(from, date(2020, 1, 5), 10), date(2020, 1, 5));
        assert_eq!(chunk_end(from, date(2020, 1, 5), 0), from);
    }

    #[test]
    fn test_convert_rows() {
        let instrument = Instrument::new("005930").unwrap();
        let row = KrxOhlcvRow {
            trd_dd: "2020/08/07".to_string(),
            open: "57,300".to_string(),
            high: "58,400".to_string(),
            low: "57,100".to_string(),
            close: "57,900".to_string(),
            volume: "18,227,877".to_string(),
        };
        let record = convert_price_row(&instrument, &row).unwrap().unwrap();
        assert_eq!(record.close(), Some(Decimal::from(57900)));

        let halted = KrxOhlcvRow {
            close: "0".to_string(),
            ..row
        };
        assert!(convert_price_row(&instrument, &halted).unwrap().is_none());

        let flow_row = KrxInvestorRow {
            trd_dd: "2020/08/07".to_string(),
            institution: "350,000".to_string(),
            individual: "850,000".to_string(),
            foreign: "-1,200,000".to_string(),
        };
        match convert_flow_row(&instrument, &flow_row).unwrap() {
            Record::Flow(flow) => {
                assert_eq!(flow.foreign_qty, -1_200_000);
                assert_eq!(flow.institution_qty, 350_000);
                assert_eq!(flow.individual_qty, 850_000);
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_reports_exhausted_quota() {
        let source = KrxChartSource::new(KrxSourceConfig {
            request_budget: 0,
            ..Default::default()
        })
        .unwrap();
        let instrument = Instrument::new("005930").unwrap();

        let response = source
            .fetch(&instrument, SeriesKind::Price, date(2020, 1, 1), date(2020, 1, 31))
            .await
            .unwrap();
        assert_eq!(response.status, super::super::FetchStatus::QuotaExhausted);
        assert!(response.rows.is_empty());
        assert_eq!(source.remaining_requests(), 0);
    }
}
