//! 거래일 계산.
//!
//! KRX 휴장일(주말, 공휴일, 연말 폐장일 12/31)을 제외한 최근 거래일을 구합니다.
//! 공휴일 목록은 외부에서 주입합니다.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

use crate::error::{CoreError, CoreResult};

/// 휴장일 달력.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    /// 공휴일 목록으로 달력을 생성합니다.
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// 쉼표로 구분된 `YYYY-MM-DD` 목록에서 달력을 생성합니다.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let holidays = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                NaiveDate::parse_from_str(part, "%Y-%m-%d")
                    .map_err(|e| CoreError::InvalidDate(format!("{} - {}", part, e)))
            })
            .collect::<CoreResult<BTreeSet<_>>>()?;
        Ok(Self { holidays })
    }

    /// 해당 날짜가 휴장일인지 확인합니다.
    pub fn is_closed(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
            || (date.month() == 12 && date.day() == 31)
            || self.holidays.contains(&date)
    }

    /// `date` 당일 또는 그 이전의 가장 최근 거래일.
    pub fn latest_trading_date(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        while self.is_closed(current) {
            match current.pred_opt() {
                Some(prev) => current = prev,
                None => break,
            }
        }
        current
    }

    /// 등록된 공휴일 수.
    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }
}
