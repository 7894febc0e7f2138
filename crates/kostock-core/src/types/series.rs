//! 시리즈 종류 정의.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// 종목별로 수집하는 데이터 시리즈 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// 일봉 가격 (시가/종가/고가/저가/거래량)
    Price,
    /// 투자자별 순매수 수량 (외국인/기관/개인)
    Flow,
}

impl SeriesKind {
    /// 모든 시리즈 종류.
    pub const ALL: [SeriesKind; 2] = [SeriesKind::Price, SeriesKind::Flow];

    /// 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Flow => "flow",
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "price" | "ohlcv" => Ok(Self::Price),
            "flow" | "investor" => Ok(Self::Flow),
            _ => Err(CoreError::UnknownSeriesKind(s.to_string())),
        }
    }
}
