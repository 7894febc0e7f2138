//! 종목 코드 정의.
//!
//! KRX 단축코드(6자리)를 감싸는 `Instrument` 타입을 정의합니다.
//! 일반 주식은 숫자 6자리(예: "005930")이고, 일부 신규 상장 종목은
//! 영문 대문자를 포함합니다(예: "0001A0").

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// KRX 단축코드 길이.
pub const INSTRUMENT_CODE_LEN: usize = 6;

/// 거래 가능한 종목 (KRX 단축코드).
///
/// 생성 시점에 형식을 검증하므로 이 타입의 값은 항상 유효한 6자리 코드입니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Instrument(String);

impl Instrument {
    /// 종목 코드를 검증하여 생성합니다.
    pub fn new(code: impl AsRef<str>) -> Result<Self, CoreError> {
        let code = code.as_ref().trim().to_uppercase();
        let valid = code.len() == INSTRUMENT_CODE_LEN
            && code.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase());

        if valid {
            Ok(Self(code))
        } else {
            Err(CoreError::InvalidInstrument(code))
        }
    }

    /// 코드 문자열을 반환합니다.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// 쉼표로 구분된 코드 목록을 파싱합니다 (빈 항목은 무시).
    pub fn parse_list(s: &str) -> Result<Vec<Self>, CoreError> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::new)
            .collect()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Instrument {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Instrument {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Instrument> for String {
    fn from(value: Instrument) -> Self {
        value.0
    }
}

impl AsRef<str> for Instrument {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_parse() {
        let samsung: Instrument = "005930".parse().unwrap();
        assert_eq!(samsung.code(), "005930");

        // 공백 및 소문자 정규화
        let lower = Instrument::new(" 0001a0 ").unwrap();
        assert_eq!(lower.code(), "0001A0");
    }

    #[test]
    fn test_instrument_rejects_bad_codes() {
        assert!(Instrument::new("5930").is_err());
        assert!(Instrument::new("0059300").is_err());
        assert!(Instrument::new("00593-").is_err());
        assert!(Instrument::new("").is_err());
    }

    #[test]
    fn test_parse_list() {
        let list = Instrument::parse_list("005930, 000660,,035720").unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].code(), "000660");

        assert!(Instrument::parse_list("005930,bad").is_err());
    }

    #[test]
    fn test_instrument_serde() {
        let json = serde_json::to_string(&Instrument::new("005930").unwrap()).unwrap();
        assert_eq!(json, "\"005930\"");

        let parsed: Instrument = serde_json::from_str("\"000660\"").unwrap();
        assert_eq!(parsed.code(), "000660");
        assert!(serde_json::from_str::<Instrument>("\"12\"").is_err());
    }
}
