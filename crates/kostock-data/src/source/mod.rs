//! 차트 데이터 소스.
//!
//! 외부 데이터 소스(증권사 API, KRX 정보데이터시스템 등)는 요청 한도가
//! 정해져 있어, 한 번의 요청으로는 날짜 범위의 일부(청크)만 돌려줍니다.
//! 한도를 모두 쓰면 `FetchStatus::QuotaExhausted`를 반환하고, 이때 응답에는
//! 한도 소진 직전까지 받은 부분 데이터가 들어 있을 수 있습니다.

pub mod krx;
pub mod quota;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use kostock_core::{Instrument, Record, SeriesKind};

use crate::error::Result;

pub use krx::{KrxChartSource, KrxConnector, KrxSourceConfig};
pub use quota::RequestQuota;

/// 조회 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// 정상 응답
    Ok,
    /// 요청 한도 소진 (현재 세션에서 더 이상 요청 불가)
    QuotaExhausted,
}

/// 청크 단위 조회 결과.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: FetchStatus,
    /// `[from, to]` 범위 안의 레코드 (날짜 오름차순)
    pub rows: Vec<Record>,
    /// 다음 청크 조회 시작일 (범위를 모두 조회했으면 None)
    pub next_from: Option<NaiveDate>,
}

impl FetchResponse {
    /// 범위 조회가 끝난 정상 응답.
    pub fn complete(rows: Vec<Record>) -> Self {
        Self {
            status: FetchStatus::Ok,
            rows,
            next_from: None,
        }
    }

    /// 다음 청크가 남아 있는 정상 응답.
    pub fn partial(rows: Vec<Record>, next_from: NaiveDate) -> Self {
        Self {
            status: FetchStatus::Ok,
            rows,
            next_from: Some(next_from),
        }
    }

    /// 요청 한도 소진 응답.
    pub fn exhausted(rows: Vec<Record>) -> Self {
        Self {
            status: FetchStatus::QuotaExhausted,
            rows,
            next_from: None,
        }
    }

    /// 응답에 포함된 마지막 거래일.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(Record::date)
    }
}

/// 날짜 범위를 청크 단위로 제공하는 데이터 소스 (로그인된 세션 하나).
#[async_trait]
pub trait DataSource: Send + Sync {
    /// `from`부터 `to`까지(양 끝 포함) 중 한 청크를 조회합니다.
    async fn fetch(
        &self,
        instrument: &Instrument,
        kind: SeriesKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<FetchResponse>;
}

/// 데이터 소스 세션을 여는 로그인 기능.
///
/// 호출할 때마다 새 세션(새 요청 한도)을 엽니다. 외부 로그인 절차는 동시에
/// 하나만 진행될 수 있으므로 호출자가 직렬화해야 합니다.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self, kind: SeriesKind) -> Result<Arc<dyn DataSource>>;
}
