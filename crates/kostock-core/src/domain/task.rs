//! 업데이트 작업 및 체크포인트 대기 작업.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::Instrument;

/// 한 번의 업데이트 실행에서 종목 하나가 수집해야 하는 날짜 범위.
///
/// 불변식: `range_start <= range_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTask {
    pub instrument: Instrument,
    /// 상장일 (알 수 없으면 None)
    pub listing_date: Option<NaiveDate>,
    /// 마지막으로 적재가 완료된 날짜 (워터마크)
    pub last_update: Option<NaiveDate>,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
}

impl UpdateTask {
    /// 범위를 검증하여 작업을 생성합니다.
    pub fn new(
        instrument: Instrument,
        listing_date: Option<NaiveDate>,
        last_update: Option<NaiveDate>,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> CoreResult<Self> {
        if range_start > range_end {
            return Err(CoreError::InvalidRange {
                start: range_start,
                end: range_end,
            });
        }
        Ok(Self {
            instrument,
            listing_date,
            last_update,
            range_start,
            range_end,
        })
    }
}

/// 워커가 처리해야 할 남은 작업 (체크포인트 항목).
///
/// `resume_from`은 수집 도중 마지막으로 조회에 성공한 날짜로 갱신됩니다.
/// `last_update`가 남아 있으면 재개 시에도 수정주가 검증을 수행하고,
/// 전체 재수집이 시작되면 None으로 지워집니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub instrument: Instrument,
    pub resume_from: NaiveDate,
    pub target_end: NaiveDate,
    #[serde(default)]
    pub last_update: Option<NaiveDate>,
}

impl PendingTask {
    /// 조회할 날짜가 남아 있는지 여부.
    pub fn has_remaining(&self) -> bool {
        self.resume_from <= self.target_end
    }
}

impl From<&UpdateTask> for PendingTask {
    fn from(task: &UpdateTask) -> Self {
        Self {
            instrument: task.instrument.clone(),
            resume_from: task.range_start,
            target_end: task.range_end,
            last_update: task.last_update,
        }
    }
}
