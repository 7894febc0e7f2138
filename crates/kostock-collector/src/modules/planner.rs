//! 업데이트 계획 수립.
//!
//! 저장소 메타데이터(상장일, 워터마크)와 설정만으로 이번 실행의 작업 목록을
//! 계산하는 순수 함수입니다. 종목 코드 순으로 정렬되어 재개 시에도 같은
//! 순서가 나옵니다.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use kostock_core::{Instrument, UpdateTask};
use kostock_data::InstrumentMeta;

use crate::config::UpdateConfig;

/// 업데이트가 필요한 종목과 날짜 범위를 계산합니다.
///
/// - 워터마크가 있으면 워터마크부터, 없으면 `max(최소 시작일, 상장일)`부터
/// - 시작일이 `target`보다 이전인 종목만 포함
/// - 블랙리스트 종목 제외, `only`가 주어지면 해당 종목만
pub fn plan(
    meta: &BTreeMap<Instrument, InstrumentMeta>,
    config: &UpdateConfig,
    target: NaiveDate,
    only: Option<&[Instrument]>,
) -> Vec<UpdateTask> {
    let mut tasks = Vec::new();

    for (instrument, info) in meta {
        if config.black_list.contains(instrument) {
            debug!(component = "planner", instrument = %instrument, "블랙리스트 종목 제외");
            continue;
        }
        if let Some(only) = only {
            if !only.contains(instrument) {
                continue;
            }
        }

        let range_start = range_start(info, config.min_start_date);
        if range_start >= target {
            continue;
        }

        match UpdateTask::new(
            instrument.clone(),
            info.listing_date,
            info.last_update,
            range_start,
            target,
        ) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!(component = "planner", instrument = %instrument, error = %e, "작업 생성 실패"),
        }
    }

    info!(
        component = "planner",
        target = %target,
        instruments = meta.len(),
        planned = tasks.len(),
        "업데이트 계획 수립"
    );
    tasks
}

/// 종목의 수집 시작일.
fn range_start(info: &InstrumentMeta, min_start: NaiveDate) -> NaiveDate {
    match info.last_update {
        Some(last_update) => last_update,
        None => info
            .listing_date
            .map_or(min_start, |listing| listing.max(min_start)),
    }
}
