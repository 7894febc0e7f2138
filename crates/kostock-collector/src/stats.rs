//! 업데이트 통계 구조체.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use kostock_core::{Instrument, SeriesKind};

/// 워커 한 번 실행의 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerReport {
    /// 완료한 작업 수
    pub completed: usize,
    /// 청크 조회 요청 수
    pub chunks: usize,
    /// 컨슈머로 보낸 레코드 수
    pub rows: usize,
    /// 수정주가 감지로 전체 재수집한 종목
    pub rebackfilled: Vec<Instrument>,
    /// 재시도 후에도 실패하여 건너뛴 종목
    pub failed: Vec<Instrument>,
    /// 종료 시 남은 작업 수 (체크포인트에 저장된 수)
    pub remaining: usize,
}

impl WorkerReport {
    /// 이번 실행에서 진척이 있었는지 여부
    pub fn made_progress(&self) -> bool {
        self.completed > 0 || self.rows > 0
    }

    /// 재시작된 워커의 통계를 누적
    pub fn merge(&mut self, other: &WorkerReport) {
        self.completed += other.completed;
        self.chunks += other.chunks;
        self.rows += other.rows;
        self.rebackfilled.extend(other.rebackfilled.iter().cloned());
        self.failed.extend(other.failed.iter().cloned());
        self.remaining = other.remaining;
    }
}

/// 컨슈머 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerReport {
    /// 저장한 레코드 수
    pub rows_written: usize,
    /// 저장 실패한 레코드 수
    pub rows_failed: usize,
    /// 워터마크를 갱신한 종목 수
    pub watermarks: usize,
    /// 한 시리즈만 완료된 채 종료된 종목 수
    pub incomplete: usize,
}

/// 업데이트 실행 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    /// 모든 작업 완료
    Completed,
    /// 외부 종료 요청으로 중단 (체크포인트 유지)
    Cancelled,
    /// 워커 재시작 한도 초과로 중단 (체크포인트 유지)
    Abandoned(SeriesKind),
}

/// 업데이트 실행 요약
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub status: UpdateStatus,
    /// 이번 실행의 업데이트 대상 종목 수
    pub planned: usize,
    /// 시리즈별 워커 통계 (재시작 누적)
    pub workers: BTreeMap<SeriesKind, WorkerReport>,
    /// 워커 재시작 횟수
    pub restarts: u32,
    pub consumer: ConsumerReport,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl UpdateSummary {
    /// 업데이트 대상이 없을 때의 요약
    pub fn empty() -> Self {
        Self {
            status: UpdateStatus::Completed,
            planned: 0,
            workers: BTreeMap::new(),
            restarts: 0,
            consumer: ConsumerReport::default(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == UpdateStatus::Completed
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        for (kind, report) in &self.workers {
            tracing::info!(
                operation = operation,
                kind = %kind,
                completed = report.completed,
                chunks = report.chunks,
                rows = report.rows,
                rebackfilled = report.rebackfilled.len(),
                failed = report.failed.len(),
                remaining = report.remaining,
                "워커 통계"
            );
        }
        tracing::info!(
            operation = operation,
            status = ?self.status,
            planned = self.planned,
            restarts = self.restarts,
            rows_written = self.consumer.rows_written,
            rows_failed = self.consumer.rows_failed,
            watermarks = self.consumer.watermarks,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "업데이트 완료"
        );
    }
}
