//! 시리즈 수집 워커.
//!
//! 워커 하나는 한 시리즈 종류(가격 또는 투자자 수급)를 맡아 작업 목록의
//! 종목을 순서대로 청크 단위로 조회하고, 결과를 공유 채널로 보냅니다.
//!
//! # 흐름
//!
//! 1. 체크포인트가 있으면 계획 대신 체크포인트의 작업 목록으로 시작
//! 2. 로그인 잠금을 잡고 세션을 연 뒤 작업별로 청크 조회
//! 3. 요청 한도 소진 또는 종료 요청 시 남은 작업을 체크포인트로 저장
//! 4. 모든 작업을 마치면 체크포인트 삭제
//!
//! 가격 워커는 워터마크가 있는 종목의 첫 청크에서 저장된 종가와 새로 받은
//! 종가를 비교하여, 다르면 수정주가가 반영된 것으로 보고 최소 시작일부터
//! 전체 구간을 다시 수집합니다.

use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kostock_core::{PendingTask, Record, SeriesKind, UpdateTask};
use kostock_data::{ChartStore, DataSource, FetchStatus, SourceConnector};

use crate::config::WorkerConfig;
use crate::error::CollectorError;
use crate::modules::checkpoint::CheckpointStore;
use crate::modules::message::ChartMessage;
use crate::stats::WorkerReport;
use crate::Result;

/// 워커 종료 결과.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// 모든 작업 처리 완료 (체크포인트 삭제됨)
    Completed(WorkerReport),
    /// 요청 한도 소진으로 중단 (체크포인트 저장됨)
    QuotaExhausted(WorkerReport),
    /// 종료 요청으로 중단 (체크포인트 저장됨)
    Cancelled(WorkerReport),
}

impl WorkerOutcome {
    pub fn report(&self) -> &WorkerReport {
        match self {
            Self::Completed(r) | Self::QuotaExhausted(r) | Self::Cancelled(r) => r,
        }
    }
}

/// 작업 하나의 처리 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskResult {
    Done,
    Exhausted,
    Cancelled,
}

/// 대기열 항목 (재시도 횟수 포함).
#[derive(Debug, Clone)]
struct QueuedTask {
    task: PendingTask,
    attempts: u32,
}

/// 워커가 공유하는 외부 자원.
#[derive(Clone)]
pub struct WorkerResources {
    pub connector: Arc<dyn SourceConnector>,
    pub store: Arc<dyn ChartStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// 외부 로그인 직렬화용 잠금
    pub login_lock: Arc<Mutex<()>>,
}

/// 시리즈 수집 워커.
pub struct RetrievalWorker {
    kind: SeriesKind,
    resources: WorkerResources,
    tx: mpsc::Sender<ChartMessage>,
    config: WorkerConfig,
    /// 수정주가 재수집 시작일
    min_start: NaiveDate,
    cancel: CancellationToken,
}

impl RetrievalWorker {
    pub fn new(
        kind: SeriesKind,
        resources: WorkerResources,
        tx: mpsc::Sender<ChartMessage>,
        config: WorkerConfig,
        min_start: NaiveDate,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            resources,
            tx,
            config,
            min_start,
            cancel,
        }
    }

    /// 작업 목록을 처리합니다.
    ///
    /// 저장된 체크포인트가 있으면 `plan`은 무시됩니다.
    pub async fn run(self, plan: &[PendingTask]) -> Result<WorkerOutcome> {
        let kind = self.kind;
        let mut report = WorkerReport::default();

        let tasks = match self.resources.checkpoints.load(kind).await? {
            Some(tasks) => {
                info!(
                    component = "worker",
                    kind = %kind,
                    pending = tasks.len(),
                    "체크포인트에서 재개"
                );
                tasks
            }
            None => plan.to_vec(),
        };
        let mut queue: VecDeque<QueuedTask> = tasks
            .into_iter()
            .map(|task| QueuedTask { task, attempts: 0 })
            .collect();

        if queue.is_empty() {
            self.resources.checkpoints.clear(kind).await?;
            return Ok(WorkerOutcome::Completed(report));
        }
        if self.cancel.is_cancelled() {
            self.suspend(&queue, &mut report).await?;
            return Ok(WorkerOutcome::Cancelled(report));
        }

        let source = match self.login().await {
            Ok(source) => source,
            Err(e) => {
                self.suspend_best_effort(&queue, &mut report).await;
                return Err(e);
            }
        };

        while let Some(mut entry) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                queue.push_front(entry);
                self.suspend(&queue, &mut report).await?;
                return Ok(WorkerOutcome::Cancelled(report));
            }

            match self
                .run_task(source.as_ref(), &mut entry.task, &mut report)
                .await
            {
                Ok(TaskResult::Done) => {
                    report.completed += 1;
                }
                Ok(TaskResult::Exhausted) => {
                    queue.push_front(entry);
                    self.suspend(&queue, &mut report).await?;
                    warn!(
                        component = "worker",
                        kind = %kind,
                        remaining = report.remaining,
                        "요청 한도 소진, 체크포인트 저장 후 중단"
                    );
                    return Ok(WorkerOutcome::QuotaExhausted(report));
                }
                Ok(TaskResult::Cancelled) => {
                    queue.push_front(entry);
                    self.suspend(&queue, &mut report).await?;
                    info!(component = "worker", kind = %kind, "종료 요청으로 중단");
                    return Ok(WorkerOutcome::Cancelled(report));
                }
                Err(e) if e.is_transient() => {
                    entry.attempts += 1;
                    if entry.attempts <= self.config.task_retries {
                        warn!(
                            component = "worker",
                            kind = %kind,
                            instrument = %entry.task.instrument,
                            attempt = entry.attempts,
                            error = %e,
                            "조회 실패, 대기열 뒤에서 재시도"
                        );
                        queue.push_back(entry);
                    } else {
                        error!(
                            component = "worker",
                            kind = %kind,
                            instrument = %entry.task.instrument,
                            attempts = entry.attempts,
                            error = %e,
                            "조회 실패, 이번 실행에서 건너뜀"
                        );
                        report.failed.push(entry.task.instrument);
                    }
                }
                Err(e) => {
                    queue.push_front(entry);
                    self.suspend_best_effort(&queue, &mut report).await;
                    return Err(e);
                }
            }
        }

        self.resources.checkpoints.clear(kind).await?;
        info!(
            component = "worker",
            kind = %kind,
            completed = report.completed,
            failed = report.failed.len(),
            "모든 작업 완료"
        );
        Ok(WorkerOutcome::Completed(report))
    }

    /// 로그인 잠금을 잡고 새 세션을 엽니다.
    async fn login(&self) -> Result<Arc<dyn DataSource>> {
        let _guard = self.resources.login_lock.lock().await;
        debug!(component = "worker", kind = %self.kind, "세션 로그인");
        Ok(self.resources.connector.connect(self.kind).await?)
    }

    /// 작업 하나를 범위 끝까지 조회합니다.
    ///
    /// 중단되면 `task.resume_from`이 다음 실행의 재개 지점으로 갱신됩니다.
    async fn run_task(
        &self,
        source: &dyn DataSource,
        task: &mut PendingTask,
        report: &mut WorkerReport,
    ) -> Result<TaskResult> {
        while task.has_remaining() {
            if self.cancel.is_cancelled() {
                return Ok(TaskResult::Cancelled);
            }

            let response = source
                .fetch(&task.instrument, self.kind, task.resume_from, task.target_end)
                .await?;
            report.chunks += 1;

            if self.kind == SeriesKind::Price && task.last_update.is_some() {
                if let Some(first) = response.rows.first() {
                    let adjusted = self.is_adjusted(first).await?;
                    task.last_update = None;
                    if adjusted {
                        info!(
                            component = "worker",
                            kind = %self.kind,
                            instrument = %task.instrument,
                            date = %first.date(),
                            from = %self.min_start,
                            "수정주가 감지, 전체 구간 재수집"
                        );
                        report.rebackfilled.push(task.instrument.clone());
                        task.resume_from = self.min_start;
                        if response.status == FetchStatus::QuotaExhausted {
                            return Ok(TaskResult::Exhausted);
                        }
                        continue;
                    }
                }
            }

            let last_date = response.last_date();
            if !response.rows.is_empty() {
                report.rows += response.rows.len();
                self.send(ChartMessage::Records(response.rows)).await?;
            }

            match response.status {
                FetchStatus::Ok => match response.next_from {
                    Some(next) => {
                        task.resume_from = next;
                        if self.pause().await {
                            return Ok(TaskResult::Cancelled);
                        }
                    }
                    None => break,
                },
                FetchStatus::QuotaExhausted => {
                    if let Some(last) = last_date {
                        task.resume_from = last;
                    }
                    return Ok(TaskResult::Exhausted);
                }
            }
        }

        self.send(ChartMessage::TaskEnd {
            instrument: task.instrument.clone(),
            kind: self.kind,
            through: task.target_end,
        })
        .await?;
        debug!(component = "worker", kind = %self.kind, instrument = %task.instrument, "작업 완료");
        Ok(TaskResult::Done)
    }

    /// 저장된 종가와 새로 받은 종가가 다른지 확인합니다.
    async fn is_adjusted(&self, fetched: &Record) -> Result<bool> {
        let Some(fetched_close) = fetched.close() else {
            return Ok(false);
        };
        let stored = self
            .resources
            .store
            .last_close(fetched.instrument(), fetched.date())
            .await?;
        Ok(matches!(stored, Some(close) if close != fetched_close))
    }

    /// 청크 사이 딜레이. 종료 요청이 오면 true.
    async fn pause(&self) -> bool {
        let delay = self.config.request_delay();
        if delay.is_zero() {
            return self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    async fn send(&self, message: ChartMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| CollectorError::ChannelClosed)
    }

    /// 남은 작업을 체크포인트로 저장합니다.
    async fn suspend(&self, queue: &VecDeque<QueuedTask>, report: &mut WorkerReport) -> Result<()> {
        let tasks: Vec<PendingTask> = queue.iter().map(|entry| entry.task.clone()).collect();
        self.resources.checkpoints.save(self.kind, &tasks).await?;
        report.remaining = tasks.len();
        Ok(())
    }

    /// 오류로 종료하기 전 가능한 경우 체크포인트를 남깁니다.
    async fn suspend_best_effort(&self, queue: &VecDeque<QueuedTask>, report: &mut WorkerReport) {
        if let Err(e) = self.suspend(queue, report).await {
            warn!(component = "worker", kind = %self.kind, error = %e, "체크포인트 저장 실패");
        }
    }
}

/// 계획된 작업을 워커 대기열 형태로 변환합니다.
pub fn pending_tasks<'a>(tasks: impl IntoIterator<Item = &'a UpdateTask>) -> Vec<PendingTask> {
    tasks.into_iter().map(PendingTask::from).collect()
}

