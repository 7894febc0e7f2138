//! 파이프라인 슈퍼바이저.
//!
//! 컨슈머 하나와 시리즈별 워커 슬롯 두 개(가격, 수급)의 수명을 관리합니다.
//!
//! # 슬롯 상태
//!
//! ```text
//! NotStarted → Running → ExitedOk
//!                 ↓  ↑
//!              ExitedFail (retry_at 이후 재시작)
//!                 ↓
//!              Abandoned (연속 실패 한도 초과)
//! ```
//!
//! - 요청 한도 소진은 실패로 세지 않습니다. 진척이 있으면 쿨다운 후,
//!   진척이 없으면 한도가 다시 열릴 때까지 점점 길어지는 대기 후 재시작합니다.
//! - 오류와 패닉만 연속 실패로 세고 지수 백오프 후 재시작합니다.
//! - 두 슬롯이 모두 `ExitedOk`가 되면 컨슈머를 종료하고 체크포인트를 정리합니다.
//! - 중단(슬롯 포기 또는 종료 요청) 시에는 워커를 멈추고 컨슈머를 비운 뒤
//!   체크포인트를 다음 실행을 위해 남겨 둡니다.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument as _};

use kostock_core::{PendingTask, SeriesKind};

use crate::config::{SupervisorConfig, WorkerConfig};
use crate::error::CollectorError;
use crate::modules::consumer::IngestionConsumer;
use crate::modules::message::ChartMessage;
use crate::modules::worker::{RetrievalWorker, WorkerOutcome, WorkerResources};
use crate::stats::{UpdateStatus, UpdateSummary, WorkerReport};
use crate::Result;

/// 워커 슬롯 상태.
#[derive(Debug)]
enum SlotState {
    NotStarted,
    Running(JoinHandle<Result<WorkerOutcome>>),
    ExitedOk,
    ExitedFail { retry_at: Instant },
    Cancelled,
    Abandoned,
}

/// 시리즈별 워커 슬롯.
#[derive(Debug)]
struct Slot {
    state: SlotState,
    /// 실행 횟수
    attempts: u32,
    /// 연속 실패 횟수
    failures: u32,
    /// 진척 없는 한도 소진 연속 횟수
    idle_exhaustions: u32,
    report: WorkerReport,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: SlotState::NotStarted,
            attempts: 0,
            failures: 0,
            idle_exhaustions: 0,
            report: WorkerReport::default(),
        }
    }

    fn should_launch(&self, now: Instant) -> bool {
        match self.state {
            SlotState::NotStarted => true,
            SlotState::ExitedFail { retry_at } => now >= retry_at,
            _ => false,
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.state, SlotState::Running(_))
    }
}

/// 파이프라인 슈퍼바이저.
pub struct Supervisor {
    resources: WorkerResources,
    config: SupervisorConfig,
    worker_config: WorkerConfig,
    min_start: NaiveDate,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        resources: WorkerResources,
        config: SupervisorConfig,
        worker_config: WorkerConfig,
        min_start: NaiveDate,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resources,
            config,
            worker_config,
            min_start,
            cancel,
        }
    }

    /// 작업 목록으로 파이프라인 한 번을 실행합니다.
    pub async fn run(&self, plan: Vec<PendingTask>) -> Result<UpdateSummary> {
        let started = std::time::Instant::now();
        let planned = plan.len();
        let plan = Arc::new(plan);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (consumer, mut progress) =
            IngestionConsumer::new(self.resources.store.clone(), rx, planned);
        let consumer_handle = tokio::spawn(
            consumer
                .run()
                .instrument(kostock_core::pipeline_span!("consumer")),
        );

        let worker_cancel = self.cancel.child_token();
        let mut slots: BTreeMap<SeriesKind, Slot> =
            SeriesKind::ALL.into_iter().map(|kind| (kind, Slot::new())).collect();

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(component = "supervisor", planned = planned, "파이프라인 시작");

        let status = loop {
            if !worker_cancel.is_cancelled() {
                let now = Instant::now();
                for (&kind, slot) in slots.iter_mut() {
                    if slot.should_launch(now) {
                        slot.attempts += 1;
                        let handle = self.launch(kind, slot.attempts, &plan, &tx, &worker_cancel);
                        slot.state = SlotState::Running(handle);
                    }
                }
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled(), if !worker_cancel.is_cancelled() => {
                    info!(component = "supervisor", "종료 요청 수신, 워커 중단");
                }
            }

            for (&kind, slot) in slots.iter_mut() {
                self.poll_slot(kind, slot).await;
            }

            if progress.has_changed().unwrap_or(false) {
                let p = *progress.borrow_and_update();
                debug!(
                    component = "supervisor",
                    markers = p.markers,
                    expected = p.expected,
                    watermarks = p.watermarks,
                    progress = format!("{:.1}%", p.ratio() * 100.0),
                    "진행 상황"
                );
            }

            if slots.values().all(|s| matches!(s.state, SlotState::ExitedOk)) {
                break UpdateStatus::Completed;
            }
            if let Some((&kind, _)) = slots
                .iter()
                .find(|(_, s)| matches!(s.state, SlotState::Abandoned))
            {
                break UpdateStatus::Abandoned(kind);
            }
            if self.cancel.is_cancelled() {
                break UpdateStatus::Cancelled;
            }
        };

        // 중단 시 남은 워커를 멈추고 체크포인트 저장을 기다림
        if status != UpdateStatus::Completed {
            worker_cancel.cancel();
            for (&kind, slot) in slots.iter_mut() {
                if slot.is_running() {
                    self.join_slot(kind, slot).await;
                }
            }
        }

        tx.send(ChartMessage::Stop)
            .await
            .map_err(|_| CollectorError::ChannelClosed)?;
        drop(tx);
        let consumer_report = consumer_handle.await?;

        if status == UpdateStatus::Completed {
            for kind in SeriesKind::ALL {
                self.resources.checkpoints.clear(kind).await?;
            }
        } else {
            warn!(component = "supervisor", status = ?status, "파이프라인 중단, 체크포인트 유지");
        }

        let restarts = slots
            .values()
            .map(|s| s.attempts.saturating_sub(1))
            .sum();

        Ok(UpdateSummary {
            status,
            planned,
            workers: slots
                .into_iter()
                .map(|(kind, slot)| (kind, slot.report))
                .collect(),
            restarts,
            consumer: consumer_report,
            elapsed: started.elapsed(),
        })
    }

    fn launch(
        &self,
        kind: SeriesKind,
        attempt: u32,
        plan: &Arc<Vec<PendingTask>>,
        tx: &mpsc::Sender<ChartMessage>,
        cancel: &CancellationToken,
    ) -> JoinHandle<Result<WorkerOutcome>> {
        info!(component = "supervisor", kind = %kind, attempt = attempt, "워커 시작");

        let worker = RetrievalWorker::new(
            kind,
            self.resources.clone(),
            tx.clone(),
            self.worker_config.clone(),
            self.min_start,
            cancel.clone(),
        );
        let plan = Arc::clone(plan);

        tokio::spawn(
            async move { worker.run(&plan).await }
                .instrument(kostock_core::pipeline_span!("worker", kind, attempt)),
        )
    }

    /// 종료된 워커가 있으면 결과를 반영합니다. 실행 중인 워커는 건드리지 않습니다.
    async fn poll_slot(&self, kind: SeriesKind, slot: &mut Slot) {
        let finished = matches!(&slot.state, SlotState::Running(handle) if handle.is_finished());
        if finished {
            self.join_slot(kind, slot).await;
        }
    }

    /// 워커 종료를 기다려 슬롯 상태를 전이합니다.
    async fn join_slot(&self, kind: SeriesKind, slot: &mut Slot) {
        let SlotState::Running(handle) = std::mem::replace(&mut slot.state, SlotState::NotStarted)
        else {
            return;
        };

        match handle.await {
            Ok(Ok(outcome)) => {
                slot.report.merge(outcome.report());
                match outcome {
                    WorkerOutcome::Completed(_) => {
                        info!(component = "supervisor", kind = %kind, "워커 완료");
                        slot.failures = 0;
                        slot.state = SlotState::ExitedOk;
                    }
                    WorkerOutcome::Cancelled(_) => {
                        slot.state = SlotState::Cancelled;
                    }
                    WorkerOutcome::QuotaExhausted(report) if report.made_progress() => {
                        let cooldown = self.config.quota_cooldown();
                        info!(
                            component = "supervisor",
                            kind = %kind,
                            cooldown_ms = cooldown.as_millis() as u64,
                            "요청 한도 소진, 재시작 예정"
                        );
                        slot.failures = 0;
                        slot.idle_exhaustions = 0;
                        slot.state = SlotState::ExitedFail {
                            retry_at: Instant::now() + cooldown,
                        };
                    }
                    WorkerOutcome::QuotaExhausted(_) => {
                        slot.idle_exhaustions += 1;
                        let wait = self
                            .config
                            .quota_cooldown()
                            .max(self.config.backoff(slot.idle_exhaustions));
                        warn!(
                            component = "supervisor",
                            kind = %kind,
                            idle_exhaustions = slot.idle_exhaustions,
                            wait_ms = wait.as_millis() as u64,
                            "진척 없이 요청 한도 소진, 한도 회복 대기"
                        );
                        slot.state = SlotState::ExitedFail {
                            retry_at: Instant::now() + wait,
                        };
                    }
                }
            }
            Ok(Err(e)) => {
                error!(component = "supervisor", kind = %kind, error = %e, "워커 오류 종료");
                self.record_failure(kind, slot, "오류 종료");
            }
            Err(e) => {
                error!(component = "supervisor", kind = %kind, error = %e, "워커 비정상 종료");
                self.record_failure(kind, slot, "비정상 종료");
            }
        }
    }

    fn record_failure(&self, kind: SeriesKind, slot: &mut Slot, reason: &str) {
        slot.failures += 1;

        if slot.failures >= self.config.max_failures {
            error!(
                component = "supervisor",
                kind = %kind,
                failures = slot.failures,
                reason = reason,
                "연속 실패 한도 초과, 슬롯 포기"
            );
            slot.state = SlotState::Abandoned;
            return;
        }

        let backoff = self.config.backoff(slot.failures);
        warn!(
            component = "supervisor",
            kind = %kind,
            failures = slot.failures,
            backoff_ms = backoff.as_millis() as u64,
            reason = reason,
            "워커 재시작 예정"
        );
        slot.state = SlotState::ExitedFail {
            retry_at: Instant::now() + backoff,
        };
    }
}
