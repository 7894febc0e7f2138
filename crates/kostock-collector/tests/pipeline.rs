//! 파이프라인 통합 테스트: 슈퍼바이저 종료 조건, 재시작, 체크포인트 우선순위.

mod common;

use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use kostock_collector::modules::{run_chart_update, CheckpointStore, FileCheckpointStore};
use kostock_collector::{CollectorConfig, UpdateStatus, UpdateSummary};
use kostock_core::{PendingTask, SeriesKind};
use kostock_data::{ChartStore, MemoryChartStore};
use rust_decimal_macros::dec;

use common::{
    date, flow_history, instrument, price_history, test_config, weekdays, Script,
    ScriptedConnector,
};

const CODES: [&str; 2] = ["005930", "000660"];

struct Pipeline {
    connector: ScriptedConnector,
    store: Arc<MemoryChartStore>,
    checkpoints: Arc<FileCheckpointStore>,
    config: CollectorConfig,
    _tmp: TempDir,
}

impl Pipeline {
    async fn new(chunk_rows: usize, session_budget: u32) -> Self {
        let min_start = date(2020, 7, 1);
        let target = date(2020, 8, 7);

        let mut script = Script::new(chunk_rows, session_budget);
        for code in CODES {
            script = script
                .with_series(code, SeriesKind::Price, price_history(code, min_start, target, dec!(50000)))
                .with_series(code, SeriesKind::Flow, flow_history(code, min_start, target));
        }

        let store = Arc::new(MemoryChartStore::new());
        store
            .register_instrument(&instrument("005930"), Some(date(2020, 7, 15)))
            .await
            .unwrap();
        store
            .register_instrument(&instrument("000660"), None)
            .await
            .unwrap();

        let tmp = TempDir::new().unwrap();
        Self {
            connector: ScriptedConnector::new(script),
            store,
            checkpoints: Arc::new(FileCheckpointStore::new(tmp.path())),
            // 2020-08-08 토요일 → 목표일 2020-08-07
            config: test_config(min_start, date(2020, 8, 8)),
            _tmp: tmp,
        }
    }

    async fn run(&self, cancel: CancellationToken) -> UpdateSummary {
        run_chart_update(
            self.store.clone(),
            Arc::new(self.connector.clone()),
            self.checkpoints.clone(),
            &self.config,
            None,
            cancel,
        )
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_completed_run_advances_watermarks_and_clears_checkpoints() {
    let p = Pipeline::new(10, 100).await;
    let target = date(2020, 8, 7);

    let summary = p.run(CancellationToken::new()).await;

    assert_eq!(summary.status, UpdateStatus::Completed);
    assert_eq!(summary.planned, 2);
    assert_eq!(summary.restarts, 0);
    assert_eq!(summary.consumer.watermarks, 2);
    assert_eq!(summary.consumer.incomplete, 0);
    for code in CODES {
        assert_eq!(p.store.watermark(&instrument(code)).await, Some(target));
    }

    // 005930은 상장일부터, 000660은 최소 시작일부터
    assert_eq!(
        p.store.row_count(&instrument("005930")).await,
        weekdays(date(2020, 7, 15), target).len()
    );
    assert_eq!(
        p.store.row_count(&instrument("000660")).await,
        weekdays(date(2020, 7, 1), target).len()
    );
    let row = p.store.row(&instrument("000660"), target).await.unwrap();
    assert!(row.close.is_some() && row.foreign_qty.is_some());

    assert!(p.checkpoints.list().await.unwrap().is_empty());

    // 다음 실행에서는 업데이트할 종목이 없음
    let again = p.run(CancellationToken::new()).await;
    assert_eq!(again.status, UpdateStatus::Completed);
    assert_eq!(again.planned, 0);
}

#[tokio::test]
async fn test_quota_exhaustion_restarts_until_complete() {
    let p = Pipeline::new(5, 2).await;

    let summary = p.run(CancellationToken::new()).await;

    assert_eq!(summary.status, UpdateStatus::Completed);
    assert!(summary.restarts > 0);
    assert!(p.connector.script.sessions() > 2);
    for code in CODES {
        assert_eq!(
            p.store.watermark(&instrument(code)).await,
            Some(date(2020, 8, 7))
        );
    }
    assert_eq!(
        p.store.row_count(&instrument("000660")).await,
        weekdays(date(2020, 7, 1), date(2020, 8, 7)).len()
    );
    assert!(p.checkpoints.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_idle_quota_exhaustion_waits_instead_of_abandoning() {
    let p = Pipeline::new(10, 100).await;
    // max_failures(5)보다 많은 연속 소진
    p.connector.script.empty_sessions(SeriesKind::Price, 10);

    let summary = p.run(CancellationToken::new()).await;

    assert_eq!(summary.status, UpdateStatus::Completed);
    assert_eq!(summary.restarts, 10);
    assert_eq!(summary.consumer.watermarks, 2);
    for code in CODES {
        assert_eq!(
            p.store.watermark(&instrument(code)).await,
            Some(date(2020, 8, 7))
        );
    }
    assert!(p.checkpoints.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_crashed_workers_are_restarted() {
    let p = Pipeline::new(10, 100).await;
    p.connector.script.fail_connect(SeriesKind::Price, 2);
    p.connector.script.panic_connect(SeriesKind::Flow, 1);

    let summary = p.run(CancellationToken::new()).await;

    assert_eq!(summary.status, UpdateStatus::Completed);
    assert_eq!(summary.restarts, 3);
    assert_eq!(summary.consumer.watermarks, 2);
}

#[tokio::test]
async fn test_crash_loop_is_abandoned_and_keeps_checkpoint() {
    let mut p = Pipeline::new(10, 100).await;
    p.config.supervisor.max_failures = 3;
    p.connector.script.fail_connect(SeriesKind::Price, u32::MAX);

    let summary = p.run(CancellationToken::new()).await;

    assert_eq!(summary.status, UpdateStatus::Abandoned(SeriesKind::Price));
    assert_eq!(summary.consumer.watermarks, 0);
    for code in CODES {
        assert_eq!(p.store.watermark(&instrument(code)).await, None);
    }
    let saved = p.checkpoints.load(SeriesKind::Price).await.unwrap().unwrap();
    assert_eq!(saved.len(), 2);
}

#[tokio::test]
async fn test_cancelled_run_does_not_advance_watermarks() {
    let p = Pipeline::new(10, 100).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = p.run(cancel).await;

    assert_eq!(summary.status, UpdateStatus::Cancelled);
    assert_eq!(summary.consumer.watermarks, 0);
    assert!(p.connector.script.calls().is_empty());
}

#[tokio::test]
async fn test_checkpoint_replaces_fresh_plan() {
    let p = Pipeline::new(10, 100).await;
    p.checkpoints
        .save(
            SeriesKind::Flow,
            &[PendingTask {
                instrument: instrument("000660"),
                resume_from: date(2020, 8, 3),
                target_end: date(2020, 8, 7),
                last_update: None,
            }],
        )
        .await
        .unwrap();

    let summary = p.run(CancellationToken::new()).await;

    assert_eq!(summary.status, UpdateStatus::Completed);
    assert!(p
        .connector
        .script
        .calls_for("005930", SeriesKind::Flow)
        .is_empty());
    let flow_calls = p.connector.script.calls_for("000660", SeriesKind::Flow);
    assert_eq!(flow_calls.len(), 1);
    assert_eq!(flow_calls[0].from, date(2020, 8, 3));

    // 수급이 완료되지 않은 005930은 워터마크 없음
    assert_eq!(p.store.watermark(&instrument("005930")).await, None);
    assert_eq!(
        p.store.watermark(&instrument("000660")).await,
        Some(date(2020, 8, 7))
    );
    assert_eq!(summary.consumer.incomplete, 1);
    assert!(p.checkpoints.list().await.unwrap().is_empty());
}
