//! 차트 업데이트 실행.
//!
//! 목표일 계산 → 메타데이터 조회 → 계획 수립 → 슈퍼바이저 실행 순서로
//! 업데이트 한 번을 수행합니다.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use kostock_core::Instrument;
use kostock_data::{ChartStore, SourceConnector};

use crate::config::CollectorConfig;
use crate::modules::checkpoint::CheckpointStore;
use crate::modules::planner::plan;
use crate::modules::supervisor::Supervisor;
use crate::modules::worker::{pending_tasks, WorkerResources};
use crate::stats::UpdateSummary;
use crate::Result;

/// 차트 업데이트 한 번을 실행합니다.
///
/// `symbols`가 주어지면 해당 종목만 계획합니다. 저장된 체크포인트가 있으면
/// 계획과 관계없이 워커가 체크포인트부터 재개합니다.
pub async fn run_chart_update(
    store: Arc<dyn ChartStore>,
    connector: Arc<dyn SourceConnector>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: &CollectorConfig,
    symbols: Option<&[Instrument]>,
    cancel: CancellationToken,
) -> Result<UpdateSummary> {
    let target = config.update.target_date();
    let meta = store.metadata().await?;
    let tasks = plan(&meta, &config.update, target, symbols);

    if tasks.is_empty() && checkpoints.list().await?.is_empty() {
        info!(target = %target, "업데이트할 종목 없음");
        return Ok(UpdateSummary::empty());
    }

    let resources = WorkerResources {
        connector,
        store,
        checkpoints,
        login_lock: Arc::new(Mutex::new(())),
    };
    let supervisor = Supervisor::new(
        resources,
        config.supervisor.clone(),
        config.worker.clone(),
        config.update.min_start_date,
        cancel,
    );

    let summary = supervisor.run(pending_tasks(&tasks)).await?;
    summary.log_summary("chart_update");
    Ok(summary)
}
