//! 차트 업데이트 파이프라인 모듈.

pub mod checkpoint;
pub mod consumer;
pub mod message;
pub mod planner;
pub mod supervisor;
pub mod update;
pub mod worker;

pub use checkpoint::{
    CheckpointDocument, CheckpointInfo, CheckpointStore, FileCheckpointStore, PgCheckpointStore,
};
pub use consumer::{ConsumerProgress, IngestionConsumer};
pub use message::ChartMessage;
pub use planner::plan;
pub use supervisor::Supervisor;
pub use update::run_chart_update;
pub use worker::{pending_tasks, RetrievalWorker, WorkerOutcome, WorkerResources};
