//! 차트 데이터 소스 및 저장소.
//!
//! 이 crate는 업데이트 파이프라인이 사용하는 외부 경계를 제공합니다:
//! - 청크 단위 데이터 소스 (`DataSource`) 및 세션 커넥터 (`SourceConnector`)
//! - KRX 정보데이터시스템 바인딩 (세션별 요청 한도 포함)
//! - 차트 저장소 (`ChartStore`): PostgreSQL, 메모리

pub mod error;
pub mod source;
pub mod storage;

pub use error::{DataError, Result};

pub use source::{
    DataSource, FetchResponse, FetchStatus, KrxChartSource, KrxConnector, KrxSourceConfig,
    RequestQuota, SourceConnector,
};
pub use storage::{ChartRow, ChartStore, InstrumentMeta, MemoryChartStore, PgChartStore};
