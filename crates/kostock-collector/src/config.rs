//! 환경변수 기반 설정 모듈.
//!
//! 설정 값은 전역 상태로 두지 않고 플래너, 워커, 슈퍼바이저 생성 시
//! 명시적으로 전달합니다.

use chrono::{Local, NaiveDate};
use std::path::PathBuf;
use std::time::Duration;

use kostock_core::{Instrument, TradingCalendar};
use kostock_data::KrxSourceConfig;

use crate::error::CollectorError;
use crate::Result;

/// 기본 수집 시작일.
const DEFAULT_START_DATE: &str = "2000-01-01";

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// 데이터베이스 URL (PostgreSQL 명령에서만 필요)
    pub database_url: Option<String>,
    /// 차트 업데이트 설정
    pub update: UpdateConfig,
    /// 체크포인트 저장소 설정
    pub checkpoint: CheckpointConfig,
    /// 수집 워커 설정
    pub worker: WorkerConfig,
    /// 슈퍼바이저 설정
    pub supervisor: SupervisorConfig,
    /// KRX 소스 설정
    pub krx: KrxSourceConfig,
    /// 데몬 모드 설정
    pub daemon: DaemonConfig,
}

/// 차트 업데이트 범위 설정
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// 수집 최소 시작일 (상장일이 더 늦으면 상장일부터)
    pub min_start_date: NaiveDate,
    /// 기준일 (None이면 오늘). 실제 목표일은 기준일 이전의 최근 거래일
    pub reference_date: Option<NaiveDate>,
    /// 휴장일 달력
    pub calendar: TradingCalendar,
    /// 수집 제외 종목 (데이터 이상 종목)
    pub black_list: Vec<Instrument>,
}

/// 체크포인트 저장소 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointBackend {
    /// 디렉터리의 JSON 파일
    File,
    /// PostgreSQL 테이블
    Postgres,
}

/// 체크포인트 설정
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,
    /// 파일 저장소 디렉터리
    pub dir: PathBuf,
}

/// 수집 워커 설정
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 청크 요청 간 딜레이 (밀리초)
    pub request_delay_ms: u64,
    /// 일시적 오류로 실패한 작업의 재시도 횟수
    pub task_retries: u32,
}

/// 슈퍼바이저 설정
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// 워커 상태 확인 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 요청 한도 소진 후 재시작까지 대기 (밀리초)
    pub quota_cooldown_ms: u64,
    /// 연속 실패 허용 횟수 (초과 시 실행 중단)
    pub max_failures: u32,
    /// 재시작 백오프 기본값 (밀리초)
    pub backoff_base_ms: u64,
    /// 재시작 백오프 상한 (밀리초)
    pub backoff_max_ms: u64,
    /// 워커 → 컨슈머 채널 용량
    pub channel_capacity: usize,
}

/// 데몬 모드 설정
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// 업데이트 실행 주기 (분 단위)
    pub interval_minutes: u64,
}

impl CollectorConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let min_start_date = parse_date(
            &std::env::var("UPDATE_START_DATE").unwrap_or_else(|_| DEFAULT_START_DATE.into()),
        )?;
        let reference_date = std::env::var("UPDATE_END_DATE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_date(&v))
            .transpose()?;
        let calendar = TradingCalendar::parse(&std::env::var("UPDATE_HOLIDAYS").unwrap_or_default())
            .map_err(|e| CollectorError::Config(format!("UPDATE_HOLIDAYS: {}", e)))?;
        let black_list = Instrument::parse_list(&std::env::var("UPDATE_BLACK_LIST").unwrap_or_default())
            .map_err(|e| CollectorError::Config(format!("UPDATE_BLACK_LIST: {}", e)))?;

        let backend = match std::env::var("CHECKPOINT_BACKEND")
            .unwrap_or_else(|_| "file".into())
            .to_lowercase()
            .as_str()
        {
            "file" => CheckpointBackend::File,
            "postgres" | "pg" => CheckpointBackend::Postgres,
            other => {
                return Err(CollectorError::Config(format!(
                    "알 수 없는 CHECKPOINT_BACKEND: {}",
                    other
                )))
            }
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            update: UpdateConfig {
                min_start_date,
                reference_date,
                calendar,
                black_list,
            },
            checkpoint: CheckpointConfig {
                backend,
                dir: std::env::var("CHECKPOINT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("checkpoints")),
            },
            worker: WorkerConfig {
                request_delay_ms: env_var_parse("WORKER_REQUEST_DELAY_MS", 200),
                task_retries: env_var_parse("WORKER_TASK_RETRIES", 1),
            },
            supervisor: SupervisorConfig {
                poll_interval_ms: env_var_parse("SUPERVISOR_POLL_INTERVAL_MS", 100),
                quota_cooldown_ms: env_var_parse("SUPERVISOR_QUOTA_COOLDOWN_MS", 1000),
                max_failures: env_var_parse("SUPERVISOR_MAX_FAILURES", 5),
                backoff_base_ms: env_var_parse("SUPERVISOR_BACKOFF_BASE_MS", 1000),
                backoff_max_ms: env_var_parse("SUPERVISOR_BACKOFF_MAX_MS", 60_000),
                channel_capacity: env_var_parse("PIPELINE_CHANNEL_CAPACITY", 1024),
            },
            krx: KrxSourceConfig {
                chunk_days: env_var_parse("KRX_CHUNK_DAYS", 365),
                request_budget: env_var_parse("KRX_REQUEST_BUDGET", 1000),
                request_delay: Duration::from_millis(env_var_parse("KRX_REQUEST_DELAY_MS", 250)),
            },
            daemon: DaemonConfig {
                interval_minutes: env_var_parse("DAEMON_INTERVAL_MINUTES", 24 * 60),
            },
        })
    }

    /// DATABASE_URL 필수 조회
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            CollectorError::Config("DATABASE_URL 환경변수가 설정되지 않았습니다".to_string())
        })
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            update: UpdateConfig::default(),
            checkpoint: CheckpointConfig::default(),
            worker: WorkerConfig::default(),
            supervisor: SupervisorConfig::default(),
            krx: KrxSourceConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::File,
            dir: PathBuf::from("checkpoints"),
        }
    }
}

impl UpdateConfig {
    /// 이번 실행의 목표일 (기준일 당일 또는 이전의 최근 거래일)
    pub fn target_date(&self) -> NaiveDate {
        let reference = self
            .reference_date
            .unwrap_or_else(|| Local::now().date_naive());
        self.calendar.latest_trading_date(reference)
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            min_start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
            reference_date: None,
            calendar: TradingCalendar::default(),
            black_list: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// 청크 요청 간 딜레이를 Duration으로 반환
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 200,
            task_retries: 1,
        }
    }
}

impl SupervisorConfig {
    /// 상태 확인 주기를 Duration으로 반환
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// 요청 한도 소진 후 재시작 대기를 Duration으로 반환
    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_millis(self.quota_cooldown_ms)
    }

    /// `failures`번째 연속 실패 후 재시작 대기 시간 (지수 백오프)
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            quota_cooldown_ms: 1000,
            max_failures: 5,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            channel_capacity: 1024,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 24 * 60,
        }
    }
}

impl DaemonConfig {
    /// 업데이트 실행 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

/// `YYYY-MM-DD` 또는 `YYYYMMDD` 날짜 파싱
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .map_err(|e| CollectorError::Config(format!("날짜 형식 오류: {} - {}", s, e)))
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
