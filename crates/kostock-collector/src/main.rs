//! KoStock chart update CLI.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use kostock_collector::config::{parse_date, CheckpointBackend};
use kostock_collector::modules::{
    self, CheckpointStore, FileCheckpointStore, PgCheckpointStore,
};
use kostock_collector::{CollectorConfig, CollectorError, UpdateStatus};
use kostock_core::{init_logging, Instrument, LogConfig, LogFormat, SeriesKind};
use kostock_data::{ChartStore, KrxConnector, PgChartStore};

#[derive(Parser)]
#[command(name = "kostock-collector")]
#[command(about = "KoStock daily chart update pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 로그 형식 (pretty, json, compact). 생략 시 LOG_FORMAT 환경 변수
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// 차트 업데이트 1회 실행 (가격 + 투자자 수급)
    Update {
        /// 특정 종목만 업데이트 (쉼표로 구분, 예: "005930,000660")
        #[arg(long)]
        symbols: Option<String>,
    },

    /// 업데이트 계획만 출력
    Plan {
        /// 특정 종목만 계획 (쉼표로 구분)
        #[arg(long)]
        symbols: Option<String>,
    },

    /// 워커 체크포인트 관리
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// 저장소 테이블 생성
    InitSchema,

    /// 종목 등록 (상장일 지정)
    Register {
        /// 종목 코드 (예: 005930)
        instrument: Instrument,
        /// 상장일 (YYYY-MM-DD)
        listing_date: String,
    },

    /// 데몬 모드: 주기적으로 차트 업데이트 실행
    Daemon,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// 저장된 체크포인트 목록
    List,
    /// 체크포인트 삭제
    Clear {
        /// 특정 시리즈만 삭제 (price, flow)
        #[arg(long)]
        kind: Option<SeriesKind>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_config = match cli.log_format {
        Some(format) => LogConfig::new(cli.log_level.clone()).with_format(format),
        None => LogConfig::from_env(cli.log_level.clone()),
    };
    init_logging(log_config)?;
    tracing::info!("KoStock Collector 시작");

    let config = CollectorConfig::from_env()?;
    tracing::debug!(
        start = %config.update.min_start_date,
        target = %config.update.target_date(),
        holidays = config.update.calendar.holiday_count(),
        "설정 로드 완료"
    );

    match cli.command {
        Commands::Update { symbols } => {
            let symbols = parse_symbols(symbols.as_deref())?;
            let pool = connect(&config).await?;
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let summary = run_update(&pool, &config, symbols.as_deref(), cancel).await?;
            pool.close().await;

            if let UpdateStatus::Abandoned(kind) = summary.status {
                return Err(CollectorError::WorkerAbandoned {
                    kind,
                    failures: config.supervisor.max_failures,
                }
                .into());
            }
        }
        Commands::Plan { symbols } => {
            let symbols = parse_symbols(symbols.as_deref())?;
            let pool = connect(&config).await?;
            let store = PgChartStore::new(pool.clone());

            let target = config.update.target_date();
            let meta = store.metadata().await?;
            let tasks = modules::plan(&meta, &config.update, target, symbols.as_deref());

            println!("target: {}  tasks: {}", target, tasks.len());
            for task in &tasks {
                println!(
                    "{}  {} ~ {}  (last_update: {})",
                    task.instrument,
                    task.range_start,
                    task.range_end,
                    task.last_update
                        .map_or_else(|| "-".to_string(), |d| d.to_string())
                );
            }
            pool.close().await;
        }
        Commands::Checkpoints { action } => {
            let pool = match config.checkpoint.backend {
                CheckpointBackend::File => None,
                CheckpointBackend::Postgres => Some(connect(&config).await?),
            };
            let checkpoints = open_checkpoints(&config, pool.as_ref()).await?;

            match action {
                CheckpointAction::List => {
                    let infos = checkpoints.list().await?;
                    if infos.is_empty() {
                        println!("저장된 체크포인트 없음");
                    }
                    for info in infos {
                        let next = info
                            .next
                            .map(|t| format!("{} from {}", t.instrument, t.resume_from))
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "{:<6} pending={:<5} next={}  saved_at={}",
                            info.kind, info.pending, next, info.saved_at
                        );
                    }
                }
                CheckpointAction::Clear { kind } => {
                    let kinds = kind.map_or_else(|| SeriesKind::ALL.to_vec(), |k| vec![k]);
                    for kind in kinds {
                        checkpoints.clear(kind).await?;
                        tracing::info!(kind = %kind, "체크포인트 삭제 완료");
                    }
                }
            }

            if let Some(pool) = pool {
                pool.close().await;
            }
        }
        Commands::InitSchema => {
            let pool = connect(&config).await?;
            PgChartStore::new(pool.clone()).ensure_schema().await?;
            PgCheckpointStore::new(pool.clone()).ensure_schema().await?;
            tracing::info!("스키마 생성 완료");
            pool.close().await;
        }
        Commands::Register {
            instrument,
            listing_date,
        } => {
            let listing_date = parse_date(&listing_date)?;
            let pool = connect(&config).await?;
            PgChartStore::new(pool.clone())
                .register_instrument(&instrument, Some(listing_date))
                .await?;
            tracing::info!(instrument = %instrument, listing_date = %listing_date, "종목 등록 완료");
            pool.close().await;
        }
        Commands::Daemon => {
            tracing::info!(
                "=== 데몬 모드 시작 (주기: {}분) ===",
                config.daemon.interval_minutes
            );

            let pool = connect(&config).await?;
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let mut interval = tokio::time::interval(config.daemon.interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("종료 신호 수신, 데몬 종료 중...");
                        break;
                    }
                    _ = interval.tick() => {
                        tracing::info!("=== 차트 업데이트 시작 ===");

                        match run_update(&pool, &config, None, cancel.clone()).await {
                            Ok(summary) if summary.is_completed() => {}
                            Ok(summary) => {
                                tracing::warn!(status = ?summary.status, "차트 업데이트 중단, 다음 실행에서 재개");
                            }
                            Err(e) => {
                                tracing::error!("차트 업데이트 실패: {}", e);
                            }
                        }

                        tracing::info!(
                            "=== 업데이트 완료, 다음 실행: {}분 후 ===",
                            config.daemon.interval_minutes
                        );
                    }
                }
            }

            pool.close().await;
        }
    }

    tracing::info!("KoStock Collector 종료");
    Ok(())
}

async fn connect(config: &CollectorConfig) -> Result<sqlx::PgPool, CollectorError> {
    let pool = sqlx::PgPool::connect(config.require_database_url()?).await?;
    tracing::info!("데이터베이스 연결 성공");
    Ok(pool)
}

async fn open_checkpoints(
    config: &CollectorConfig,
    pool: Option<&sqlx::PgPool>,
) -> Result<Arc<dyn CheckpointStore>, CollectorError> {
    match (config.checkpoint.backend, pool) {
        (CheckpointBackend::Postgres, Some(pool)) => {
            let store = PgCheckpointStore::new(pool.clone());
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        (CheckpointBackend::Postgres, None) => Err(CollectorError::Config(
            "PostgreSQL 체크포인트 저장소에는 DB 연결이 필요합니다".to_string(),
        )),
        (CheckpointBackend::File, _) => Ok(Arc::new(FileCheckpointStore::new(
            config.checkpoint.dir.clone(),
        ))),
    }
}

async fn run_update(
    pool: &sqlx::PgPool,
    config: &CollectorConfig,
    symbols: Option<&[Instrument]>,
    cancel: CancellationToken,
) -> Result<kostock_collector::UpdateSummary, CollectorError> {
    let store = PgChartStore::new(pool.clone());
    let checkpoints = open_checkpoints(config, Some(pool)).await?;
    let connector = KrxConnector::new(config.krx.clone());

    modules::run_chart_update(
        Arc::new(store),
        Arc::new(connector),
        checkpoints,
        config,
        symbols,
        cancel,
    )
    .await
}

fn parse_symbols(symbols: Option<&str>) -> Result<Option<Vec<Instrument>>, CollectorError> {
    symbols
        .map(|s| {
            Instrument::parse_list(s).map_err(|e| CollectorError::Config(format!("--symbols: {}", e)))
        })
        .transpose()
}

/// Ctrl-C 수신 시 토큰을 취소합니다.
fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("종료 신호 수신");
            cancel.cancel();
        }
    });
}
