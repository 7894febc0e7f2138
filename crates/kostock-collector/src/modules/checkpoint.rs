//! 워커 체크포인트 관리 모듈.
//!
//! 요청 한도 소진이나 종료 요청으로 워커가 멈추면 남은 작업 목록을 시리즈
//! 종류별로 저장하고, 다시 시작된 워커는 저장된 목록부터 이어서 처리합니다.
//!
//! # 저장소
//!
//! - **파일**: 디렉터리 아래 `{kind}.json` (임시 파일에 쓴 뒤 rename)
//! - **PostgreSQL**: `update_checkpoint` 테이블의 시리즈별 한 행
//!
//! 두 시리즈의 체크포인트는 서로 독립적이며, 같은 시리즈의 체크포인트는
//! 해당 슬롯의 워커 하나만 씁니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

use kostock_core::{PendingTask, SeriesKind};

use crate::error::CollectorError;
use crate::Result;

/// 저장되는 체크포인트 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub kind: SeriesKind,
    pub saved_at: DateTime<Utc>,
    pub tasks: Vec<PendingTask>,
}

/// 체크포인트 정보
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub kind: SeriesKind,
    pub saved_at: DateTime<Utc>,
    /// 남은 작업 수
    pub pending: usize,
    /// 재개할 첫 작업
    pub next: Option<PendingTask>,
}

impl From<CheckpointDocument> for CheckpointInfo {
    fn from(doc: CheckpointDocument) -> Self {
        Self {
            kind: doc.kind,
            saved_at: doc.saved_at,
            pending: doc.tasks.len(),
            next: doc.tasks.into_iter().next(),
        }
    }
}

/// 시리즈별 재개 상태 저장소.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 남은 작업 목록을 저장합니다 (기존 체크포인트 대체).
    async fn save(&self, kind: SeriesKind, tasks: &[PendingTask]) -> Result<()>;

    /// 저장된 작업 목록 (없으면 None).
    async fn load(&self, kind: SeriesKind) -> Result<Option<Vec<PendingTask>>>;

    /// 체크포인트 삭제. 없어도 성공합니다.
    async fn clear(&self, kind: SeriesKind) -> Result<()>;

    /// 저장된 체크포인트 목록.
    async fn list(&self) -> Result<Vec<CheckpointInfo>>;
}

// ==================== 파일 저장소 ====================

/// 디렉터리 기반 체크포인트 저장소.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, kind: SeriesKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.as_str()))
    }

    async fn read_document(&self, kind: SeriesKind) -> Result<Option<CheckpointDocument>> {
        let path = self.path(kind);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let doc: CheckpointDocument = serde_json::from_slice(&bytes).map_err(|e| {
                    CollectorError::Checkpoint(format!("{} 파싱 실패: {}", path.display(), e))
                })?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, kind: SeriesKind, tasks: &[PendingTask]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let doc = CheckpointDocument {
            kind,
            saved_at: Utc::now(),
            tasks: tasks.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let path = self.path(kind);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(
            component = "checkpoint",
            kind = %kind,
            pending = tasks.len(),
            path = %path.display(),
            "체크포인트 저장"
        );
        Ok(())
    }

    async fn load(&self, kind: SeriesKind) -> Result<Option<Vec<PendingTask>>> {
        Ok(self.read_document(kind).await?.map(|doc| doc.tasks))
    }

    async fn clear(&self, kind: SeriesKind) -> Result<()> {
        match tokio::fs::remove_file(self.path(kind)).await {
            Ok(()) => {
                info!(component = "checkpoint", kind = %kind, "체크포인트 삭제");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let mut infos = Vec::new();
        for kind in SeriesKind::ALL {
            if let Some(doc) = self.read_document(kind).await? {
                infos.push(doc.into());
            }
        }
        Ok(infos)
    }
}

// ==================== PostgreSQL 저장소 ====================

/// PostgreSQL 체크포인트 저장소.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 테이블이 없으면 생성합니다.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS update_checkpoint (
                series_kind VARCHAR(8) PRIMARY KEY,
                tasks       TEXT NOT NULL,
                pending     INTEGER NOT NULL,
                saved_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_document(&self, kind: SeriesKind) -> Result<Option<CheckpointDocument>> {
        let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT tasks, saved_at
            FROM update_checkpoint
            WHERE series_kind = $1
            "#,
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((tasks, saved_at)) => Ok(Some(CheckpointDocument {
                kind,
                saved_at,
                tasks: serde_json::from_str(&tasks)?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn save(&self, kind: SeriesKind, tasks: &[PendingTask]) -> Result<()> {
        let payload = serde_json::to_string(tasks)?;

        sqlx::query(
            r#"
            INSERT INTO update_checkpoint (series_kind, tasks, pending, saved_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (series_kind)
            DO UPDATE SET
                tasks = EXCLUDED.tasks,
                pending = EXCLUDED.pending,
                saved_at = NOW()
            "#,
        )
        .bind(kind.as_str())
        .bind(payload)
        .bind(tasks.len() as i32)
        .execute(&self.pool)
        .await?;

        debug!(component = "checkpoint", kind = %kind, pending = tasks.len(), "체크포인트 저장");
        Ok(())
    }

    async fn load(&self, kind: SeriesKind) -> Result<Option<Vec<PendingTask>>> {
        Ok(self.read_document(kind).await?.map(|doc| doc.tasks))
    }

    async fn clear(&self, kind: SeriesKind) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM update_checkpoint
            WHERE series_kind = $1
            "#,
        )
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(component = "checkpoint", kind = %kind, "체크포인트 삭제");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointInfo>> {
        let mut infos = Vec::new();
        for kind in SeriesKind::ALL {
            if let Some(doc) = self.read_document(kind).await? {
                infos.push(doc.into());
            }
        }
        Ok(infos)
    }
}
