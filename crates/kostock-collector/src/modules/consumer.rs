//! 적재 컨슈머.
//!
//! 두 워커가 보낸 레코드를 저장소에 기록하고, 종목별로 가격과 수급 시리즈가
//! 모두 완료되었을 때만 워터마크를 갱신합니다. 저장소 쓰기는 이 컨슈머
//! 하나로 직렬화됩니다.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use kostock_core::{Instrument, Record, SeriesKind};
use kostock_data::ChartStore;

use crate::modules::message::ChartMessage;
use crate::stats::ConsumerReport;

/// 진행 상황 (완료 표시 수 / 전체 기대 수).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerProgress {
    /// 받은 완료 표시 수 (종목·시리즈별 중복 제외)
    pub markers: usize,
    /// 기대하는 완료 표시 수 (종목 수 × 2)
    pub expected: usize,
    /// 워터마크를 갱신한 종목 수
    pub watermarks: usize,
}

impl ConsumerProgress {
    pub fn ratio(&self) -> f64 {
        if self.expected == 0 {
            1.0
        } else {
            self.markers as f64 / self.expected as f64
        }
    }
}

/// 적재 컨슈머.
pub struct IngestionConsumer {
    store: Arc<dyn ChartStore>,
    rx: mpsc::Receiver<ChartMessage>,
    progress: watch::Sender<ConsumerProgress>,
    /// 종목별 완료된 시리즈와 각 시리즈의 완료 기준일
    completion: HashMap<Instrument, BTreeMap<SeriesKind, NaiveDate>>,
    /// 이번 실행에서 저장에 실패한 종목 (워터마크 갱신 안 함)
    failed: HashSet<Instrument>,
    report: ConsumerReport,
}

impl IngestionConsumer {
    /// 컨슈머와 진행 상황 수신기를 생성합니다.
    pub fn new(
        store: Arc<dyn ChartStore>,
        rx: mpsc::Receiver<ChartMessage>,
        total_instruments: usize,
    ) -> (Self, watch::Receiver<ConsumerProgress>) {
        let (progress, progress_rx) = watch::channel(ConsumerProgress {
            expected: total_instruments * SeriesKind::ALL.len(),
            ..Default::default()
        });

        (
            Self {
                store,
                rx,
                progress,
                completion: HashMap::new(),
                failed: HashSet::new(),
                report: ConsumerReport::default(),
            },
            progress_rx,
        )
    }

    /// 종료 신호를 받을 때까지 채널을 처리합니다.
    ///
    /// 종료 신호 이후에도 채널에 남은 메시지를 모두 처리한 뒤 반환합니다.
    pub async fn run(mut self) -> ConsumerReport {
        info!(
            component = "consumer",
            expected = self.progress.borrow().expected,
            "적재 시작"
        );

        while let Some(message) = self.rx.recv().await {
            if message == ChartMessage::Stop {
                break;
            }
            self.handle(message).await;
        }

        // 종료 신호 뒤에 도착한 메시지까지 처리
        while let Ok(message) = self.rx.try_recv() {
            if message != ChartMessage::Stop {
                self.handle(message).await;
            }
        }

        self.report.incomplete = self
            .completion
            .values()
            .filter(|kinds| kinds.len() < SeriesKind::ALL.len())
            .count();

        info!(
            component = "consumer",
            rows_written = self.report.rows_written,
            rows_failed = self.report.rows_failed,
            watermarks = self.report.watermarks,
            incomplete = self.report.incomplete,
            "적재 종료"
        );
        self.report
    }

    async fn handle(&mut self, message: ChartMessage) {
        match message {
            ChartMessage::Records(records) => self.ingest(records).await,
            ChartMessage::TaskEnd {
                instrument,
                kind,
                through,
            } => self.complete(instrument, kind, through).await,
            ChartMessage::Stop => {}
        }
    }

    async fn ingest(&mut self, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }

        match self.store.upsert_batch(&records).await {
            Ok(_) => {
                self.report.rows_written += records.len();
            }
            Err(e) => {
                self.report.rows_failed += records.len();
                let instruments: HashSet<&Instrument> =
                    records.iter().map(Record::instrument).collect();
                for instrument in instruments {
                    error!(
                        component = "consumer",
                        instrument = %instrument,
                        error = %e,
                        "레코드 저장 실패"
                    );
                    self.failed.insert(instrument.clone());
                }
            }
        }
    }

    async fn complete(&mut self, instrument: Instrument, kind: SeriesKind, through: NaiveDate) {
        let kinds = self.completion.entry(instrument.clone()).or_default();
        if kinds.insert(kind, through).is_some() {
            debug!(component = "consumer", instrument = %instrument, kind = %kind, "중복 완료 표시");
            return;
        }

        self.progress.send_modify(|p| p.markers += 1);

        if kinds.len() < SeriesKind::ALL.len() {
            return;
        }
        let Some(watermark) = kinds.values().min().copied() else {
            return;
        };

        if self.failed.contains(&instrument) {
            warn!(
                component = "consumer",
                instrument = %instrument,
                "저장 실패 레코드가 있어 워터마크 갱신 안 함"
            );
            return;
        }

        match self.store.set_watermark(&instrument, watermark).await {
            Ok(()) => {
                self.report.watermarks += 1;
                self.progress.send_modify(|p| p.watermarks += 1);
                debug!(
                    component = "consumer",
                    instrument = %instrument,
                    watermark = %watermark,
                    "워터마크 갱신"
                );
            }
            Err(e) => {
                error!(component = "consumer", instrument = %instrument, error = %e, "워터마크 갱신 실패");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kostock_core::{FlowRecord, PriceRecord};
    use kostock_data::{DataError, InstrumentMeta, MemoryChartStore};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn instrument(code: &str) -> Instrument {
        Instrument::new(code).unwrap()
    }

    fn price(code: &str, date: NaiveDate, close: Decimal) -> Record {
        Record::Price(PriceRecord {
            instrument: instrument(code),
            date,
            open: close,
            close,
            high: close,
            low: close,
            volume: 1000,
        })
    }

    fn flow(code: &str, date: NaiveDate) -> Record {
        Record::Flow(FlowRecord {
            instrument: instrument(code),
            date,
            foreign_qty: 10,
            institution_qty: -3,
            individual_qty: -7,
        })
    }

    fn end(code: &str, kind: SeriesKind, through: NaiveDate) -> ChartMessage {
        ChartMessage::TaskEnd {
            instrument: instrument(code),
            kind,
            through,
        }
    }

    async fn run_messages(
        store: Arc<dyn ChartStore>,
        total: usize,
        messages: Vec<ChartMessage>,
    ) -> (ConsumerReport, ConsumerProgress) {
        let (tx, rx) = mpsc::channel(64);
        let (consumer, progress) = IngestionConsumer::new(store, rx, total);
        for message in messages {
            tx.send(message).await.unwrap();
        }
        tx.send(ChartMessage::Stop).await.unwrap();
        let report = consumer.run().await;
        let progress = *progress.borrow();
        (report, progress)
    }

    #[tokio::test]
    async fn test_watermark_requires_both_series() {
        let store = Arc::new(MemoryChartStore::new());
        let target = date(2020, 8, 7);

        let (report, progress) = run_messages(
            store.clone(),
            2,
            vec![
                ChartMessage::Records(vec![price("005930", target, dec!(57900))]),
                end("005930", SeriesKind::Price, target),
                ChartMessage::Records(vec![flow("000660", target)]),
                end("000660", SeriesKind::Flow, target),
                ChartMessage::Records(vec![flow("005930", target)]),
                end("005930", SeriesKind::Flow, target),
            ],
        )
        .await;

        assert_eq!(store.watermark(&instrument("005930")).await, Some(target));
        assert_eq!(store.watermark(&instrument("000660")).await, None);
        assert_eq!(report.watermarks, 1);
        assert_eq!(report.incomplete, 1);
        assert_eq!(report.rows_written, 3);
        assert_eq!(progress.markers, 3);
        assert_eq!(progress.expected, 4);
    }

    #[tokio::test]
    async fn test_interleaving_order_does_not_matter() {
        let store = Arc::new(MemoryChartStore::new());
        let target = date(2020, 8, 7);

        run_messages(
            store.clone(),
            1,
            vec![
                end("035720", SeriesKind::Flow, target),
                ChartMessage::Records(vec![price("035720", target, dec!(360500))]),
                end("035720", SeriesKind::Price, target),
            ],
        )
        .await;

        assert_eq!(store.watermark(&instrument("035720")).await, Some(target));
    }

    #[tokio::test]
    async fn test_duplicate_marker_does_not_complete() {
        let store = Arc::new(MemoryChartStore::new());
        let target = date(2020, 8, 7);

        let (report, progress) = run_messages(
            store.clone(),
            1,
            vec![
                end("005930", SeriesKind::Price, target),
                end("005930", SeriesKind::Price, target),
            ],
        )
        .await;

        assert_eq!(store.watermark(&instrument("005930")).await, None);
        assert_eq!(report.watermarks, 0);
        assert_eq!(progress.markers, 1);
    }

    #[tokio::test]
    async fn test_watermark_is_earlier_through_date() {
        let store = Arc::new(MemoryChartStore::new());

        run_messages(
            store.clone(),
            1,
            vec![
                end("005930", SeriesKind::Price, date(2020, 8, 7)),
                end("005930", SeriesKind::Flow, date(2020, 8, 6)),
            ],
        )
        .await;

        assert_eq!(
            store.watermark(&instrument("005930")).await,
            Some(date(2020, 8, 6))
        );
    }

    #[tokio::test]
    async fn test_drains_messages_after_stop() {
        let store = Arc::new(MemoryChartStore::new());
        let target = date(2020, 8, 7);
        let (tx, rx) = mpsc::channel(16);
        let (consumer, _progress) = IngestionConsumer::new(store.clone(), rx, 1);

        tx.send(ChartMessage::Stop).await.unwrap();
        tx.send(ChartMessage::Records(vec![price("005930", target, dec!(1))]))
            .await
            .unwrap();
        drop(tx);

        let report = consumer.run().await;
        assert_eq!(report.rows_written, 1);
        assert_eq!(store.row_count(&instrument("005930")).await, 1);
    }

    /// 특정 종목 저장이 항상 실패하는 저장소
    struct FailingStore {
        inner: MemoryChartStore,
        broken: Instrument,
    }

    #[async_trait]
    impl ChartStore for FailingStore {
        async fn upsert(&self, record: &Record) -> kostock_data::Result<()> {
            if record.instrument() == &self.broken {
                return Err(DataError::InsertError("disk full".into()));
            }
            self.inner.upsert(record).await
        }

        async fn last_close(
            &self,
            instrument: &Instrument,
            on_or_before: NaiveDate,
        ) -> kostock_data::Result<Option<Decimal>> {
            self.inner.last_close(instrument, on_or_before).await
        }

        async fn metadata(&self) -> kostock_data::Result<BTreeMap<Instrument, InstrumentMeta>> {
            self.inner.metadata().await
        }

        async fn set_watermark(
            &self,
            instrument: &Instrument,
            date: NaiveDate,
        ) -> kostock_data::Result<()> {
            self.inner.set_watermark(instrument, date).await
        }

        async fn register_instrument(
            &self,
            instrument: &Instrument,
            listing_date: Option<NaiveDate>,
        ) -> kostock_data::Result<()> {
            self.inner.register_instrument(instrument, listing_date).await
        }
    }

    #[tokio::test]
    async fn test_failed_upsert_blocks_watermark() {
        let store = Arc::new(FailingStore {
            inner: MemoryChartStore::new(),
            broken: instrument("000660"),
        });
        let target = date(2020, 8, 7);

        let (report, _) = run_messages(
            store.clone(),
            1,
            vec![
                ChartMessage::Records(vec![price("000660", target, dec!(81000))]),
                end("000660", SeriesKind::Price, target),
                end("000660", SeriesKind::Flow, target),
            ],
        )
        .await;

        assert_eq!(report.rows_failed, 1);
        assert_eq!(report.watermarks, 0);
        assert_eq!(store.inner.watermark(&instrument("000660")).await, None);
    }
}
