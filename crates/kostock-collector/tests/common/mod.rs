//! 통합 테스트 공용 도구: 스크립트로 동작을 정하는 데이터 소스.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use kostock_collector::config::{SupervisorConfig, UpdateConfig, WorkerConfig};
use kostock_collector::CollectorConfig;
use kostock_core::{FlowRecord, Instrument, PriceRecord, Record, SeriesKind};
use kostock_data::{
    DataError, DataSource, FetchResponse, RequestQuota, Result, SourceConnector,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn instrument(code: &str) -> Instrument {
    Instrument::new(code).unwrap()
}

/// `from`..=`to` 사이의 평일.
pub fn weekdays(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// 평일마다 종가가 1씩 오르는 가격 시리즈.
pub fn price_history(code: &str, from: NaiveDate, to: NaiveDate, base: Decimal) -> Vec<Record> {
    weekdays(from, to)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let close = base + Decimal::from(i as i64);
            Record::Price(PriceRecord {
                instrument: instrument(code),
                date,
                open: close,
                close,
                high: close,
                low: close,
                volume: 1000 + i as i64,
            })
        })
        .collect()
}

pub fn flow_history(code: &str, from: NaiveDate, to: NaiveDate) -> Vec<Record> {
    weekdays(from, to)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            Record::Flow(FlowRecord {
                instrument: instrument(code),
                date,
                foreign_qty: i as i64,
                institution_qty: -(i as i64),
                individual_qty: 0,
            })
        })
        .collect()
}

/// 기록된 조회 요청.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub instrument: Instrument,
    pub kind: SeriesKind,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// 스크립트 데이터 소스의 공유 상태.
pub struct Script {
    series: BTreeMap<(Instrument, SeriesKind), Vec<Record>>,
    /// 요청 하나가 돌려주는 최대 행 수
    chunk_rows: usize,
    /// 세션 하나의 요청 한도
    session_budget: u32,
    fetch_failures: Mutex<HashMap<(Instrument, SeriesKind), u32>>,
    connect_failures: Mutex<HashMap<SeriesKind, u32>>,
    connect_panics: Mutex<HashMap<SeriesKind, u32>>,
    empty_sessions: Mutex<HashMap<SeriesKind, u32>>,
    calls: Mutex<Vec<FetchCall>>,
    sessions: AtomicU32,
}

impl Script {
    pub fn new(chunk_rows: usize, session_budget: u32) -> Self {
        Self {
            series: BTreeMap::new(),
            chunk_rows,
            session_budget,
            fetch_failures: Mutex::new(HashMap::new()),
            connect_failures: Mutex::new(HashMap::new()),
            connect_panics: Mutex::new(HashMap::new()),
            empty_sessions: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            sessions: AtomicU32::new(0),
        }
    }

    pub fn with_series(mut self, code: &str, kind: SeriesKind, rows: Vec<Record>) -> Self {
        self.series.insert((instrument(code), kind), rows);
        self
    }

    /// 다음 `times`번의 조회를 일시적 오류로 실패시킵니다.
    pub fn fail_fetch(&self, code: &str, kind: SeriesKind, times: u32) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert((instrument(code), kind), times);
    }

    /// 다음 `times`번의 로그인을 실패시킵니다.
    pub fn fail_connect(&self, kind: SeriesKind, times: u32) {
        self.connect_failures.lock().unwrap().insert(kind, times);
    }

    /// 다음 `times`번의 로그인에서 패닉을 일으킵니다.
    pub fn panic_connect(&self, kind: SeriesKind, times: u32) {
        self.connect_panics.lock().unwrap().insert(kind, times);
    }

    /// 다음 `times`번의 로그인에서 요청 한도가 0인 세션을 엽니다.
    pub fn empty_sessions(&self, kind: SeriesKind, times: u32) {
        self.empty_sessions.lock().unwrap().insert(kind, times);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, code: &str, kind: SeriesKind) -> Vec<FetchCall> {
        let instrument = instrument(code);
        self.calls()
            .into_iter()
            .filter(|c| c.instrument == instrument && c.kind == kind)
            .collect()
    }

    pub fn sessions(&self) -> u32 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn rows(&self, code: &str, kind: SeriesKind) -> Vec<Record> {
        self.series
            .get(&(instrument(code), kind))
            .cloned()
            .unwrap_or_default()
    }
}

fn take_one<K: std::hash::Hash + Eq>(counter: &Mutex<HashMap<K, u32>>, key: &K) -> bool {
    let mut counter = counter.lock().unwrap();
    match counter.get_mut(key) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

/// 로그인할 때마다 새 요청 한도를 가진 세션을 여는 커넥터.
#[derive(Clone)]
pub struct ScriptedConnector {
    pub script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
        }
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    async fn connect(&self, kind: SeriesKind) -> Result<Arc<dyn DataSource>> {
        if take_one(&self.script.connect_panics, &kind) {
            panic!("scripted login panic for {}", kind);
        }
        if take_one(&self.script.connect_failures, &kind) {
            return Err(DataError::SessionError("scripted login failure".into()));
        }
        self.script.sessions.fetch_add(1, Ordering::SeqCst);
        let budget = if take_one(&self.script.empty_sessions, &kind) {
            0
        } else {
            self.script.session_budget
        };
        Ok(Arc::new(ScriptedSession {
            script: Arc::clone(&self.script),
            quota: RequestQuota::new(budget),
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    quota: RequestQuota,
}

#[async_trait]
impl DataSource for ScriptedSession {
    async fn fetch(
        &self,
        instrument: &Instrument,
        kind: SeriesKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<FetchResponse> {
        if !self.quota.try_acquire() {
            return Ok(FetchResponse::exhausted(Vec::new()));
        }

        self.script.calls.lock().unwrap().push(FetchCall {
            instrument: instrument.clone(),
            kind,
            from,
            to,
        });

        let key = (instrument.clone(), kind);
        if take_one(&self.script.fetch_failures, &key) {
            return Err(DataError::FetchError("scripted failure".into()));
        }

        let in_range: Vec<Record> = self
            .script
            .series
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.date() >= from && r.date() <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if in_range.len() > self.script.chunk_rows {
            let next_from = in_range[self.script.chunk_rows].date();
            let chunk = in_range[..self.script.chunk_rows].to_vec();
            Ok(FetchResponse::partial(chunk, next_from))
        } else {
            Ok(FetchResponse::complete(in_range))
        }
    }
}

/// 지연 없이 빠르게 도는 테스트 설정.
pub fn test_config(min_start: NaiveDate, reference: NaiveDate) -> CollectorConfig {
    CollectorConfig {
        update: UpdateConfig {
            min_start_date: min_start,
            reference_date: Some(reference),
            ..Default::default()
        },
        worker: WorkerConfig {
            request_delay_ms: 0,
            task_retries: 1,
        },
        supervisor: SupervisorConfig {
            poll_interval_ms: 1,
            quota_cooldown_ms: 0,
            max_failures: 5,
            backoff_base_ms: 1,
            backoff_max_ms: 10,
            channel_capacity: 64,
        },
        ..Default::default()
    }
}
