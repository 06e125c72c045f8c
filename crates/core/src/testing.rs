//! 测试替身：内存版缓存存储与可编排的数据源，供各 crate 的集成测试复用。

use crate::common::{CodeForm, SecurityCode};
use crate::market::entity::{PriceBar, QuoteBatch};
use crate::market::error::MarketError;
use crate::market::normalize::normalize_batch;
use crate::market::port::DailyQuoteSource;
use crate::store::coverage;
use crate::store::error::StoreError;
use crate::store::port::{CacheMiss, CacheRead, PriceStore, SeriesMetadata, WriteSummary};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 构造一根收盘价为 `close` 的日线，其他价格取同值。
pub fn bar(code: &str, date: NaiveDate, close: f64) -> PriceBar {
    PriceBar {
        code: code.to_string(),
        date,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000.0,
    }
}

/// # Summary
/// 基于 DashMap 的内存缓存存储，语义与 SQLite 实现一致（只插新键、元数据只扩张）。
#[derive(Default)]
pub struct MemPriceStore {
    rows: DashMap<String, BTreeMap<NaiveDate, PriceBar>>,
    meta: DashMap<String, SeriesMetadata>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// 令后续写入全部失败，用于验证后台落库错误不会传回调用方。
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self, code: &str) -> Vec<PriceBar> {
        self.rows
            .get(code)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PriceStore for MemPriceStore {
    async fn read_daily(
        &self,
        code: &SecurityCode,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> CacheRead {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let Some(series) = self.rows.get(code.as_str()) else {
            return CacheRead::Miss(CacheMiss::NoTable);
        };
        let meta = self.meta.get(code.as_str()).map(|m| m.clone());
        let Some(meta) = meta else {
            return CacheRead::Miss(CacheMiss::NoMetadata);
        };
        let cov = coverage::check(Some(&meta), from, to);
        if !cov.covered {
            return CacheRead::Miss(CacheMiss::NotCovered(cov));
        }
        let bars: Vec<PriceBar> = series
            .values()
            .filter(|b| from.is_none_or(|f| b.date >= f) && to.is_none_or(|t| b.date <= t))
            .cloned()
            .collect();
        if bars.is_empty() {
            CacheRead::Miss(CacheMiss::Empty)
        } else {
            CacheRead::Hit(bars)
        }
    }

    async fn write_daily(
        &self,
        code: &SecurityCode,
        batch: QuoteBatch,
        _from: Option<NaiveDate>,
        _to: Option<NaiveDate>,
    ) -> Result<WriteSummary, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".into()));
        }
        let bars = match normalize_batch(code.as_str(), &batch) {
            Ok(bars) => bars,
            Err(_) => return Ok(WriteSummary::default()),
        };

        let mut series = self.rows.entry(code.to_string()).or_default();
        let mut summary = WriteSummary::default();
        for bar in bars {
            if series.contains_key(&bar.date) {
                summary.skipped += 1;
            } else {
                series.insert(bar.date, bar);
                summary.inserted += 1;
            }
        }

        let (Some(first), Some(last)) = (series.keys().next(), series.keys().next_back()) else {
            return Ok(summary);
        };
        let count = i64::try_from(series.len()).unwrap_or(i64::MAX);
        let mut meta = self
            .meta
            .entry(code.to_string())
            .or_insert_with(|| SeriesMetadata {
                code: code.to_string(),
                from_date: *first,
                to_date: *last,
                record_count: 0,
                last_updated: Utc::now(),
            });
        meta.from_date = meta.from_date.min(*first);
        meta.to_date = meta.to_date.max(*last);
        meta.record_count = count;
        meta.last_updated = Utc::now();
        summary.metadata = Some(meta.clone());
        Ok(summary)
    }

    async fn metadata(&self, code: &SecurityCode) -> Result<Option<SeriesMetadata>, StoreError> {
        Ok(self.meta.get(code.as_str()).map(|m| m.clone()))
    }
}

/// # Summary
/// 可编排响应的日线数据源，记录调用次数与收到的代码。
pub struct ScriptedSource {
    name: &'static str,
    form: CodeForm,
    enabled: AtomicBool,
    response: Mutex<Result<Vec<PriceBar>, MarketError>>,
    calls: AtomicUsize,
    seen_codes: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(name: &'static str, form: CodeForm) -> Self {
        Self {
            name,
            form,
            enabled: AtomicBool::new(true),
            response: Mutex::new(Ok(Vec::new())),
            calls: AtomicUsize::new(0),
            seen_codes: Mutex::new(Vec::new()),
        }
    }

    pub fn returning(self, bars: Vec<PriceBar>) -> Self {
        self.respond(Ok(bars));
        self
    }

    pub fn failing(self, err: MarketError) -> Self {
        self.respond(Err(err));
        self
    }

    pub fn disabled(self) -> Self {
        self.enabled.store(false, Ordering::SeqCst);
        self
    }

    pub fn respond(&self, response: Result<Vec<PriceBar>, MarketError>) {
        *self.response.lock().unwrap_or_else(|e| e.into_inner()) = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_codes(&self) -> Vec<String> {
        self.seen_codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl DailyQuoteSource for ScriptedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn code_form(&self) -> CodeForm {
        self.form
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn fetch_daily(
        &self,
        code: &str,
        _from: Option<NaiveDate>,
        _to: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(code.to_string());
        self.response
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
