use crate::persist::{PersistJob, PersistWorker};
use chrono::NaiveDate;
use kabu_core::common::SecurityCode;
use kabu_core::market::entity::{PriceBar, QuoteBatch};
use kabu_core::market::error::ValidationError;
use kabu_core::market::port::DailyQuoteSource;
use kabu_core::store::port::{CacheMiss, CacheRead, PriceStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// 缓存在获取报告中的名称
pub const CACHE_SOURCE: &str = "cache";

/// 单个数据源在一次获取中的结果。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SourceOutcome {
    // 命中，附带行数
    Hit(usize),
    Empty,
    Failed(String),
    // 数据源被禁用，未调用
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceAttempt {
    pub source: &'static str,
    // 实际传给该数据源的代码
    pub code: String,
    pub outcome: SourceOutcome,
}

/// # Summary
/// 一次获取的过程记录，区分“没找到”与“数据源失败”，仅用于观测。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionReport {
    pub code: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub attempts: Vec<SourceAttempt>,
    pub served_by: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct Acquisition {
    pub bars: Vec<PriceBar>,
    pub report: AcquisitionReport,
}

fn describe_miss(miss: &CacheMiss) -> SourceOutcome {
    match miss {
        CacheMiss::Failed(reason) => SourceOutcome::Failed(reason.clone()),
        CacheMiss::Disabled => SourceOutcome::Skipped,
        _ => SourceOutcome::Empty,
    }
}

/// # Summary
/// 日线获取管线：按固定顺序依次尝试缓存与外部数据源，首个非空结果胜出。
///
/// # Invariants
/// - 缓存始终以调用方的原始代码查询与写入。
/// - 外部数据源按自身的 `code_form()` 接收代码。
/// - 外部命中后同步返回结果，落库交给后台工作者，调用方不等待也不感知落库错误。
pub struct AcquisitionPipeline {
    store: Arc<dyn PriceStore>,
    sources: Vec<Arc<dyn DailyQuoteSource>>,
    persist: PersistWorker,
}

impl AcquisitionPipeline {
    /// # Arguments
    /// * `store`: 日线缓存。
    /// * `sources`: 外部数据源，顺序即瀑布顺序。
    /// * `persist`: 后台落库提交端。
    pub fn new(
        store: Arc<dyn PriceStore>,
        sources: Vec<Arc<dyn DailyQuoteSource>>,
        persist: PersistWorker,
    ) -> Self {
        Self {
            store,
            sources,
            persist,
        }
    }

    /// 获取日线。找不到数据时返回空列表，只有输入不合法时返回错误。
    pub async fn fetch_daily(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, ValidationError> {
        Ok(self.fetch_daily_traced(code, from, to).await?.bars)
    }

    /// # Summary
    /// 获取日线并返回过程记录。
    ///
    /// # Logic
    /// 1. 校验代码与区间，不合法立即返回错误，不访问任何数据源。
    /// 2. 以原始代码查询缓存，命中即返回。
    /// 3. 依次尝试外部数据源：禁用的跳过，空结果或失败则继续下一个。
    /// 4. 首个非空结果改写为原始代码后返回，并提交后台落库。
    /// 5. 全部落空返回空列表。
    ///
    /// # Arguments
    /// * `code`: 调用方代码，可带市场后缀（`7203.JP`）。
    /// * `from`: 开始日（包含）。
    /// * `to`: 结束日（包含）。
    ///
    /// # Returns
    /// `Acquisition`，或 `ValidationError`。
    pub async fn fetch_daily_traced(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Acquisition, ValidationError> {
        let code = SecurityCode::parse(code)?;
        if let (Some(f), Some(t)) = (from, to)
            && f > t
        {
            return Err(ValidationError::InvertedRange { from: f, to: t });
        }

        let mut report = AcquisitionReport {
            code: code.to_string(),
            from,
            to,
            attempts: Vec::with_capacity(self.sources.len() + 1),
            served_by: None,
        };

        match self.store.read_daily(&code, from, to).await {
            CacheRead::Hit(bars) => {
                info!(code = %code, count = bars.len(), "served from cache");
                report.attempts.push(SourceAttempt {
                    source: CACHE_SOURCE,
                    code: code.to_string(),
                    outcome: SourceOutcome::Hit(bars.len()),
                });
                report.served_by = Some(CACHE_SOURCE);
                return Ok(Acquisition { bars, report });
            }
            CacheRead::Miss(miss) => {
                info!(code = %code, reason = ?miss, "cache miss");
                report.attempts.push(SourceAttempt {
                    source: CACHE_SOURCE,
                    code: code.to_string(),
                    outcome: describe_miss(&miss),
                });
            }
        }

        for source in &self.sources {
            let source_code = code.for_form(source.code_form()).to_string();
            if !source.is_enabled() {
                info!(source = source.name(), "source disabled, skipping");
                report.attempts.push(SourceAttempt {
                    source: source.name(),
                    code: source_code,
                    outcome: SourceOutcome::Skipped,
                });
                continue;
            }

            let outcome = match source.fetch_daily(&source_code, from, to).await {
                Ok(mut bars) if !bars.is_empty() => {
                    info!(source = source.name(), code = %code, count = bars.len(), "source hit");
                    for bar in &mut bars {
                        bar.code = code.to_string();
                    }
                    self.persist.submit(PersistJob::Daily {
                        code: code.clone(),
                        batch: QuoteBatch::from_bars(&bars),
                        from,
                        to,
                    });
                    report.attempts.push(SourceAttempt {
                        source: source.name(),
                        code: source_code,
                        outcome: SourceOutcome::Hit(bars.len()),
                    });
                    report.served_by = Some(source.name());
                    return Ok(Acquisition { bars, report });
                }
                Ok(_) => {
                    info!(source = source.name(), code = %source_code, "source returned no data");
                    SourceOutcome::Empty
                }
                Err(e) => {
                    warn!(source = source.name(), code = %source_code, error = %e, "source failed");
                    SourceOutcome::Failed(e.to_string())
                }
            };
            report.attempts.push(SourceAttempt {
                source: source.name(),
                code: source_code,
                outcome,
            });
        }

        warn!(code = %code, "no source returned data");
        Ok(Acquisition {
            bars: Vec::new(),
            report,
        })
    }
}
