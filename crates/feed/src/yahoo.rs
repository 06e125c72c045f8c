use crate::build_client;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kabu_core::common::CodeForm;
use kabu_core::market::entity::PriceBar;
use kabu_core::market::error::MarketError;
use kabu_core::market::port::DailyQuoteSource;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
// 东京证券交易所的 Yahoo 代码后缀
const TSE_SUFFIX: &str = ".T";

/// # Summary
/// 基于 Yahoo v8 chart 接口的日线数据源，占据瀑布中券商数据源的位置。
///
/// # Invariants
/// - 接收去掉后缀的裸代码，请求时补 `.T` 后缀。
/// - 时间戳按交易所的 UTC 偏移折算为当地交易日。
#[derive(Clone)]
pub struct YahooChartSource {
    client: Client,
    base_url: String,
}

impl YahooChartSource {
    /// # Summary
    /// 创建数据源实例。
    ///
    /// # Logic
    /// 1. 配置 10 秒超时与浏览器 UA，减少被拦截。
    /// 2. 客户端构建失败时返回错误，而不是 panic。
    pub fn new() -> Result<Self, MarketError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, MarketError> {
        let client = build_client(Duration::from_secs(10))
            .map_err(|e| MarketError::Unknown(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// 裸代码 => Yahoo 代码。已带后缀的代码原样使用。
pub fn chart_symbol(code: &str) -> String {
    if code.contains('.') {
        code.to_string()
    } else {
        format!("{code}{TSE_SUFFIX}")
    }
}

/// # Summary
/// Yahoo API 响应顶层结构。
///
/// # Invariants
/// - 映射自 Yahoo v8 chart 接口。
#[derive(Deserialize, Debug)]
struct YahooResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Deserialize, Debug)]
struct YahooError {
    description: String,
}

/// # Summary
/// Yahoo API 单个时间序列结果。
#[derive(Deserialize, Debug)]
struct YahooResult {
    meta: Option<YahooMeta>,
    // 没有成交时整个字段缺失
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
struct YahooMeta {
    // 交易所相对 UTC 的偏移秒数
    gmtoffset: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

/// # Summary
/// Yahoo API 原始报价数据。
#[derive(Deserialize, Debug)]
struct YahooQuote {
    /// 开盘价列表
    #[serde(default)]
    open: Vec<Option<f64>>,
    /// 最高价列表
    #[serde(default)]
    high: Vec<Option<f64>>,
    /// 最低价列表
    #[serde(default)]
    low: Vec<Option<f64>>,
    /// 收盘价列表
    #[serde(default)]
    close: Vec<Option<f64>>,
    /// 成交量列表
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn day_start(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp())
}

#[async_trait]
impl DailyQuoteSource for YahooChartSource {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn code_form(&self) -> CodeForm {
        CodeForm::Normalized
    }

    /// # Summary
    /// 从 Yahoo Finance 抓取日线。
    ///
    /// # Logic
    /// 1. 构建包含 period1, period2 的 chart URL，区间未指定时取全部历史。
    /// 2. 发起请求并解析嵌套 JSON。
    /// 3. 逐个时间戳对齐 OHLCV，任一字段为 null 的点被丢弃。
    /// 4. 时间戳加上交易所偏移后取日期。
    ///
    /// # Arguments
    /// * `code`: 裸代码。
    /// * `from`: 开始日。
    /// * `to`: 结束日（包含）。
    ///
    /// # Returns
    /// 日线列表，或 MarketError。
    async fn fetch_daily(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, MarketError> {
        let symbol = chart_symbol(code);
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let period1 = from.map_or(0, day_start);
        // period2 为开区间，结束日需要包含在内
        let period2 = to
            .and_then(|d| d.succ_opt())
            .map_or_else(|| Utc::now().timestamp(), day_start);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MarketError::Status(resp.status().as_u16()));
        }

        let json: YahooResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        if let Some(err) = json.chart.error {
            return Err(MarketError::Unknown(err.description));
        }

        let result = json
            .chart
            .result
            .ok_or(MarketError::NotFound)?
            .pop()
            .ok_or(MarketError::NotFound)?;

        let offset = result.meta.as_ref().and_then(|m| m.gmtoffset).unwrap_or(0);
        let Some(quote) = result.indicators.quote.first() else {
            return Ok(Vec::new());
        };

        let mut bars = Vec::new();
        for (i, &ts) in result.timestamp.iter().enumerate() {
            if let (Some(o), Some(h), Some(l), Some(c), Some(v), Some(local)) = (
                quote.open.get(i).and_then(|x| *x),
                quote.high.get(i).and_then(|x| *x),
                quote.low.get(i).and_then(|x| *x),
                quote.close.get(i).and_then(|x| *x),
                quote.volume.get(i).and_then(|x| *x),
                DateTime::from_timestamp(ts + offset, 0),
            ) {
                bars.push(PriceBar {
                    code: code.to_string(),
                    date: local.date_naive(),
                    open: o,
                    high: h,
                    low: l,
                    close: c,
                    volume: v,
                });
            }
        }

        debug!(symbol, count = bars.len(), "yahoo chart bars parsed");
        Ok(bars)
    }
}
