use crate::build_client;
use async_trait::async_trait;
use chrono::NaiveDate;
use kabu_core::common::CodeForm;
use kabu_core::market::entity::{PriceBar, QuoteDate};
use kabu_core::market::error::MarketError;
use kabu_core::market::port::DailyQuoteSource;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://stooq.com";

/// # Summary
/// Stooq 免费镜像，按 CSV 下载日线。瀑布中的最后一个数据源。
///
/// # Invariants
/// - 使用调用方的原始代码（例如 `7203.JP`），请求前转为小写。
/// - 响应体为 `No data` 时视为正常的空结果。
#[derive(Clone)]
pub struct StooqSource {
    client: Client,
    base_url: String,
}

impl StooqSource {
    pub fn new() -> Result<Self, MarketError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, MarketError> {
        let client = build_client(Duration::from_secs(15))
            .map_err(|e| MarketError::Unknown(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct StooqRow {
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    // 指数等品种没有成交量列
    #[serde(default)]
    volume: Option<f64>,
}

/// # Summary
/// 解析 Stooq 日线 CSV。
///
/// # Logic
/// 1. `No data` 响应 => 空列表。
/// 2. 逐行反序列化；价格缺失或日期无法解析的行被跳过，成交量缺失按 0 处理。
///
/// # Returns
/// 日线列表；CSV 结构本身损坏时返回 `MarketError::Parse`。
pub fn parse_csv(code: &str, body: &str) -> Result<Vec<PriceBar>, MarketError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("no data") {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(trimmed.as_bytes());

    let mut bars = Vec::new();
    for record in reader.deserialize::<StooqRow>() {
        let row = record.map_err(|e| MarketError::Parse(e.to_string()))?;
        let date = QuoteDate::Text(row.date).to_day();
        if let (Some(date), Some(open), Some(high), Some(low), Some(close)) =
            (date, row.open, row.high, row.low, row.close)
        {
            bars.push(PriceBar {
                code: code.to_string(),
                date,
                open,
                high,
                low,
                close,
                volume: row.volume.unwrap_or(0.0),
            });
        }
    }
    Ok(bars)
}

#[async_trait]
impl DailyQuoteSource for StooqSource {
    fn name(&self) -> &'static str {
        "stooq"
    }

    fn code_form(&self) -> CodeForm {
        CodeForm::Original
    }

    async fn fetch_daily(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, MarketError> {
        let symbol = code.to_lowercase();
        let mut params = vec![("s", symbol.clone()), ("i", "d".to_string())];
        if let Some(from) = from {
            params.push(("d1", from.format("%Y%m%d").to_string()));
        }
        if let Some(to) = to {
            params.push(("d2", to.format("%Y%m%d").to_string()));
        }

        let resp = self
            .client
            .get(format!("{}/q/d/l/", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            warn!(symbol, status = resp.status().as_u16(), "stooq request failed");
            return Err(MarketError::Status(resp.status().as_u16()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;

        let bars = parse_csv(code, &body)?;
        debug!(symbol, count = bars.len(), "stooq csv parsed");
        Ok(bars)
    }
}
