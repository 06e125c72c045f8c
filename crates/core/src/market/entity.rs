use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 单根日线数据实体。
///
/// # Invariants
/// - `date` 为自然日，不带时间部分。
/// - 价格与成交量均为有限数值（批次规范化阶段保证）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    // 所属证券代码（缓存键形态）
    pub code: String,
    // 交易日
    pub date: NaiveDate,
    // 开盘价
    pub open: f64,
    // 最高价
    pub high: f64,
    // 最低价
    pub low: f64,
    // 收盘价
    pub close: f64,
    // 成交量
    pub volume: f64,
}

/// # Summary
/// 数据源交付的原始日期表示，落库前统一折算为自然日。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuoteDate {
    Day(NaiveDate),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl QuoteDate {
    /// # Summary
    /// 折算为规范的自然日。
    ///
    /// # Logic
    /// 1. 时间戳取 UTC 日期部分。
    /// 2. 文本依次尝试 `YYYY-MM-DD`、`YYYYMMDD`、`YYYY/MM/DD`、RFC3339 与 `YYYY-MM-DD HH:MM:SS`。
    ///
    /// # Returns
    /// 无法识别时返回 None。
    pub fn to_day(&self) -> Option<NaiveDate> {
        match self {
            QuoteDate::Day(d) => Some(*d),
            QuoteDate::Timestamp(ts) => Some(ts.date_naive()),
            QuoteDate::Text(raw) => {
                let s = raw.trim();
                ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"]
                    .iter()
                    .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                    .or_else(|| {
                        DateTime::parse_from_rfc3339(s)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc).date_naive())
                    })
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                            .ok()
                            .map(|dt| dt.date())
                    })
            }
        }
    }
}

impl From<NaiveDate> for QuoteDate {
    fn from(d: NaiveDate) -> Self {
        QuoteDate::Day(d)
    }
}

/// # Summary
/// 待写入缓存的原始行，字段可能缺失，必须经过规范化才能成为 `PriceBar`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteRow {
    pub date: Option<QuoteDate>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl From<&PriceBar> for QuoteRow {
    fn from(bar: &PriceBar) -> Self {
        Self {
            date: Some(QuoteDate::Day(bar.date)),
            open: Some(bar.open),
            high: Some(bar.high),
            low: Some(bar.low),
            close: Some(bar.close),
            volume: Some(bar.volume),
        }
    }
}

/// # Summary
/// 一次写入请求携带的行集合，保持到达顺序。
///
/// # Invariants
/// - 以日期为索引构造的批次，会在构造时把索引提升为行内的 `date` 字段。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteBatch {
    rows: Vec<QuoteRow>,
}

impl QuoteBatch {
    pub fn from_rows(rows: Vec<QuoteRow>) -> Self {
        Self { rows }
    }

    pub fn from_bars(bars: &[PriceBar]) -> Self {
        Self {
            rows: bars.iter().map(QuoteRow::from).collect(),
        }
    }

    /// # Summary
    /// 由“日期索引 + 行”的序列构造批次。
    ///
    /// # Logic
    /// 行内已有日期字段时以字段为准，否则使用索引日期。
    pub fn indexed(entries: Vec<(QuoteDate, QuoteRow)>) -> Self {
        let rows = entries
            .into_iter()
            .map(|(index, mut row)| {
                if row.date.is_none() {
                    row.date = Some(index);
                }
                row
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[QuoteRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// # Summary
/// 上市证券主数据（每个交易日一份快照）。
///
/// # Invariants
/// - (`code`, `date`) 组合唯一。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListedInfo {
    pub date: NaiveDate,
    pub code: String,
    pub company_name: String,
    pub company_name_english: String,
    #[serde(rename = "Sector17Code")]
    pub sector17_code: String,
    #[serde(rename = "Sector17CodeName")]
    pub sector17_code_name: String,
    #[serde(rename = "Sector33Code")]
    pub sector33_code: String,
    #[serde(rename = "Sector33CodeName")]
    pub sector33_code_name: String,
    pub scale_category: String,
    pub market_code: String,
    pub market_code_name: String,
}

/// 交易日历中的一天。`holiday_division` 为供应商定义的休市区分代码。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TradingDay {
    pub date: NaiveDate,
    pub holiday_division: String,
}

/// 字段繁多且随供应商版本变化的记录（财报、决算公告日程），按 JSON 对象原样保留。
pub type VendorRecord = serde_json::Map<String, serde_json::Value>;
