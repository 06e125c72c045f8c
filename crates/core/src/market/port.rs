use crate::common::CodeForm;
use crate::market::entity::{ListedInfo, PriceBar};
use crate::market::error::MarketError;
use async_trait::async_trait;
use chrono::NaiveDate;

/// # Summary
/// 日线行情数据源接口（外部原始数据源）。
///
/// # Invariants
/// - `Ok(vec![])` 表示数据源正常但没有数据；`Err` 表示数据源本身失败。
///   两者对调用方而言都意味着“切换到下一个数据源”，区分仅用于观测。
/// - 实现者不得因单次失败 panic，也不得重试到阻塞调用方。
#[async_trait]
pub trait DailyQuoteSource: Send + Sync {
    /// 数据源名称，用于日志与获取报告。
    fn name(&self) -> &'static str;

    /// 该数据源期望的代码形态。
    fn code_form(&self) -> CodeForm;

    /// # Summary
    /// 数据源当前是否可用。
    ///
    /// # Logic
    /// 不得发起网络请求；被永久禁用的数据源（例如缺少凭据）返回 false。
    fn is_enabled(&self) -> bool {
        true
    }

    /// # Summary
    /// 获取指定证券在日期区间内的日线。
    ///
    /// # Arguments
    /// * `code`: 已按 `code_form()` 转换后的代码。
    /// * `from`: 开始日（包含），None 表示不限。
    /// * `to`: 结束日（包含），None 表示不限。
    ///
    /// # Returns
    /// 按日期升序的日线列表，或 `MarketError`。
    async fn fetch_daily(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, MarketError>;
}

/// # Summary
/// 上市证券主数据的外部数据源接口。
#[async_trait]
pub trait ListedInfoSource: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    /// # Summary
    /// 获取上市证券信息。
    ///
    /// # Arguments
    /// * `code`: 可选，指定单一证券（裸代码）。
    /// * `date`: 可选，指定快照日期。
    ///
    /// # Returns
    /// 证券信息列表，或 `MarketError`。
    async fn fetch_listed_info(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ListedInfo>, MarketError>;
}
