use super::coverage::Coverage;
use super::error::StoreError;
use crate::common::SecurityCode;
use crate::market::entity::{ListedInfo, PriceBar, QuoteBatch};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 单个代码的缓存序列元数据。
///
/// # Invariants
/// - `from_date <= to_date`。
/// - `record_count` 等于该代码实际落库的行数。
/// - `from_date`/`to_date` 只会扩张，不会收缩。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub code: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub record_count: i64,
    pub last_updated: DateTime<Utc>,
}

/// # Summary
/// 缓存未命中的原因，仅用于观测；对外统一表现为空结果。
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMiss {
    // 缓存功能被关闭
    Disabled,
    // 没有找到该代码的库文件或数据表
    NoTable,
    // 有表但没有元数据
    NoMetadata,
    // 元数据存在但不覆盖请求区间
    NotCovered(Coverage),
    // 覆盖判定通过但查询结果为空
    Empty,
    // 底层读取失败（已记录日志）
    Failed(String),
}

/// # Summary
/// 缓存读取结果。
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead {
    Hit(Vec<PriceBar>),
    Miss(CacheMiss),
}

impl CacheRead {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheRead::Hit(_))
    }

    /// 扁平化为对外契约：未命中即空列表。
    pub fn into_bars(self) -> Vec<PriceBar> {
        match self {
            CacheRead::Hit(bars) => bars,
            CacheRead::Miss(_) => Vec::new(),
        }
    }
}

/// # Summary
/// 一次写入的结果摘要。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteSummary {
    // 新插入的行数
    pub inserted: usize,
    // 因 (code, date) 已存在而跳过的行数
    pub skipped: usize,
    // 写入后的元数据；批次被拒绝（空操作）时为 None
    pub metadata: Option<SeriesMetadata>,
}

/// # Summary
/// 日线缓存存储接口。
///
/// # Invariants
/// - 已缓存的 (code, date) 视为不可变，写入只插入新键。
/// - 读取永不返回错误，失败降级为 `CacheRead::Miss`。
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// # Summary
    /// 按区间读取缓存。
    ///
    /// # Logic
    /// 1. 定位代码对应的库文件（含裁剪重试）。
    /// 2. 读取元数据并做覆盖判定，未覆盖即未命中。
    /// 3. 按日期升序执行区间查询。
    ///
    /// # Arguments
    /// * `code`: 缓存键（原始代码）。
    /// * `from`: 开始日，可选。
    /// * `to`: 结束日，可选。
    ///
    /// # Returns
    /// `CacheRead`。
    async fn read_daily(
        &self,
        code: &SecurityCode,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> CacheRead;

    /// # Summary
    /// 写入一批日线。
    ///
    /// # Logic
    /// 1. 规范化并去重批次；空批次或缺字段批次为空操作。
    /// 2. 在事务中只插入未出现过的 (code, date)。
    /// 3. 重算并扩张元数据后提交；事务内失败回滚并返回错误。
    ///
    /// # Arguments
    /// * `code`: 缓存键（原始代码）。
    /// * `batch`: 原始批次。
    /// * `from`/`to`: 调用方声明的区间，仅用于日志，元数据以落库数据为准。
    ///
    /// # Returns
    /// `WriteSummary` 或 `StoreError`。
    async fn write_daily(
        &self,
        code: &SecurityCode,
        batch: QuoteBatch,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<WriteSummary, StoreError>;

    /// 读取某代码的元数据，不存在时返回 None。
    async fn metadata(&self, code: &SecurityCode) -> Result<Option<SeriesMetadata>, StoreError>;
}

/// # Summary
/// 上市证券主数据存储接口。
#[async_trait]
pub trait ListedInfoStore: Send + Sync {
    /// # Summary
    /// 保存证券主数据，只插入未出现过的 (code, date)。
    ///
    /// # Returns
    /// 新插入的行数。
    async fn save_listed_info(&self, rows: &[ListedInfo]) -> Result<usize, StoreError>;

    /// # Summary
    /// 读取证券主数据。
    ///
    /// # Arguments
    /// * `code`: 可选，按代码过滤。
    /// * `date`: 可选，按日期过滤。
    ///
    /// # Returns
    /// 按日期降序、代码升序排列的记录。
    async fn load_listed_info(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ListedInfo>, StoreError>;
}
