use thiserror::Error;

/// # Summary
/// 外部数据源错误枚举，处理网络、解析、鉴权等问题。
///
/// # Invariants
/// - 这些错误不会穿透获取管线的边界，管线只记录并切换到下一个数据源。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    // 网络层错误，包含底层 HTTP 客户端错误信息
    #[error("Network error: {0}")]
    Network(String),
    // 非 2xx 响应
    #[error("HTTP status {0}")]
    Status(u16),
    // 数据解析错误，如 JSON/CSV 格式不匹配
    #[error("Parse error: {0}")]
    Parse(String),
    // 请求的数据未找到
    #[error("Data not found")]
    NotFound,
    // 鉴权失败（登录或刷新令牌失败）
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    // 数据源在本进程内已被禁用
    #[error("Source disabled")]
    Disabled,
    // 未知或未分类的错误
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// # Summary
/// 调用方输入错误，在访问任何数据源之前同步返回，不重试。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("security code is blank")]
    BlankCode,
    #[error("security code `{0}` contains path separators or control characters")]
    InvalidCode(String),
    #[error("start date {from} is after end date {to}")]
    InvertedRange {
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    },
}
