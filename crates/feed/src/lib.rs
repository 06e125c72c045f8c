//! # kabu-feed
//!
//! 外部日线数据源：券商图表接口 (Yahoo)、订阅制 API (J-Quants) 与免费镜像 (Stooq)。

pub mod jquants;
pub mod stooq;
pub mod yahoo;

use reqwest::Client;
use std::time::Duration;

// 部分数据源会拦截默认 UA
pub(crate) const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// 构建带超时与浏览器 UA 的 HTTP 客户端。
pub(crate) fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(BROWSER_UA)
        .build()
}
