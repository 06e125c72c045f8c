//! # kabu-market
//!
//! 获取管线：缓存 -> 券商 -> 订阅制 API -> 免费镜像 的瀑布式取数，以及后台落库。

pub mod listed;
pub mod persist;
pub mod pipeline;
