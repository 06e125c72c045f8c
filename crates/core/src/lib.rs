//! # kabu-core
//!
//! 日线行情获取与缓存子系统的领域层：实体、端口 (trait)、错误类型，
//! 以及不依赖任何 I/O 的纯逻辑（覆盖判定、批次规范化）。

pub mod common;
pub mod config;
pub mod market;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod testing;
