//! # kabu-store
//!
//! 本地 SQLite 缓存：每个证券一个库文件（日线 + 元数据），外加一个共享的上市证券主数据库。

pub mod config;
pub mod daily;
pub mod listed;

mod connection;
