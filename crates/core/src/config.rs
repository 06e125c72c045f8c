use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub jquants: JQuantsConfig,
    pub sources: SourcesConfig,
    pub persist: PersistConfig,
}

/// 本地缓存配置。`root_dir` 为空时由存储层按环境变量/沙箱规则决定。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root_dir: Option<String>,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            enabled: true,
        }
    }
}

/// 订阅制行情 API (J-Quants) 配置。凭据不在此处，只从环境变量读取。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JQuantsConfig {
    pub base_url: String,
    // 令牌有效窗口（小时），从刷新时刻起算
    pub token_window_hours: i64,
    pub timeout_secs: u64,
}

impl Default for JQuantsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.jquants.com".to_string(),
            token_window_hours: 24,
            timeout_secs: 30,
        }
    }
}

/// 瀑布中各外部数据源的开关，顺序固定为 broker -> vendor -> mirror。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub broker: bool,
    pub vendor: bool,
    pub mirror: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            broker: true,
            vendor: true,
            mirror: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    // 后台落库队列容量
    pub queue_depth: usize,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self { queue_depth: 256 }
    }
}
