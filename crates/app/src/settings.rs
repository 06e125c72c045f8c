use config::{Config, ConfigError, Environment, File};
use kabu_core::config::AppConfig;
use std::path::Path;

/// 默认配置文件（不带扩展名，由 config 按格式探测）
pub const DEFAULT_CONFIG: &str = "config/default";
/// 环境变量覆盖前缀，形如 `KABU__CACHE__ENABLED`
pub const ENV_PREFIX: &str = "KABU";

/// # Summary
/// 加载应用配置。
///
/// # Logic
/// 1. 以 `AppConfig` 的 serde 默认值为底。
/// 2. 叠加配置文件：显式路径必须存在，默认路径可缺失。
/// 3. 叠加 `KABU__SECTION__KEY` 环境变量。
///
/// # Arguments
/// * `path`: 命令行指定的配置文件。
///
/// # Returns
/// 合并后的配置，或 `ConfigError`。
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG).required(false),
    };

    Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
