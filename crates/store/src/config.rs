use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 指定缓存根目录的环境变量
pub const CACHE_DIR_ENV: &str = "KABU_CACHE_DIR";
/// 存在即视为受限（沙箱）运行环境的环境变量
pub const SANDBOX_ENV: &str = "KABU_SANDBOX";
/// 沙箱环境下使用的固定根目录
pub const SANDBOX_ROOT: &str = "/kabu/db";
/// 默认根目录（相对当前工作目录）
pub const DEFAULT_ROOT: &str = "db";

static ROOT_DIR: OnceLock<PathBuf> = OnceLock::new();

/// 设置存储层的数据根目录。
///
/// # Logic
/// 1. 尝试将指定的路径保存到全局静态变量中。
/// 2. 如果已经设置过，则本次设置无效。
///
/// # Arguments
/// * `path` - 存储数据的根目录路径。
pub fn set_root_dir(path: PathBuf) {
    if ROOT_DIR.set(path).is_err() {
        tracing::debug!("cache root already configured, ignoring override");
    }
}

/// 当前进程是否运行在受限环境中。
pub fn is_sandboxed() -> bool {
    cfg!(target_family = "wasm") || std::env::var_os(SANDBOX_ENV).is_some()
}

/// # Summary
/// 按优先级决定缓存根目录。
///
/// # Logic
/// 1. 沙箱环境一律使用 `SANDBOX_ROOT`。
/// 2. 其次是程序显式设置的目录。
/// 3. 再次是环境变量 `KABU_CACHE_DIR`（空值忽略）。
/// 4. 最后回落到 `DEFAULT_ROOT`。
///
/// # Arguments
/// * `explicit` - 程序设置的目录。
/// * `env_value` - 环境变量取值。
/// * `sandboxed` - 是否处于沙箱。
///
/// # Returns
/// 缓存根目录。
pub fn resolve_root(explicit: Option<&Path>, env_value: Option<&str>, sandboxed: bool) -> PathBuf {
    if sandboxed {
        return PathBuf::from(SANDBOX_ROOT);
    }
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env_value.map(str::trim) {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => PathBuf::from(DEFAULT_ROOT),
    }
}

/// 获取当前生效的缓存根目录。
pub fn get_root_dir() -> PathBuf {
    let env_value = std::env::var(CACHE_DIR_ENV).ok();
    resolve_root(
        ROOT_DIR.get().map(PathBuf::as_path),
        env_value.as_deref(),
        is_sandboxed(),
    )
}
