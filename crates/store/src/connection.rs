use kabu_core::store::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

// 并发写同一个库文件时等待锁的上限
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// # Summary
/// 单次逻辑操作（一次读或一次写）持有的 SQLite 连接。
///
/// # Invariants
/// - 每个句柄只服务一次操作，结束时必须调用 `release`。
/// - 文件库不可用时透明降级为进程内的临时内存库，`ephemeral` 为 true。
pub(crate) struct StoreHandle {
    pub(crate) conn: SqliteConnection,
    pub(crate) ephemeral: bool,
}

impl StoreHandle {
    /// # Summary
    /// 打开库文件连接，失败时降级为内存库。
    ///
    /// # Logic
    /// 1. `create` 为 true 时确保父目录存在；目录创建失败即降级。
    /// 2. 以 WAL 模式和忙等待超时连接文件库；连接失败即降级。
    /// 3. 降级时记录 warn 日志，只有内存库也打不开才返回错误。
    ///
    /// # Arguments
    /// * `path`: 库文件路径。
    /// * `create`: 文件不存在时是否创建。
    ///
    /// # Returns
    /// 可用的句柄或 `StoreError::InitError`。
    pub(crate) async fn open(path: &Path, create: bool) -> Result<Self, StoreError> {
        if create
            && let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!(path = %parent.display(), error = %e, "cannot create cache directory, using in-memory store");
            return Self::ephemeral().await;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        match SqliteConnection::connect_with(&options).await {
            Ok(conn) => {
                debug!(path = %path.display(), "opened cache database");
                Ok(Self {
                    conn,
                    ephemeral: false,
                })
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open cache database, using in-memory store");
                Self::ephemeral().await
            }
        }
    }

    async fn ephemeral() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::InitError(e.to_string()))?;
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;
        Ok(Self {
            conn,
            ephemeral: true,
        })
    }

    /// 关闭连接。关闭失败只记录日志，连接随后被丢弃。
    pub(crate) async fn release(self) {
        if let Err(e) = self.conn.close().await {
            warn!(error = %e, "failed to close cache connection cleanly");
        }
    }
}

/// 在给定目录下按候选名依次查找已存在的库文件。
pub(crate) fn find_existing(dir: &Path, candidates: &[String]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|name| dir.join(format!("{name}.db")))
        .find(|path| path.exists())
}

pub(crate) async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool, StoreError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;
    Ok(count > 0)
}

/// 开启写事务。`BEGIN IMMEDIATE` 立即获取写锁，避免并发写者在锁升级时互相死锁。
pub(crate) async fn begin_immediate(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// # Summary
/// 结束写事务：事务体成功则提交，事务体或提交失败则回滚并原样返回错误。
///
/// # Arguments
/// * `conn`: 已开启事务的连接。
/// * `outcome`: 事务体的执行结果。
///
/// # Returns
/// 提交成功时返回事务体的值。
pub(crate) async fn finish_tx<T>(
    conn: &mut SqliteConnection,
    outcome: Result<T, StoreError>,
) -> Result<T, StoreError> {
    let outcome = match outcome {
        Ok(value) => sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map(|_| value)
            .map_err(db_err),
        Err(e) => Err(e),
    };

    if outcome.is_err()
        && let Err(rb) = sqlx::query("ROLLBACK").execute(&mut *conn).await
    {
        warn!(error = %rb, "rollback failed");
    }
    outcome
}

pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}
