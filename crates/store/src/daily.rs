use crate::connection::{StoreHandle, begin_immediate, db_err, find_existing, finish_tx, table_exists};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kabu_core::common::SecurityCode;
use kabu_core::common::time::{RealTimeProvider, TimeProvider};
use kabu_core::market::entity::{PriceBar, QuoteBatch};
use kabu_core::market::normalize::normalize_batch;
use kabu_core::store::coverage;
use kabu_core::store::error::StoreError;
use kabu_core::store::port::{CacheMiss, CacheRead, PriceStore, SeriesMetadata, WriteSummary};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DAILY_TABLE: &str = "stocks_daily";
const METADATA_TABLE: &str = "stocks_daily_metadata";

/// PriceStore 的 SQLite 实现，采用“一库一股”策略。
///
/// # Summary
/// 每个证券代码对应 `{root}/stocks/{code}.db`，库内包含 `stocks_daily` 与
/// `stocks_daily_metadata` 两张表。
///
/// # Invariants
/// * 每次读或写都单独打开连接并在结束时释放，不缓存连接。
/// * 定位库文件时按代码裁剪候选依次查找，首个存在的文件生效。
/// * 行与元数据始终以调用方的原始代码为键。
pub struct SqliteDailyStore {
    stocks_dir: PathBuf,
    enabled: bool,
    clock: Arc<dyn TimeProvider>,
}

impl SqliteDailyStore {
    /// 使用配置的缓存根目录创建实例。
    pub fn new() -> Self {
        Self::with_root(crate::config::get_root_dir())
    }

    /// 创建以 `root` 为缓存根目录的实例。目录在首次写入时才创建。
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            stocks_dir: root.into().join("stocks"),
            enabled: true,
            clock: Arc::new(RealTimeProvider),
        }
    }

    /// 关闭或开启缓存。关闭后读取一律未命中，写入一律为空操作。
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// # Summary
    /// 定位已存在的库文件。
    ///
    /// # Logic
    /// 依次尝试原始代码及其逐字符裁剪后的候选（长度不少于 4），返回首个存在的文件。
    fn locate(&self, code: &SecurityCode) -> Option<PathBuf> {
        find_existing(&self.stocks_dir, &code.file_candidates())
    }

    /// # Summary
    /// 写入时的目标库文件。
    ///
    /// # Logic
    /// 1. 已有候选文件时沿用该文件。
    /// 2. 否则在最短候选名下新建，使 `7203.JP` 与 `7203` 共用同一文件。
    fn write_target(&self, code: &SecurityCode) -> PathBuf {
        self.locate(code).unwrap_or_else(|| {
            let candidates = code.file_candidates();
            let name = candidates.last().map_or(code.as_str(), String::as_str);
            self.stocks_dir.join(format!("{name}.db"))
        })
    }

    async fn read_in(
        conn: &mut SqliteConnection,
        code: &SecurityCode,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<CacheRead, StoreError> {
        if !table_exists(conn, DAILY_TABLE).await? {
            debug!(code = %code, "no cached table, falling through to external sources");
            return Ok(CacheRead::Miss(CacheMiss::NoTable));
        }

        let Some(meta) = load_metadata(conn, code.as_str()).await? else {
            info!(code = %code, "cached rows have no metadata, treating as miss");
            return Ok(CacheRead::Miss(CacheMiss::NoMetadata));
        };

        let cov = coverage::check(Some(&meta), from, to);
        info!(code = %code, "{}", cov.message());
        if !cov.covered {
            return Ok(CacheRead::Miss(CacheMiss::NotCovered(cov)));
        }

        let rows = sqlx::query_as::<_, (String, NaiveDate, f64, f64, f64, f64, f64)>(
            r#"
            SELECT "Code", "Date", "Open", "High", "Low", "Close", "Volume"
            FROM stocks_daily
            WHERE "Code" = ?1
              AND (?2 IS NULL OR "Date" >= ?2)
              AND (?3 IS NULL OR "Date" <= ?3)
            ORDER BY "Date" ASC
            "#,
        )
        .bind(code.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;

        if rows.is_empty() {
            return Ok(CacheRead::Miss(CacheMiss::Empty));
        }
        info!(code = %code, count = rows.len(), "loaded daily bars from cache");
        Ok(CacheRead::Hit(
            rows.into_iter()
                .map(|r| PriceBar {
                    code: r.0,
                    date: r.1,
                    open: r.2,
                    high: r.3,
                    low: r.4,
                    close: r.5,
                    volume: r.6,
                })
                .collect(),
        ))
    }

    /// # Summary
    /// 事务体：只插入新键并刷新元数据。
    ///
    /// # Logic
    /// 1. 表不存在则建表（复合主键 + Code/Date 索引），已有键集合视为空。
    /// 2. 否则读出该代码已有的日期集合，求差集。
    /// 3. 逐行 `INSERT OR IGNORE`，并发写者抢先插入的键视为良性冲突。
    /// 4. 重算 min/max/count 并扩张元数据。
    async fn upsert_rows(
        conn: &mut SqliteConnection,
        code: &SecurityCode,
        bars: &[PriceBar],
        now: DateTime<Utc>,
    ) -> Result<WriteSummary, StoreError> {
        let existing: HashSet<NaiveDate> = if table_exists(conn, DAILY_TABLE).await? {
            sqlx::query_as::<_, (NaiveDate,)>(r#"SELECT "Date" FROM stocks_daily WHERE "Code" = ?"#)
                .bind(code.as_str())
                .fetch_all(&mut *conn)
                .await
                .map_err(db_err)?
                .into_iter()
                .map(|(d,)| d)
                .collect()
        } else {
            info!(code = %code, "creating table {DAILY_TABLE}");
            create_daily_table(conn).await?;
            HashSet::new()
        };

        let mut summary = WriteSummary::default();
        for bar in bars {
            if existing.contains(&bar.date) {
                summary.skipped += 1;
                continue;
            }
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO stocks_daily ("Code", "Date", "Open", "High", "Low", "Close", "Volume")
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(code.as_str())
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 0 {
                summary.skipped += 1;
            } else {
                summary.inserted += 1;
            }
        }

        let (min_date, max_date, count): (Option<NaiveDate>, Option<NaiveDate>, i64) =
            sqlx::query_as(
                r#"SELECT MIN("Date"), MAX("Date"), COUNT(*) FROM stocks_daily WHERE "Code" = ?"#,
            )
            .bind(code.as_str())
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;

        if let (Some(min_date), Some(max_date)) = (min_date, max_date) {
            summary.metadata =
                Some(save_metadata(conn, code.as_str(), min_date, max_date, count, now).await?);
        }
        Ok(summary)
    }
}

impl Default for SqliteDailyStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn create_daily_table(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    for ddl in [
        r#"
        CREATE TABLE IF NOT EXISTS stocks_daily (
            "Code" TEXT NOT NULL,
            "Date" DATE NOT NULL,
            "Open" REAL NOT NULL,
            "High" REAL NOT NULL,
            "Low" REAL NOT NULL,
            "Close" REAL NOT NULL,
            "Volume" REAL NOT NULL,
            PRIMARY KEY ("Code", "Date")
        )
        "#,
        r#"CREATE INDEX IF NOT EXISTS idx_stocks_daily_Code ON stocks_daily ("Code")"#,
        r#"CREATE INDEX IF NOT EXISTS idx_stocks_daily_Date ON stocks_daily ("Date")"#,
    ] {
        sqlx::query(ddl).execute(&mut *conn).await.map_err(db_err)?;
    }
    Ok(())
}

async fn ensure_metadata_table(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stocks_daily_metadata (
            "Code" TEXT PRIMARY KEY,
            "from_date" DATE NOT NULL,
            "to_date" DATE NOT NULL,
            "record_count" INTEGER NOT NULL,
            "last_updated" DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn load_metadata(
    conn: &mut SqliteConnection,
    code: &str,
) -> Result<Option<SeriesMetadata>, StoreError> {
    if !table_exists(conn, METADATA_TABLE).await? {
        return Ok(None);
    }
    let row = sqlx::query_as::<_, (String, NaiveDate, NaiveDate, i64, DateTime<Utc>)>(
        r#"
        SELECT "Code", "from_date", "to_date", "record_count", "last_updated"
        FROM stocks_daily_metadata WHERE "Code" = ?
        "#,
    )
    .bind(code)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(row.map(|r| SeriesMetadata {
        code: r.0,
        from_date: r.1,
        to_date: r.2,
        record_count: r.3,
        last_updated: r.4,
    }))
}

/// # Summary
/// 保存或扩张元数据。
///
/// # Logic
/// 1. 已有记录时 `from = min(old, new)`、`to = max(old, new)`，计数取最新值。
/// 2. 否则插入新记录。
async fn save_metadata(
    conn: &mut SqliteConnection,
    code: &str,
    from_date: NaiveDate,
    to_date: NaiveDate,
    record_count: i64,
    now: DateTime<Utc>,
) -> Result<SeriesMetadata, StoreError> {
    ensure_metadata_table(conn).await?;

    let (from_date, to_date) = match load_metadata(conn, code).await? {
        Some(old) => (old.from_date.min(from_date), old.to_date.max(to_date)),
        None => (from_date, to_date),
    };

    sqlx::query(
        r#"
        INSERT INTO stocks_daily_metadata ("Code", "from_date", "to_date", "record_count", "last_updated")
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT("Code") DO UPDATE SET
            "from_date" = excluded."from_date",
            "to_date" = excluded."to_date",
            "record_count" = excluded."record_count",
            "last_updated" = excluded."last_updated"
        "#,
    )
    .bind(code)
    .bind(from_date)
    .bind(to_date)
    .bind(record_count)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    info!(code, %from_date, %to_date, record_count, "metadata updated");
    Ok(SeriesMetadata {
        code: code.to_string(),
        from_date,
        to_date,
        record_count,
        last_updated: now,
    })
}

#[async_trait]
impl PriceStore for SqliteDailyStore {
    /// # Summary
    /// 读取缓存日线。
    ///
    /// # Logic
    /// 1. 缓存关闭或找不到库文件 => 未命中。
    /// 2. 打开连接，执行表/元数据/覆盖判定与区间查询，随后释放连接。
    /// 3. 任何读取错误记录日志后降级为未命中。
    async fn read_daily(
        &self,
        code: &SecurityCode,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> CacheRead {
        if !self.enabled {
            return CacheRead::Miss(CacheMiss::Disabled);
        }
        let Some(path) = self.locate(code) else {
            debug!(code = %code, "no cache file for code");
            return CacheRead::Miss(CacheMiss::NoTable);
        };

        let mut handle = match StoreHandle::open(&path, false).await {
            Ok(h) => h,
            Err(e) => {
                error!(code = %code, error = %e, "cache read failed");
                return CacheRead::Miss(CacheMiss::Failed(e.to_string()));
            }
        };
        let result = Self::read_in(&mut handle.conn, code, from, to).await;
        handle.release().await;

        result.unwrap_or_else(|e| {
            error!(code = %code, error = %e, "cache read failed");
            CacheRead::Miss(CacheMiss::Failed(e.to_string()))
        })
    }

    /// # Summary
    /// 写入日线批次。
    ///
    /// # Logic
    /// 1. 缓存关闭、空批次或批次缺必填字段 => 记录日志后空操作。
    /// 2. 打开（必要时创建）目标库文件。
    /// 3. `BEGIN IMMEDIATE` 后执行只插新键与元数据刷新，成功提交，失败回滚并返回错误。
    /// 4. 无论成败都释放连接。
    async fn write_daily(
        &self,
        code: &SecurityCode,
        batch: QuoteBatch,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<WriteSummary, StoreError> {
        if !self.enabled {
            debug!(code = %code, "cache disabled, skip write");
            return Ok(WriteSummary::default());
        }
        if batch.is_empty() {
            info!(code = %code, "empty batch, skip write");
            return Ok(WriteSummary::default());
        }
        let bars = match normalize_batch(code.as_str(), &batch) {
            Ok(bars) => bars,
            Err(reason) => {
                warn!(code = %code, %reason, "batch rejected, skip write");
                return Ok(WriteSummary::default());
            }
        };

        let path = self.write_target(code);
        let mut handle = StoreHandle::open(&path, true).await?;
        if handle.ephemeral {
            warn!(code = %code, "writing to ephemeral store, data will not persist");
        }

        let now = self.clock.now();
        let outcome = match begin_immediate(&mut handle.conn).await {
            Ok(()) => {
                let body = Self::upsert_rows(&mut handle.conn, code, &bars, now).await;
                finish_tx(&mut handle.conn, body).await
            }
            Err(e) => Err(e),
        };
        handle.release().await;

        match outcome {
            Ok(summary) => {
                info!(
                    code = %code,
                    inserted = summary.inserted,
                    skipped = summary.skipped,
                    requested_from = ?from,
                    requested_to = ?to,
                    "daily bars saved"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(code = %code, error = %e, "cache write failed, rolled back");
                Err(e)
            }
        }
    }

    async fn metadata(&self, code: &SecurityCode) -> Result<Option<SeriesMetadata>, StoreError> {
        let Some(path) = self.locate(code) else {
            return Ok(None);
        };
        let mut handle = StoreHandle::open(&path, false).await?;
        let result = load_metadata(&mut handle.conn, code.as_str()).await;
        handle.release().await;
        result
    }
}
