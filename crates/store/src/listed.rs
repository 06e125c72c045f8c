use crate::connection::{StoreHandle, begin_immediate, db_err, finish_tx, table_exists};
use async_trait::async_trait;
use chrono::NaiveDate;
use kabu_core::market::entity::ListedInfo;
use kabu_core::store::error::StoreError;
use kabu_core::store::port::ListedInfoStore;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

const LISTED_TABLE: &str = "listed_info";

type ListedRow = (
    NaiveDate,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

/// # Summary
/// 上市证券主数据的 SQLite 存储，全部证券共用 `{root}/stocks/listed_info.db`。
///
/// # Invariants
/// * (`Code`, `Date`) 为主键，已存在的快照不会被覆盖。
pub struct SqliteListedInfoStore {
    db_path: PathBuf,
    enabled: bool,
}

impl SqliteListedInfoStore {
    pub fn new() -> Self {
        Self::with_root(crate::config::get_root_dir())
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            db_path: root.into().join("stocks").join("listed_info.db"),
            enabled: true,
        }
    }

    /// 关闭后读取一律为空，保存一律为空操作，不触碰库文件。
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    async fn insert_new(
        conn: &mut SqliteConnection,
        rows: &[&ListedInfo],
    ) -> Result<usize, StoreError> {
        let existing: HashSet<(String, NaiveDate)> = if table_exists(conn, LISTED_TABLE).await? {
            sqlx::query_as::<_, (String, NaiveDate)>(r#"SELECT DISTINCT "Code", "Date" FROM listed_info"#)
                .fetch_all(&mut *conn)
                .await
                .map_err(db_err)?
                .into_iter()
                .collect()
        } else {
            info!("creating table {LISTED_TABLE}");
            create_listed_table(conn).await?;
            HashSet::new()
        };

        let mut inserted = 0usize;
        for info in rows
            .iter()
            .filter(|r| !existing.contains(&(r.code.clone(), r.date)))
        {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO listed_info (
                    "Date", "Code", "CompanyName", "CompanyNameEnglish",
                    "Sector17Code", "Sector17CodeName", "Sector33Code", "Sector33CodeName",
                    "ScaleCategory", "MarketCode", "MarketCodeName"
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(info.date)
            .bind(&info.code)
            .bind(&info.company_name)
            .bind(&info.company_name_english)
            .bind(&info.sector17_code)
            .bind(&info.sector17_code_name)
            .bind(&info.sector33_code)
            .bind(&info.sector33_code_name)
            .bind(&info.scale_category)
            .bind(&info.market_code)
            .bind(&info.market_code_name)
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
            inserted += usize::try_from(result.rows_affected()).unwrap_or(0);
        }
        Ok(inserted)
    }
}

impl Default for SqliteListedInfoStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn create_listed_table(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    for ddl in [
        r#"
        CREATE TABLE IF NOT EXISTS listed_info (
            "Date" DATE NOT NULL,
            "Code" TEXT NOT NULL,
            "CompanyName" TEXT NOT NULL,
            "CompanyNameEnglish" TEXT NOT NULL,
            "Sector17Code" TEXT NOT NULL,
            "Sector17CodeName" TEXT NOT NULL,
            "Sector33Code" TEXT NOT NULL,
            "Sector33CodeName" TEXT NOT NULL,
            "ScaleCategory" TEXT NOT NULL,
            "MarketCode" TEXT NOT NULL,
            "MarketCodeName" TEXT NOT NULL,
            PRIMARY KEY ("Code", "Date")
        )
        "#,
        r#"CREATE INDEX IF NOT EXISTS idx_listed_info_code ON listed_info ("Code")"#,
        r#"CREATE INDEX IF NOT EXISTS idx_listed_info_date ON listed_info ("Date")"#,
        r#"CREATE INDEX IF NOT EXISTS idx_listed_info_sector17 ON listed_info ("Sector17Code")"#,
    ] {
        sqlx::query(ddl).execute(&mut *conn).await.map_err(db_err)?;
    }
    Ok(())
}

#[async_trait]
impl ListedInfoStore for SqliteListedInfoStore {
    /// # Summary
    /// 保存证券主数据。
    ///
    /// # Logic
    /// 1. 缓存关闭或空输入直接返回 0。
    /// 2. 批内 (code, date) 重复时保留第一条。
    /// 3. 写事务内只插入未出现过的键，失败回滚并返回错误。
    ///
    /// # Arguments
    /// * `rows` - 主数据记录。
    ///
    /// # Returns
    /// * 新插入的行数。
    async fn save_listed_info(&self, rows: &[ListedInfo]) -> Result<usize, StoreError> {
        if !self.enabled {
            debug!("cache disabled, skip listed info write");
            return Ok(0);
        }
        if rows.is_empty() {
            info!("listed info is empty, skip write");
            return Ok(0);
        }
        let mut seen = HashSet::new();
        let unique: Vec<&ListedInfo> = rows
            .iter()
            .filter(|r| seen.insert((r.code.as_str(), r.date)))
            .collect();
        debug!(total = rows.len(), unique = unique.len(), "deduplicated listed info batch");

        let mut handle = StoreHandle::open(&self.db_path, true).await?;
        let outcome = match begin_immediate(&mut handle.conn).await {
            Ok(()) => {
                let body = Self::insert_new(&mut handle.conn, &unique).await;
                finish_tx(&mut handle.conn, body).await
            }
            Err(e) => Err(e),
        };
        handle.release().await;

        let inserted = outcome?;
        info!(inserted, "listed info saved");
        Ok(inserted)
    }

    /// # Summary
    /// 读取证券主数据。
    ///
    /// # Logic
    /// 1. 缓存关闭、库文件或表不存在时返回空列表。
    /// 2. 按可选的代码、日期过滤，`Date DESC, Code ASC` 排序。
    async fn load_listed_info(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ListedInfo>, StoreError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        if !self.db_path.exists() {
            debug!("no listed info cache file");
            return Ok(Vec::new());
        }
        let mut handle = StoreHandle::open(&self.db_path, false).await?;
        let result = load_rows(&mut handle.conn, code, date).await;
        handle.release().await;
        result
    }
}

async fn load_rows(
    conn: &mut SqliteConnection,
    code: Option<&str>,
    date: Option<NaiveDate>,
) -> Result<Vec<ListedInfo>, StoreError> {
    if !table_exists(conn, LISTED_TABLE).await? {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, ListedRow>(
        r#"
        SELECT "Date", "Code", "CompanyName", "CompanyNameEnglish",
               "Sector17Code", "Sector17CodeName", "Sector33Code", "Sector33CodeName",
               "ScaleCategory", "MarketCode", "MarketCodeName"
        FROM listed_info
        WHERE (?1 IS NULL OR "Code" = ?1)
          AND (?2 IS NULL OR "Date" = ?2)
        ORDER BY "Date" DESC, "Code" ASC
        "#,
    )
    .bind(code)
    .bind(date)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(rows
        .into_iter()
        .map(|r| ListedInfo {
            date: r.0,
            code: r.1,
            company_name: r.2,
            company_name_english: r.3,
            sector17_code: r.4,
            sector17_code_name: r.5,
            sector33_code: r.6,
            sector33_code_name: r.7,
            scale_category: r.8,
            market_code: r.9,
            market_code_name: r.10,
        })
        .collect())
}
