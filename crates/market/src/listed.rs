use crate::persist::{PersistJob, PersistWorker};
use chrono::NaiveDate;
use kabu_core::common::{SecurityCode, listed_code};
use kabu_core::market::entity::ListedInfo;
use kabu_core::market::error::ValidationError;
use kabu_core::market::port::ListedInfoSource;
use kabu_core::store::port::ListedInfoStore;
use std::sync::Arc;
use tracing::{info, warn};

/// # Summary
/// 上市证券主数据服务：缓存 -> 订阅制 API，命中外部数据后后台落库。
pub struct ListedInfoService {
    store: Arc<dyn ListedInfoStore>,
    source: Option<Arc<dyn ListedInfoSource>>,
    persist: PersistWorker,
}

impl ListedInfoService {
    pub fn new(
        store: Arc<dyn ListedInfoStore>,
        source: Option<Arc<dyn ListedInfoSource>>,
        persist: PersistWorker,
    ) -> Self {
        Self {
            store,
            source,
            persist,
        }
    }

    /// # Summary
    /// 查询上市证券信息。
    ///
    /// # Logic
    /// 1. 代码先去掉市场后缀，4 位代码补 `0`，与主数据中的 5 位代码对齐。
    /// 2. 缓存有数据即返回；缓存读取失败只记录日志。
    /// 3. 否则访问外部数据源，非空结果提交后台落库后返回。
    ///
    /// # Arguments
    /// * `code`: 可选证券代码。
    /// * `date`: 可选快照日期。
    ///
    /// # Returns
    /// 证券信息列表（可能为空），代码不合法时返回 `ValidationError`。
    pub async fn get(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ListedInfo>, ValidationError> {
        let code = match code {
            Some(raw) => Some(listed_code(SecurityCode::parse(raw)?.normalized())),
            None => None,
        };

        match self.store.load_listed_info(code.as_deref(), date).await {
            Ok(rows) if !rows.is_empty() => {
                info!(count = rows.len(), "listed info served from cache");
                return Ok(rows);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "listed info cache read failed"),
        }

        let Some(source) = self.source.as_ref().filter(|s| s.is_enabled()) else {
            info!("no enabled listed info source");
            return Ok(Vec::new());
        };

        match source.fetch_listed_info(code.as_deref(), date).await {
            Ok(rows) if !rows.is_empty() => {
                info!(count = rows.len(), "listed info fetched from source");
                self.persist.submit(PersistJob::Listed(rows.clone()));
                Ok(rows)
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) => {
                warn!(error = %e, "listed info source failed");
                Ok(Vec::new())
            }
        }
    }
}
