use crate::build_client;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use kabu_core::common::{CodeForm, listed_code};
use kabu_core::common::time::{RealTimeProvider, TimeProvider};
use kabu_core::config::JQuantsConfig;
use kabu_core::market::entity::{ListedInfo, PriceBar, QuoteDate, TradingDay, VendorRecord};
use kabu_core::market::error::MarketError;
use kabu_core::market::port::{DailyQuoteSource, ListedInfoSource};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 登录邮箱的环境变量
pub const EMAIL_ENV: &str = "JQuants_EMAIL_ADDRESS";
/// 登录密码的环境变量
pub const PASSWORD_ENV: &str = "JQuants_PASSWORD";

const PAGINATION_KEY: &str = "pagination_key";

/// J-Quants 账号凭据。
#[derive(Clone, Serialize)]
pub struct Credentials {
    #[serde(rename = "mailaddress")]
    pub mail_address: String,
    pub password: String,
}

impl Credentials {
    pub fn new(mail_address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mail_address: mail_address.into(),
            password: password.into(),
        }
    }

    /// 从环境变量读取凭据，任一项缺失或为空时返回 None。
    pub fn from_env() -> Option<Self> {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Some(Self::new(read(EMAIL_ENV)?, read(PASSWORD_ENV)?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mail_address", &self.mail_address)
            .field("password", &"***")
            .finish()
    }
}

struct Session {
    refresh_token: String,
    id_token: String,
    expires_at: DateTime<Utc>,
}

enum AuthState {
    Unauthenticated,
    Authenticated(Session),
    // 终态：本进程内不再发起任何网络请求
    Disabled,
}

#[derive(Deserialize)]
struct AuthUserResponse {
    #[serde(rename = "refreshToken")]
    refresh_token: String,
}

#[derive(Deserialize)]
struct AuthRefreshResponse {
    #[serde(rename = "idToken")]
    id_token: String,
}

/// 日线四本值接口的单条记录。停牌日的价格字段为 null。
#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct DailyQuoteRecord {
    date: String,
    code: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl DailyQuoteRecord {
    fn into_bar(self) -> Option<PriceBar> {
        let date = QuoteDate::Text(self.date).to_day()?;
        Some(PriceBar {
            code: self.code,
            date,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume?,
        })
    }
}

/// # Summary
/// 订阅制行情 API (J-Quants) 客户端，负责令牌生命周期与分页。
///
/// # Invariants
/// * 会话状态只在 `state` 互斥锁内变更，多个调用方同时发现过期时只刷新一次。
/// * 进入 `Disabled` 后不再发起任何网络请求，`is_enabled()` 恒为 false。
/// * 令牌有效期为刷新时刻起的固定窗口（默认 24 小时）。
pub struct JQuantsClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    token_window: ChronoDuration,
    clock: Arc<dyn TimeProvider>,
    state: Mutex<AuthState>,
    enabled: AtomicBool,
}

impl JQuantsClient {
    /// # Summary
    /// 创建客户端。不发起网络请求，首次调用或 `login()` 时才登录。
    ///
    /// # Logic
    /// 1. 按配置构建 HTTP 客户端。
    /// 2. 没有凭据时直接进入 `Disabled`。
    ///
    /// # Arguments
    /// * `config`: API 地址、令牌窗口与超时。
    /// * `credentials`: 登录凭据，通常来自 `Credentials::from_env()`。
    ///
    /// # Returns
    /// 客户端实例；HTTP 客户端构建失败时返回 `MarketError::Unknown`。
    pub fn new(config: &JQuantsConfig, credentials: Option<Credentials>) -> Result<Self, MarketError> {
        let client = build_client(Duration::from_secs(config.timeout_secs))
            .map_err(|e| MarketError::Unknown(e.to_string()))?;

        let state = if credentials.is_some() {
            AuthState::Unauthenticated
        } else {
            warn!("J-Quants credentials are not configured, vendor source disabled");
            AuthState::Disabled
        };

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            enabled: AtomicBool::new(credentials.is_some()),
            credentials,
            token_window: ChronoDuration::hours(config.token_window_hours),
            clock: Arc::new(RealTimeProvider),
            state: Mutex::new(state),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 主动登录。返回客户端此后是否可用。
    pub async fn login(&self) -> bool {
        self.ensure_token().await.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// # Summary
    /// 取得可用的 idToken，必要时登录或刷新。
    ///
    /// # Logic
    /// 1. `Disabled` => None。
    /// 2. `Unauthenticated` => 登录；失败则进入 `Disabled`。
    /// 3. `Authenticated` 且已过期 => 刷新；刷新失败保留旧令牌继续使用。
    async fn ensure_token(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        match &mut *state {
            AuthState::Disabled => None,
            AuthState::Unauthenticated => {
                let Some(credentials) = self.credentials.as_ref() else {
                    *state = AuthState::Disabled;
                    self.disable();
                    return None;
                };
                match self.authenticate(credentials).await {
                    Ok(session) => {
                        info!(expires_at = %session.expires_at, "J-Quants session ready");
                        let token = session.id_token.clone();
                        *state = AuthState::Authenticated(session);
                        Some(token)
                    }
                    Err(e) => {
                        error!(error = %e, "J-Quants login failed, vendor source disabled");
                        *state = AuthState::Disabled;
                        self.disable();
                        None
                    }
                }
            }
            AuthState::Authenticated(session) => {
                let now = self.clock.now();
                if now >= session.expires_at {
                    info!("J-Quants token expired, refreshing");
                    match self.refresh_id_token(&session.refresh_token).await {
                        Ok(id_token) => {
                            session.id_token = id_token;
                            session.expires_at = now + self.token_window;
                            info!(expires_at = %session.expires_at, "J-Quants token refreshed");
                        }
                        Err(e) => {
                            error!(error = %e, "J-Quants token refresh failed, keeping previous token");
                        }
                    }
                }
                Some(session.id_token.clone())
            }
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, MarketError> {
        let resp = self
            .client
            .post(self.url("/v1/token/auth_user"))
            .json(credentials)
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MarketError::Unauthorized(format!(
                "auth_user returned HTTP {}",
                resp.status()
            )));
        }
        let body: AuthUserResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        let id_token = self.refresh_id_token(&body.refresh_token).await?;
        Ok(Session {
            refresh_token: body.refresh_token,
            id_token,
            expires_at: self.clock.now() + self.token_window,
        })
    }

    async fn refresh_id_token(&self, refresh_token: &str) -> Result<String, MarketError> {
        let resp = self
            .client
            .post(self.url("/v1/token/auth_refresh"))
            .query(&[("refreshtoken", refresh_token)])
            .send()
            .await
            .map_err(|e| MarketError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MarketError::Unauthorized(format!(
                "auth_refresh returned HTTP {}",
                resp.status()
            )));
        }
        let body: AuthRefreshResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;
        Ok(body.id_token)
    }

    /// # Summary
    /// 带分页的 GET 请求。
    ///
    /// # Logic
    /// 1. 先确保令牌可用，不可用返回 `MarketError::Disabled`。
    /// 2. 逐页请求，按到达顺序拼接 `field` 数组中的记录。
    /// 3. 响应带 `pagination_key` 时携带该键继续请求，否则结束；出现过的键再次出现即停止。
    /// 4. 任一页非 2xx 即整体失败。
    ///
    /// # Arguments
    /// * `path`: 接口路径。
    /// * `field`: 响应中承载记录数组的字段名。
    /// * `params`: 查询参数。
    ///
    /// # Returns
    /// 全部页的记录，或 `MarketError`。
    async fn fetch_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<Vec<T>, MarketError> {
        let token = self.ensure_token().await.ok_or(MarketError::Disabled)?;
        let url = self.url(path);
        let mut records = Vec::new();
        let mut pages = 0usize;
        let mut seen_keys: HashSet<String> = HashSet::new();

        loop {
            pages += 1;
            let resp = self
                .client
                .get(&url)
                .query(&params)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| MarketError::Network(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                error!(path, status = status.as_u16(), body = %body, "J-Quants API error");
                return Err(MarketError::Status(status.as_u16()));
            }

            let mut body: Value = resp
                .json()
                .await
                .map_err(|e| MarketError::Parse(e.to_string()))?;
            let items = body
                .get_mut(field)
                .map(Value::take)
                .ok_or_else(|| MarketError::Parse(format!("response has no `{field}` field")))?;
            let items: Vec<T> = serde_json::from_value(items)
                .map_err(|e| MarketError::Parse(format!("{field}: {e}")))?;
            records.extend(items);

            let Some(next) = body.get(PAGINATION_KEY).and_then(Value::as_str) else {
                break;
            };
            if !seen_keys.insert(next.to_string()) {
                warn!(path, key = next, "pagination key repeated, stopping");
                break;
            }
            debug!(path, page = pages, "following pagination key");
            params.retain(|(k, _)| *k != PAGINATION_KEY);
            params.push((PAGINATION_KEY, next.to_string()));
        }

        info!(path, pages, count = records.len(), "J-Quants records fetched");
        Ok(records)
    }

    /// 上市证券一览 (`/v1/listed/info`)。
    pub async fn try_listed_info(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ListedInfo>, MarketError> {
        let mut params = Vec::new();
        if let Some(code) = code.filter(|c| !c.is_empty()) {
            params.push(("code", listed_code(code)));
        }
        if let Some(date) = date {
            params.push(("date", date.to_string()));
        }
        self.fetch_paginated("/v1/listed/info", "info", params).await
    }

    /// # Summary
    /// 日线四本值 (`/v1/prices/daily_quotes`)。
    ///
    /// # Logic
    /// 价格或成交量为 null 的行（停牌日）以及日期无法解析的行被丢弃。
    pub async fn try_daily_quotes(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, MarketError> {
        let mut params = vec![("code", listed_code(code))];
        if let Some(from) = from {
            params.push(("from", from.to_string()));
        }
        if let Some(to) = to {
            params.push(("to", to.to_string()));
        }

        let records: Vec<DailyQuoteRecord> = self
            .fetch_paginated("/v1/prices/daily_quotes", "daily_quotes", params)
            .await?;
        let total = records.len();
        let bars: Vec<PriceBar> = records
            .into_iter()
            .filter_map(DailyQuoteRecord::into_bar)
            .collect();
        if bars.len() < total {
            debug!(code, dropped = total - bars.len(), "dropped quotes without prices");
        }
        Ok(bars)
    }

    /// 财务信息 (`/v1/fins/statements`)。
    pub async fn try_statements(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<VendorRecord>, MarketError> {
        let mut params = Vec::new();
        if let Some(code) = code.filter(|c| !c.is_empty()) {
            params.push(("code", listed_code(code)));
        }
        for (key, day) in [("date", date), ("from", from), ("to", to)] {
            if let Some(day) = day {
                params.push((key, day.to_string()));
            }
        }
        self.fetch_paginated("/v1/fins/statements", "statements", params)
            .await
    }

    /// 决算发表预定日 (`/v1/fins/announcement`)。
    pub async fn try_announcement(&self) -> Result<Vec<VendorRecord>, MarketError> {
        self.fetch_paginated("/v1/fins/announcement", "announcement", Vec::new())
            .await
    }

    /// 交易日历 (`/v1/markets/trading_calendar`)。
    pub async fn try_trading_calendar(
        &self,
        holiday_division: Option<&str>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TradingDay>, MarketError> {
        let mut params = Vec::new();
        if let Some(division) = holiday_division.filter(|d| !d.is_empty()) {
            params.push(("holidaydivision", division.to_string()));
        }
        for (key, day) in [("from", from), ("to", to)] {
            if let Some(day) = day {
                params.push((key, day.to_string()));
            }
        }
        self.fetch_paginated("/v1/markets/trading_calendar", "trading_calendar", params)
            .await
    }

    pub async fn listed_info(&self, code: Option<&str>, date: Option<NaiveDate>) -> Vec<ListedInfo> {
        or_empty("listed_info", self.try_listed_info(code, date).await)
    }

    pub async fn daily_quotes(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<PriceBar> {
        or_empty("daily_quotes", self.try_daily_quotes(code, from, to).await)
    }

    pub async fn statements(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<VendorRecord> {
        or_empty("statements", self.try_statements(code, date, from, to).await)
    }

    pub async fn announcement(&self) -> Vec<VendorRecord> {
        or_empty("announcement", self.try_announcement().await)
    }

    pub async fn trading_calendar(
        &self,
        holiday_division: Option<&str>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<TradingDay> {
        or_empty(
            "trading_calendar",
            self.try_trading_calendar(holiday_division, from, to).await,
        )
    }
}

fn or_empty<T>(endpoint: &str, result: Result<Vec<T>, MarketError>) -> Vec<T> {
    match result {
        Ok(records) => records,
        Err(MarketError::Disabled) => {
            debug!(endpoint, "J-Quants disabled, returning empty result");
            Vec::new()
        }
        Err(e) => {
            warn!(endpoint, error = %e, "J-Quants request yielded no data");
            Vec::new()
        }
    }
}

#[async_trait]
impl DailyQuoteSource for JQuantsClient {
    fn name(&self) -> &'static str {
        "jquants"
    }

    fn code_form(&self) -> CodeForm {
        CodeForm::Normalized
    }

    fn is_enabled(&self) -> bool {
        JQuantsClient::is_enabled(self)
    }

    async fn fetch_daily(
        &self,
        code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, MarketError> {
        self.try_daily_quotes(code, from, to).await
    }
}

#[async_trait]
impl ListedInfoSource for JQuantsClient {
    fn is_enabled(&self) -> bool {
        JQuantsClient::is_enabled(self)
    }

    async fn fetch_listed_info(
        &self,
        code: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ListedInfo>, MarketError> {
        self.try_listed_info(code, date).await
    }
}
