mod settings;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kabu_core::market::port::{DailyQuoteSource, ListedInfoSource};
use kabu_core::store::port::ListedInfoStore;
use kabu_feed::jquants::{Credentials, JQuantsClient};
use kabu_feed::stooq::StooqSource;
use kabu_feed::yahoo::YahooChartSource;
use kabu_market::listed::ListedInfoService;
use kabu_market::persist::PersistWorker;
use kabu_market::pipeline::AcquisitionPipeline;
use kabu_store::daily::SqliteDailyStore;
use kabu_store::listed::SqliteListedInfoStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "kabu")]
#[command(about = "Japanese equity daily prices with a local SQLite cache", long_about = None)]
struct Cli {
    /// Config file path (defaults to config/default.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, env = "KABU_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daily OHLCV bars: cache, then broker, vendor and mirror sources
    Prices {
        /// Security code, e.g. 7203 or 7203.JP
        code: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Print which sources were tried alongside the bars
        #[arg(long)]
        trace: bool,
    },
    /// Listed securities master data
    Listed {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Exchange trading calendar
    Calendar {
        #[arg(long)]
        holiday_division: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Financial statements
    Statements {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Scheduled earnings announcements
    Announcement,
}

/// # Summary
/// 初始化日志：stderr 输出，可选按天滚动的文件输出。
///
/// # Returns
/// 文件输出的后台写入守卫，需持有到进程结束。
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "kabu.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
///
/// # Logic
/// 1. 读取 `.env` 并初始化日志。
/// 2. 加载配置，确定缓存根目录。
/// 3. 实例化基础设施层（缓存、数据源）。
/// 4. 构造获取管线与主数据服务，执行子命令并输出 JSON。
/// 5. 释放所有提交端，等待后台落库完成后退出。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. .env 需在日志之前读取，RUST_LOG 可能写在其中
    let dotenv = dotenvy::dotenv();
    let _guard = init_tracing(cli.log_dir.as_ref());
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) => debug!(error = %e, "no .env loaded"),
    }
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("TLS crypto provider already installed");
    }

    // 2. 配置
    let settings = settings::load(cli.config.as_deref())?;
    if let Some(root) = settings.cache.root_dir.as_deref() {
        kabu_store::config::set_root_dir(PathBuf::from(root));
    }
    info!(root = %kabu_store::config::get_root_dir().display(), "cache root");

    // 3. 基础设施层
    let price_store = Arc::new(SqliteDailyStore::new().with_enabled(settings.cache.enabled));
    let listed_store: Arc<dyn ListedInfoStore> =
        Arc::new(SqliteListedInfoStore::new().with_enabled(settings.cache.enabled));
    let jquants = Arc::new(JQuantsClient::new(
        &settings.jquants,
        Credentials::from_env(),
    )?);
    if settings.sources.vendor && jquants.is_enabled() && !jquants.login().await {
        warn!("vendor source unavailable for this run");
    }

    let mut sources: Vec<Arc<dyn DailyQuoteSource>> = Vec::new();
    if settings.sources.broker {
        sources.push(Arc::new(YahooChartSource::new()?));
    }
    if settings.sources.vendor {
        sources.push(jquants.clone());
    }
    if settings.sources.mirror {
        sources.push(Arc::new(StooqSource::new()?));
    }
    let listed_source: Option<Arc<dyn ListedInfoSource>> = if settings.sources.vendor {
        Some(jquants.clone())
    } else {
        None
    };

    // 4. 应用服务层
    let (persist, persist_task) = PersistWorker::spawn(
        price_store.clone(),
        Some(listed_store.clone()),
        settings.persist.queue_depth,
    );
    let pipeline = AcquisitionPipeline::new(price_store, sources, persist.clone());
    let listed = ListedInfoService::new(listed_store, listed_source, persist);

    let outcome = match cli.command {
        Commands::Prices {
            code,
            from,
            to,
            trace,
        } => {
            let acquisition = pipeline.fetch_daily_traced(&code, from, to).await?;
            if trace {
                print_json(&json!({ "report": acquisition.report, "bars": acquisition.bars }))
            } else {
                print_json(&serde_json::to_value(&acquisition.bars)?)
            }
        }
        Commands::Listed { code, date } => {
            let rows = listed.get(code.as_deref(), date).await?;
            print_json(&serde_json::to_value(&rows)?)
        }
        Commands::Calendar {
            holiday_division,
            from,
            to,
        } => {
            let days = jquants
                .trading_calendar(holiday_division.as_deref(), from, to)
                .await;
            print_json(&serde_json::to_value(&days)?)
        }
        Commands::Statements {
            code,
            date,
            from,
            to,
        } => {
            let records = jquants.statements(code.as_deref(), date, from, to).await;
            print_json(&serde_json::to_value(&records)?)
        }
        Commands::Announcement => {
            let records = jquants.announcement().await;
            print_json(&serde_json::to_value(&records)?)
        }
    };

    // 5. 等待后台落库
    drop(pipeline);
    drop(listed);
    persist_task.wait().await;
    info!("all background saves finished");

    outcome
}
