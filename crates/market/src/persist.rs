use chrono::NaiveDate;
use kabu_core::common::SecurityCode;
use kabu_core::market::entity::{ListedInfo, QuoteBatch};
use kabu_core::store::port::{ListedInfoStore, PriceStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 后台落库任务。
#[derive(Debug)]
pub enum PersistJob {
    Daily {
        // 调用方的原始代码
        code: SecurityCode,
        batch: QuoteBatch,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    Listed(Vec<ListedInfo>),
}

impl PersistJob {
    fn label(&self) -> String {
        match self {
            PersistJob::Daily { code, .. } => format!("daily:{code}"),
            PersistJob::Listed(rows) => format!("listed:{}", rows.len()),
        }
    }
}

/// # Summary
/// 后台落库工作者的提交端，可廉价克隆并在多个服务间共享。
///
/// # Invariants
/// - 提交永不阻塞调用方，也不向调用方返回落库错误。
/// - 队列满时转交给独立任务等待入队，任务不会被丢弃。
#[derive(Clone)]
pub struct PersistWorker {
    tx: mpsc::Sender<PersistJob>,
}

/// 工作者任务句柄，用于进程退出前等待队列排空。
pub struct PersistTask {
    handle: JoinHandle<()>,
}

impl PersistWorker {
    /// # Summary
    /// 启动后台落库工作者。
    ///
    /// # Logic
    /// 1. 创建容量为 `queue_depth` 的 mpsc 通道。
    /// 2. 启动后台协程按到达顺序逐个执行任务，错误只记录日志。
    /// 3. 所有提交端被释放后协程自然退出。
    ///
    /// # Arguments
    /// * `prices`: 日线缓存。
    /// * `listed`: 上市证券主数据缓存，None 时丢弃该类任务。
    /// * `queue_depth`: 队列容量。
    ///
    /// # Returns
    /// 提交端与任务句柄。
    pub fn spawn(
        prices: Arc<dyn PriceStore>,
        listed: Option<Arc<dyn ListedInfoStore>>,
        queue_depth: usize,
    ) -> (Self, PersistTask) {
        let (tx, mut rx) = mpsc::channel::<PersistJob>(queue_depth.max(1));

        let handle = tokio::spawn(async move {
            info!("persist worker started");
            while let Some(job) = rx.recv().await {
                run_job(prices.as_ref(), listed.as_deref(), job).await;
            }
            info!("persist worker stopped");
        });

        (Self { tx }, PersistTask { handle })
    }

    /// # Summary
    /// 提交任务（即发即忘）。
    ///
    /// # Logic
    /// 1. 先尝试直接入队。
    /// 2. 队列已满则派生任务异步等待入队。
    /// 3. 工作者已停止则记录警告。
    pub fn submit(&self, job: PersistJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                debug!(job = %job.label(), "persist queue full, deferring");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(job).await {
                        warn!(job = %e.0.label(), "persist worker stopped, job dropped");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(job = %job.label(), "persist worker stopped, job dropped");
            }
        }
    }
}

impl PersistTask {
    /// 等待工作者处理完所有已提交的任务。需要先释放全部 `PersistWorker`。
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "persist worker terminated abnormally");
        }
    }
}

async fn run_job(prices: &dyn PriceStore, listed: Option<&dyn ListedInfoStore>, job: PersistJob) {
    match job {
        PersistJob::Daily {
            code,
            batch,
            from,
            to,
        } => match prices.write_daily(&code, batch, from, to).await {
            Ok(summary) => debug!(
                code = %code,
                inserted = summary.inserted,
                skipped = summary.skipped,
                "background save finished"
            ),
            Err(e) => error!(code = %code, error = %e, "background save failed"),
        },
        PersistJob::Listed(rows) => {
            let Some(store) = listed else {
                debug!("no listed info store configured, job ignored");
                return;
            };
            match store.save_listed_info(&rows).await {
                Ok(inserted) => debug!(inserted, "background listed info save finished"),
                Err(e) => error!(error = %e, "background listed info save failed"),
            }
        }
    }
}
