use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::config::{AppConfig, Credentials, GroupConfig};
use crate::uploaders::BackendRegistry;
use crate::utils::format_duration;
use super::errors::{Result, UploadError};
use super::gallery::GroupPreparer;
use super::progress::{self, BatchReceivers, EventSink};
use super::session::HttpSessionFactory;
use super::task::UploadTask;
use super::traits::{NetworkSession, PluginRegistry, SessionFactory};
use super::types::{BatchSummary, UploadGroup, UploadResult, UploadState};
use super::worker::TransferWorker;

/// 一个批次的输入：按顺序排列的组及其待上传文件
pub type Batch = Vec<(UploadGroup, Vec<PathBuf>)>;

/// 批次调度器
///
/// 组与组之间严格串行；组内文件并发上传，同时进行的传输数不超过 `max_concurrent`。
/// 同一时间只允许运行一个批次。取消后调度器保持取消状态，新批次需要新的调度器。
pub struct BatchManager {
    backends: BackendRegistry,
    sessions: Arc<dyn SessionFactory>,
    preparer: GroupPreparer,
    sink: EventSink,
    cancellation_token: CancellationToken,
    running: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    skipped: usize,
}

impl Tally {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Cancelled => self.skipped += 1,
        }
    }
}

/// 批次结束（包括出错返回）时清除运行标记
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| UploadError::BatchInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BatchManager {
    pub fn new(backends: BackendRegistry, sessions: Arc<dyn SessionFactory>) -> (Self, BatchReceivers) {
        let (sink, receivers) = progress::channel();
        let manager = Self {
            backends,
            sessions,
            preparer: GroupPreparer::new(),
            sink,
            cancellation_token: CancellationToken::new(),
            running: AtomicBool::new(false),
        };
        (manager, receivers)
    }

    /// 使用真实网络（reqwest）
    pub fn with_http(plugins: Arc<dyn PluginRegistry>) -> (Self, BatchReceivers) {
        Self::new(BackendRegistry::new(plugins), Arc::new(HttpSessionFactory::new()))
    }

    /// 请求取消：不再调度新任务，进行中的任务在下一个检查点退出
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// 运行一个批次
    ///
    /// 单个文件的失败不会中断批次；只有会话创建失败或重入才返回错误。
    pub async fn run(&self, batch: Batch, config: &AppConfig, credentials: &Credentials) -> Result<BatchSummary> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started_at = Utc::now();

        let total: usize = batch.iter().map(|(_, files)| files.len()).sum();
        let max_concurrent = config.max_concurrent();
        let settings = config.transfer_settings();
        info!(
            "开始批次: {} 组 {} 个文件, 服务 {}, 并发 {}",
            batch.len(),
            total,
            config.service,
            max_concurrent
        );

        let session = self.sessions.open(&settings)?;
        let worker = TransferWorker::new(
            session.transport.clone(),
            settings,
            self.cancellation_token.clone(),
            self.sink.clone(),
        );

        let mut tally = Tally::default();
        let mut groups = Vec::with_capacity(batch.len());

        for (mut group, files) in batch {
            if self.is_cancelled() {
                warn!("批次已取消, 跳过组 '{}'", group.title);
                for file in &files {
                    self.sink.status(file, UploadState::Cancelled);
                }
                tally.skipped += files.len();
                groups.push(group);
                continue;
            }

            let outcomes = self
                .run_group(&mut group, &files, config, credentials, &session, &worker, max_concurrent)
                .await;
            for outcome in outcomes {
                tally.record(outcome);
            }
            groups.push(group);
        }

        // 释放共享客户端
        drop(worker);
        drop(session);

        let summary = BatchSummary {
            total,
            succeeded: tally.succeeded,
            failed: tally.failed,
            skipped: tally.skipped,
            groups,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "批次结束: 成功 {}, 失败 {}, 跳过 {}, 耗时 {}",
            summary.succeeded,
            summary.failed,
            summary.skipped,
            format_duration(summary.elapsed())
        );

        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_group(
        &self,
        group: &mut UploadGroup,
        files: &[PathBuf],
        config: &AppConfig,
        credentials: &Credentials,
        session: &NetworkSession,
        worker: &TransferWorker,
        max_concurrent: usize,
    ) -> Vec<TaskOutcome> {
        info!("组 '{}': {} 个文件", group.title, files.len());
        for file in files {
            self.sink.status(file, UploadState::Pending);
        }

        let preparation = self
            .preparer
            .prepare(config, group, credentials, session.galleries.as_ref(), &self.sink)
            .await;

        let group_config = Arc::new(GroupConfig::new(config, credentials).with_gallery_id(preparation.gallery_id));
        let tasks = UploadTask::for_group(group, files, group_config, Arc::new(preparation.aux));

        let semaphore = Semaphore::new(max_concurrent);
        join_all(tasks.into_iter().map(|task| self.upload_one(task, &semaphore, worker))).await
    }

    async fn upload_one(&self, task: UploadTask, semaphore: &Semaphore, worker: &TransferWorker) -> TaskOutcome {
        let permit = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => None,
            permit = semaphore.acquire() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.sink.status(&task.file, UploadState::Cancelled);
            return TaskOutcome::Cancelled;
        };

        let file = task.file.clone();
        // 拿到许可即进入 Uploading，后端创建失败也是 Uploading -> Failed
        self.sink.status(&file, UploadState::Uploading);

        let result = match self.backends.create(&task, self.sink.progress_callback(&file)) {
            Ok(mut backend) => {
                let result = AssertUnwindSafe(worker.execute(&file, backend.as_mut()))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(UploadError::internal_error("upload task panicked")));
                backend.close();
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(links) => {
                info!("{} 上传完成: {}", file.display(), links.image_url);
                self.sink.status(&file, UploadState::Done);
                self.sink.result(UploadResult::Success {
                    file,
                    image_url: links.image_url,
                    thumbnail_url: links.thumbnail_url,
                });
                TaskOutcome::Succeeded
            }
            Err(err) if err.is_cancelled() => {
                info!("{} 已取消", file.display());
                self.sink.status(&file, UploadState::Cancelled);
                TaskOutcome::Cancelled
            }
            Err(err) => {
                error!("{} 上传失败: {}", file.display(), err);
                self.sink.status(&file, UploadState::Failed);
                self.sink.result(UploadResult::Failure {
                    file,
                    error: err.to_string(),
                });
                TaskOutcome::Failed
            }
        }
    }

    /// 在独立线程上（单线程 tokio 运行时）执行批次
    pub fn spawn(self: Arc<Self>, batch: Batch, config: AppConfig, credentials: Credentials) -> Result<BatchHandle> {
        let cancellation_token = self.cancellation_token.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();

        let thread = std::thread::Builder::new()
            .name("imghost-batch".to_string())
            .spawn(move || {
                let result = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(UploadError::from)
                    .and_then(|runtime| runtime.block_on(self.run(batch, &config, &credentials)));
                done.store(true, Ordering::SeqCst);
                result
            })?;

        Ok(BatchHandle {
            cancellation_token,
            finished,
            thread,
        })
    }
}

/// 后台批次的句柄
pub struct BatchHandle {
    cancellation_token: CancellationToken,
    finished: Arc<AtomicBool>,
    thread: JoinHandle<Result<BatchSummary>>,
}

impl BatchHandle {
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// 阻塞等待批次结束
    pub fn join(self) -> Result<BatchSummary> {
        self.thread
            .join()
            .map_err(|_| UploadError::internal_error("batch thread panicked"))?
    }
}
