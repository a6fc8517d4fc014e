use std::path::Path;
use std::sync::Arc;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::utils::{format_bytes, ProgressStream};
use super::errors::{Result, UploadError};
use super::progress::EventSink;
use super::request::{HttpRequest, OutgoingRequest, PreparedRequest, RawResponse, RequestBody};
use super::traits::{Transport, UploadBackend};
use super::types::{ImageLinks, TransferSettings, UploadState};

/// 单个文件的传输执行器：构建请求、流式发送、按策略重试
#[derive(Clone)]
pub struct TransferWorker {
    transport: Arc<dyn Transport>,
    settings: TransferSettings,
    cancellation_token: CancellationToken,
    sink: EventSink,
}

impl TransferWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: TransferSettings,
        cancellation_token: CancellationToken,
        sink: EventSink,
    ) -> Self {
        Self {
            transport,
            settings,
            cancellation_token,
            sink,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// 执行一次完整的文件传输
    ///
    /// `build_request` 只调用一次，请求体在每次尝试时重新生成。
    /// 取消时返回 `UploadError::Cancelled`，且不会重试。
    pub async fn execute(&self, file: &Path, backend: &mut dyn UploadBackend) -> Result<ImageLinks> {
        self.check_cancelled()?;

        // 首次尝试的 Uploading 由调度器在创建后端前发出
        // 插件在 build_request 内完成整个上传，取消时直接放弃
        let prepared = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return Err(UploadError::Cancelled),
            prepared = backend.build_request() => prepared,
        };

        let HttpRequest { url, mut headers, body } = match prepared {
            Ok(PreparedRequest::Http(request)) => request,
            Ok(PreparedRequest::Completed) => return backend.parse_response(&RawResponse::default()),
            Err(err) => return Err(self.classify(err)),
        };

        if !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        let retry = &self.settings.retry;
        let mut attempt = 1;

        loop {
            self.check_cancelled()?;
            if attempt > 1 {
                self.sink.status(file, UploadState::Uploading);
            }

            debug!(
                "上传 {} ({}) 第 {}/{} 次尝试 -> {}",
                file.display(),
                format_bytes(body.len()),
                attempt,
                retry.max_attempts,
                url
            );

            let outcome = self
                .send_once(file, &url, &headers, &body)
                .await
                .and_then(|response| backend.parse_response(&response));

            let err = match outcome {
                Ok(links) => return Ok(links),
                Err(err) => self.classify(err),
            };

            if !retry.should_retry(attempt, &err) {
                return Err(err);
            }

            let delay = retry.backoff(attempt);
            warn!(
                "{} 第 {}/{} 次上传失败: {}，{:?} 后重试",
                file.display(),
                attempt,
                retry.max_attempts,
                err,
                delay
            );

            tokio::select! {
                _ = self.cancellation_token.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    async fn send_once(
        &self,
        file: &Path,
        url: &str,
        headers: &HeaderMap,
        body: &RequestBody,
    ) -> Result<RawResponse> {
        let total = body.len();
        let stream = ProgressStream::new(
            body.stream(self.settings.chunk_size),
            total,
            self.cancellation_token.clone(),
            self.sink.progress_callback(file),
        );

        let request = OutgoingRequest {
            url: url.to_string(),
            headers: headers.clone(),
            body: stream.boxed(),
            content_length: total,
            timeout: self.settings.timeout,
        };

        let response = tokio::time::timeout(self.settings.timeout, self.transport.send(request))
            .await
            .map_err(|_| UploadError::Timeout)??;

        if !response.is_success() {
            return Err(UploadError::from_status(response.status, &response.body));
        }

        Ok(response)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    /// 取消信号到达后，任何失败都按取消处理
    fn classify(&self, err: UploadError) -> UploadError {
        if self.cancellation_token.is_cancelled() {
            UploadError::Cancelled
        } else {
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use tokio::time::Instant;
    use super::*;
    use crate::core::progress::{self, BatchReceivers};
    use crate::core::types::ProgressEvent;
    use crate::utils::{RateLimitPolicy, RetryPolicy};

    /// 按脚本依次返回响应，并读完请求体
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<RawResponse>>>,
        calls: AtomicUsize,
        last_headers: Mutex<Option<HeaderMap>>,
        on_send: Option<CancellationToken>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<RawResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                last_headers: Mutex::new(None),
                on_send: None,
            }
        }

        fn cancelling(mut self, token: CancellationToken) -> Self {
            self.on_send = Some(token);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: OutgoingRequest) -> Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_headers.lock().unwrap() = Some(request.headers.clone());
            let _: Vec<_> = request.body.try_collect().await?;

            if let Some(token) = &self.on_send {
                token.cancel();
            }

            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::new(200, "img|thumb")))
        }
    }

    /// 响应格式 `image|thumb`
    struct PipeBackend {
        builds: usize,
        completed: bool,
    }

    impl PipeBackend {
        fn new() -> Self {
            Self { builds: 0, completed: false }
        }
    }

    #[async_trait]
    impl UploadBackend for PipeBackend {
        async fn build_request(&mut self) -> Result<PreparedRequest> {
            self.builds += 1;
            if self.completed {
                return Ok(PreparedRequest::Completed);
            }
            let mut request = HttpRequest::post("http://host.test/upload");
            request.body = RequestBody::from_bytes(vec![1u8; 10]);
            Ok(PreparedRequest::Http(request))
        }

        fn parse_response(&mut self, response: &RawResponse) -> Result<ImageLinks> {
            if self.completed {
                return Ok(ImageLinks::new("cached", "cached-thumb"));
            }
            let (image, thumb) = response
                .body
                .split_once('|')
                .ok_or_else(|| UploadError::malformed(response.body.clone()))?;
            Ok(ImageLinks::new(image, thumb))
        }
    }

    fn make_worker(transport: Arc<ScriptedTransport>, retry: RetryPolicy, token: CancellationToken) -> (TransferWorker, BatchReceivers) {
        let (sink, receivers) = progress::channel();
        let settings = TransferSettings {
            retry,
            chunk_size: 4,
            timeout: Duration::from_secs(120),
        };
        (TransferWorker::new(transport, settings, token, sink), receivers)
    }

    /// 永远不返回的服务器
    #[derive(Default)]
    struct HangingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&self, _request: OutgoingRequest) -> Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().await
        }
    }

    /// build_request 内部耗时很久（相当于插件的一次性上传）
    struct SlowCompletedBackend {
        finished: bool,
    }

    #[async_trait]
    impl UploadBackend for SlowCompletedBackend {
        async fn build_request(&mut self) -> Result<PreparedRequest> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.finished = true;
            Ok(PreparedRequest::Completed)
        }

        fn parse_response(&mut self, _response: &RawResponse) -> Result<ImageLinks> {
            Ok(ImageLinks::new("late", "late-thumb"))
        }
    }

    fn error_response(status: u16) -> Result<RawResponse> {
        Ok(RawResponse::new(status, "nope"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_sum() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            error_response(503),
            Err(UploadError::Timeout),
            error_response(502),
        ]));
        let policy = RetryPolicy::new(4).exponential(Duration::from_secs(2), Duration::from_secs(5));
        let (worker, _rx) = make_worker(transport.clone(), policy.clone(), CancellationToken::new());

        let start = Instant::now();
        let links = worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.unwrap();

        assert_eq!(links, ImageLinks::new("img", "thumb"));
        assert_eq!(transport.calls(), 4);
        // 2 + 4 + min(8, 5)
        assert_eq!(start.elapsed(), Duration::from_secs(11));
        assert_eq!(start.elapsed(), policy.total_backoff(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let transport = Arc::new(ScriptedTransport::new(vec![error_response(403)]));
        let (worker, _rx) = make_worker(transport.clone(), RetryPolicy::new(3), CancellationToken::new());

        let start = Instant::now();
        let err = worker.execute(Path::new("b.jpg"), &mut PipeBackend::new()).await.unwrap_err();

        assert!(matches!(err, UploadError::ClientError { status_code: 403, .. }));
        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted_returns_last_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![error_response(500), error_response(500)]));
        let (worker, _rx) = make_worker(transport.clone(), RetryPolicy::new(2), CancellationToken::new());

        let err = worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::ServerError { status_code: 500, .. }));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_policy() {
        let transport = Arc::new(ScriptedTransport::new(vec![error_response(429)]));
        let (worker, _rx) = make_worker(transport.clone(), RetryPolicy::new(3), CancellationToken::new());
        assert!(worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.is_ok());
        assert_eq!(transport.calls(), 2);

        let transport = Arc::new(ScriptedTransport::new(vec![error_response(429)]));
        let policy = RetryPolicy::new(3).rate_limit(RateLimitPolicy::Fail);
        let (worker, _rx) = make_worker(transport.clone(), policy, CancellationToken::new());
        let err = worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::RateLimited(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::new(200, "garbage"))]));
        let (worker, _rx) = make_worker(transport.clone(), RetryPolicy::new(3), CancellationToken::new());

        let err = worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::MalformedResponse(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt_is_not_retried() {
        let token = CancellationToken::new();
        let transport = Arc::new(ScriptedTransport::new(vec![error_response(503)]).cancelling(token.clone()));
        let (worker, _rx) = make_worker(transport.clone(), RetryPolicy::new(3), token);

        let start = Instant::now();
        let err = worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let (worker, mut rx) = make_worker(transport.clone(), RetryPolicy::new(3), token);

        let mut backend = PipeBackend::new();
        let err = worker.execute(Path::new("a.jpg"), &mut backend).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(backend.builds, 0);
        assert_eq!(transport.calls(), 0);
        assert!(rx.drain_progress().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let transport = Arc::new(HangingTransport::default());
        let (sink, mut rx) = progress::channel();
        let settings = TransferSettings {
            retry: RetryPolicy::new(2).exponential(Duration::from_secs(2), Duration::from_secs(30)),
            chunk_size: 4,
            timeout: Duration::from_secs(5),
        };
        let worker = TransferWorker::new(transport.clone(), settings, CancellationToken::new(), sink);

        let start = Instant::now();
        let err = worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.unwrap_err();

        assert!(matches!(err, UploadError::Timeout), "{err:?}");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        // 两次 5s 超时 + 一次 2s 退避
        assert_eq!(start.elapsed(), Duration::from_secs(12));

        let retries = rx
            .drain_progress()
            .into_iter()
            .filter(|event| matches!(event, ProgressEvent::Status { state: UploadState::Uploading, .. }))
            .count();
        assert_eq!(retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_slow_build() {
        let token = CancellationToken::new();
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let (worker, _rx) = make_worker(transport.clone(), RetryPolicy::new(3), token.clone());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            })
        };

        let start = Instant::now();
        let mut backend = SlowCompletedBackend { finished: false };
        let err = worker.execute(Path::new("a.jpg"), &mut backend).await.unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert!(!backend.finished);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_content_length_and_progress_order() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let (worker, mut rx) = make_worker(transport.clone(), RetryPolicy::new(1), CancellationToken::new());

        worker.execute(Path::new("a.jpg"), &mut PipeBackend::new()).await.unwrap();

        let headers = transport.last_headers.lock().unwrap().clone().unwrap();
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "10");

        // 首次尝试不发 Uploading（由调度器发出），只有字节进度
        let events = rx.drain_progress();
        let fractions: Vec<f64> = events
            .iter()
            .map(|event| match event {
                ProgressEvent::Progress { fraction, .. } => *fraction,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(fractions, vec![0.4, 0.8, 1.0]);
    }

    #[tokio::test]
    async fn test_completed_request_skips_transport() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let (worker, _rx) = make_worker(transport.clone(), RetryPolicy::new(3), CancellationToken::new());

        let mut backend = PipeBackend::new();
        backend.completed = true;
        let links = worker.execute(Path::new("a.jpg"), &mut backend).await.unwrap();

        assert_eq!(links.image_url, "cached");
        assert_eq!(backend.builds, 1);
        assert_eq!(transport.calls(), 0);
    }
}
