use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use crate::utils::ProgressCallback;
use super::types::{GalleryData, ProgressEvent, UploadResult, UploadState};

/// 生产端：多个任务并发写入，写入永不阻塞
#[derive(Clone)]
pub struct EventSink {
    progress_tx: mpsc::UnboundedSender<ProgressEvent>,
    result_tx: mpsc::UnboundedSender<UploadResult>,
}

/// 消费端：由展示层（或测试）独立读取
pub struct BatchReceivers {
    pub progress: mpsc::UnboundedReceiver<ProgressEvent>,
    pub results: mpsc::UnboundedReceiver<UploadResult>,
}

/// 创建一对事件/结果通道
pub fn channel() -> (EventSink, BatchReceivers) {
    let (progress_tx, progress) = mpsc::unbounded_channel();
    let (result_tx, results) = mpsc::unbounded_channel();

    (
        EventSink { progress_tx, result_tx },
        BatchReceivers { progress, results },
    )
}

impl EventSink {
    // 接收端已关闭时静默丢弃

    pub fn status(&self, file: &Path, state: UploadState) {
        let _ = self.progress_tx.send(ProgressEvent::Status {
            file: file.to_path_buf(),
            state,
        });
    }

    pub fn progress(&self, file: &Path, fraction: f64) {
        let _ = self.progress_tx.send(ProgressEvent::Progress {
            file: file.to_path_buf(),
            fraction: fraction.clamp(0.0, 1.0),
        });
    }

    pub fn gallery_registered(&self, data: GalleryData) {
        let _ = self.progress_tx.send(ProgressEvent::GalleryRegistered(data));
    }

    pub fn result(&self, result: UploadResult) {
        let _ = self.result_tx.send(result);
    }

    /// 字节回调：为 `file` 回报 `sent / total`
    pub fn progress_callback(&self, file: &Path) -> ProgressCallback {
        let sink = self.clone();
        let file: PathBuf = file.to_path_buf();
        Arc::new(move |sent, total| {
            if total > 0 {
                sink.progress(&file, sent as f64 / total as f64);
            }
        })
    }
}

impl BatchReceivers {
    /// 取出当前已到达的全部进度事件
    pub fn drain_progress(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.progress.try_recv() {
            events.push(event);
        }
        events
    }

    /// 取出当前已到达的全部结果
    pub fn drain_results(&mut self) -> Vec<UploadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.results.try_recv() {
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_callback_reports_fraction() {
        let (sink, mut receivers) = channel();
        let callback = sink.progress_callback(Path::new("a.jpg"));

        callback(5, 10);
        callback(3, 0);
        callback(20, 10);

        let events = receivers.drain_progress();
        assert_eq!(events, vec![
            ProgressEvent::Progress { file: "a.jpg".into(), fraction: 0.5 },
            ProgressEvent::Progress { file: "a.jpg".into(), fraction: 1.0 },
        ]);
    }

    #[test]
    fn test_closed_receiver_does_not_panic() {
        let (sink, receivers) = channel();
        drop(receivers);
        sink.status(Path::new("a.jpg"), UploadState::Uploading);
        sink.result(UploadResult::Failure { file: "a.jpg".into(), error: "x".into() });
    }
}
