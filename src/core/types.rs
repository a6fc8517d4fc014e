use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::utils::RetryPolicy;

/// 一组一起上传的文件（通常对应一个文件夹）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadGroup {
    /// 组标题
    pub title: String,
    /// 文件列表（自然排序）
    pub files: Vec<PathBuf>,
    /// 远端相册 ID，准备阶段成功后写入
    #[serde(default)]
    pub gallery_id: String,
}

impl UploadGroup {
    pub fn new(title: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            title: title.into(),
            files,
            gallery_id: String::new(),
        }
    }

    /// 封面文件：组内排序后的第一个文件
    pub fn cover_file(&self) -> Option<&Path> {
        self.files.first().map(PathBuf::as_path)
    }

    pub fn is_cover(&self, file: &Path) -> bool {
        self.cover_file() == Some(file)
    }
}

/// 单个文件的上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum UploadState {
    /// 等待调度
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Done,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Uploading => "Uploading",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// 新建远端相册返回的数据
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct GalleryData {
    #[serde(default)]
    pub gallery_name: String,
    pub gallery_hash: String,
    #[serde(default)]
    pub gallery_upload_hash: String,
    #[serde(default)]
    pub gallery_url: Option<String>,
}

/// 每组一次性生成、供组内所有文件使用的附加参数
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuxParams(BTreeMap<String, String>);

impl AuxParams {
    pub const GALLERY_HASH: &'static str = "gallery_hash";
    pub const GALLERY_UPLOAD_HASH: &'static str = "gallery_upload_hash";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&GalleryData> for AuxParams {
    fn from(data: &GalleryData) -> Self {
        let mut aux = Self::new();
        aux.insert(Self::GALLERY_HASH, data.gallery_hash.clone());
        if !data.gallery_upload_hash.is_empty() {
            aux.insert(Self::GALLERY_UPLOAD_HASH, data.gallery_upload_hash.clone());
        }
        aux
    }
}

/// 上传成功后得到的链接
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageLinks {
    pub image_url: String,
    pub thumbnail_url: String,
}

impl ImageLinks {
    pub fn new(image_url: impl Into<String>, thumbnail_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            thumbnail_url: thumbnail_url.into(),
        }
    }
}

/// 每个已调度任务恰好产生一个结果（被取消的任务除外）
#[derive(Debug, Clone, PartialEq)]
pub enum UploadResult {
    Success {
        file: PathBuf,
        image_url: String,
        thumbnail_url: String,
    },
    Failure {
        file: PathBuf,
        error: String,
    },
}

impl UploadResult {
    pub fn file(&self) -> &Path {
        match self {
            Self::Success { file, .. } | Self::Failure { file, .. } => file,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 推送给展示层的进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// 状态变更
    Status {
        file: PathBuf,
        state: UploadState,
    },
    /// 字节进度，取值 [0, 1]
    Progress {
        file: PathBuf,
        fraction: f64,
    },
    /// 新建的相册
    GalleryRegistered(GalleryData),
}

/// 单次传输的执行参数
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub retry: RetryPolicy,
    /// 每次读取的分块大小
    pub chunk_size: usize,
    /// 每次尝试的超时
    pub timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            chunk_size: 64 * 1024,
            timeout: Duration::from_secs(120),
        }
    }
}

/// 批次结束后的汇总
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// 输入文件总数
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 因取消而没有结果的文件数
    pub skipped: usize,
    /// 各组最终状态（含相册 ID）
    pub groups: Vec<UploadGroup>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }
}

// 静态断言确保类型是 Send的
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<UploadGroup>();
        assert_send::<ProgressEvent>();
        assert_send::<UploadResult>();
    }
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cover_file_is_first_entry() {
        let group = UploadGroup::new("Vacation", vec!["a.jpg".into(), "b.jpg".into()]);
        assert!(group.is_cover(Path::new("a.jpg")));
        assert!(!group.is_cover(Path::new("b.jpg")));
        assert!(UploadGroup::new("Empty", vec![]).cover_file().is_none());
    }

    #[test]
    fn test_aux_params_from_gallery() {
        let data = GalleryData {
            gallery_name: "Trip".into(),
            gallery_hash: "abc".into(),
            gallery_upload_hash: "xyz".into(),
            gallery_url: None,
        };
        let aux = AuxParams::from(&data);
        assert_eq!(aux.get(AuxParams::GALLERY_HASH), Some("abc"));
        assert_eq!(aux.get(AuxParams::GALLERY_UPLOAD_HASH), Some("xyz"));
        assert_eq!(aux.len(), 2);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!UploadState::Pending.is_terminal());
        assert!(!UploadState::Uploading.is_terminal());
        assert!(UploadState::Done.is_terminal());
        assert!(UploadState::Failed.is_terminal());
        assert!(UploadState::Cancelled.is_terminal());
    }
}
