use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::config::GroupConfig;
use super::types::{AuxParams, UploadGroup};

/// 单个文件的上传任务，调度时创建，执行完即丢弃
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub file: PathBuf,
    /// 仅组内第一个文件为 true（封面）
    pub is_first: bool,
    pub config: Arc<GroupConfig>,
    pub aux: Arc<AuxParams>,
}

impl UploadTask {
    pub fn new(file: PathBuf, is_first: bool, config: Arc<GroupConfig>, aux: Arc<AuxParams>) -> Self {
        Self {
            file,
            is_first,
            config,
            aux,
        }
    }

    /// 为 `files` 创建任务，并标记组的封面文件
    pub fn for_group(
        group: &UploadGroup,
        files: &[PathBuf],
        config: Arc<GroupConfig>,
        aux: Arc<AuxParams>,
    ) -> Vec<UploadTask> {
        files
            .iter()
            .map(|file| Self::new(file.clone(), group.is_cover(file), config.clone(), aux.clone()))
            .collect()
    }

    pub fn service(&self) -> &str {
        &self.config.service
    }

    pub fn path(&self) -> &Path {
        &self.file
    }
}
