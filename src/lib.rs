pub mod config;
pub mod core;
pub mod logging;
pub mod scan;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use core::{
    Batch,
    BatchHandle,
    BatchManager,
    BatchReceivers,
    BatchSummary,
    ProgressEvent,
    Result,
    UploadError,
    UploadGroup,
    UploadResult,
    UploadState,
};

pub use config::{AppConfig, Credentials, GroupConfig};

// 重新导出上传器
pub use uploaders::{BackendRegistry, PluginAdapter, StaticPluginRegistry};
