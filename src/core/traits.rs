use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use crate::config::GroupConfig;
use crate::utils::ProgressCallback;
use super::errors::Result;
use super::request::{OutgoingRequest, PreparedRequest, RawResponse};
use super::types::{GalleryData, ImageLinks, TransferSettings};

/// 两阶段上传后端 - 内置服务与适配后的插件都实现此接口
///
/// 执行器在 `build_request` 与 `parse_response` 之间负责网络请求本身。
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// 构建请求，每个任务只调用一次
    async fn build_request(&mut self) -> Result<PreparedRequest>;

    /// 从响应中解析出图片链接和缩略图链接
    fn parse_response(&mut self, response: &RawResponse) -> Result<ImageLinks>;

    /// 任务结束后调用一次，不得失败
    fn close(&mut self) {}
}

/// 插件上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUpload {
    pub image_url: String,
    pub thumb_url: String,
}

/// 一次性上传的插件后端
#[async_trait]
pub trait PluginBackend: Send + Sync {
    /// 完成整个上传，进度以 `(bytes_sent, total_bytes)` 回报
    async fn upload(&self, file: &Path, progress: ProgressCallback) -> anyhow::Result<PluginUpload>;

    /// 释放资源
    fn cleanup(&self) -> anyhow::Result<()>;
}

/// 插件注册表
pub trait PluginRegistry: Send + Sync {
    fn is_plugin_service(&self, name: &str) -> bool;

    /// 返回 `None` 表示插件无法实例化
    fn get_plugin_instance(
        &self,
        name: &str,
        credentials: &HashMap<String, String>,
        config: &GroupConfig,
    ) -> Option<Box<dyn PluginBackend>>;
}

/// 共享的网络客户端：发送一次请求
#[async_trait]
pub trait Transport: Send + Sync {
    /// 任意状态码都以 `RawResponse` 返回，只有传输层失败才返回错误
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse>;
}

/// 相册相关的远端操作
#[async_trait]
pub trait GalleryApi: Send + Sync {
    async fn create_pixhost_gallery(&self, title: &str) -> Result<GalleryData>;

    /// 返回新相册 ID
    async fn create_imx_gallery(&self, user: &str, password: &str, title: &str) -> Result<String>;
}

/// 一个批次共用的网络会话
#[derive(Clone)]
pub struct NetworkSession {
    pub transport: Arc<dyn Transport>,
    pub galleries: Arc<dyn GalleryApi>,
}

/// 每个批次开始时获取会话，批次结束时释放
pub trait SessionFactory: Send + Sync {
    fn open(&self, settings: &TransferSettings) -> Result<NetworkSession>;
}
