use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use tracing::warn;
use crate::config::GroupConfig;
use crate::core::{
    ImageLinks, PluginBackend, PluginRegistry, PreparedRequest, RawResponse, Result, UploadBackend, UploadError,
};
use crate::utils::ProgressCallback;

/// 把一次性插件包装成两阶段后端
///
/// `build_request` 内完成整个上传并缓存结果，`parse_response` 只返回缓存。
/// 每个任务只能调用一次 `build_request`，再次调用会重新上传。
pub struct PluginAdapter {
    service: String,
    plugin: Box<dyn PluginBackend>,
    file: PathBuf,
    progress: ProgressCallback,
    result: Option<ImageLinks>,
    closed: bool,
}

impl PluginAdapter {
    pub fn new(service: impl Into<String>, plugin: Box<dyn PluginBackend>, file: PathBuf, progress: ProgressCallback) -> Self {
        Self {
            service: service.into(),
            plugin,
            file,
            progress,
            result: None,
            closed: false,
        }
    }
}

#[async_trait]
impl UploadBackend for PluginAdapter {
    async fn build_request(&mut self) -> Result<PreparedRequest> {
        let upload = self
            .plugin
            .upload(&self.file, self.progress.clone())
            .await
            .map_err(|err| UploadError::PluginUpload(format!("{}: {:#}", self.service, err)))?;

        self.result = Some(ImageLinks::new(upload.image_url, upload.thumb_url));
        Ok(PreparedRequest::Completed)
    }

    fn parse_response(&mut self, _response: &RawResponse) -> Result<ImageLinks> {
        self.result
            .clone()
            .ok_or_else(|| UploadError::internal_error("plugin result requested before upload"))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(err) = self.plugin.cleanup() {
            warn!("插件 {} 清理失败: {:#}", self.service, err);
        }
    }
}

impl Drop for PluginAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

/// 插件工厂：`(credentials, config)` -> 实例
pub type PluginFactory =
    Arc<dyn Fn(&HashMap<String, String>, &GroupConfig) -> anyhow::Result<Box<dyn PluginBackend>> + Send + Sync>;

/// 进程内插件注册表
#[derive(Clone, Default)]
pub struct StaticPluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl StaticPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, service: impl Into<String>, factory: F)
    where
        F: Fn(&HashMap<String, String>, &GroupConfig) -> anyhow::Result<Box<dyn PluginBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(service.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, service: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&HashMap<String, String>, &GroupConfig) -> anyhow::Result<Box<dyn PluginBackend>> + Send + Sync + 'static,
    {
        self.register(service, factory);
        self
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for StaticPluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPluginRegistry")
            .field("services", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry for StaticPluginRegistry {
    fn is_plugin_service(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    fn get_plugin_instance(
        &self,
        name: &str,
        credentials: &HashMap<String, String>,
        config: &GroupConfig,
    ) -> Option<Box<dyn PluginBackend>> {
        let factory = self.factories.get(name)?;
        match factory(credentials, config) {
            Ok(plugin) => Some(plugin),
            Err(err) => {
                warn!("插件 {} 初始化失败: {:#}", name, err);
                None
            }
        }
    }
}
