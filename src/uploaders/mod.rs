pub mod imx;
pub mod pixhost;
pub mod plugin;
pub mod turbo;
pub mod vipr;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use regex::Regex;
use crate::core::{ImageLinks, PluginRegistry, Result, UploadBackend, UploadError, UploadTask};
use crate::utils::ProgressCallback;

pub use imx::ImxUploader;
pub use pixhost::PixhostUploader;
pub use plugin::{PluginAdapter, PluginFactory, StaticPluginRegistry};
pub use turbo::TurboUploader;
pub use vipr::ViprUploader;

/// 内置后端构造函数
pub type BackendConstructor = fn(UploadTask) -> Box<dyn UploadBackend>;

/// 服务名 -> 后端
///
/// 先查插件，再查内置服务。
#[derive(Clone)]
pub struct BackendRegistry {
    plugins: Arc<dyn PluginRegistry>,
    builtins: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// 注册全部内置服务
    pub fn new(plugins: Arc<dyn PluginRegistry>) -> Self {
        let mut registry = Self {
            plugins,
            builtins: HashMap::new(),
        };
        registry.register("imx.to", |task| Box::new(ImxUploader::new(task)));
        registry.register("pixhost.to", |task| Box::new(PixhostUploader::new(task)));
        registry.register("turboimagehost", |task| Box::new(TurboUploader::new(task)));
        registry.register("vipr.im", |task| Box::new(ViprUploader::new(task)));
        registry
    }

    /// 只有内置服务
    pub fn builtin() -> Self {
        Self::new(Arc::new(StaticPluginRegistry::new()))
    }

    pub fn register(&mut self, service: impl Into<String>, constructor: BackendConstructor) {
        self.builtins.insert(service.into(), constructor);
    }

    pub fn supports(&self, service: &str) -> bool {
        self.plugins.is_plugin_service(service) || self.builtins.contains_key(service)
    }

    /// 为一个任务创建后端，每个任务调用一次
    pub fn create(&self, task: &UploadTask, progress: ProgressCallback) -> Result<Box<dyn UploadBackend>> {
        let service = task.service();

        if self.plugins.is_plugin_service(service) {
            let plugin = self
                .plugins
                .get_plugin_instance(service, &task.config.plugin_credentials, &task.config)
                .ok_or_else(|| UploadError::PluginInitialization {
                    service: service.to_string(),
                    message: "plugin returned no instance".to_string(),
                })?;
            return Ok(Box::new(PluginAdapter::new(service, plugin, task.file.clone(), progress)));
        }

        match self.builtins.get(service) {
            Some(constructor) => Ok(constructor(task.clone())),
            None => Err(UploadError::UnsupportedService(service.to_string())),
        }
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<_> = self.builtins.keys().collect();
        services.sort();
        f.debug_struct("BackendRegistry").field("builtins", &services).finish()
    }
}

static BBCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[url=([^\]]+)\]\[img\]([^\[]+)\[/img\]\[/url\]").unwrap());

/// 从文本响应中取出第一组 `[url=..][img]..[/img][/url]`
pub(crate) fn parse_bbcode(body: &str) -> Result<ImageLinks> {
    let captures = BBCODE
        .captures(body)
        .ok_or_else(|| UploadError::malformed("no BBCode link in response"))?;
    Ok(ImageLinks::new(captures[1].trim(), captures[2].trim()))
}


#[cfg(test)]
mod tests {
    use std::path::Path;
    use async_trait::async_trait;
    use super::*;
    use crate::config::GroupConfig;
    use crate::core::{PluginBackend, PluginUpload, PreparedRequest};
    use test_support::task_for;

    struct NoopPlugin;

    #[async_trait]
    impl PluginBackend for NoopPlugin {
        async fn upload(&self, _file: &Path, _progress: ProgressCallback) -> anyhow::Result<PluginUpload> {
            Ok(PluginUpload {
                image_url: "i".into(),
                thumb_url: "t".into(),
            })
        }

        fn cleanup(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry() -> BackendRegistry {
        let plugins = StaticPluginRegistry::new()
            .with("catbox.moe", |_: &HashMap<String, String>, _: &GroupConfig| {
                Ok(Box::new(NoopPlugin) as Box<dyn PluginBackend>)
            })
            .with("broken.host", |_: &HashMap<String, String>, _: &GroupConfig| anyhow::bail!("no api key"))
            // 插件优先于同名内置服务
            .with("vipr.im", |_: &HashMap<String, String>, _: &GroupConfig| {
                Ok(Box::new(NoopPlugin) as Box<dyn PluginBackend>)
            });
        BackendRegistry::new(Arc::new(plugins))
    }

    #[tokio::test]
    async fn test_resolves_builtin_and_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();

        let (task, _) = task_for(dir.path(), "pixhost.to", true);
        let mut backend = registry.create(&task, Arc::new(|_, _| {})).unwrap();
        assert!(matches!(backend.build_request().await.unwrap(), PreparedRequest::Http(_)));

        for service in ["catbox.moe", "vipr.im"] {
            let (task, _) = task_for(dir.path(), service, true);
            let mut backend = registry.create(&task, Arc::new(|_, _| {})).unwrap();
            assert!(matches!(backend.build_request().await.unwrap(), PreparedRequest::Completed));
        }
    }

    #[test]
    fn test_unknown_and_broken_services() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();

        let (task, _) = task_for(dir.path(), "nowhere.example", false);
        assert!(!registry.supports("nowhere.example"));
        assert!(matches!(
            registry.create(&task, Arc::new(|_, _| {})),
            Err(UploadError::UnsupportedService(service)) if service == "nowhere.example"
        ));

        let (task, _) = task_for(dir.path(), "broken.host", false);
        assert!(matches!(
            registry.create(&task, Arc::new(|_, _| {})),
            Err(UploadError::PluginInitialization { service, .. }) if service == "broken.host"
        ));
    }

    #[test]
    fn test_parse_bbcode() {
        let body = "ok [url=https://www.turboimagehost.com/p/1/a.jpg.html][img]https://s1.turboimg.net/t/1_a.jpg[/img][/url]";
        assert_eq!(
            parse_bbcode(body).unwrap(),
            ImageLinks::new("https://www.turboimagehost.com/p/1/a.jpg.html", "https://s1.turboimg.net/t/1_a.jpg")
        );
        assert!(matches!(parse_bbcode("error"), Err(UploadError::MalformedResponse(_))));
    }
}
