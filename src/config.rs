use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::{Result, TransferSettings, UploadError};
use crate::utils::{RateLimitPolicy, RetryPolicy};

/// 未配置时每个服务的默认并发数
pub const DEFAULT_THREADS: usize = 2;
/// 退避初始延迟
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
/// 退避最大延迟
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
/// 环境变量凭证前缀
pub const CREDENTIAL_ENV_PREFIX: &str = "IMGHOST_";

/// 应用配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 目标服务，例如 `imx.to`、`pixhost.to` 或插件名
    pub service: String,
    /// 每个文件最多尝试次数
    pub retry_count: u32,
    /// 流式上传的分块大小（字节）
    pub chunk_size: usize,
    /// 每次尝试的超时（秒）
    pub upload_timeout_seconds: f64,
    /// 是否为每组自动创建相册
    pub auto_gallery: bool,
    /// 已有的 pixhost 相册
    pub pix_gallery_hash: Option<String>,
    /// 已有的 imx 相册
    pub gallery_id: Option<String>,
    /// 429 处理策略
    pub rate_limit: RateLimitPolicy,
    /// 按服务前缀配置的并发数，例如 `imx = 4`
    pub threads: HashMap<String, usize>,
    pub imx: ImxSettings,
    pub pixhost: PixhostSettings,
    pub turbo: TurboSettings,
    pub vipr: ViprSettings,
    /// 插件凭证，按服务名索引
    pub plugin_credentials: HashMap<String, HashMap<String, String>>,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: "imx.to".to_string(),
            retry_count: 3,
            chunk_size: 64 * 1024,
            upload_timeout_seconds: 120.0,
            auto_gallery: false,
            pix_gallery_hash: None,
            gallery_id: None,
            rate_limit: RateLimitPolicy::default(),
            threads: HashMap::new(),
            imx: ImxSettings::default(),
            pixhost: PixhostSettings::default(),
            turbo: TurboSettings::default(),
            vipr: ViprSettings::default(),
            plugin_credentials: HashMap::new(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| UploadError::Config(format!("Can't read {}: {}", path.display(), err)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| UploadError::Config(err.to_string()))
    }

    /// 当前服务的并发上限
    ///
    /// 在 `[threads]` 中按服务前缀查找（`imx.to` -> `imx`），
    /// `turboimagehost` 对应 `turbo`。
    pub fn max_concurrent(&self) -> usize {
        self.threads
            .get(threads_key(&self.service))
            .copied()
            .unwrap_or(DEFAULT_THREADS)
            .max(1)
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        // 非正数、NaN 或超出 Duration 范围时使用默认值
        let timeout = Some(self.upload_timeout_seconds)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(TransferSettings::default().timeout);

        TransferSettings {
            retry: RetryPolicy::new(self.retry_count)
                .exponential(RETRY_BASE_DELAY, RETRY_MAX_DELAY)
                .rate_limit(self.rate_limit),
            chunk_size: self.chunk_size.max(1),
            timeout,
        }
    }
}

/// `imx.to` -> `imx`
pub fn service_prefix(service: &str) -> &str {
    service.split('.').next().unwrap_or(service)
}

fn threads_key(service: &str) -> &str {
    match service_prefix(service) {
        "turboimagehost" => "turbo",
        prefix => prefix,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImxSettings {
    /// 缩略图尺寸
    pub thumb: String,
    /// 首个文件是否使用大缩略图
    pub cover: bool,
    /// 缩略图格式
    pub format: String,
}

impl Default for ImxSettings {
    fn default() -> Self {
        Self {
            thumb: "180".to_string(),
            cover: false,
            format: "Fixed Width".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PixhostSettings {
    /// 0 = 普通内容, 1 = 成人内容
    pub content: String,
    pub thumb: String,
    /// 首个文件作为封面上传
    pub cover: bool,
}

impl Default for PixhostSettings {
    fn default() -> Self {
        Self {
            content: "0".to_string(),
            thumb: "200".to_string(),
            cover: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TurboSettings {
    pub content: String,
    pub thumb: String,
    pub cover: bool,
    pub gallery_id: String,
    pub endpoint: String,
}

impl Default for TurboSettings {
    fn default() -> Self {
        Self {
            content: "all".to_string(),
            thumb: "180".to_string(),
            cover: false,
            gallery_id: String::new(),
            endpoint: crate::uploaders::turbo::TURBO_UPLOAD_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ViprSettings {
    pub thumb: String,
    pub cover: bool,
    pub gallery_id: String,
    pub upload_url: String,
}

impl Default for ViprSettings {
    fn default() -> Self {
        Self {
            thumb: "170x170".to_string(),
            cover: false,
            gallery_id: String::new(),
            upload_url: crate::uploaders::vipr::VIPR_HOME_URL.to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别（默认 info）
    pub level: String,
    /// 是否写入日志文件
    pub file_enabled: bool,
    /// 日志文件目录
    pub log_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// 各服务的用户名/密码或 API key，对核心透明
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Credentials(HashMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// 读取配置文件中的 `[credentials]` 表
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        #[derive(Deserialize, Default)]
        struct CredentialsFile {
            #[serde(default)]
            credentials: Credentials,
        }

        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| UploadError::Config(format!("Can't read {}: {}", path.display(), err)))?;
        let file: CredentialsFile = toml::from_str(&content)
            .map_err(|err| UploadError::Config(err.to_string()))?;
        Ok(file.credentials)
    }

    /// `IMGHOST_IMX_API_KEY=...` 覆盖 `imx_api_key`
    pub fn merge_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            if let Some(name) = key.as_ref().strip_prefix(CREDENTIAL_ENV_PREFIX) {
                self.insert(name.to_lowercase(), value);
            }
        }
        self
    }

    pub fn merge_env(self) -> Self {
        self.merge_vars(std::env::vars())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.0.keys().collect();
        keys.sort();
        f.debug_map()
            .entries(keys.into_iter().map(|key| (key, "***")))
            .finish()
    }
}

/// 每组开始时构建一次的只读配置快照，组内所有任务共享
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub service: String,
    pub imx: ImxSettings,
    pub pixhost: PixhostSettings,
    pub turbo: TurboSettings,
    pub vipr: ViprSettings,
    /// imx 相册 ID（准备阶段可覆盖）
    pub gallery_id: Option<String>,
    /// 当前服务的插件凭证
    pub plugin_credentials: HashMap<String, String>,
    pub credentials: Credentials,
}

impl GroupConfig {
    pub fn new(base: &AppConfig, credentials: &Credentials) -> Self {
        Self {
            service: base.service.clone(),
            imx: base.imx.clone(),
            pixhost: base.pixhost.clone(),
            turbo: base.turbo.clone(),
            vipr: base.vipr.clone(),
            gallery_id: base.gallery_id.clone().filter(|id| !id.is_empty()),
            plugin_credentials: base
                .plugin_credentials
                .get(&base.service)
                .cloned()
                .unwrap_or_default(),
            credentials: credentials.clone(),
        }
    }

    pub fn with_gallery_id(mut self, gallery_id: Option<String>) -> Self {
        if let Some(id) = gallery_id {
            self.gallery_id = Some(id);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
service = "turboimagehost"
retry_count = 5
chunk_size = 8192
upload_timeout_seconds = 30.5
auto_gallery = true
rate_limit = "fail"

[threads]
turbo = 6
imx = 4

[imx]
thumb = "250"
cover = true

[plugin_credentials."catbox.moe"]
userhash = "abc"

[credentials]
imx_api_key = "secret"
"#;

    #[test]
    fn test_parse_config() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.service, "turboimagehost");
        assert_eq!(config.retry_count, 5);
        assert!(config.auto_gallery);
        assert_eq!(config.imx.thumb, "250");
        assert_eq!(config.imx.format, "Fixed Width");
        assert_eq!(config.pixhost, PixhostSettings::default());
        assert_eq!(config.plugin_credentials["catbox.moe"]["userhash"], "abc");
    }

    #[test]
    fn test_max_concurrent_by_prefix() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.max_concurrent(), 6);

        config.service = "imx.to".into();
        assert_eq!(config.max_concurrent(), 4);

        config.service = "pixhost.to".into();
        assert_eq!(config.max_concurrent(), DEFAULT_THREADS);

        config.threads.insert("pixhost".into(), 0);
        assert_eq!(config.max_concurrent(), 1);
    }

    #[test]
    fn test_transfer_settings() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let settings = config.transfer_settings();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.rate_limit, RateLimitPolicy::Fail);
        assert_eq!(settings.retry.backoff(1), RETRY_BASE_DELAY);
        assert_eq!(settings.chunk_size, 8192);
        assert_eq!(settings.timeout, Duration::from_secs_f64(30.5));
    }

    #[test]
    fn test_out_of_range_timeout_falls_back() {
        let default_timeout = TransferSettings::default().timeout;
        for secs in [1e20, f64::MAX, f64::INFINITY, f64::NAN, 0.0, -3.0] {
            let config = AppConfig {
                upload_timeout_seconds: secs,
                ..Default::default()
            };
            assert_eq!(config.transfer_settings().timeout, default_timeout, "{secs}");
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.service, "imx.to");
        assert_eq!(config.transfer_settings().retry.max_attempts, 3);
    }

    #[test]
    fn test_credentials_from_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let credentials = Credentials::load(&path)
            .unwrap()
            .merge_vars([("IMGHOST_IMX_USER", "alice"), ("HOME", "/root")]);

        assert_eq!(credentials.get("imx_api_key"), Some("secret"));
        assert_eq!(credentials.get("imx_user"), Some("alice"));
        assert_eq!(credentials.get("home"), None);
        assert!(!format!("{:?}", credentials).contains("secret"));
    }

    #[test]
    fn test_group_config_snapshot() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.service = "catbox.moe".into();
        config.gallery_id = Some(String::new());

        let group = GroupConfig::new(&config, &Credentials::new());
        assert_eq!(group.gallery_id, None);
        assert_eq!(group.plugin_credentials.get("userhash").map(String::as_str), Some("abc"));

        let group = group.with_gallery_id(Some("g1".into()));
        assert_eq!(group.gallery_id.as_deref(), Some("g1"));
    }
}
