use async_trait::async_trait;
use serde::Deserialize;
use crate::core::{
    HttpRequest, ImageLinks, MultipartBody, PreparedRequest, RawResponse, Result, UploadBackend, UploadError,
    UploadTask,
};

pub const IMX_URL: &str = "https://api.imx.to/v1/upload.php";
pub const IMX_LOGIN_URL: &str = "https://imx.to/login.php";
pub const IMX_GALLERY_ADD_URL: &str = "https://imx.to/user/gallery/add";

/// 封面使用的缩略图尺寸
const COVER_THUMB: &str = "600";

/// imx.to 上传器（API key）
pub struct ImxUploader {
    task: UploadTask,
}

impl ImxUploader {
    pub fn new(task: UploadTask) -> Self {
        Self { task }
    }

    fn thumbnail_size(&self) -> &str {
        let settings = &self.task.config.imx;
        if self.task.is_first && settings.cover {
            COVER_THUMB
        } else {
            settings.thumb.as_str()
        }
    }
}

/// 缩略图格式名称 -> API 参数
fn thumbnail_format(name: &str) -> &str {
    match name {
        "Fixed Width" => "1",
        "Proportional" => "2",
        "Square" => "3",
        "Fixed Height" => "4",
        // 已经是数字
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct ImxResponse {
    status: String,
    #[serde(default)]
    data: Option<ImxData>,
}

#[derive(Debug, Deserialize)]
struct ImxData {
    image_url: String,
    thumbnail_url: String,
}

#[async_trait]
impl UploadBackend for ImxUploader {
    async fn build_request(&mut self) -> Result<PreparedRequest> {
        let config = &self.task.config;
        let api_key = config
            .credentials
            .get("imx_api_key")
            .filter(|key| !key.is_empty())
            .ok_or_else(|| UploadError::Config("imx_api_key is not configured".to_string()))?;

        let mut form = MultipartBody::new()
            .text("format", "json")
            .text("thumbnail_size", self.thumbnail_size())
            .text("thumbnail_format", thumbnail_format(&config.imx.format));

        if let Some(gallery_id) = &config.gallery_id {
            form = form.text("gallery_id", gallery_id);
        }

        let form = form.file("image", &self.task.file).await?;

        let request = HttpRequest::post(IMX_URL)
            .header("X-API-KEY", api_key)?
            .multipart(form)?;

        Ok(PreparedRequest::Http(request))
    }

    fn parse_response(&mut self, response: &RawResponse) -> Result<ImageLinks> {
        let parsed: ImxResponse = response.json()?;
        match parsed.data {
            Some(data) if parsed.status == "success" => Ok(ImageLinks::new(data.image_url, data.thumbnail_url)),
            _ => Err(UploadError::malformed(format!("imx upload status '{}'", parsed.status))),
        }
    }
}
