use async_trait::async_trait;
use crate::core::{HttpRequest, ImageLinks, MultipartBody, PreparedRequest, RawResponse, Result, UploadBackend, UploadTask};
use super::parse_bbcode;

pub const VIPR_HOME_URL: &str = "https://vipr.im/";

const COVER_THUMB: &str = "800x800";

/// vipr.im 上传器
///
/// 会话 ID 取自凭证 `vipr_sess_id`，未登录时匿名上传。
pub struct ViprUploader {
    task: UploadTask,
}

impl ViprUploader {
    pub fn new(task: UploadTask) -> Self {
        Self { task }
    }
}

#[async_trait]
impl UploadBackend for ViprUploader {
    async fn build_request(&mut self) -> Result<PreparedRequest> {
        let config = &self.task.config;
        let settings = &config.vipr;
        let thumb = if self.task.is_first && settings.cover { COVER_THUMB } else { settings.thumb.as_str() };

        let mut form = MultipartBody::new()
            .text("upload_type", "file")
            .text("thumb_size", thumb)
            .text("tos", "1")
            .text("submit_btn", "Upload");

        if let Some(session) = config.credentials.get("vipr_sess_id") {
            form = form.text("sess_id", session);
        }
        if !settings.gallery_id.is_empty() {
            form = form.text("fld_id", &settings.gallery_id);
        }

        let form = form.file("file_0", &self.task.file).await?;
        let request = HttpRequest::post(settings.upload_url.as_str()).multipart(form)?;

        Ok(PreparedRequest::Http(request))
    }

    fn parse_response(&mut self, response: &RawResponse) -> Result<ImageLinks> {
        parse_bbcode(&response.body)
    }
}
