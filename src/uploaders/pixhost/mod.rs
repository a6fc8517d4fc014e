use async_trait::async_trait;
use serde::Deserialize;
use crate::core::{
    AuxParams, HttpRequest, ImageLinks, MultipartBody, PreparedRequest, RawResponse, Result, UploadBackend,
    UploadTask,
};

pub const PIX_URL: &str = "https://api.pixhost.to/images";
pub const PIX_COVERS_URL: &str = "https://api.pixhost.to/covers";
pub const PIX_GALLERIES_URL: &str = "https://api.pixhost.to/galleries";

/// pixhost.to 上传器
pub struct PixhostUploader {
    task: UploadTask,
}

impl PixhostUploader {
    pub fn new(task: UploadTask) -> Self {
        Self { task }
    }

    fn is_cover(&self) -> bool {
        self.task.is_first && self.task.config.pixhost.cover
    }
}

#[derive(Debug, Deserialize)]
struct PixhostResponse {
    show_url: String,
    th_url: String,
}

#[async_trait]
impl UploadBackend for PixhostUploader {
    async fn build_request(&mut self) -> Result<PreparedRequest> {
        let settings = &self.task.config.pixhost;
        let aux = &self.task.aux;

        let mut form = MultipartBody::new()
            .text("content_type", &settings.content)
            .text("max_th_size", &settings.thumb);

        for key in [AuxParams::GALLERY_HASH, AuxParams::GALLERY_UPLOAD_HASH] {
            if let Some(value) = aux.get(key) {
                form = form.text(key, value);
            }
        }

        let form = form.file("img", &self.task.file).await?;
        let url = if self.is_cover() { PIX_COVERS_URL } else { PIX_URL };

        Ok(PreparedRequest::Http(HttpRequest::post(url).multipart(form)?))
    }

    fn parse_response(&mut self, response: &RawResponse) -> Result<ImageLinks> {
        let parsed: PixhostResponse = response.json()?;
        Ok(ImageLinks::new(parsed.show_url, parsed.th_url))
    }
}
