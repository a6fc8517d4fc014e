use async_trait::async_trait;
use uuid::Uuid;
use crate::core::{HttpRequest, ImageLinks, MultipartBody, PreparedRequest, RawResponse, Result, UploadBackend, UploadTask};
use super::parse_bbcode;

pub const TURBO_HOME_URL: &str = "https://www.turboimagehost.com/";
pub const TURBO_UPLOAD_URL: &str = "https://www.turboimagehost.com/upload_html5.tu";

const COVER_THUMB: &str = "600";

/// turboimagehost 上传器，响应为包含 BBCode 的文本
pub struct TurboUploader {
    task: UploadTask,
    upload_id: String,
}

impl TurboUploader {
    pub fn new(task: UploadTask) -> Self {
        Self {
            task,
            upload_id: Uuid::new_v4().simple().to_string(),
        }
    }
}

#[async_trait]
impl UploadBackend for TurboUploader {
    async fn build_request(&mut self) -> Result<PreparedRequest> {
        let settings = &self.task.config.turbo;
        let thumb = if self.task.is_first && settings.cover { COVER_THUMB } else { settings.thumb.as_str() };

        let mut form = MultipartBody::new()
            .text("upload_id", &self.upload_id)
            .text("imcontent", &settings.content)
            .text("thumb_size", thumb);

        if !settings.gallery_id.is_empty() {
            form = form.text("album", &settings.gallery_id);
        }

        let form = form.file("qqfile", &self.task.file).await?;
        let request = HttpRequest::post(settings.endpoint.as_str())
            .header("Referer", TURBO_HOME_URL)?
            .multipart(form)?;

        Ok(PreparedRequest::Http(request))
    }

    fn parse_response(&mut self, response: &RawResponse) -> Result<ImageLinks> {
        parse_bbcode(&response.body)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use super::*;
    use crate::uploaders::test_support::{body_text, task_for};

    #[tokio::test]
    async fn test_build_request() {
        let dir = tempfile::tempdir().unwrap();
        let (mut task, _) = task_for(dir.path(), "turboimagehost", true);
        let config = Arc::make_mut(&mut task.config);
        config.turbo.cover = true;
        config.turbo.gallery_id = "77".into();

        let mut uploader = TurboUploader::new(task);
        let upload_id = uploader.upload_id.clone();
        let PreparedRequest::Http(request) = uploader.build_request().await.unwrap() else {
            panic!("expected http request");
        };

        assert_eq!(request.url, TURBO_UPLOAD_URL);
        let body = body_text(&request).await;
        assert!(body.contains(&format!("name=\"upload_id\"\r\n\r\n{}\r\n", upload_id)));
        assert!(body.contains("name=\"thumb_size\"\r\n\r\n600\r\n"));
        assert!(body.contains("name=\"album\"\r\n\r\n77\r\n"));
    }

    #[test]
    fn test_each_upload_gets_fresh_id() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task_for(dir.path(), "turboimagehost", false);
        assert_ne!(TurboUploader::new(task.clone()).upload_id, TurboUploader::new(task).upload_id);
    }
}
