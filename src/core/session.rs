use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Body, Client};
use tracing::debug;
use url::Url;
use crate::uploaders::{imx, pixhost};
use super::errors::{Result, UploadError};
use super::request::{OutgoingRequest, RawResponse};
use super::traits::{GalleryApi, NetworkSession, SessionFactory, Transport};
use super::types::{GalleryData, TransferSettings};

pub const USER_AGENT: &str = concat!("imghost/", env!("CARGO_PKG_VERSION"));

/// 基于 reqwest 的会话工厂：每个批次一个 `Client`
#[derive(Debug, Clone, Default)]
pub struct HttpSessionFactory;

impl HttpSessionFactory {
    pub fn new() -> Self {
        Self
    }
}

impl SessionFactory for HttpSessionFactory {
    fn open(&self, settings: &TransferSettings) -> Result<NetworkSession> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .connect_timeout(settings.timeout)
            .build()?;

        Ok(NetworkSession {
            transport: Arc::new(HttpTransport::new(client.clone())),
            galleries: Arc::new(HttpGalleryApi::new(client, settings.timeout)),
        })
    }
}

/// 上传请求的发送端
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RawResponse> {
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .timeout(request.timeout)
            .body(Body::wrap_stream(request.body))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("{} -> {}", request.url, status);

        Ok(RawResponse::new(status, body))
    }
}

/// 相册接口（pixhost JSON API 与 imx 网页表单）
#[derive(Debug, Clone)]
pub struct HttpGalleryApi {
    client: Client,
    timeout: Duration,
}

impl HttpGalleryApi {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl GalleryApi for HttpGalleryApi {
    async fn create_pixhost_gallery(&self, title: &str) -> Result<GalleryData> {
        let response = self
            .client
            .post(pixhost::PIX_GALLERIES_URL)
            .timeout(self.timeout)
            .form(&[("gallery_name", title)])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let raw = RawResponse::new(status, body);
        if !raw.is_success() {
            return Err(UploadError::from_status(status, &raw.body));
        }

        raw.json()
    }

    async fn create_imx_gallery(&self, user: &str, password: &str, title: &str) -> Result<String> {
        let login = self
            .client
            .post(imx::IMX_LOGIN_URL)
            .timeout(self.timeout)
            .form(&[
                ("usr_email", user),
                ("pwd", password),
                ("remember", "1"),
                ("doLogin", "Login"),
            ])
            .send()
            .await?;

        if !login.status().is_success() {
            return Err(UploadError::from_status(login.status().as_u16(), "imx login failed"));
        }

        let response = self
            .client
            .post(imx::IMX_GALLERY_ADD_URL)
            .timeout(self.timeout)
            .form(&[("gallery_name", title), ("submit_new_gallery", "Add")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UploadError::from_status(response.status().as_u16(), "imx gallery creation failed"));
        }

        gallery_id_from_url(response.url()).ok_or_else(|| {
            UploadError::Preparation(format!("imx did not redirect to the new gallery ({})", response.url()))
        })
    }
}

/// 新建相册后 imx 会重定向到 `...?id=<gallery id>`
fn gallery_id_from_url(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}
