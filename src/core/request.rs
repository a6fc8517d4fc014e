use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tokio_util::io::ReaderStream;
use uuid::Uuid;
use super::errors::{Result, UploadError};

/// 请求体流
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// `build_request()` 的产出
#[derive(Debug)]
pub enum PreparedRequest {
    /// 由执行器发送的 HTTP 请求
    Http(HttpRequest),
    /// 后端已在构建阶段完成传输（插件），执行器不再发请求
    Completed,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| UploadError::internal_error(err.to_string()))?;
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    pub fn multipart(mut self, form: MultipartBody) -> Result<Self> {
        let (content_type, body) = form.finish();
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_str(&content_type)?);
        self.body = body;
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub enum BodyPart {
    Bytes(Bytes),
    /// 发送时才从磁盘流式读取
    File { path: PathBuf, len: u64 },
}

impl BodyPart {
    fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }
}

/// 可重放的请求体：每次尝试都重新生成流
#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    parts: Vec<BodyPart>,
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let mut body = Self::empty();
        body.push_bytes(bytes);
        body
    }

    pub fn push_bytes(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.parts.push(BodyPart::Bytes(bytes));
        }
    }

    pub fn push_file(&mut self, path: PathBuf, len: u64) {
        self.parts.push(BodyPart::File { path, len });
    }

    /// 总字节数
    pub fn len(&self) -> u64 {
        self.parts.iter().map(BodyPart::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按不超过 `chunk_size` 的分块生成请求体流
    pub fn stream(&self, chunk_size: usize) -> BodyStream {
        let chunk_size = chunk_size.max(1);
        let parts = self.parts.clone();

        stream::iter(parts)
            .map(move |part| match part {
                BodyPart::Bytes(bytes) => stream::iter(split_chunks(bytes, chunk_size).into_iter().map(Ok::<Bytes, io::Error>)).boxed(),
                BodyPart::File { path, .. } => stream::once(tokio::fs::File::open(path))
                    .map_ok(move |file| ReaderStream::with_capacity(file, chunk_size))
                    .try_flatten()
                    .boxed(),
            })
            .flatten()
            .boxed()
    }
}

fn split_chunks(bytes: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(bytes.len() / chunk_size + 1);
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + chunk_size).min(bytes.len());
        chunks.push(bytes.slice(offset..end));
        offset = end;
    }
    chunks
}

/// multipart/form-data 编码器，文件部分不读入内存
#[derive(Debug)]
pub struct MultipartBody {
    boundary: String,
    body: RequestBody,
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: format!("----imghost{}", Uuid::new_v4().simple()),
            body: RequestBody::empty(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn text(mut self, name: &str, value: impl AsRef<str>) -> Self {
        let header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            self.boundary,
            escape_quoted(name),
            value.as_ref()
        );
        self.body.push_bytes(header);
        self
    }

    /// 文件部分只记录路径和长度
    pub async fn file(mut self, name: &str, path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Not a file: {}", path.display()),
            )));
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            escape_quoted(name),
            escape_quoted(&filename),
            mime_for(path)
        );
        self.body.push_bytes(header);
        self.body.push_file(path.to_path_buf(), metadata.len());
        self.body.push_bytes("\r\n");
        Ok(self)
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// 返回 `(content_type, body)`
    pub fn finish(mut self) -> (String, RequestBody) {
        let content_type = self.content_type();
        let trailer = format!("--{}--\r\n", self.boundary);
        self.body.push_bytes(trailer);
        (content_type, self.body)
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// 交给 `Transport` 发送的单次请求
pub struct OutgoingRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: BodyStream,
    pub content_length: u64,
    pub timeout: Duration,
}

/// 服务器原始响应，任意状态码都会返回
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|err| UploadError::malformed(format!("Invalid JSON response: {}", err)))
    }
}
