use tracing::{info, warn};
use crate::config::{AppConfig, Credentials};
use super::errors::{Result, UploadError};
use super::progress::EventSink;
use super::traits::GalleryApi;
use super::types::{AuxParams, UploadGroup};

/// 每组上传前的准备结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preparation {
    /// 组内每个文件都会带上的附加参数
    pub aux: AuxParams,
    /// 覆盖配置中的 imx 相册 ID
    pub gallery_id: Option<String>,
}

/// 组级准备：按服务创建远端相册
///
/// 失败只记录警告，组内文件照常上传（不关联相册）。
#[derive(Debug, Clone, Default)]
pub struct GroupPreparer;

impl GroupPreparer {
    pub fn new() -> Self {
        Self
    }

    pub async fn prepare(
        &self,
        base: &AppConfig,
        group: &mut UploadGroup,
        credentials: &Credentials,
        galleries: &dyn GalleryApi,
        sink: &EventSink,
    ) -> Preparation {
        let result = match base.service.as_str() {
            "pixhost.to" => self.prepare_pixhost(base, group, galleries, sink).await,
            "imx.to" if base.auto_gallery => self.prepare_imx(group, credentials, galleries).await,
            _ => Ok(Preparation::default()),
        };

        result.unwrap_or_else(|err| {
            warn!("组 '{}' 创建相册失败，继续上传: {}", group.title, err);
            Preparation::default()
        })
    }

    async fn prepare_pixhost(
        &self,
        base: &AppConfig,
        group: &mut UploadGroup,
        galleries: &dyn GalleryApi,
        sink: &EventSink,
    ) -> Result<Preparation> {
        if base.auto_gallery {
            let title = clean_title(&group.title);
            info!("创建 pixhost 相册: {}", title);

            let data = galleries.create_pixhost_gallery(&title).await?;
            if data.gallery_hash.is_empty() {
                return Err(UploadError::Preparation(format!("no gallery hash returned for '{}'", title)));
            }

            group.gallery_id = data.gallery_hash.clone();
            sink.gallery_registered(data.clone());

            return Ok(Preparation {
                aux: AuxParams::from(&data),
                gallery_id: None,
            });
        }

        match base.pix_gallery_hash.as_deref().filter(|hash| !hash.is_empty()) {
            Some(hash) => {
                let mut aux = AuxParams::new();
                aux.insert(AuxParams::GALLERY_HASH, hash);
                group.gallery_id = hash.to_string();
                Ok(Preparation { aux, gallery_id: None })
            }
            None => Ok(Preparation::default()),
        }
    }

    async fn prepare_imx(
        &self,
        group: &mut UploadGroup,
        credentials: &Credentials,
        galleries: &dyn GalleryApi,
    ) -> Result<Preparation> {
        let (Some(user), Some(password)) = (credentials.get("imx_user"), credentials.get("imx_pass")) else {
            return Err(UploadError::Preparation("imx_user / imx_pass not configured".to_string()));
        };

        info!("创建 imx 相册: {}", group.title);
        let gallery_id = galleries.create_imx_gallery(user, password, &group.title).await?;
        if gallery_id.is_empty() {
            return Err(UploadError::Preparation(format!("no gallery id returned for '{}'", group.title)));
        }

        group.gallery_id = gallery_id.clone();
        Ok(Preparation {
            aux: AuxParams::new(),
            gallery_id: Some(gallery_id),
        })
    }
}

/// 去掉方括号，pixhost 不接受
fn clean_title(title: &str) -> String {
    title.replace(['[', ']'], "").trim().to_string()
}
