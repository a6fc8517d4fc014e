//! 输入扫描：把命令行给出的路径整理成上传组

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;
use crate::core::UploadGroup;

/// 支持的图片扩展名（不区分大小写）
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// 散落文件所在组的标题
pub const MISC_GROUP_TITLE: &str = "Miscellaneous";

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// 目录 -> 一个组（递归）；单独的文件归入最后的 `Miscellaneous` 组。
/// 没有图片的目录和不支持的文件被忽略。
pub fn scan_inputs<P: AsRef<Path>>(inputs: &[P]) -> Vec<UploadGroup> {
    let mut groups = Vec::new();
    let mut misc = Vec::new();

    for input in inputs {
        let path = input.as_ref();

        if path.is_dir() {
            let mut files: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && is_supported(entry.path()))
                .map(|entry| entry.into_path())
                .collect();

            if files.is_empty() {
                debug!("{} 中没有图片", path.display());
                continue;
            }

            sort_natural(&mut files);
            groups.push(UploadGroup::new(folder_title(path), files));
        } else if path.is_file() && is_supported(path) {
            misc.push(path.to_path_buf());
        } else {
            warn!("忽略不支持的输入: {}", path.display());
        }
    }

    if !misc.is_empty() {
        sort_natural(&mut misc);
        groups.push(UploadGroup::new(MISC_GROUP_TITLE, misc));
    }

    groups
}

fn folder_title(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn sort_natural(files: &mut [PathBuf]) {
    files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
}

/// 自然排序：数字段按数值比较，其余部分忽略大小写
///
/// `img2.jpg` < `img10.jpg`
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = segments(a);
    let right = segments(b);

    for (index, (x, y)) in left.iter().zip(right.iter()).enumerate() {
        // 偶数位是文本，奇数位是数字
        let ordering = if index % 2 == 0 {
            x.to_lowercase().cmp(&y.to_lowercase())
        } else {
            cmp_digits(x, y)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    left.len().cmp(&right.len())
}

/// 按数字段切分，文本与数字交替出现，首段总是文本（可能为空）
fn segments(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for found in DIGITS.find_iter(s) {
        parts.push(&s[last..found.start()]);
        parts.push(found.as_str());
        last = found.end();
    }
    parts.push(&s[last..]);
    parts
}

/// 任意长度的十进制数比较
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
