use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info, warn};
use imghost::core::GalleryData;
use imghost::logging::init_logging;
use imghost::scan::scan_inputs;
use imghost::utils::format_duration;
use imghost::{AppConfig, BatchManager, Credentials, ProgressEvent, StaticPluginRegistry, UploadResult};

/// 批量上传图片到图床
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// 图片文件或目录（每个目录一组）
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// TOML 配置文件，同时读取其中的 [credentials]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖配置中的服务，例如 imx.to / pixhost.to
    #[arg(short, long)]
    service: Option<String>,

    /// 为每组自动创建相册
    #[arg(long)]
    auto_gallery: bool,
}

fn load(args: &Args) -> anyhow::Result<(AppConfig, Credentials)> {
    let (mut config, credentials) = match &args.config {
        Some(path) => (
            AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            Credentials::load(path)?,
        ),
        None => (AppConfig::default(), Credentials::new()),
    };

    if let Some(service) = &args.service {
        config.service = service.clone();
    }
    if args.auto_gallery {
        config.auto_gallery = true;
    }

    Ok((config, credentials.merge_env()))
}

fn print_gallery(data: &GalleryData) {
    match &data.gallery_url {
        Some(url) => eprintln!("gallery '{}': {}", data.gallery_name, url),
        None => eprintln!("gallery '{}': {}", data.gallery_name, data.gallery_hash),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let (config, credentials) = load(&args)?;
    let _log_guard = init_logging(&config.log);

    let groups = scan_inputs(&args.paths);
    if groups.is_empty() {
        bail!("No supported images found");
    }

    let batch = groups
        .into_iter()
        .map(|group| {
            let files = group.files.clone();
            (group, files)
        })
        .collect();

    let (manager, mut receivers) = BatchManager::with_http(Arc::new(StaticPluginRegistry::new()));
    let handle = Arc::new(manager).spawn(batch, config, credentials)?;

    let mut progress_open = true;
    let mut results_open = true;
    let mut interrupted = false;

    while progress_open || results_open {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("收到 Ctrl-C, 正在取消...");
                interrupted = true;
                handle.cancel();
            }
            event = receivers.progress.recv(), if progress_open => match event {
                Some(ProgressEvent::Status { file, state }) => info!("{}: {}", file.display(), state),
                Some(ProgressEvent::Progress { file, fraction }) => debug!("{}: {:.0}%", file.display(), fraction * 100.0),
                Some(ProgressEvent::GalleryRegistered(data)) => print_gallery(&data),
                None => progress_open = false,
            },
            result = receivers.results.recv(), if results_open => match result {
                Some(UploadResult::Success { file, image_url, thumbnail_url }) => {
                    println!("{}\t{}\t{}", file.display(), image_url, thumbnail_url);
                }
                Some(UploadResult::Failure { file, error }) => eprintln!("FAILED {}: {}", file.display(), error),
                None => results_open = false,
            },
        }
    }

    let summary = tokio::task::spawn_blocking(move || handle.join()).await??;
    eprintln!(
        "{} uploaded, {} failed, {} skipped in {}",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        format_duration(summary.elapsed())
    );

    if summary.failed > 0 || summary.skipped > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
