use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use slice_downloader::{logging, AppConfig, DownloadEngine};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 多 worker 分片下载工具
#[derive(Debug, Parser)]
#[command(name = "slice-downloader", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = "config/app.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 从 URL 下载文件
    Download(DownloadArgs),
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// 下载地址
    #[arg(short = 'u', long)]
    url: String,

    /// 保存路径
    #[arg(long)]
    path: Option<PathBuf>,

    /// 文件名称（默认取 URL 最后一段）
    #[arg(long)]
    name: Option<String>,

    /// 分片大小，单位 MB
    #[arg(long)]
    size: Option<u64>,

    /// 并发 worker 数（默认 CPU 核数 × 5）
    #[arg(long = "g-num")]
    g_num: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 先加载配置，日志初始化之后再报告加载错误
    let (config, load_err) = AppConfig::load_or_default(&cli.config).await;
    let _log_guard = logging::init_logging(&config.log);
    if let Some(e) = load_err {
        warn!("配置文件加载失败，使用默认配置: {:#}", e);
    }

    match cli.command {
        Command::Download(args) => download(args, &config).await,
    }
}

async fn download(args: DownloadArgs, config: &AppConfig) -> anyhow::Result<()> {
    let engine = DownloadEngine::new(&config.download).context("初始化下载引擎失败")?;
    let request = engine
        .request(args.url, args.path, args.name, args.size, args.g_num)
        .context("下载参数错误")?;

    // Ctrl-C 取消所有 worker
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消下载...");
            ctrl_c.cancel();
        }
    });

    let report = engine
        .download(&request, cancel)
        .await
        .with_context(|| format!("下载失败: {}", request.url))?;

    info!(
        "下载完成: {:?} ({} bytes, {} 个分片, {:.2}s)",
        report.output_path,
        report.total_size,
        report.slice_count,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_args() {
        let cli = Cli::try_parse_from([
            "slice-downloader",
            "download",
            "-u",
            "http://example.com/a.iso",
            "--path",
            "/data",
            "--size",
            "4",
            "--g-num",
            "12",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("config/app.toml"));
        let Command::Download(args) = cli.command;
        assert_eq!(args.url, "http://example.com/a.iso");
        assert_eq!(args.path, Some(PathBuf::from("/data")));
        assert_eq!(args.name, None);
        assert_eq!(args.size, Some(4));
        assert_eq!(args.g_num, Some(12));
    }

    #[test]
    fn test_url_is_required() {
        assert!(Cli::try_parse_from(["slice-downloader", "download"]).is_err());
    }
}
