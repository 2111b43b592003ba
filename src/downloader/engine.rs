use crate::config::DownloadConfig;
use crate::downloader::{
    DownloadError, DownloadPlan, DownloadReport, DownloadRequest, Orchestrator, Planner,
    RetryPolicy, SliceTransporter,
};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 下载引擎
///
/// 持有一次运行所需的 HTTP 客户端和配置，依次调用规划器与编排器。
/// 同一个客户端被探测请求和所有分片请求复用，共享连接池。
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    client: Client,
    config: DownloadConfig,
}

impl DownloadEngine {
    /// 创建新的下载引擎
    pub fn new(config: &DownloadConfig) -> Result<Self, DownloadError> {
        let client = Self::create_download_client(config)?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 创建下载用的 HTTP 客户端
    fn create_download_client(config: &DownloadConfig) -> Result<Client, DownloadError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.max_workers)
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        builder.build().map_err(DownloadError::ClientBuild)
    }

    pub fn planner(&self) -> Planner {
        Planner::new(self.client.clone())
    }

    pub fn orchestrator(&self, cancel: CancellationToken) -> Orchestrator {
        let policy = RetryPolicy::new(self.config.max_attempts, self.config.retry_backoff());
        Orchestrator::new(SliceTransporter::new(self.client.clone(), policy), cancel)
    }

    /// 用配置中的默认值补全下载请求
    pub fn request(
        &self,
        url: impl Into<String>,
        save_dir: Option<PathBuf>,
        file_name: Option<String>,
        slice_size_mb: Option<u64>,
        pool_size: Option<usize>,
    ) -> Result<DownloadRequest, DownloadError> {
        DownloadRequest::with_slice_size_mb(
            url,
            save_dir.unwrap_or_else(|| self.config.download_dir.clone()),
            file_name,
            slice_size_mb.unwrap_or(self.config.slice_size_mb),
            pool_size.unwrap_or(self.config.max_workers),
        )
    }

    /// 执行一次完整下载：创建目录 → 规划 → 并发下载
    pub async fn download(
        &self,
        request: &DownloadRequest,
        cancel: CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        request.validate()?;

        tokio::fs::create_dir_all(&request.save_dir)
            .await
            .map_err(DownloadError::FilePrepare)?;

        let plan = self.planner().plan(request).await.map_err(|e| {
            error!("获取下载信息失败 [{}]: {}", request.url, e);
            e
        })?;

        info!(
            "开始下载: {}\n 保存到: {:?}\n 文件大小: {}\n 分片数量: {}",
            plan.url,
            plan.output_path,
            format_size(plan.total_size),
            plan.slice_count()
        );

        self.execute(&plan, request.pool_size, cancel).await
    }

    /// 执行已生成的下载计划，配置了整体超时时到期自动取消
    pub async fn execute(
        &self,
        plan: &DownloadPlan,
        pool_size: usize,
        cancel: CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let run_token = cancel.child_token();

        let timer = self.config.run_timeout().map(|timeout| {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!("下载超时 ({}s)，取消所有分片", timeout.as_secs());
                        token.cancel();
                    }
                }
            })
        });

        let result = self.orchestrator(run_token.clone()).run(plan, pool_size).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        debug!("下载结束: {:?}, 成功={}", plan.output_path, result.is_ok());
        result
    }
}

/// 格式化文件大小
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::test_support::RangeResponder;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> DownloadConfig {
        DownloadConfig {
            max_workers: 4,
            retry_backoff_ms: 1,
            ..Default::default()
        }
    }

    async fn serve(server: &MockServer, route: &str, data: &[u8], accept_ranges: bool) {
        let mut head = ResponseTemplate::new(200)
            .insert_header("content-length", data.len().to_string().as_str());
        if accept_ranges {
            head = head.insert_header("accept-ranges", "bytes");
        }
        Mock::given(method("HEAD"))
            .and(path(route))
            .respond_with(head)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(RangeResponder(data.to_vec()))
            .mount(server)
            .await;
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_request_uses_config_defaults() {
        let engine = DownloadEngine::new(&test_config()).unwrap();

        let req = engine
            .request("http://example.com/a.bin", None, None, None, None)
            .unwrap();
        assert_eq!(req.save_dir, PathBuf::from("./downloads"));
        assert_eq!(req.slice_size, 1024 * 1024);
        assert_eq!(req.pool_size, 4);

        let req = engine
            .request(
                "http://example.com/a.bin",
                Some("/data".into()),
                Some("b.bin".into()),
                Some(2),
                Some(8),
            )
            .unwrap();
        assert_eq!(req.save_dir, PathBuf::from("/data"));
        assert_eq!(req.file_name.as_deref(), Some("b.bin"));
        assert_eq!(req.slice_size, 2 * 1024 * 1024);
        assert_eq!(req.pool_size, 8);
    }

    #[tokio::test]
    async fn test_download_ranged_end_to_end() {
        let data: Vec<u8> = (0..(2 * 1024 * 1024 + 1234)).map(|i| (i % 199) as u8).collect();
        let server = MockServer::start().await;
        serve(&server, "/files/model.bin", &data, true).await;

        let dir = TempDir::new().unwrap();
        let save_dir = dir.path().join("nested/downloads");
        let engine = DownloadEngine::new(&test_config()).unwrap();
        let req = engine
            .request(
                format!("{}/files/model.bin", server.uri()),
                Some(save_dir.clone()),
                None,
                Some(1),
                Some(3),
            )
            .unwrap();

        let report = engine.download(&req, CancellationToken::new()).await.unwrap();

        assert!(report.ranged);
        assert_eq!(report.slice_count, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(report.output_path, save_dir.join("model.bin"));
        assert_eq!(std::fs::read(&report.output_path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_download_whole_body_without_range_support() {
        let data: Vec<u8> = (0..(3 * 1024 * 1024)).map(|i| (i % 97) as u8).collect();
        let server = MockServer::start().await;
        serve(&server, "/plain.bin", &data, false).await;

        let dir = TempDir::new().unwrap();
        let engine = DownloadEngine::new(&test_config()).unwrap();
        let req = engine
            .request(
                format!("{}/plain.bin", server.uri()),
                Some(dir.path().to_path_buf()),
                Some("renamed.bin".into()),
                Some(1),
                Some(4),
            )
            .unwrap();

        let report = engine.download(&req, CancellationToken::new()).await.unwrap();

        assert!(!report.ranged);
        assert_eq!(report.slice_count, 1);
        assert_eq!(report.output_path, dir.path().join("renamed.bin"));
        assert_eq!(std::fs::read(&report.output_path).unwrap(), data);

        let gets: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "GET")
            .collect();
        assert_eq!(gets.len(), 1);
        assert!(!gets[0].headers.contains_key("range"));
    }

    #[tokio::test]
    async fn test_planning_failure_creates_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/empty.bin"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "0"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let engine = DownloadEngine::new(&test_config()).unwrap();
        let req = engine
            .request(
                format!("{}/empty.bin", server.uri()),
                Some(dir.path().to_path_buf()),
                None,
                None,
                None,
            )
            .unwrap();

        let err = engine.download(&req, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidResourceSize(0)));
        assert!(!dir.path().join("empty.bin").exists());

        let gets = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "GET")
            .count();
        assert_eq!(gets, 0);
    }

    #[tokio::test]
    async fn test_run_timeout_cancels_download() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/slow.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "4096")
                    .insert_header("accept-ranges", "bytes"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow.bin"))
            .respond_with(ResponseTemplate::new(206).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut config = test_config();
        config.run_timeout_secs = 1;
        let engine = DownloadEngine::new(&config).unwrap();
        let req = DownloadRequest::new(
            format!("{}/slow.bin", server.uri()),
            dir.path(),
            None,
            1024,
            2,
        )
        .unwrap();

        let err = engine.download(&req, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
        assert!(!dir.path().join("slow.bin").exists());
    }
}
