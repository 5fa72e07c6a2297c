use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::config::RunConfig;
use crate::driver::ChromiumSession;
use crate::error::ScrapeError;
use crate::trademap::TradeMapScraper;
use crate::traits::Scraper;

/// 実行リクエスト
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub config: RunConfig,
}

impl RunRequest {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }
}

impl From<RunConfig> for RunRequest {
    fn from(config: RunConfig) -> Self {
        Self::new(config)
    }
}

/// 実行結果の要約
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// 全コードが成功したか
    pub succeeded: bool,
    pub results_dir: PathBuf,
    pub failed_codes: Vec<String>,
}

/// tower::Serviceを実装したスクレイパーサービス。
/// 1リクエスト = ログインから出力までの1回の実行。
#[derive(Debug, Clone, Default)]
pub struct ScraperService {
    // 将来的な拡張用（レートリミット、同時実行制御など）
}

impl ScraperService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<RunRequest> for ScraperService {
    type Response = RunSummary;
    type Error = ScrapeError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RunRequest) -> Self::Future {
        info!(
            "実行リクエスト受信: コード{}件 / 国{}件",
            req.config.product_codes.len(),
            req.config.countries.len()
        );

        Box::pin(async move {
            let download_dir = std::env::current_dir()?;
            let driver = ChromiumSession::launch(req.config.headless, &download_dir).await?;

            let mut scraper =
                TradeMapScraper::new(driver, req.config).with_download_dir(download_dir);
            let report = scraper.execute().await?;

            let summary = RunSummary {
                succeeded: report.failed_codes.is_empty(),
                results_dir: report.results_dir,
                failed_codes: report.failed_codes,
            };

            info!(
                "実行完了: 出力先={:?}, 失敗コード{}件",
                summary.results_dir,
                summary.failed_codes.len()
            );

            Ok(summary)
        })
    }
}
