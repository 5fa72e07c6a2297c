//! Trade Map 貿易統計スクレイパーライブラリ
//!
//! フォーム駆動のTrade Mapポータルから貿易統計テーブルを抽出し、
//! 単位を正規化したxlsxスプレッドシートを分類コードの階層ごとに出力する。
//!
//! # 一括実行の使用例
//!
//! ```rust,ignore
//! use tradestat_service::{RunConfig, RunRequest, ScraperService};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RunConfig::new("user", "password")
//!         .with_product_codes(vec!["52".into()])
//!         .with_countries(vec!["Fiji".into()]);
//!
//!     let mut service = ScraperService::new();
//!     let summary = service.call(RunRequest::new(config)).await.unwrap();
//!     println!("results: {:?}", summary.results_dir);
//! }
//! ```
//!
//! # 制御境界（start/stop）の使用例
//!
//! ```rust,ignore
//! use tradestat_service::{Controller, RunConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let controller = Controller::new();
//!     let (config, _corrected) = RunConfig::load_from("config.json").unwrap();
//!
//!     controller.start(config).await;
//!     // ... HTTP層はstatus()/captcha_status()をポーリングする ...
//!     controller.stop().await;
//! }
//! ```

pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod service;
pub mod trademap;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

// 主要な型をリエクスポート
pub use config::{MassUnit, ParseDepth, RunConfig};
pub use control::{BotStatus, Controller, StartOutcome, StopOutcome};
pub use driver::ChromiumSession;
pub use error::ScrapeError;
pub use service::{RunRequest, RunSummary, ScraperService};
pub use trademap::{
    CaptchaSignal, CaptchaState, Dataset, ExtractionTask, RunReport, RunState, RunStateHandle,
    TradeMapScraper,
};
pub use traits::{Scraper, SelectOption, SessionDriver};
