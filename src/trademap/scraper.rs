//! 実行全体のオーケストレーション
//!
//! 1つのセッションで認証を一度だけ行い、設定された製品コードごとに
//! 解決→設定→ダウンロード→集約・出力を直列に進める状態機械。
//! 停止要求は全ての状態遷移境界で確認する。

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::ScrapeError;
use crate::trademap::ensure_active;
use crate::trademap::types::{CaptchaSignal, ExtractionTask, RunReport, RunState, RunStateHandle};
use crate::trademap::{configure, controls, download, excel, resolver};
use crate::traits::{Scraper, SessionDriver};

/// 出力先ディレクトリのルート名
const RESULTS_ROOT: &str = "results";

/// コードの階層に対応する出力パスを組み立てる。
/// 2桁プレフィクスのディレクトリの下に、必要に応じて4桁・6桁・全桁の
/// セグメントを重ねる。
pub(crate) fn hierarchy_path(results_dir: &Path, code: &str) -> PathBuf {
    let mut path = results_dir.join(&code[..code.len().min(2)]);
    if code.len() >= 4 {
        path = path.join(&code[..4]);
    }
    if code.len() >= 6 {
        path = path.join(&code[..6]);
    }
    if code.len() >= 8 {
        path = path.join(code);
    }
    path
}

/// 空になったディレクトリを再帰的に取り除く。
/// ファイルが残っているディレクトリには触れない。
pub(crate) fn prune_empty_dirs(path: &Path) {
    if !path.is_dir() {
        return;
    }

    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let child = entry.path();
            if child.is_dir() {
                prune_empty_dirs(&child);
            }
        }
    }

    if let Ok(mut entries) = fs::read_dir(path) {
        if entries.next().is_none() && fs::remove_dir(path).is_ok() {
            debug!("空のディレクトリを削除しました: {:?}", path);
        }
    }
}

/// Trade Map スクレイパー本体
pub struct TradeMapScraper<D: SessionDriver> {
    driver: D,
    config: RunConfig,
    token: CancellationToken,
    captcha: CaptchaSignal,
    state: RunStateHandle,
    download_dir: PathBuf,
    results_root: PathBuf,
}

impl<D: SessionDriver> TradeMapScraper<D> {
    pub fn new(driver: D, config: RunConfig) -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            driver,
            config,
            token: CancellationToken::new(),
            captcha: CaptchaSignal::new(),
            state: RunStateHandle::new(),
            download_dir: working_dir.clone(),
            results_root: working_dir.join(RESULTS_ROOT),
        }
    }

    /// 外部の制御境界と共有するキャンセルトークンを差し替える
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// キャプチャ状態の共有ハンドルを差し替える
    pub fn with_captcha_signal(mut self, signal: CaptchaSignal) -> Self {
        self.captcha = signal;
        self
    }

    /// 実行状態の共有ハンドルを差し替える
    pub fn with_state_handle(mut self, state: RunStateHandle) -> Self {
        self.state = state;
        self
    }

    /// エクスポートファイルが現れる作業ディレクトリを指定する
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// 結果ディレクトリのルートを指定する
    pub fn with_results_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_root = dir.into();
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn captcha_signal(&self) -> CaptchaSignal {
        self.captcha.clone()
    }

    pub fn state_handle(&self) -> RunStateHandle {
        self.state.clone()
    }

    /// 1つの具体コードを全ての国について処理する。
    /// 途中で失敗したらそのコードの残りの国は処理しない。
    async fn process_code(&self, code: &str, out_dir: &Path) -> Result<(), ScrapeError> {
        let tasks: Vec<ExtractionTask> = self
            .config
            .countries
            .iter()
            .map(|country| ExtractionTask::new(code, country))
            .collect();
        let total = tasks.len();

        for (idx, task) in tasks.iter().enumerate() {
            ensure_active(&self.token, "国処理中")?;
            let (code, country) = (task.product_code.as_str(), task.country.as_str());
            info!(
                "コード {} / 国 {} を処理します ({}/{})",
                code,
                country,
                idx + 1,
                total
            );

            self.state.set(RunState::Configuring);
            configure::select_parameters(&self.driver, &self.config, &self.token, code, country)
                .await?;

            self.state.set(RunState::Downloading);
            let dataset = download::run_extraction(
                &self.driver,
                &self.config,
                &self.token,
                &self.download_dir,
            )
            .await?;

            self.state.set(RunState::Aggregating);
            let Some(dataset) = dataset else {
                warn!("コード {} / 国 {} のデータがありません", code, country);
                return Err(ScrapeError::NoData(format!(
                    "コード {} / 国 {}",
                    code, country
                )));
            };

            fs::create_dir_all(out_dir)?;
            let path = out_dir.join(format!("{}.xlsx", country));
            excel::write_dataset(&path, country, &dataset, self.config.freeze_header)?;
            info!("コード {} / 国 {} の処理が完了しました", code, country);

            self.state.set(RunState::NextTask);
        }

        Ok(())
    }
}

#[async_trait]
impl<D: SessionDriver> Scraper for TradeMapScraper<D> {
    async fn login(&mut self) -> Result<(), ScrapeError> {
        self.config.validate()?;

        self.state.set(RunState::Authenticating);
        configure::submit_credentials(&self.driver, &self.config, &self.token).await?;

        self.state.set(RunState::CaptchaWait);
        configure::captcha_gate(&self.driver, &self.config, &self.token, &self.captcha).await?;

        configure::verify_logged_in(&self.driver).await?;
        Ok(())
    }

    async fn extract(&mut self) -> Result<RunReport, ScrapeError> {
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let results_dir = self.results_root.join(format!("result_{}", timestamp));

        info!("処理対象のコード数: {}", self.config.product_codes.len());
        info!("処理対象の国数: {}", self.config.countries.len());
        info!("展開深度: {}", self.config.parse_depth.as_str());

        ensure_active(&self.token, "データ処理開始前")?;
        self.driver.navigate(controls::PRODUCT_URL).await?;
        sleep(self.config.action_delay()).await;
        configure::reset_product_list(&self.driver, &self.config).await?;

        let mut failed_codes = Vec::new();
        let product_codes = self.config.product_codes.clone();
        let total = product_codes.len();

        for (idx, base_code) in product_codes.iter().enumerate() {
            ensure_active(&self.token, "コード処理中")?;
            info!("製品コード {} を処理します ({}/{})", base_code, idx + 1, total);

            if !resolver::is_valid_product_code(base_code) {
                warn!("製品コードの形式が不正です: {}。スキップします", base_code);
                continue;
            }

            self.state.set(RunState::ResolvingCodes);
            let resolved =
                resolver::resolve_codes(&self.driver, &self.config, &self.token, base_code)
                    .await?;
            if resolved.is_empty() {
                continue;
            }

            let mut code_failed = false;
            let mut failed_prefixes: BTreeSet<String> = BTreeSet::new();

            for code in &resolved {
                ensure_active(&self.token, "サブコード処理中")?;
                let out_dir = hierarchy_path(&results_dir, code);

                match self.process_code(code, &out_dir).await {
                    Ok(()) => {}
                    Err(e) if e.is_stop() => return Err(e),
                    Err(e) => {
                        error!("コード {} の処理に失敗しました: {}", code, e);
                        code_failed = true;
                        failed_prefixes.insert(code[..code.len().min(2)].to_string());
                    }
                }
            }

            // 失敗したコードの2桁プレフィクス配下に残った空ディレクトリを掃除
            for prefix in failed_prefixes {
                prune_empty_dirs(&results_dir.join(prefix));
            }

            if code_failed {
                failed_codes.push(base_code.clone());
            } else {
                info!("コード {} の処理が完了しました", base_code);
            }

            sleep(self.config.action_delay()).await;
        }

        info!("全コードの処理が完了しました");
        self.state.set(RunState::Done);
        Ok(RunReport {
            results_dir,
            failed_codes,
        })
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        debug!("セッションを解放します");
        self.driver.close().await
    }

    async fn execute(&mut self) -> Result<RunReport, ScrapeError> {
        let result = match self.login().await {
            Ok(()) => self.extract().await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.close().await {
            warn!("セッションの解放に失敗しました: {}", e);
        }

        match result {
            Ok(report) => Ok(report),
            Err(e) => {
                self.state.set(if e.is_stop() {
                    RunState::Stopped
                } else {
                    RunState::Failed
                });
                Err(e)
            }
        }
    }
}
