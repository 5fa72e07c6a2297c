//! 制御境界
//!
//! HTTP/GUI層から消費されるstart/stop/status面。ワーカーは1つだけ
//! （開始は相互排他）で、停止は協調的: トークンを立ててからワーカーの
//! 終了を有限回ポーリングで待つ。共有状態（キャプチャ・実行状態・
//! 直近の結果）はワーカーのみが書き、ここからは読み取り専用。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::driver::ChromiumSession;
use crate::error::ScrapeError;
use crate::trademap::types::{CaptchaSignal, CaptchaState, RunState, RunStateHandle};
use crate::trademap::TradeMapScraper;
use crate::traits::Scraper;

/// 初期化（ブラウザ起動など）の許容時間
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);
/// 停止待ちのポーリング間隔
const DEFAULT_STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// 停止待ちの最大試行回数
const DEFAULT_STOP_MAX_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    InitTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    Timeout,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // ポイズニングはそのまま引き継いで続行する
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct ControllerInner {
    /// 初期化中または実行中ならtrue
    busy: AtomicBool,
    stopping: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    token: Mutex<CancellationToken>,
    captcha: CaptchaSignal,
    state: RunStateHandle,
    last_result: Mutex<Option<bool>>,
    last_error: Mutex<Option<String>>,
}

/// ワーカーの起動・停止と状態の読み出しを担う制御ハンドル。
/// 安価にクローンでき、全クローンが同じワーカー枠を共有する。
#[derive(Debug, Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
    init_timeout: Duration,
    stop_poll_interval: Duration,
    stop_max_attempts: u32,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            inner: Arc::new(ControllerInner::default()),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            stop_poll_interval: DEFAULT_STOP_POLL_INTERVAL,
            stop_max_attempts: DEFAULT_STOP_MAX_ATTEMPTS,
        }
    }
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_stop_policy(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.stop_poll_interval = poll_interval;
        self.stop_max_attempts = max_attempts;
        self
    }

    /// 標準構成（Chromeセッション + TradeMapScraper）でワーカーを起動する
    pub async fn start(&self, config: RunConfig) -> StartOutcome {
        self.start_with(move |token, captcha, state| async move {
            let download_dir = std::env::current_dir()?;
            let driver = ChromiumSession::launch(config.headless, &download_dir).await?;
            Ok(TradeMapScraper::new(driver, config)
                .with_cancellation(token)
                .with_captcha_signal(captcha)
                .with_state_handle(state)
                .with_download_dir(download_dir))
        })
        .await
    }

    /// 任意のスクレイパーでワーカーを起動する。
    /// ファクトリには制御境界と共有するトークン・シグナル・状態ハンドルが渡る。
    pub async fn start_with<F, Fut, S>(&self, factory: F) -> StartOutcome
    where
        F: FnOnce(CancellationToken, CaptchaSignal, RunStateHandle) -> Fut,
        Fut: Future<Output = Result<S, ScrapeError>>,
        S: Scraper + 'static,
    {
        // ワーカー枠の獲得。初期化中の再startもここで弾かれる。
        if self.inner.busy.swap(true, Ordering::SeqCst) {
            warn!("ボットは既に実行中です");
            return StartOutcome::AlreadyRunning;
        }

        let token = CancellationToken::new();
        *lock(&self.inner.token) = token.clone();
        self.inner.stopping.store(false, Ordering::SeqCst);
        self.inner.state.set(RunState::Idle);
        self.inner.captcha.clear();
        *lock(&self.inner.last_result) = None;
        *lock(&self.inner.last_error) = None;

        info!("ボットを起動します");
        let init = factory(
            token,
            self.inner.captcha.clone(),
            self.inner.state.clone(),
        );
        let mut scraper = match tokio::time::timeout(self.init_timeout, init).await {
            Ok(Ok(scraper)) => scraper,
            Ok(Err(e)) => {
                error!("ワーカーの初期化に失敗しました: {}", e);
                *lock(&self.inner.last_result) = Some(false);
                *lock(&self.inner.last_error) = Some(e.to_string());
                self.inner.busy.store(false, Ordering::SeqCst);
                return StartOutcome::Started;
            }
            Err(_) => {
                error!(
                    "ワーカーの初期化が{}秒以内に完了しませんでした",
                    self.init_timeout.as_secs()
                );
                *lock(&self.inner.last_result) = Some(false);
                *lock(&self.inner.last_error) = Some("初期化タイムアウト".into());
                self.inner.busy.store(false, Ordering::SeqCst);
                return StartOutcome::InitTimeout;
            }
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = scraper.execute().await;
            match result {
                Ok(report) => {
                    if report.failed_codes.is_empty() {
                        info!("実行が完了しました");
                    } else {
                        warn!(
                            "一部のコードが失敗しました: {}",
                            report.failed_codes.join(", ")
                        );
                    }
                    *lock(&inner.last_result) = Some(true);
                }
                Err(e) if e.is_stop() => {
                    info!("停止要求により実行を終了しました");
                    *lock(&inner.last_result) = Some(true);
                }
                Err(e) => {
                    error!("実行が失敗しました: {}", e);
                    *lock(&inner.last_result) = Some(false);
                    *lock(&inner.last_error) = Some(e.to_string());
                }
            }
            // 結果の書き込みを終えてから実行中フラグを下ろす
            inner.busy.store(false, Ordering::SeqCst);
        });
        *lock(&self.inner.worker) = Some(handle);

        StartOutcome::Started
    }

    /// 協調停止。トークンを立て、ワーカーの終了を有限回ポーリングで待つ。
    /// 待ちきれなければTimeout（固まったセッションは正常停止と別の失敗モード）。
    pub async fn stop(&self) -> StopOutcome {
        if !self.inner.busy.load(Ordering::SeqCst) {
            info!("ボットは動作していません");
            return StopOutcome::Stopped;
        }

        info!("停止を要求します");
        self.inner.stopping.store(true, Ordering::SeqCst);
        lock(&self.inner.token).cancel();

        for _ in 0..self.stop_max_attempts {
            if !self.inner.busy.load(Ordering::SeqCst) {
                self.inner.stopping.store(false, Ordering::SeqCst);
                info!("ボットを停止しました");
                return StopOutcome::Stopped;
            }
            sleep(self.stop_poll_interval).await;
        }

        self.inner.stopping.store(false, Ordering::SeqCst);
        error!("停止要求後もワーカーが終了しませんでした");
        StopOutcome::Timeout
    }

    pub fn status(&self) -> BotStatus {
        if self.inner.stopping.load(Ordering::SeqCst) {
            BotStatus::Stopping
        } else if self.inner.busy.load(Ordering::SeqCst) {
            BotStatus::Running
        } else {
            BotStatus::Stopped
        }
    }

    pub fn run_state(&self) -> RunState {
        self.inner.state.get()
    }

    pub fn last_result(&self) -> Option<bool> {
        *lock(&self.inner.last_result)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    pub fn clear_errors(&self) {
        *lock(&self.inner.last_error) = None;
    }

    pub fn captcha_status(&self) -> CaptchaState {
        self.inner.captcha.snapshot()
    }
}
