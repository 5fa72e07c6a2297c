//! セッション設定
//!
//! ログイン、キャプチャゲート、およびタスクごとのパラメータ選択列。
//! 各ステップは選択後に適用値を読み戻して検証し、一時的な失敗は
//! `retry_count`回まで再試行する。

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::ScrapeError;
use crate::trademap::controls;
use crate::trademap::ensure_active;
use crate::trademap::types::CaptchaSignal;
use crate::traits::SessionDriver;

/// キャプチャページのポーリング間隔
const CAPTCHA_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// コードを段階選択する際の桁数列
const CODE_STEP_LENGTHS: [usize; 4] = [2, 4, 6, 10];
/// ポータルが受け付けるコードの最大桁数
const MAX_CODE_LENGTH: usize = 10;

/// 1つの設定ステップ: (コントロール, 目標値, 表示名)
#[derive(Debug, Clone, Copy)]
pub struct ConfigStep {
    pub control: &'static str,
    pub value: &'static str,
    pub label: &'static str,
}

/// 主要パラメータ。カテゴリ系→詳細系の固定順で適用する。
const MAIN_PARAMETERS: &[ConfigStep] = &[
    ConfigStep {
        control: controls::PARTNER_DROPDOWN,
        value: "-2",
        label: "Partner: All",
    },
    ConfigStep {
        control: controls::TRADE_TYPE_DROPDOWN,
        value: "I",
        label: "Trade Type: Imports",
    },
    ConfigStep {
        control: controls::OUTPUT_TYPE_DROPDOWN,
        value: "TSM",
        label: "Output: Monthly time series",
    },
    ConfigStep {
        control: controls::OUTPUT_OPTION_DROPDOWN,
        value: "ByCountry",
        label: "Output option: By Country",
    },
    ConfigStep {
        control: controls::MIRROR_DIRECT_DROPDOWN,
        value: "D",
        label: "Mirror: Direct data",
    },
    ConfigStep {
        control: controls::INDICATOR_DROPDOWN,
        value: "Q",
        label: "Indicator: Quantities",
    },
];

/// 行数系パラメータ。必ず最後に適用する。
const ROWS_PARAMETERS: &[ConfigStep] = &[
    ConfigStep {
        control: controls::NUM_TIME_PERIOD_DROPDOWN,
        value: "20",
        label: "20 per page",
    },
    ConfigStep {
        control: controls::PAGE_SIZE_DROPDOWN,
        value: "300",
        label: "300 per page",
    },
];

/// コントロールが表示されるまでポーリングで待つ
pub(crate) async fn wait_for_control<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    control: &str,
) -> Result<(), ScrapeError> {
    let deadline = Instant::now() + config.page_timeout();
    loop {
        if driver.is_visible(control).await.unwrap_or(false) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ScrapeError::ElementNotFound(control.to_string()));
        }
        sleep(config.action_delay()).await;
    }
}

/// 認証情報を一度だけ送信する。誤った認証情報は再試行せず失敗させる。
pub async fn submit_credentials<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
) -> Result<(), ScrapeError> {
    ensure_active(token, "ログイン開始前")?;
    info!("Trade Mapへのログインを開始します");

    driver.navigate(controls::BASE_URL).await?;
    debug!("トップページへ遷移しました");

    ensure_active(token, "ログインページ遷移前")?;
    wait_for_control(driver, config, controls::LOGIN_MENU).await?;
    driver.click(controls::LOGIN_MENU).await?;
    sleep(config.action_delay()).await;

    wait_for_control(driver, config, controls::USERNAME_FIELD).await?;
    driver
        .type_text(controls::USERNAME_FIELD, &config.username)
        .await?;
    driver
        .type_text(controls::PASSWORD_FIELD, &config.password)
        .await?;
    debug!("認証情報を入力しました");

    driver.click(controls::LOGIN_SUBMIT).await?;
    sleep(config.action_delay()).await;

    ensure_active(token, "ログイン送信後")?;
    if driver
        .page_source()
        .await?
        .contains(controls::INVALID_LOGIN_MARKER)
    {
        error!("ログインまたはパスワードが正しくありません");
        return Err(ScrapeError::InvalidCredentials);
    }

    debug!("認証情報の送信が完了しました");
    Ok(())
}

/// キャプチャゲート。チャレンジページに滞在している間、1秒間隔で
/// `captcha_timeout`までポーリングし、待機状態を外部シグナルへ公開する。
/// 終了時（成功・タイムアウト・停止のいずれでも）シグナルは必ずクリアする。
pub async fn captcha_gate<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    signal: &CaptchaSignal,
) -> Result<(), ScrapeError> {
    debug!("キャプチャの有無を確認します");
    if !driver
        .current_url()
        .await?
        .contains(controls::CAPTCHA_URL_MARKER)
    {
        debug!("キャプチャは検出されませんでした");
        return Ok(());
    }

    info!("キャプチャを検出しました。人間の入力を待機します");
    signal.activate("キャプチャの入力が必要です");

    let started = Instant::now();
    let mut error_shown = false;

    let result = loop {
        if started.elapsed() >= config.captcha_timeout() {
            error!(
                "キャプチャ入力の待機がタイムアウトしました（{}秒）",
                config.captcha_timeout_secs
            );
            break Err(ScrapeError::CaptchaTimeout(config.captcha_timeout_secs));
        }
        if token.is_cancelled() {
            warn!("キャプチャ待機中に停止が要求されました");
            break Err(ScrapeError::Stopped);
        }

        debug!("キャプチャ入力を待機中");

        // 直前の入力が拒否された場合はメッセージを切り替える
        let source = driver.page_source().await.unwrap_or_default();
        if source.contains(controls::CAPTCHA_ERROR_TEXT) {
            if !error_shown {
                signal.update_message("キャプチャが正しくありません。再入力してください");
                warn!("キャプチャの入力が拒否されました");
                error_shown = true;
            }
        } else if error_shown {
            signal.update_message("キャプチャの入力が必要です");
            error_shown = false;
        }

        sleep(CAPTCHA_POLL_INTERVAL).await;

        match driver.current_url().await {
            Ok(url) if !url.contains(controls::CAPTCHA_URL_MARKER) => {
                info!("キャプチャを通過しました");
                break Ok(());
            }
            Ok(_) => {}
            Err(e) => break Err(e),
        }
    };

    signal.clear();
    result
}

/// ログイン完了後にポータルへ戻っていることを確認する
pub async fn verify_logged_in<D: SessionDriver>(driver: &D) -> Result<(), ScrapeError> {
    let url = driver.current_url().await?;
    if !url.contains(controls::BASE_URL) {
        error!("ログイン後のURLが想定と異なります: {}", url);
        return Err(ScrapeError::Login(
            "ログイン後のページが確認できません".into(),
        ));
    }
    info!("ログインに成功しました");
    Ok(())
}

/// コード一覧を初期状態（All products）に戻す
pub async fn reset_product_list<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
) -> Result<(), ScrapeError> {
    debug!("コード一覧を初期状態に戻します");
    driver
        .select(controls::PRODUCT_DROPDOWN, controls::ALL_PRODUCTS_VALUE)
        .await?;
    sleep(config.action_delay()).await;
    Ok(())
}

/// コードの段階選択列を組み立てる（2→4→6→10桁）。
/// 10桁を超えるコードは切り詰める。
fn code_steps(product_code: &str) -> Vec<String> {
    let mut code = product_code.to_string();
    if code.len() > MAX_CODE_LENGTH {
        warn!(
            "製品コード {} は{}桁に切り詰められます: {}",
            code,
            MAX_CODE_LENGTH,
            &code[..MAX_CODE_LENGTH]
        );
        code.truncate(MAX_CODE_LENGTH);
    }

    let mut steps = Vec::new();
    for len in CODE_STEP_LENGTHS {
        if len >= code.len() {
            break;
        }
        steps.push(code[..len].to_string());
    }
    steps.push(code);
    steps
}

/// 製品コードを段階的に選択する。選択肢にないコードとアクセス制限は
/// 恒久的な失敗、読み戻しの不一致は再試行の対象。
async fn select_product_code<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    product_code: &str,
) -> Result<(), ScrapeError> {
    let steps = code_steps(product_code);
    debug!("コード選択列: {}", steps.join(" -> "));

    let total = steps.len();
    for (idx, step_code) in steps.iter().enumerate() {
        ensure_active(token, "製品コード選択中")?;

        let mut attempts = 0;
        loop {
            ensure_active(token, "製品コード選択中")?;
            attempts += 1;
            debug!(
                "ステップ {}/{}: コード {} を選択します (試行 {})",
                idx + 1,
                total,
                step_code,
                attempts
            );

            // 選択肢に存在しないコードは再試行しても現れない
            let options = driver.options(controls::PRODUCT_DROPDOWN).await?;
            if !options.iter().any(|o| o.value == *step_code) {
                error!("コード {} が選択肢にありません", step_code);
                return Err(ScrapeError::StepFailed {
                    step: format!("製品コード {}", step_code),
                    reason: "選択肢に存在しません".into(),
                });
            }

            driver.select(controls::PRODUCT_DROPDOWN, step_code).await?;
            sleep(config.action_delay()).await;

            if driver
                .page_source()
                .await?
                .contains(controls::RESTRICTION_MARKER)
            {
                error!("アカウントにコード {} へのアクセス権がありません", step_code);
                return Err(ScrapeError::AccessRestricted(step_code.clone()));
            }

            let applied = driver.selected_value(controls::PRODUCT_DROPDOWN).await?;
            if applied == *step_code {
                info!("コード {} を選択しました", step_code);
                break;
            }

            if attempts >= config.retry_count {
                error!(
                    "コード {} を{}回の試行で選択できませんでした",
                    step_code, attempts
                );
                return Err(ScrapeError::StepFailed {
                    step: format!("製品コード {}", step_code),
                    reason: format!("{} が選択されました（期待値 {}）", applied, step_code),
                });
            }
            warn!(
                "コード {} の選択を再試行します ({}/{})",
                step_code, attempts, config.retry_count
            );
            sleep(config.action_delay()).await;
        }
    }

    info!("製品コード {} の選択が完了しました", product_code);
    Ok(())
}

/// 国選択モードへ切り替え、表示名の一致で国を選択する
async fn select_country<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    country: &str,
) -> Result<(), ScrapeError> {
    ensure_active(token, "国選択前")?;

    debug!("国選択モードに切り替えます");
    wait_for_control(driver, config, controls::COUNTRY_RADIO).await?;
    driver.click(controls::COUNTRY_RADIO).await?;
    sleep(config.action_delay()).await;

    ensure_active(token, "国選択中")?;
    debug!("国 {} を選択します", country);
    let options = driver.options(controls::COUNTRY_DROPDOWN).await?;
    let Some(option) = options.iter().find(|o| o.title.contains(country)) else {
        error!("国 {} が選択肢にありません", country);
        return Err(ScrapeError::StepFailed {
            step: format!("国 {}", country),
            reason: "選択肢に存在しません".into(),
        });
    };

    driver
        .select(controls::COUNTRY_DROPDOWN, &option.value)
        .await?;
    info!("国 {} を選択しました", country);
    sleep(config.action_delay()).await;

    ensure_active(token, "国選択後")?;
    Ok(())
}

/// 1ステップを適用する。選択→待機→読み戻し検証を`retry_count`回まで試す。
async fn apply_step<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    step: &ConfigStep,
) -> Result<(), ScrapeError> {
    let mut attempts = 0;
    loop {
        ensure_active(token, step.label)?;
        attempts += 1;
        debug!(
            "パラメータ {} = {} を設定します (試行 {}/{})",
            step.label, step.value, attempts, config.retry_count
        );

        let result = async {
            driver.select(step.control, step.value).await?;
            sleep(config.action_delay()).await;

            let applied = driver.selected_value(step.control).await?;
            if applied == step.value {
                Ok(())
            } else {
                Err(ScrapeError::StepFailed {
                    step: step.label.to_string(),
                    reason: format!("{} が選択されました（期待値 {}）", applied, step.value),
                })
            }
        }
        .await;

        match result {
            Ok(()) => {
                info!("パラメータ {} を {} に設定しました", step.label, step.value);
                return Ok(());
            }
            Err(e) if e.is_stop() => return Err(e),
            Err(e) => {
                if attempts >= config.retry_count {
                    error!(
                        "パラメータ {} の設定に失敗しました（{}回試行）: {}",
                        step.label, attempts, e
                    );
                    return Err(ScrapeError::StepFailed {
                        step: step.label.to_string(),
                        reason: e.to_string(),
                    });
                }
                warn!(
                    "パラメータ {} の設定を再試行します ({}/{}): {}",
                    step.label, attempts, config.retry_count, e
                );
                sleep(config.action_delay()).await;
            }
        }

        ensure_active(token, step.label)?;
    }
}

/// 1タスク分のセッション状態を組み立てる。
/// 製品コード→国→主要パラメータ→行数パラメータの固定順。
pub async fn select_parameters<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    product_code: &str,
    country: &str,
) -> Result<(), ScrapeError> {
    ensure_active(token, "パラメータ選択前")?;
    debug!(
        "コード {} / 国 {} のパラメータ選択を開始します",
        product_code, country
    );

    driver.navigate(controls::PRODUCT_URL).await?;
    sleep(config.action_delay()).await;
    ensure_active(token, "ページ読み込み後")?;

    reset_product_list(driver, config).await?;
    select_product_code(driver, config, token, product_code).await?;
    select_country(driver, config, token, country).await?;

    debug!("主要パラメータの設定を開始します");
    for step in MAIN_PARAMETERS {
        apply_step(driver, config, token, step).await?;
    }

    debug!("行数パラメータの設定を開始します");
    for step in ROWS_PARAMETERS {
        apply_step(driver, config, token, step).await?;
    }

    info!("全パラメータを設定しました");
    Ok(())
}
