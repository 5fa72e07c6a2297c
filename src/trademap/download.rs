//! ページネーション付きダウンロードループ
//!
//! 1タスクにつき、エクスポートの起動・ファイル出現の待機・解析を
//! 繰り返しながら履歴ページを過去方向へ辿る。
//! 生ファイルは解析の成否にかかわらず即座に削除する。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::ScrapeError;
use crate::trademap::aggregate::Accumulator;
use crate::trademap::configure::wait_for_control;
use crate::trademap::controls;
use crate::trademap::ensure_active;
use crate::trademap::parse;
use crate::trademap::types::Dataset;
use crate::traits::SessionDriver;

fn prev_period_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"SetValues\('prev','(\d+)'\)").expect("不変の正規表現"))
}

/// ディレクトリ内の.txtファイル一覧
fn txt_files(dir: &Path) -> std::io::Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_txt = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("txt"))
            .unwrap_or(false);
        if is_txt {
            files.insert(path);
        }
    }
    Ok(files)
}

/// クリック前に存在しなかった.txtファイルの出現を待つ。
/// 停止要求時は出現済みの中間ファイルを破棄してから中断する。
async fn await_new_file(
    dir: &Path,
    before: &HashSet<PathBuf>,
    config: &RunConfig,
    token: &CancellationToken,
) -> Result<PathBuf, ScrapeError> {
    let started = Instant::now();

    while started.elapsed() < config.download_timeout() {
        if token.is_cancelled() {
            warn!("ファイル待機中に停止が要求されました。中間ファイルを破棄します");
            if let Ok(now) = txt_files(dir) {
                for stray in now.difference(before) {
                    let _ = fs::remove_file(stray);
                }
            }
            return Err(ScrapeError::Stopped);
        }

        let now = txt_files(dir)?;
        if let Some(path) = now.difference(before).next() {
            let elapsed = started.elapsed().as_secs_f64();
            info!("ファイルを検出しました ({:.2}秒): {:?}", elapsed, path);
            return Ok(path.clone());
        }

        sleep(config.action_delay()).await;
    }

    error!(
        "{}秒以内にエクスポートファイルを検出できませんでした",
        config.download_timeout_secs
    );
    Err(ScrapeError::Timeout(format!(
        "エクスポートファイルのダウンロード（{}秒）",
        config.download_timeout_secs
    )))
}

/// 検出したファイルにページ番号とタイムスタンプを付けてリネームする。
/// 後続ページとの名前衝突を避ける。
fn rename_with_page_index(path: &Path, page_number: u32) -> Result<PathBuf, ScrapeError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("export");
    let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let renamed = path.with_file_name(format!("{}_p{}_{}.txt", stem, page_number, timestamp));
    fs::rename(path, &renamed)?;
    debug!("ファイルをリネーム: {:?} -> {:?}", path, renamed);
    Ok(renamed)
}

/// 「前の期間」コントロールの状態。
enum PrevState {
    /// 無効化されている（最古のデータに到達）
    Disabled,
    /// 有効で、アクションメタデータに期間IDを持つ
    Active(String),
}

async fn read_prev_state<D: SessionDriver>(driver: &D) -> Result<PrevState, ScrapeError> {
    if driver.is_disabled(controls::PREVIOUS_BUTTON).await? {
        return Ok(PrevState::Disabled);
    }

    let onclick = driver
        .attribute(controls::PREVIOUS_BUTTON, "onclick")
        .await?
        .unwrap_or_default();
    let Some(caps) = prev_period_re().captures(&onclick) else {
        return Err(ScrapeError::DataFormat(format!(
            "ナビゲーションメタデータから期間を抽出できません: {}",
            onclick
        )));
    };
    Ok(PrevState::Active(caps[1].to_string()))
}

/// 過去方向へ1ページ戻る。
/// 戻り値は「続行可能か」。無効化を検出したらfalse（自然終了）。
async fn navigate_previous<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
) -> Result<bool, ScrapeError> {
    ensure_active(token, "ページ送り前")?;
    wait_for_control(driver, config, controls::PREVIOUS_BUTTON).await?;

    let current_period = match read_prev_state(driver).await {
        Ok(PrevState::Disabled) => {
            debug!("最初のページに到達しました。ループを終了します");
            return Ok(false);
        }
        Ok(PrevState::Active(period)) => period,
        Err(e) => {
            // メタデータが読めない場合は取得済みページを保持したまま打ち切る
            error!("ページ送りメタデータの読み取りに失敗: {}", e);
            return Ok(false);
        }
    };
    debug!("現在の期間ID: {}", current_period);

    driver.click(controls::PREVIOUS_BUTTON).await?;
    debug!("ページ送りをクリックしました");

    // 期間IDの変化または無効化を待つ。どちらも起きなければUIが応答していない
    let deadline = Instant::now() + config.page_timeout();
    loop {
        ensure_active(token, "ページ送り待機中")?;

        match read_prev_state(driver).await {
            Ok(PrevState::Disabled) => {
                debug!("ページ送り後にボタンが無効化されました");
                return Ok(false);
            }
            Ok(PrevState::Active(period)) if period != current_period => {
                debug!("期間IDが変化しました: {} -> {}", current_period, period);
                break;
            }
            Ok(PrevState::Active(_)) => {}
            Err(e) => debug!("ページ送り状態の確認に失敗: {}", e),
        }

        if Instant::now() >= deadline {
            error!("ページ送り後の状態変化を検出できませんでした");
            return Err(ScrapeError::Timeout(format!(
                "ページ遷移（{}秒）",
                config.page_timeout_secs
            )));
        }
        sleep(config.action_delay()).await;
    }

    // 新しいページの描画を確認
    wait_for_control(driver, config, controls::EXPORT_TEXT_BUTTON).await?;
    debug!("新しいページを確認しました");
    Ok(true)
}

/// 1タスク分のエクスポートを収集してデータセットに畳み込む。
/// 行が得られなければNone（「データなし」）を返す。
pub async fn run_extraction<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    download_dir: &Path,
) -> Result<Option<Dataset>, ScrapeError> {
    let mut accumulator = Accumulator::new(config.parse_all_pages);
    let mut page_number: u32 = 1;

    loop {
        ensure_active(token, "エクスポート開始前")?;

        debug!("エクスポートボタンを確認します");
        wait_for_control(driver, config, controls::EXPORT_TEXT_BUTTON).await?;
        if !driver.is_visible(controls::EXPORT_TEXT_BUTTON).await? {
            error!("エクスポートボタンが表示されていません");
            return Err(ScrapeError::ElementNotFound(
                controls::EXPORT_TEXT_BUTTON.to_string(),
            ));
        }

        ensure_active(token, "ダウンロード開始前")?;
        let before = txt_files(download_dir)?;
        info!("ページ {} のダウンロードを開始します", page_number);
        driver.click(controls::EXPORT_TEXT_BUTTON).await?;

        let downloaded = await_new_file(download_dir, &before, config, token).await?;
        let downloaded = rename_with_page_index(&downloaded, page_number)?;

        // 解析の成否にかかわらず生ファイルは即削除する
        let content = fs::read_to_string(&downloaded);
        if let Err(e) = fs::remove_file(&downloaded) {
            warn!("一時ファイルの削除に失敗: {}", e);
        }
        let page = parse::parse_export(&content?, config.quantity_unit)?;

        info!(
            "ページ {} を解析しました: {} 行",
            page_number,
            page.rows.len()
        );
        accumulator.add_page(page);
        page_number += 1;

        // 全履歴モードでなければ最初のページで終了
        if !config.parse_all_pages {
            break;
        }

        if !navigate_previous(driver, config, token).await? {
            break;
        }
    }

    Ok(accumulator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MassUnit;
    use crate::testing::MockSession;
    use crate::trademap::types::CellValue;

    const PAGE_2021: &str = "Exporters\t2021-M01, Tons\nFRA\t10\nDEU\t-\n";
    const PAGE_2020: &str = "Exporters\t2020-M12, Tons\nFRA\t5\n";

    fn test_config(parse_all_pages: bool) -> RunConfig {
        let mut config = RunConfig::new("u", "p").with_parse_all_pages(parse_all_pages);
        config.action_delay_secs = 0.01;
        config.page_timeout_secs = 2;
        config.download_timeout_secs = 2;
        config.quantity_unit = MassUnit::Kilograms;
        config
    }

    fn download_session(dir: &Path, payloads: &[&str]) -> MockSession {
        let session = MockSession::new();
        {
            let mut state = session.lock();
            state.download_dir = Some(dir.to_path_buf());
            state.export_payloads = payloads.iter().map(|p| p.to_string()).collect();
            state.set_prev_onclick("202101");
        }
        session
    }

    #[tokio::test]
    async fn single_page_mode_stops_after_first_page() {
        let dir = tempfile::tempdir().unwrap();
        let session = download_session(dir.path(), &[PAGE_2021, PAGE_2020]);
        let token = CancellationToken::new();

        let dataset = run_extraction(&session, &test_config(false), &token, dir.path())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(dataset.headers, vec!["2021-M01"]);
        assert_eq!(dataset.rows.len(), 2);
        assert_eq!(dataset.rows[0].values["2021-M01"], CellValue::Int(10_000));
        // 生ファイルは残らない
        assert!(txt_files(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_history_walks_back_until_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let session = download_session(dir.path(), &[PAGE_2021, PAGE_2020]);
        // 1回目のページ送りで期間が変わり、2回目で無効化される
        session.lock().prev_periods = vec!["202012".to_string()].into();
        let token = CancellationToken::new();

        let dataset = run_extraction(&session, &test_config(true), &token, dir.path())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(dataset.headers, vec!["2020-M12", "2021-M01"]);
        let fra = dataset
            .rows
            .iter()
            .find(|r| r.exporter == "FRA")
            .unwrap();
        assert_eq!(fra.values["2021-M01"], CellValue::Int(10_000));
        assert_eq!(fra.values["2020-M12"], CellValue::Int(5_000));
        assert!(txt_files(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_export_button_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let session = download_session(dir.path(), &[PAGE_2021]);
        session
            .lock()
            .hidden
            .insert(controls::EXPORT_TEXT_BUTTON.to_string());
        let mut config = test_config(false);
        config.page_timeout_secs = 0;
        let token = CancellationToken::new();

        let err = run_extraction(&session, &config, &token, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ElementNotFound(_)));
    }

    #[tokio::test]
    async fn download_timeout_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        // ペイロードなし → クリックしてもファイルが現れない
        let session = download_session(dir.path(), &[]);
        let mut config = test_config(false);
        config.download_timeout_secs = 0;
        let token = CancellationToken::new();

        let err = run_extraction(&session, &config, &token, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout(_)));
    }

    #[tokio::test]
    async fn unresponsive_pagination_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let session = download_session(dir.path(), &[PAGE_2021, PAGE_2020]);
        // クリック後も期間IDが変わらない → UI無応答
        session.lock().prev_periods = vec!["202101".to_string()].into();
        let mut config = test_config(true);
        config.page_timeout_secs = 1;
        let token = CancellationToken::new();

        let err = run_extraction(&session, &config, &token, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout(_)));
    }

    #[tokio::test]
    async fn malformed_header_aborts_after_deleting_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = download_session(dir.path(), &["Exporters\tNoUnit\nFRA\t1\n"]);
        let token = CancellationToken::new();

        let err = run_extraction(&session, &test_config(false), &token, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::DataFormat(_)));
        assert!(txt_files(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_export_reports_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let session = download_session(dir.path(), &["Exporters\t2021-M01, Tons\n"]);
        let token = CancellationToken::new();

        let dataset = run_extraction(&session, &test_config(false), &token, dir.path())
            .await
            .unwrap();
        assert!(dataset.is_none());
    }

    #[tokio::test]
    async fn cancellation_mid_loop_reports_stop() {
        let dir = tempfile::tempdir().unwrap();
        let session = download_session(dir.path(), &[PAGE_2021]);
        let token = CancellationToken::new();
        token.cancel();

        let err = run_extraction(&session, &test_config(false), &token, dir.path())
            .await
            .unwrap_err();
        assert!(err.is_stop());
    }
}
