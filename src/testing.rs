//! テスト用のスクリプト化セッションドライバ

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ScrapeError;
use crate::trademap::controls;
use crate::traits::{SelectOption, SessionDriver};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub url: String,
    pub source: String,
    pub navigations: Vec<String>,
    /// 製品コード→選択後にドロップダウンへ現れる子コード
    pub product_tree: HashMap<String, Vec<String>>,
    /// コントロール→現在の選択肢
    pub options: HashMap<String, Vec<SelectOption>>,
    pub selected: HashMap<String, String>,
    /// 選択するとアクセス制限マーカーが出る製品コード
    pub restricted: HashSet<String>,
    /// コントロール→最初のN回の選択が値を反映しない（リトライ試験用）
    pub stale_selects: HashMap<String, u32>,
    pub select_counts: HashMap<String, u32>,
    pub typed: HashMap<String, String>,
    pub clicks: Vec<String>,
    pub hidden: HashSet<String>,
    pub disabled: HashSet<String>,
    pub attributes: HashMap<(String, String), String>,
    /// エクスポートクリックでファイルを書き出すディレクトリ
    pub download_dir: Option<PathBuf>,
    /// エクスポートクリックごとに書き出す内容
    pub export_payloads: VecDeque<String>,
    /// 「前の期間」クリックごとに切り替わる期間ID。尽きたらボタンが無効化される
    pub prev_periods: VecDeque<String>,
    /// current_urlの読み取りがこの回数を超えるまでキャプチャページに留まる
    pub captcha_reads_remaining: Option<u32>,
    export_counter: u32,
}

pub(crate) struct MockSession {
    pub state: Mutex<MockState>,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn select_count(&self, control: &str) -> u32 {
        self.lock().select_counts.get(control).copied().unwrap_or(0)
    }
}

impl MockState {
    pub fn set_options(&mut self, control: &str, values: &[(&str, &str)]) {
        self.options.insert(
            control.to_string(),
            values
                .iter()
                .map(|(v, t)| SelectOption::new(*v, *t))
                .collect(),
        );
    }

    pub fn set_prev_onclick(&mut self, period: &str) {
        self.attributes.insert(
            (controls::PREVIOUS_BUTTON.to_string(), "onclick".to_string()),
            format!("javascript:SetValues('prev','{}');", period),
        );
    }
}

#[async_trait]
impl SessionDriver for MockSession {
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
        let mut state = self.lock();
        state.url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ScrapeError> {
        let mut state = self.lock();
        if let Some(remaining) = state.captcha_reads_remaining {
            if remaining > 0 {
                state.captcha_reads_remaining = Some(remaining - 1);
                return Ok(format!(
                    "https://www.trademap.org/{}",
                    controls::CAPTCHA_URL_MARKER
                ));
            }
            state.captcha_reads_remaining = None;
        }
        Ok(state.url.clone())
    }

    async fn page_source(&self) -> Result<String, ScrapeError> {
        Ok(self.lock().source.clone())
    }

    async fn select(&self, control: &str, value: &str) -> Result<String, ScrapeError> {
        let mut state = self.lock();
        let count = state.select_counts.entry(control.to_string()).or_insert(0);
        *count += 1;
        let count = *count;

        if let Some(stale) = state.stale_selects.get(control).copied() {
            if count <= stale {
                return Ok(String::new());
            }
        }

        if control == controls::PRODUCT_DROPDOWN {
            // 制限マーカーは直近の選択に対してのみ現れる
            state.source = state.source.replace(controls::RESTRICTION_MARKER, "");
            if state.restricted.contains(value) {
                state.source.push_str(controls::RESTRICTION_MARKER);
            }
        }

        if control == controls::PRODUCT_DROPDOWN {
            if let Some(children) = state.product_tree.get(value).cloned() {
                let mut opts = vec![SelectOption::new(value, value)];
                opts.extend(children.iter().map(|c| SelectOption::new(c.clone(), c.clone())));
                state.options.insert(control.to_string(), opts);
            }
        }

        state
            .selected
            .insert(control.to_string(), value.to_string());
        Ok(value.to_string())
    }

    async fn selected_value(&self, control: &str) -> Result<String, ScrapeError> {
        Ok(self
            .lock()
            .selected
            .get(control)
            .cloned()
            .unwrap_or_default())
    }

    async fn options(&self, control: &str) -> Result<Vec<SelectOption>, ScrapeError> {
        Ok(self.lock().options.get(control).cloned().unwrap_or_default())
    }

    async fn click(&self, control: &str) -> Result<(), ScrapeError> {
        let mut state = self.lock();
        state.clicks.push(control.to_string());

        if control == controls::EXPORT_TEXT_BUTTON {
            if let (Some(dir), Some(payload)) = (
                state.download_dir.clone(),
                state.export_payloads.pop_front(),
            ) {
                state.export_counter += 1;
                let path = dir.join(format!("Trade_Map_{}.txt", state.export_counter));
                std::fs::write(path, payload)?;
            }
        }

        if control == controls::PREVIOUS_BUTTON {
            match state.prev_periods.pop_front() {
                Some(period) => state.set_prev_onclick(&period),
                None => {
                    state.disabled.insert(controls::PREVIOUS_BUTTON.to_string());
                }
            }
        }

        Ok(())
    }

    async fn type_text(&self, control: &str, text: &str) -> Result<(), ScrapeError> {
        self.lock()
            .typed
            .insert(control.to_string(), text.to_string());
        Ok(())
    }

    async fn is_visible(&self, control: &str) -> Result<bool, ScrapeError> {
        Ok(!self.lock().hidden.contains(control))
    }

    async fn is_disabled(&self, control: &str) -> Result<bool, ScrapeError> {
        Ok(self.lock().disabled.contains(control))
    }

    async fn attribute(&self, control: &str, name: &str) -> Result<Option<String>, ScrapeError> {
        Ok(self
            .lock()
            .attributes
            .get(&(control.to_string(), name.to_string()))
            .cloned())
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        Ok(())
    }
}
