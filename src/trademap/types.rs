//! 抽出パイプラインの型定義

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// 1つの(分類コード, 国)の作業単位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTask {
    pub product_code: String,
    pub country: String,
}

impl ExtractionTask {
    pub fn new(product_code: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            product_code: product_code.into(),
            country: country.into(),
        }
    }
}

/// 正規化済みのセル値。
/// Textは解析できなかった（または区切り文字が曖昧な）生文字列の保持に使う。
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Absent,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, CellValue::Absent)
    }

    /// 値がちょうど0か（集約時の上書き判定に使う）
    pub fn is_zero(&self) -> bool {
        match self {
            CellValue::Int(v) => *v == 0,
            CellValue::Float(v) => *v == 0.0,
            _ => false,
        }
    }

    /// セルの表示文字列（列幅の計算と出力に使う）
    pub fn render(&self) -> String {
        match self {
            CellValue::Absent => String::new(),
            CellValue::Int(v) => v.to_string(),
            CellValue::Float(v) => v.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }
}

/// 1行分の解析結果: 輸出者名と期間ラベル→値のマッピング
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub exporter: String,
    pub values: HashMap<String, CellValue>,
}

impl ParsedRow {
    pub fn new(exporter: impl Into<String>) -> Self {
        Self {
            exporter: exporter.into(),
            values: HashMap::new(),
        }
    }
}

/// 1ページ分の解析結果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    /// 期間ラベル（輸出者列は含まない）
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
}

/// 1タスク分のマージ済みデータセット。
/// headersは(年, 月)で昇順に整列済みで、全行が全ヘッダーに答えられる
/// （欠損はAbsent扱い）。
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
}

/// 実行全体の結果報告
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results_dir: PathBuf,
    /// 処理に失敗した設定上のコード
    pub failed_codes: Vec<String>,
}

/// キャプチャ待機の外部向けシグナル
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptchaState {
    pub active: bool,
    pub message: Option<String>,
}

/// キャプチャ状態の共有ハンドル。
/// 書き込みはセッション設定器（キャプチャゲート）のみが行い、
/// 制御境界からは読み取り専用。
#[derive(Debug, Clone, Default)]
pub struct CaptchaSignal {
    inner: Arc<Mutex<CaptchaState>>,
}

impl CaptchaSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, message: impl Into<String>) {
        let mut state = self.lock();
        state.active = true;
        state.message = Some(message.into());
    }

    pub fn update_message(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if state.active {
            state.message = Some(message.into());
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.active = false;
        state.message = None;
    }

    pub fn snapshot(&self) -> CaptchaState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptchaState> {
        // ポイズニングはそのまま引き継いで続行する
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// オーケストレーションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Authenticating,
    CaptchaWait,
    ResolvingCodes,
    Configuring,
    Downloading,
    Aggregating,
    NextTask,
    Done,
    Failed,
    Stopped,
}

/// 実行状態の共有ハンドル。書き込みはワーカーのみ。
#[derive(Debug, Clone, Default)]
pub struct RunStateHandle {
    inner: Arc<Mutex<RunState>>,
}

impl RunStateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: RunState) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn get(&self) -> RunState {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_value_zero_detection() {
        assert!(CellValue::Int(0).is_zero());
        assert!(CellValue::Float(0.0).is_zero());
        assert!(!CellValue::Int(5).is_zero());
        assert!(!CellValue::Absent.is_zero());
        assert!(!CellValue::Text("0".into()).is_zero());
    }

    #[test]
    fn captcha_signal_lifecycle() {
        let signal = CaptchaSignal::new();
        assert_eq!(signal.snapshot(), CaptchaState::default());

        signal.activate("入力待ち");
        let state = signal.snapshot();
        assert!(state.active);
        assert_eq!(state.message.as_deref(), Some("入力待ち"));

        signal.update_message("再入力が必要");
        assert_eq!(
            signal.snapshot().message.as_deref(),
            Some("再入力が必要")
        );

        signal.clear();
        assert_eq!(signal.snapshot(), CaptchaState::default());
    }

    #[test]
    fn captcha_update_ignored_when_inactive() {
        let signal = CaptchaSignal::new();
        signal.update_message("無視される");
        assert_eq!(signal.snapshot().message, None);
    }

    #[test]
    fn run_state_handle_roundtrip() {
        let handle = RunStateHandle::new();
        assert_eq!(handle.get(), RunState::Idle);
        handle.set(RunState::Downloading);
        assert_eq!(handle.get(), RunState::Downloading);
    }
}
