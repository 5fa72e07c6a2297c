use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ScrapeError;

pub const DEFAULT_ACTION_DELAY: f64 = 0.5;
pub const DEFAULT_PAGE_TIMEOUT: u64 = 5;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_DOWNLOAD_TIMEOUT: u64 = 30;
pub const DEFAULT_CAPTCHA_TIMEOUT: u64 = 300;
pub const DEFAULT_FREEZE_HEADER: bool = true;

/// 対象となる重量単位（2種類のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MassUnit {
    #[default]
    Kilograms,
    Tons,
}

impl MassUnit {
    /// kg換算の基準係数
    pub fn factor(self) -> f64 {
        match self {
            MassUnit::Kilograms => 1.0,
            MassUnit::Tons => 1000.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MassUnit::Kilograms => "Kilograms",
            MassUnit::Tons => "Tons",
        }
    }
}

/// 分類コードの展開深度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseDepth {
    #[default]
    Level1,
    Level2,
    Level3,
    Level4,
}

impl ParseDepth {
    pub fn target_length(self) -> usize {
        match self {
            ParseDepth::Level1 => 2,
            ParseDepth::Level2 => 4,
            ParseDepth::Level3 => 6,
            ParseDepth::Level4 => 8,
        }
    }

    /// コード長が深度の受理条件を満たすか。
    /// level3は6桁ちょうど、level4は8〜12桁の許容帯を持つ。
    pub fn accepts_length(self, len: usize) -> bool {
        match self {
            ParseDepth::Level1 => len >= 2,
            ParseDepth::Level2 => len >= 4,
            ParseDepth::Level3 => len == 6,
            ParseDepth::Level4 => (8..=12).contains(&len),
        }
    }

    /// まだ展開（子コード列挙）の対象となる長さか
    pub fn expandable_length(self, len: usize) -> bool {
        len < self.target_length()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParseDepth::Level1 => "level1",
            ParseDepth::Level2 => "level2",
            ParseDepth::Level3 => "level3",
            ParseDepth::Level4 => "level4",
        }
    }
}

/// 1回の実行全体で共有される設定。実行中は不変。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub product_codes: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub quantity_unit: MassUnit,
    #[serde(default)]
    pub parse_depth: ParseDepth,
    #[serde(rename = "action_delay", default = "default_action_delay")]
    pub action_delay_secs: f64,
    #[serde(rename = "page_timeout", default = "default_page_timeout")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(rename = "download_timeout", default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    #[serde(rename = "captcha_timeout", default = "default_captcha_timeout")]
    pub captcha_timeout_secs: u64,
    #[serde(default = "default_freeze_header")]
    pub freeze_header: bool,
    #[serde(default)]
    pub parse_all_pages: bool,
    #[serde(default)]
    pub headless: bool,
}

fn default_action_delay() -> f64 {
    DEFAULT_ACTION_DELAY
}
fn default_page_timeout() -> u64 {
    DEFAULT_PAGE_TIMEOUT
}
fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}
fn default_download_timeout() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT
}
fn default_captcha_timeout() -> u64 {
    DEFAULT_CAPTCHA_TIMEOUT
}
fn default_freeze_header() -> bool {
    DEFAULT_FREEZE_HEADER
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            product_codes: Vec::new(),
            countries: Vec::new(),
            quantity_unit: MassUnit::default(),
            parse_depth: ParseDepth::default(),
            action_delay_secs: DEFAULT_ACTION_DELAY,
            page_timeout_secs: DEFAULT_PAGE_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT,
            captcha_timeout_secs: DEFAULT_CAPTCHA_TIMEOUT,
            freeze_header: DEFAULT_FREEZE_HEADER,
            parse_all_pages: false,
            headless: false,
        }
    }
}

impl RunConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_product_codes(mut self, codes: Vec<String>) -> Self {
        self.product_codes = codes;
        self
    }

    pub fn with_countries(mut self, countries: Vec<String>) -> Self {
        self.countries = countries;
        self
    }

    pub fn with_quantity_unit(mut self, unit: MassUnit) -> Self {
        self.quantity_unit = unit;
        self
    }

    pub fn with_parse_depth(mut self, depth: ParseDepth) -> Self {
        self.parse_depth = depth;
        self
    }

    pub fn with_parse_all_pages(mut self, parse_all_pages: bool) -> Self {
        self.parse_all_pages = parse_all_pages;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn action_delay(&self) -> Duration {
        Duration::from_secs_f64(self.action_delay_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn captcha_timeout(&self) -> Duration {
        Duration::from_secs(self.captcha_timeout_secs)
    }

    /// 必須項目の検証。実行開始時に呼ばれる。
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.username.is_empty() {
            return Err(ScrapeError::Config("ログインが指定されていません".into()));
        }
        if self.password.is_empty() {
            return Err(ScrapeError::Config("パスワードが指定されていません".into()));
        }
        if self.product_codes.is_empty() {
            return Err(ScrapeError::Config(
                "最低1つの製品コードを指定してください".into(),
            ));
        }
        if self.countries.is_empty() {
            return Err(ScrapeError::Config("最低1つの国を指定してください".into()));
        }
        Ok(())
    }

    /// 数値パラメータの下限チェック。下限を割る値は既定値に置き換える。
    /// 置き換えが発生した場合はtrueを返す。
    pub fn normalize(&mut self) -> bool {
        let mut corrected = false;

        if self.action_delay_secs <= 0.1 {
            warn!(
                "action_delayが不正です（{}）。既定値{}を使用します",
                self.action_delay_secs, DEFAULT_ACTION_DELAY
            );
            self.action_delay_secs = DEFAULT_ACTION_DELAY;
            corrected = true;
        }
        if self.page_timeout_secs <= 1 {
            warn!(
                "page_timeoutが不正です（{}）。既定値{}を使用します",
                self.page_timeout_secs, DEFAULT_PAGE_TIMEOUT
            );
            self.page_timeout_secs = DEFAULT_PAGE_TIMEOUT;
            corrected = true;
        }
        if self.retry_count <= 1 {
            warn!(
                "retry_countが不正です（{}）。既定値{}を使用します",
                self.retry_count, DEFAULT_RETRY_COUNT
            );
            self.retry_count = DEFAULT_RETRY_COUNT;
            corrected = true;
        }
        if self.download_timeout_secs <= 5 {
            warn!(
                "download_timeoutが不正です（{}）。既定値{}を使用します",
                self.download_timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT
            );
            self.download_timeout_secs = DEFAULT_DOWNLOAD_TIMEOUT;
            corrected = true;
        }
        if self.captcha_timeout_secs <= 30 {
            warn!(
                "captcha_timeoutが不正です（{}）。既定値{}を使用します",
                self.captcha_timeout_secs, DEFAULT_CAPTCHA_TIMEOUT
            );
            self.captcha_timeout_secs = DEFAULT_CAPTCHA_TIMEOUT;
            corrected = true;
        }

        corrected
    }

    /// 設定ファイルを読み込む。欠損・不正なフィールドは既定値で補い、
    /// 補正が発生した場合はファイルを修正後の内容で書き直す。
    pub fn load_from(path: impl AsRef<Path>) -> Result<(Self, bool), ScrapeError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let raw: Value = serde_json::from_str(&text)
            .map_err(|e| ScrapeError::Config(format!("設定ファイルのJSON形式が不正です: {}", e)))?;

        let mut config = Self::from_value_lenient(&raw);
        let mut corrected = config.normalize();

        // 欠損フィールドや不正値が既定値で補われていればファイル内容と一致しない
        let canonical = serde_json::to_value(&config)
            .map_err(|e| ScrapeError::Config(format!("設定のシリアライズに失敗: {}", e)))?;
        if canonical != raw {
            corrected = true;
        }

        if corrected {
            debug!("設定を補正して書き戻します: {:?}", path);
            config.save_to(path)?;
        }

        Ok((config, corrected))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ScrapeError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ScrapeError::Config(format!("設定のシリアライズに失敗: {}", e)))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// フィールド単位の寛容なパース。型や値が不正なフィールドは既定値に落とす。
    fn from_value_lenient(raw: &Value) -> Self {
        let mut config = Self::default();

        if let Some(v) = raw.get("username").and_then(Value::as_str) {
            config.username = v.to_string();
        }
        if let Some(v) = raw.get("password").and_then(Value::as_str) {
            config.password = v.to_string();
        }
        if let Some(items) = raw.get("product_codes").and_then(Value::as_array) {
            // コードは数値として書かれていることもある
            config.product_codes = items.iter().filter_map(string_or_number).collect();
        }
        if let Some(items) = raw.get("countries").and_then(Value::as_array) {
            config.countries = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
        if let Some(v) = raw.get("quantity_unit") {
            match serde_json::from_value::<MassUnit>(v.clone()) {
                Ok(unit) => config.quantity_unit = unit,
                Err(_) => warn!("quantity_unitが不正です: {}。既定値を使用します", v),
            }
        }
        if let Some(v) = raw.get("parse_depth") {
            match serde_json::from_value::<ParseDepth>(v.clone()) {
                Ok(depth) => config.parse_depth = depth,
                Err(_) => warn!("parse_depthが不正です: {}。既定値を使用します", v),
            }
        }
        if let Some(v) = raw.get("action_delay").and_then(Value::as_f64) {
            config.action_delay_secs = v;
        }
        if let Some(v) = raw.get("page_timeout").and_then(Value::as_u64) {
            config.page_timeout_secs = v;
        }
        if let Some(v) = raw.get("retry_count").and_then(Value::as_u64) {
            config.retry_count = v as u32;
        }
        if let Some(v) = raw.get("download_timeout").and_then(Value::as_u64) {
            config.download_timeout_secs = v;
        }
        if let Some(v) = raw.get("captcha_timeout").and_then(Value::as_u64) {
            config.captcha_timeout_secs = v;
        }
        if let Some(v) = raw.get("freeze_header").and_then(Value::as_bool) {
            config.freeze_header = v;
        }
        if let Some(v) = raw.get("parse_all_pages").and_then(Value::as_bool) {
            config.parse_all_pages = v;
        }
        if let Some(v) = raw.get("headless").and_then(Value::as_bool) {
            config.headless = v;
        }

        config
    }
}

fn string_or_number(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = RunConfig::new("user", "pass")
            .with_product_codes(vec!["52".into()])
            .with_countries(vec!["Fiji".into()])
            .with_quantity_unit(MassUnit::Tons)
            .with_parse_depth(ParseDepth::Level3)
            .with_headless(true);

        assert_eq!(config.username, "user");
        assert_eq!(config.quantity_unit, MassUnit::Tons);
        assert_eq!(config.parse_depth, ParseDepth::Level3);
        assert!(config.headless);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let config = RunConfig::new("user", "pass");
        assert!(matches!(
            config.validate(),
            Err(ScrapeError::Config(_))
        ));
    }

    #[test]
    fn depth_lengths_and_bands() {
        assert_eq!(ParseDepth::Level1.target_length(), 2);
        assert_eq!(ParseDepth::Level4.target_length(), 8);
        assert!(ParseDepth::Level3.accepts_length(6));
        assert!(!ParseDepth::Level3.accepts_length(8));
        assert!(ParseDepth::Level4.accepts_length(8));
        assert!(ParseDepth::Level4.accepts_length(12));
        assert!(!ParseDepth::Level4.accepts_length(13));
        assert!(ParseDepth::Level4.expandable_length(6));
    }

    #[test]
    fn depth_serde_uses_level_names() {
        let depth: ParseDepth = serde_json::from_str("\"level3\"").unwrap();
        assert_eq!(depth, ParseDepth::Level3);
        assert_eq!(serde_json::to_string(&ParseDepth::Level2).unwrap(), "\"level2\"");
    }

    #[test]
    fn lenient_parse_falls_back_to_defaults() {
        let raw: Value = serde_json::from_str(
            r#"{
                "username": "u",
                "password": "p",
                "product_codes": [5201, "52"],
                "countries": ["Fiji"],
                "quantity_unit": "Pounds",
                "parse_depth": "level9",
                "action_delay": "fast"
            }"#,
        )
        .unwrap();

        let config = RunConfig::from_value_lenient(&raw);
        assert_eq!(config.product_codes, vec!["5201", "52"]);
        assert_eq!(config.quantity_unit, MassUnit::Kilograms);
        assert_eq!(config.parse_depth, ParseDepth::Level1);
        assert_eq!(config.action_delay_secs, DEFAULT_ACTION_DELAY);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut config = RunConfig::default();
        config.action_delay_secs = 0.05;
        config.page_timeout_secs = 1;
        config.retry_count = 0;
        config.download_timeout_secs = 2;
        config.captcha_timeout_secs = 10;

        assert!(config.normalize());
        assert_eq!(config.action_delay_secs, DEFAULT_ACTION_DELAY);
        assert_eq!(config.page_timeout_secs, DEFAULT_PAGE_TIMEOUT);
        assert_eq!(config.retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(config.download_timeout_secs, DEFAULT_DOWNLOAD_TIMEOUT);
        assert_eq!(config.captcha_timeout_secs, DEFAULT_CAPTCHA_TIMEOUT);

        // 既に正常な設定は変更しない
        assert!(!config.normalize());
    }

    #[test]
    fn load_rewrites_corrected_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"username":"u","password":"p","product_codes":["52"],"countries":["Fiji"],"retry_count":0}"#,
        )
        .unwrap();

        let (config, corrected) = RunConfig::load_from(&path).unwrap();
        assert!(corrected);
        assert_eq!(config.retry_count, DEFAULT_RETRY_COUNT);

        // 書き戻された内容は補正済みの値を持つ
        let rewritten = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(value["retry_count"], Value::from(DEFAULT_RETRY_COUNT));
        assert_eq!(value["captcha_timeout"], Value::from(DEFAULT_CAPTCHA_TIMEOUT));

        // 2回目の読み込みは補正なし
        let (_, corrected) = RunConfig::load_from(&path).unwrap();
        assert!(!corrected);
    }
}
