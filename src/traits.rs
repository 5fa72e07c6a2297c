use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;
use crate::trademap::types::RunReport;

/// select要素の選択肢。titleはサイト側の表示名（国名のマッチングに使う）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    #[serde(default)]
    pub title: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            title: title.into(),
        }
    }
}

/// 対話セッションを駆動する外部コラボレータの境界。
///
/// コアはこのプリミティブ群だけを発行し、実装の内部（CDP・WebDriver等）には
/// 一切依存しない。待機ループはコア側でこのプリミティブを組み合わせて構築する。
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// URLへ遷移する
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError>;

    /// 現在のURLを読む
    async fn current_url(&self) -> Result<String, ScrapeError>;

    /// ページソースを読む
    async fn page_source(&self) -> Result<String, ScrapeError>;

    /// select要素に値を設定し、実際に適用された値を返す
    async fn select(&self, control: &str, value: &str) -> Result<String, ScrapeError>;

    /// select要素の現在の選択値を読む
    async fn selected_value(&self, control: &str) -> Result<String, ScrapeError>;

    /// select要素の選択肢一覧を読む
    async fn options(&self, control: &str) -> Result<Vec<SelectOption>, ScrapeError>;

    /// 要素をクリックする
    async fn click(&self, control: &str) -> Result<(), ScrapeError>;

    /// 入力欄にテキストを入力する
    async fn type_text(&self, control: &str, text: &str) -> Result<(), ScrapeError>;

    /// 要素が表示されているか
    async fn is_visible(&self, control: &str) -> Result<bool, ScrapeError>;

    /// 要素が無効化されているか
    async fn is_disabled(&self, control: &str) -> Result<bool, ScrapeError>;

    /// 要素の属性値を読む（属性なしはNone）
    async fn attribute(&self, control: &str, name: &str) -> Result<Option<String>, ScrapeError>;

    /// セッションを解放する
    async fn close(&mut self) -> Result<(), ScrapeError>;
}

/// スクレイパーのライフサイクル
#[async_trait]
pub trait Scraper: Send {
    /// ログイン実行（キャプチャゲートを含む）
    async fn login(&mut self) -> Result<(), ScrapeError>;

    /// 全コード・全国の抽出実行
    async fn extract(&mut self) -> Result<RunReport, ScrapeError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), ScrapeError>;

    /// 一括実行（login → extract → close）
    async fn execute(&mut self) -> Result<RunReport, ScrapeError> {
        self.login().await?;
        let report = self.extract().await?;
        self.close().await?;
        Ok(report)
    }
}
