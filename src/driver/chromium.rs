//! chromiumoxideによる`SessionDriver`実装
//!
//! コントロールの探索はID優先・CSSセレクタへのフォールバックで行い、
//! 操作はすべてページ内JavaScriptの評価として発行する。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ScrapeError;
use crate::traits::{SelectOption, SessionDriver};

/// 文字列をJavaScriptリテラルとして安全に埋め込む
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// ID優先・CSSセレクタフォールバックの要素探索スニペット。
/// 実行後、変数`el`に要素またはnullが入る。
fn js_lookup(control: &str) -> String {
    let quoted = js_string(control);
    format!(
        "var el = document.getElementById({q}); \
         if (!el) {{ try {{ el = document.querySelector({q}); }} catch (err) {{ el = null; }} }}",
        q = quoted
    )
}

#[derive(Debug, Deserialize)]
struct AttributeResult {
    value: Option<String>,
}

pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Arc<Page>>,
}

impl ChromiumSession {
    /// ブラウザを起動し、ダウンロード先を設定した新しいセッションを返す
    pub async fn launch(headless: bool, download_dir: &Path) -> Result<Self, ScrapeError> {
        info!("ブラウザを初期化中...");

        std::fs::create_dir_all(download_dir)?;
        let download_path = download_dir
            .canonicalize()
            .unwrap_or_else(|_| download_dir.to_path_buf());

        let mut builder = BrowserConfig::builder()
            .window_size(1280, 800)
            .arg("--disable-popup-blocking");

        if headless {
            builder = builder.arg("--headless=new");
        }

        let config = builder
            .build()
            .map_err(|e| ScrapeError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::BrowserInit(e.to_string()))?;

        // ダウンロード先を設定
        let download_params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_path.to_string_lossy().to_string())
            .build()
            .map_err(|e| ScrapeError::BrowserInit(format!("ダウンロード設定エラー: {}", e)))?;

        page.execute(download_params)
            .await
            .map_err(|e| ScrapeError::BrowserInit(format!("ダウンロード設定エラー: {}", e)))?;

        info!("ブラウザ初期化完了");
        Ok(Self {
            browser: Some(browser),
            page: Some(Arc::new(page)),
        })
    }

    fn page(&self) -> Result<&Arc<Page>, ScrapeError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScrapeError::BrowserInit("ブラウザが初期化されていません".into()))
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, ScrapeError> {
        let result = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| ScrapeError::Driver(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| ScrapeError::Driver(format!("評価結果の変換に失敗: {}", e)))
    }
}

#[async_trait]
impl SessionDriver for ChromiumSession {
    async fn navigate(&self, url: &str) -> Result<(), ScrapeError> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;
        debug!("ページ遷移完了: {}", url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ScrapeError> {
        self.eval("window.location.href").await
    }

    async fn page_source(&self) -> Result<String, ScrapeError> {
        self.page()?
            .content()
            .await
            .map_err(|e| ScrapeError::Driver(e.to_string()))
    }

    async fn select(&self, control: &str, value: &str) -> Result<String, ScrapeError> {
        let script = format!(
            r#"
            (function() {{
                {lookup}
                if (!el) return null;
                el.value = {value};
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return el.value;
            }})()
            "#,
            lookup = js_lookup(control),
            value = js_string(value),
        );

        self.eval::<Option<String>>(&script)
            .await?
            .ok_or_else(|| ScrapeError::ElementNotFound(control.to_string()))
    }

    async fn selected_value(&self, control: &str) -> Result<String, ScrapeError> {
        let script = format!(
            r#"
            (function() {{
                {lookup}
                return el ? el.value : null;
            }})()
            "#,
            lookup = js_lookup(control),
        );

        self.eval::<Option<String>>(&script)
            .await?
            .ok_or_else(|| ScrapeError::ElementNotFound(control.to_string()))
    }

    async fn options(&self, control: &str) -> Result<Vec<SelectOption>, ScrapeError> {
        // 配列はJSON文字列として受け取る（スカラ以外は値渡しが保証されない）
        let script = format!(
            r#"
            (function() {{
                {lookup}
                if (!el || !el.options) return null;
                var out = [];
                for (var i = 0; i < el.options.length; i++) {{
                    var opt = el.options[i];
                    out.push({{ value: opt.value, title: opt.title || opt.text || '' }});
                }}
                return JSON.stringify(out);
            }})()
            "#,
            lookup = js_lookup(control),
        );

        let json = self
            .eval::<Option<String>>(&script)
            .await?
            .ok_or_else(|| ScrapeError::ElementNotFound(control.to_string()))?;
        serde_json::from_str(&json)
            .map_err(|e| ScrapeError::Driver(format!("選択肢一覧の変換に失敗: {}", e)))
    }

    async fn click(&self, control: &str) -> Result<(), ScrapeError> {
        let script = format!(
            r#"
            (function() {{
                {lookup}
                if (!el) return false;
                el.click();
                return true;
            }})()
            "#,
            lookup = js_lookup(control),
        );

        if self.eval::<bool>(&script).await? {
            Ok(())
        } else {
            Err(ScrapeError::ElementNotFound(control.to_string()))
        }
    }

    async fn type_text(&self, control: &str, text: &str) -> Result<(), ScrapeError> {
        let script = format!(
            r#"
            (function() {{
                {lookup}
                if (!el) return false;
                el.value = {text};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            lookup = js_lookup(control),
            text = js_string(text),
        );

        if self.eval::<bool>(&script).await? {
            Ok(())
        } else {
            Err(ScrapeError::ElementNotFound(control.to_string()))
        }
    }

    async fn is_visible(&self, control: &str) -> Result<bool, ScrapeError> {
        let script = format!(
            r#"
            (function() {{
                {lookup}
                return !!(el && el.offsetWidth > 0 && el.offsetHeight > 0);
            }})()
            "#,
            lookup = js_lookup(control),
        );
        self.eval(&script).await
    }

    async fn is_disabled(&self, control: &str) -> Result<bool, ScrapeError> {
        let script = format!(
            r#"
            (function() {{
                {lookup}
                if (!el) return null;
                return el.disabled === true || el.getAttribute('disabled') !== null;
            }})()
            "#,
            lookup = js_lookup(control),
        );

        self.eval::<Option<bool>>(&script)
            .await?
            .ok_or_else(|| ScrapeError::ElementNotFound(control.to_string()))
    }

    async fn attribute(&self, control: &str, name: &str) -> Result<Option<String>, ScrapeError> {
        let script = format!(
            r#"
            (function() {{
                {lookup}
                if (!el) return null;
                return JSON.stringify({{ value: el.getAttribute({name}) }});
            }})()
            "#,
            lookup = js_lookup(control),
            name = js_string(name),
        );

        let json = self
            .eval::<Option<String>>(&script)
            .await?
            .ok_or_else(|| ScrapeError::ElementNotFound(control.to_string()))?;
        let result: AttributeResult = serde_json::from_str(&json)
            .map_err(|e| ScrapeError::Driver(format!("属性値の変換に失敗: {}", e)))?;
        Ok(result.value)
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        info!("ブラウザを終了中...");

        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("ブラウザのクローズに失敗: {}", e);
            }
        }

        info!("ブラウザ終了完了");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string("plain"), r#""plain""#);
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
        // CSSセレクタ中のシングルクォートはそのまま通る
        assert_eq!(
            js_string("button[value='login']"),
            r#""button[value='login']""#
        );
    }

    #[test]
    fn lookup_tries_id_then_selector() {
        let snippet = js_lookup("ctl00_Menu");
        assert!(snippet.contains(r#"document.getElementById("ctl00_Menu")"#));
        assert!(snippet.contains(r#"document.querySelector("ctl00_Menu")"#));
    }
}
