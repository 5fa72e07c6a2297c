//! Trade Map 抽出パイプライン
//!
//! 階層コードリゾルバ、セッション設定、ページネーション付きダウンロード、
//! 単位正規化、集約、xlsx出力、およびそれらを束ねるオーケストレーションを
//! 提供する。ブラウザ操作は`SessionDriver`境界の向こう側にある。

pub mod aggregate;
pub mod configure;
pub mod controls;
pub mod download;
pub mod excel;
pub mod parse;
pub mod resolver;
pub mod scraper;
pub mod types;
pub mod units;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ScrapeError;

pub use scraper::TradeMapScraper;
pub use types::{
    CaptchaSignal, CaptchaState, CellValue, Dataset, ExtractionTask, ParsedPage, ParsedRow,
    RunReport, RunState, RunStateHandle,
};

/// 停止要求を確認する。要求されていれば`Stopped`で短絡する。
/// 全コンポーネントが明示的な待機点の前後でこれを呼ぶ。
pub(crate) fn ensure_active(token: &CancellationToken, context: &str) -> Result<(), ScrapeError> {
    if token.is_cancelled() {
        info!("停止が要求されました: {}", context);
        return Err(ScrapeError::Stopped);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_active_passes_until_cancelled() {
        let token = CancellationToken::new();
        assert!(ensure_active(&token, "test").is_ok());

        token.cancel();
        let err = ensure_active(&token, "test").unwrap_err();
        assert!(err.is_stop());
    }
}
