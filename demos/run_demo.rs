use tower::Service;
use tradestat_service::{MassUnit, ParseDepth, RunConfig, RunRequest, ScraperService};

#[tokio::main]
async fn main() {
    // ログ設定
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // 環境変数から認証情報を取得
    let username =
        std::env::var("TRADEMAP_USERNAME").expect("TRADEMAP_USERNAME environment variable not set");
    let password =
        std::env::var("TRADEMAP_PASSWORD").expect("TRADEMAP_PASSWORD environment variable not set");

    let config = RunConfig::new(&username, &password)
        .with_product_codes(vec!["52".into()])
        .with_countries(vec!["Fiji".into()])
        .with_quantity_unit(MassUnit::Kilograms)
        .with_parse_depth(ParseDepth::Level2)
        .with_headless(false); // キャプチャを手で解けるよう表示モード

    let mut service = ScraperService::new();

    println!("=== Trade Map Scraper Test ===");

    match service.call(RunRequest::new(config)).await {
        Ok(summary) => {
            println!("成功! 出力先: {:?}", summary.results_dir);
            if !summary.failed_codes.is_empty() {
                println!("失敗したコード: {}", summary.failed_codes.join(", "));
            }
        }
        Err(e) => {
            eprintln!("エラー: {}", e);
        }
    }
}
