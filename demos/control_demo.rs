use std::time::Duration;

use tradestat_service::{BotStatus, Controller, RunConfig};

#[tokio::main]
async fn main() {
    // ログ設定
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let username =
        std::env::var("TRADEMAP_USERNAME").expect("TRADEMAP_USERNAME environment variable not set");
    let password =
        std::env::var("TRADEMAP_PASSWORD").expect("TRADEMAP_PASSWORD environment variable not set");

    let config = RunConfig::new(&username, &password)
        .with_product_codes(vec!["5201".into()])
        .with_countries(vec!["Fiji".into()]);

    let controller = Controller::new();

    println!("=== Controller Test ===");
    println!("start: {:?}", controller.start(config).await);

    // HTTP層の代わりに状態とキャプチャシグナルをポーリングしてみる
    while controller.status() != BotStatus::Stopped {
        let captcha = controller.captcha_status();
        if captcha.active {
            println!(
                "キャプチャ待機中: {}",
                captcha.message.unwrap_or_default()
            );
        } else {
            println!("state: {:?}", controller.run_state());
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    println!("result: {:?}", controller.last_result());
    if let Some(error) = controller.last_error() {
        println!("error: {}", error);
    }
}
