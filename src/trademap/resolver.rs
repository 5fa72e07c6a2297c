//! 分類コード階層の解決
//!
//! 設定された深度に応じて、基点コードから処理対象の具体コード群を求める。
//! 展開はセッションへの読み取り操作（コード選択→子の選択肢列挙）のみで行う。

use std::collections::{HashSet, VecDeque};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::ScrapeError;
use crate::trademap::controls;
use crate::trademap::ensure_active;
use crate::traits::SessionDriver;

/// 製品コードとして妥当な形式か（数字のみ）
pub fn is_valid_product_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())
}

/// 基点コードを選択し、ドロップダウンに現れる子コードを列挙する。
/// 取得の失敗は「子なし」として扱う（枝のスキップに相当）。
async fn fetch_subcodes<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    base: &str,
) -> Result<Vec<String>, ScrapeError> {
    ensure_active(token, "子コード取得前")?;
    debug!("基点コード {} の子コードを取得", base);

    if let Err(e) = driver.select(controls::PRODUCT_DROPDOWN, base).await {
        error!("コード {} の選択に失敗: {}", base, e);
        return Ok(Vec::new());
    }
    sleep(config.action_delay()).await;

    ensure_active(token, "子コード列挙前")?;
    let options = match driver.options(controls::PRODUCT_DROPDOWN).await {
        Ok(options) => options,
        Err(e) => {
            error!("コード {} の選択肢取得に失敗: {}", base, e);
            return Ok(Vec::new());
        }
    };

    let mut subcodes: Vec<String> = options
        .into_iter()
        .map(|opt| opt.value)
        .filter(|code| code.starts_with(base) && code != base && is_valid_product_code(code))
        .collect();
    subcodes.sort();

    debug!("コード {} の子コード: {} 件", base, subcodes.len());
    Ok(subcodes)
}

/// 基点コードを設定深度の具体コード群へ展開する。
///
/// 深度の受理条件を既に満たすコードはそのまま返す。満たさない場合は
/// 幅優先でドロップダウンを掘り下げ、受理長に達したコードを集める。
/// 空の結果はエラーではなく「枝をスキップせよ」の合図。
pub async fn resolve_codes<D: SessionDriver>(
    driver: &D,
    config: &RunConfig,
    token: &CancellationToken,
    base_code: &str,
) -> Result<Vec<String>, ScrapeError> {
    let depth = config.parse_depth;
    ensure_active(token, "コード解決前")?;

    if depth.accepts_length(base_code.len()) {
        debug!(
            "コード {} は深度 {} の条件を満たしています",
            base_code,
            depth.as_str()
        );
        return Ok(vec![base_code.to_string()]);
    }

    info!(
        "コード {} を深度 {} (目標{}桁) で展開します",
        base_code,
        depth.as_str(),
        depth.target_length()
    );

    // コード一覧を初期状態に戻してから掘り下げる
    driver
        .select(controls::PRODUCT_DROPDOWN, controls::ALL_PRODUCTS_VALUE)
        .await?;
    sleep(config.action_delay()).await;

    let mut queue: VecDeque<String> = VecDeque::from([base_code.to_string()]);
    let mut visited: HashSet<String> = HashSet::new();
    let mut final_codes: Vec<String> = Vec::new();

    while let Some(code) = queue.pop_front() {
        ensure_active(token, "コード展開中")?;
        if !visited.insert(code.clone()) {
            continue;
        }

        // 祖先を順に選択して現在の枝までリストを掘り下げる
        for prefix_len in [2usize, 4, 6] {
            if prefix_len > code.len() {
                break;
            }
            ensure_active(token, "コード展開中")?;
            let step_code = &code[..prefix_len];
            if let Err(e) = driver.select(controls::PRODUCT_DROPDOWN, step_code).await {
                error!("コード {} の選択に失敗: {}", step_code, e);
                continue;
            }
            sleep(config.action_delay()).await;
        }

        for sub in fetch_subcodes(driver, config, token, &code).await? {
            if depth.accepts_length(sub.len()) {
                final_codes.push(sub);
            } else if depth.expandable_length(sub.len()) && !visited.contains(&sub) {
                queue.push_back(sub);
            }
        }
    }

    final_codes.sort();
    final_codes.dedup();

    if final_codes.is_empty() {
        warn!(
            "コード {} に深度 {} の子コードが見つかりません。枝をスキップします",
            base_code,
            depth.as_str()
        );
    } else {
        info!(
            "コード {} の展開結果: {} 件 ({})",
            base_code,
            final_codes.len(),
            final_codes.join(", ")
        );
    }

    Ok(final_codes)
}
