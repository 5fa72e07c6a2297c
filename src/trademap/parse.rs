//! テキストエクスポート1ページ分の解析

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::config::MassUnit;
use crate::error::ScrapeError;
use crate::trademap::types::{ParsedPage, ParsedRow};
use crate::trademap::units;

/// 表示上のヘッダーラベルの最大長
const HEADER_MAX_LEN: usize = 15;
const HEADER_KEEP_LEN: usize = 12;

fn period_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4}-M\d{2})").expect("不変の正規表現"))
}

fn unit_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives: Vec<&str> = units::unit_names().collect();
        Regex::new(&format!(r",\s*({})\s*$", alternatives.join("|"))).expect("不変の正規表現")
    })
}

/// 長すぎるラベルを切り詰める
pub fn truncate_label(label: &str) -> String {
    if label.chars().count() > HEADER_MAX_LEN {
        let kept: String = label.chars().take(HEADER_KEEP_LEN).collect();
        format!("{}...", kept)
    } else {
        label.to_string()
    }
}

fn split_cells(line: &str) -> Vec<&str> {
    line.split('\t')
        .map(|part| part.trim_matches('"').trim())
        .collect()
}

/// カラムヘッダーから単位係数を特定する。
/// 末尾の`, <単位>`形式を優先し、なければ部分一致で探す。
fn column_unit(col: &str) -> Option<f64> {
    if let Some(caps) = unit_suffix_re().captures(col) {
        return units::unit_factor(caps.get(1)?.as_str());
    }
    units::unit_names()
        .find(|unit| col.contains(unit))
        .and_then(units::unit_factor)
}

/// タブ区切りエクスポートの全行をParsedRow群に変換する。
///
/// 先頭行はヘッダー。輸出者列以外の各カラムは認識可能な単位を必ず持ち
/// （欠けていればページ全体がデータ形式エラー）、`YYYY-Mmm`で始まらない
/// カラムは以降の全行から取り除かれる。
pub fn parse_export(content: &str, target_unit: MassUnit) -> Result<ParsedPage, ScrapeError> {
    let target_factor = target_unit.factor();
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());

    let Some(header_line) = lines.next() else {
        return Ok(ParsedPage {
            headers: Vec::new(),
            rows: Vec::new(),
        });
    };

    let header_parts = split_cells(header_line);

    // 輸出者列は常に有効
    let mut valid = vec![true];
    let mut headers: Vec<String> = Vec::new();
    let mut unit_factors: Vec<f64> = Vec::new();

    for col in header_parts.iter().skip(1) {
        if col.is_empty() {
            valid.push(false);
            continue;
        }

        let Some(factor) = column_unit(col) else {
            return Err(ScrapeError::DataFormat(format!(
                "ヘッダーに単位がありません: {}",
                col
            )));
        };

        match period_re().captures(col) {
            Some(caps) => {
                let label = caps.get(1).map(|m| m.as_str()).unwrap_or(col);
                headers.push(truncate_label(label));
                unit_factors.push(factor);
                valid.push(true);
            }
            None => {
                debug!("期間パターンに一致しないカラムを除外: {}", col);
                valid.push(false);
            }
        }
    }

    let mut rows = Vec::new();
    for line in lines {
        let parts = split_cells(line);
        if parts.len() < 2 || parts[0].is_empty() {
            continue;
        }

        let filtered: Vec<&str> = parts
            .iter()
            .enumerate()
            .filter(|(i, _)| valid.get(*i).copied().unwrap_or(false))
            .map(|(_, v)| *v)
            .collect();

        if filtered.is_empty() {
            continue;
        }

        let mut row = ParsedRow::new(filtered[0]);
        for ((header, factor), value) in headers
            .iter()
            .zip(unit_factors.iter())
            .zip(filtered.iter().skip(1))
        {
            row.values.insert(
                header.clone(),
                units::parse_cell(value, *factor, target_factor),
            );
        }
        rows.push(row);
    }

    debug!("解析完了: ヘッダー{}件, 行{}件", headers.len(), rows.len());
    Ok(ParsedPage { headers, rows })
}
