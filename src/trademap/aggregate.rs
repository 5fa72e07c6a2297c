//! ページ横断のデータセット集約

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::trademap::types::{Dataset, ParsedPage, ParsedRow};

/// 期間ラベルを(年, 月)に分解する。整列キーとして使う。
fn period_sort_key(label: &str) -> (i32, u32) {
    let year = label
        .get(0..4)
        .and_then(|y| y.parse::<i32>().ok())
        .unwrap_or(0);
    let month = label
        .split("-M")
        .nth(1)
        .and_then(|m| m.parse::<u32>().ok())
        .unwrap_or(0);
    (year, month)
}

/// 期間ラベルを(年, 月)で昇順に整列する
pub fn sort_period_headers(headers: &mut [String]) {
    headers.sort_by_key(|h| period_sort_key(h));
}

/// 解析済みページを1つのデータセットへ畳み込む。
///
/// 全履歴モードでは輸出者名でマージし、既存セルが欠損またはちょうど0の
/// 場合に限り新しい値で上書きする（ページの重複による二重計上を防ぐ）。
/// 単一ページモードでは行をそのまま連結する。
pub struct Accumulator {
    aggregate_all: bool,
    headers: HashSet<String>,
    /// 全履歴モード: 輸出者名→行（名前順で出力される）
    merged: BTreeMap<String, ParsedRow>,
    /// 単一ページモード: 出現順の行
    concatenated: Vec<ParsedRow>,
}

impl Accumulator {
    pub fn new(aggregate_all: bool) -> Self {
        Self {
            aggregate_all,
            headers: HashSet::new(),
            merged: BTreeMap::new(),
            concatenated: Vec::new(),
        }
    }

    pub fn add_page(&mut self, page: ParsedPage) {
        self.headers.extend(page.headers.iter().cloned());

        for row in page.rows {
            if self.aggregate_all {
                self.merge_row(row);
            } else {
                self.concatenated.push(row);
            }
        }
    }

    fn merge_row(&mut self, row: ParsedRow) {
        let entry = self
            .merged
            .entry(row.exporter.clone())
            .or_insert_with(|| ParsedRow::new(row.exporter.clone()));

        for (header, value) in row.values {
            if value.is_absent() {
                continue;
            }
            // 既に確定した非ゼロ値は後続ページで上書きしない
            let settled = entry
                .values
                .get(&header)
                .map(|existing| !existing.is_absent() && !existing.is_zero())
                .unwrap_or(false);
            if !settled {
                entry.values.insert(header, value);
            }
        }
    }

    /// 集約を確定する。行が1つもなければNone（「データなし」）。
    pub fn finish(self) -> Option<Dataset> {
        let rows: Vec<ParsedRow> = if self.aggregate_all {
            self.merged.into_values().collect()
        } else {
            self.concatenated
        };

        if rows.is_empty() {
            debug!("集約結果が空です");
            return None;
        }

        let mut headers: Vec<String> = self.headers.into_iter().collect();
        sort_period_headers(&mut headers);

        Some(Dataset { headers, rows })
    }
}
