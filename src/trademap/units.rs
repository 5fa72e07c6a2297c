//! 重量単位の正規化と数値セルの解析

use crate::trademap::types::CellValue;

/// 単位の別名と基準係数（kg換算）。
/// エクスポートのヘッダーに現れる表記ゆれをここで吸収する。
const WEIGHT_UNITS: &[(&str, f64)] = &[
    ("Kilograms", 1.0),
    ("Kilogram", 1.0),
    ("kilogram", 1.0),
    ("Kilogrammes", 1.0),
    ("kilogrammes", 1.0),
    ("Kgs", 1.0),
    ("kg", 1.0),
    ("KG", 1.0),
    ("Tons", 1000.0),
    ("Tonnes", 1000.0),
    ("tonnes", 1000.0),
    ("Ton", 1000.0),
    ("ton", 1000.0),
    ("MT", 1000.0),
    ("mt", 1000.0),
];

/// 別名からkg換算係数を引く
pub fn unit_factor(name: &str) -> Option<f64> {
    WEIGHT_UNITS
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, factor)| *factor)
}

/// 認識できる単位名の一覧
pub fn unit_names() -> impl Iterator<Item = &'static str> {
    WEIGHT_UNITS.iter().map(|(alias, _)| *alias)
}

/// 単位係数の比で値を変換する
pub fn convert(value: f64, source_factor: f64, target_factor: f64) -> f64 {
    value * source_factor / target_factor
}

/// 生のセル文字列を対象単位の数値に正規化する。
///
/// - `-`または空 → 欠損
/// - `(N)` → 負数（会計表記）
/// - 桁区切りカンマは除去。除去後も区切り記号が複数残る場合は
///   曖昧と見なして生文字列を保持する
/// - 解析に失敗したセルは生文字列のまま保持し、行全体は失敗させない
pub fn parse_cell(raw: &str, source_factor: f64, target_factor: f64) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return CellValue::Absent;
    }

    let mut value = trimmed.to_string();
    if value.starts_with('(') && value.ends_with(')') {
        value = format!("-{}", &value[1..value.len() - 1]);
    }

    let stripped: String = value.chars().filter(|c| *c != ',').collect();

    let punctuation = stripped.chars().filter(|c| *c == '.' || *c == ',').count();
    if punctuation > 1 {
        // 桁区切りか小数点か判別できない。推測せず原文を残す。
        return CellValue::Text(trimmed.to_string());
    }

    match stripped.parse::<f64>() {
        Ok(parsed) => {
            let converted = convert(parsed, source_factor, target_factor);
            if converted.fract() == 0.0 {
                CellValue::Int(converted as i64)
            } else {
                CellValue::Float(converted)
            }
        }
        Err(_) => CellValue::Text(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_for_known_aliases() {
        assert_eq!(unit_factor("Kilograms"), Some(1.0));
        assert_eq!(unit_factor("kg"), Some(1.0));
        assert_eq!(unit_factor("Tons"), Some(1000.0));
        assert_eq!(unit_factor("MT"), Some(1000.0));
        assert_eq!(unit_factor("Pounds"), None);
    }

    #[test]
    fn thousand_kilograms_is_one_ton() {
        assert_eq!(convert(1000.0, 1.0, 1000.0), 1.0);
        assert_eq!(convert(1.0, 1000.0, 1.0), 1000.0);
    }

    #[test]
    fn conversion_roundtrip_within_tolerance() {
        let original = 1234.567;
        let there = convert(original, 1000.0, 1.0);
        let back = convert(there, 1.0, 1000.0);
        assert!((back - original).abs() < 1e-9);
    }

    #[test]
    fn absent_cells() {
        assert_eq!(parse_cell("-", 1.0, 1.0), CellValue::Absent);
        assert_eq!(parse_cell("", 1.0, 1.0), CellValue::Absent);
        assert_eq!(parse_cell("   ", 1.0, 1.0), CellValue::Absent);
    }

    #[test]
    fn parenthesized_value_is_negative() {
        assert_eq!(parse_cell("(56)", 1000.0, 1.0), CellValue::Int(-56_000));
    }

    #[test]
    fn thousands_separators_are_stripped() {
        assert_eq!(parse_cell("1,234", 1000.0, 1.0), CellValue::Int(1_234_000));
        assert_eq!(parse_cell("12,345,678", 1.0, 1.0), CellValue::Int(12_345_678));
    }

    #[test]
    fn ambiguous_separators_keep_raw_string() {
        assert_eq!(
            parse_cell("1.234.567", 1.0, 1.0),
            CellValue::Text("1.234.567".into())
        );
    }

    #[test]
    fn unparseable_cell_keeps_raw_string() {
        assert_eq!(parse_cell("N/A", 1.0, 1.0), CellValue::Text("N/A".into()));
    }

    #[test]
    fn whole_conversions_emit_integers() {
        // 0.5トン → 500kg は整数
        assert_eq!(parse_cell("0.5", 1000.0, 1.0), CellValue::Int(500));
        // 1234kg → 1.234トン は小数
        assert_eq!(parse_cell("1234", 1.0, 1000.0), CellValue::Float(1.234));
    }
}
