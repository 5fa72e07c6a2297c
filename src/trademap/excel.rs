//! データセットのxlsx出力

use std::path::Path;

use rust_xlsxwriter::{
    ConditionalFormatFormula, Format, FormatAlign, FormatBorder, Workbook,
};
use tracing::{debug, info};

use crate::error::ScrapeError;
use crate::trademap::types::{CellValue, Dataset};

/// 輸出者列のヘッダーラベル
pub const EXPORTER_HEADER: &str = "Exporters";

/// 列幅に足すパディング
const WIDTH_PADDING: usize = 2;
/// ヘッダー行の高さ
const HEADER_ROW_HEIGHT: u16 = 30;

/// シートのアドレス上限（ヘッダー固定時は全域に罫線を引く）
const SHEET_MAX_ROW: u32 = 1_048_575;
const SHEET_MAX_COL: u16 = 16_383;

/// 各列の幅（最長の表示文字列＋パディング）
fn column_widths(dataset: &Dataset) -> Vec<usize> {
    let mut widths = Vec::with_capacity(dataset.headers.len() + 1);

    let exporter_width = dataset
        .rows
        .iter()
        .map(|row| row.exporter.chars().count())
        .chain(std::iter::once(EXPORTER_HEADER.len()))
        .max()
        .unwrap_or(0);
    widths.push(exporter_width + WIDTH_PADDING);

    for header in &dataset.headers {
        let width = dataset
            .rows
            .iter()
            .map(|row| {
                row.values
                    .get(header)
                    .map(|v| v.render().chars().count())
                    .unwrap_or(0)
            })
            .chain(std::iter::once(header.chars().count()))
            .max()
            .unwrap_or(0);
        widths.push(width + WIDTH_PADDING);
    }

    widths
}

/// データセットを1シートのxlsxとして書き出す。
/// シート名は国名。ヘッダー行は太字・中央寄せ・折り返し、
/// 輸出者列は左寄せ、数値列は右寄せ。
pub fn write_dataset(
    path: &Path,
    sheet_name: &str,
    dataset: &Dataset,
    freeze_header: bool,
) -> Result<(), ScrapeError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    let header_format = Format::new()
        .set_bold()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap()
        .set_border(FormatBorder::Thin);
    let left_format = Format::new().set_align(FormatAlign::Left);
    let right_format = Format::new().set_align(FormatAlign::Right);
    let border_format = Format::new().set_border(FormatBorder::Thin);

    worksheet.set_row_height(0, HEADER_ROW_HEIGHT)?;
    worksheet.write_string_with_format(0, 0, EXPORTER_HEADER, &header_format)?;
    for (i, header) in dataset.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, (i + 1) as u16, header, &header_format)?;
    }

    for (r, row) in dataset.rows.iter().enumerate() {
        let row_idx = (r + 1) as u32;
        worksheet.write_string_with_format(row_idx, 0, &row.exporter, &left_format)?;

        for (c, header) in dataset.headers.iter().enumerate() {
            let col = (c + 1) as u16;
            match row.values.get(header) {
                None | Some(CellValue::Absent) => {}
                Some(CellValue::Int(v)) => {
                    worksheet.write_number_with_format(row_idx, col, *v as f64, &right_format)?;
                }
                Some(CellValue::Float(v)) => {
                    worksheet.write_number_with_format(row_idx, col, *v, &right_format)?;
                }
                Some(CellValue::Text(s)) => {
                    worksheet.write_string_with_format(row_idx, col, s, &right_format)?;
                }
            }
        }
    }

    for (col, width) in column_widths(dataset).iter().enumerate() {
        worksheet.set_column_width(col as u16, *width as f64)?;
    }

    // 入力済み範囲への罫線
    let bordered = ConditionalFormatFormula::new()
        .set_rule("=TRUE()")
        .set_format(&border_format);
    let last_row = dataset.rows.len() as u32;
    let last_col = dataset.headers.len() as u16;
    worksheet.add_conditional_format(0, 0, last_row, last_col, &bordered)?;

    if freeze_header {
        worksheet.set_freeze_panes(1, 0)?;
        // スクロール時の見た目を揃えるため全アドレス域に罫線を広げる
        worksheet.add_conditional_format(0, 0, SHEET_MAX_ROW, SHEET_MAX_COL, &bordered)?;
        debug!("先頭行を固定し、全域に罫線を適用しました");
    }

    workbook.save(path)?;
    info!("ファイルを保存しました: {:?}", path);
    Ok(())
}
