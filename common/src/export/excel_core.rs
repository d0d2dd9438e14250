//! 評価レポートのExcel生成（共通ライブラリ）
//!
//! シート構成:
//! - 指標: Accuracy / Precision / Recall / F1 / mAP / Top-k
//! - カテゴリ別: カテゴリごとの Precision / Recall / F1 / 件数
//! - 混同行列: 行=正解、列=予測

use crate::metrics::Metrics;
use rust_xlsxwriter::*;

const LABEL_COL_WIDTH: f64 = 24.0;
const VALUE_COL_WIDTH: f64 = 12.0;

/// 評価結果をExcelバッファに生成
///
/// # Arguments
/// * `metrics` - 評価結果
/// * `title` - 指標シート1行目に書くタイトル
pub fn generate_metrics_buffer(metrics: &Metrics, title: &str) -> Result<Vec<u8>, String> {
    let mut workbook = Workbook::new();

    let title_format = Format::new().set_bold().set_font_size(13.0);

    let header_format = Format::new()
        .set_bold()
        .set_font_size(10.0)
        .set_background_color(Color::RGB(0xF5F5F5))
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Hair)
        .set_border_color(Color::RGB(0xAAAAAA));

    let percent_format = Format::new()
        .set_num_format("0.00%")
        .set_border(FormatBorder::Hair)
        .set_border_color(Color::RGB(0xCCCCCC));

    let count_format = Format::new()
        .set_border(FormatBorder::Hair)
        .set_border_color(Color::RGB(0xCCCCCC));

    // 指標シート
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("指標")
            .map_err(|e| format!("シート名設定エラー: {}", e))?;
        sheet.set_column_width(0, LABEL_COL_WIDTH)
            .map_err(|e| format!("列幅設定エラー: {}", e))?;
        sheet.set_column_width(1, VALUE_COL_WIDTH)
            .map_err(|e| format!("列幅設定エラー: {}", e))?;

        sheet.write_string_with_format(0, 0, title, &title_format)
            .map_err(|e| format!("タイトル書き込みエラー: {}", e))?;

        let rows = metrics.summary_rows();

        sheet.write_string_with_format(2, 0, "指標", &header_format)
            .map_err(|e| format!("ヘッダ書き込みエラー: {}", e))?;
        sheet.write_string_with_format(2, 1, "値", &header_format)
            .map_err(|e| format!("ヘッダ書き込みエラー: {}", e))?;

        let mut row: u32 = 3;
        for (label, value) in &rows {
            sheet.write_string_with_format(row, 0, label, &count_format)
                .map_err(|e| format!("ラベル書き込みエラー: {}", e))?;
            sheet.write_number_with_format(row, 1, *value, &percent_format)
                .map_err(|e| format!("値書き込みエラー: {}", e))?;
            row += 1;
        }

        sheet.write_string_with_format(row, 0, "Samples", &count_format)
            .map_err(|e| format!("ラベル書き込みエラー: {}", e))?;
        sheet.write_number_with_format(row, 1, metrics.samples as f64, &count_format)
            .map_err(|e| format!("値書き込みエラー: {}", e))?;
    }

    // カテゴリ別シート
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("カテゴリ別")
            .map_err(|e| format!("シート名設定エラー: {}", e))?;
        sheet.set_column_width(0, LABEL_COL_WIDTH)
            .map_err(|e| format!("列幅設定エラー: {}", e))?;

        for (col, header) in ["Category", "Precision", "Recall", "F1-Score", "Support"].iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &header_format)
                .map_err(|e| format!("ヘッダ書き込みエラー: {}", e))?;
        }

        for (i, class) in metrics.per_class.iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string_with_format(row, 0, &class.label, &count_format)
                .map_err(|e| format!("ラベル書き込みエラー: {}", e))?;
            sheet.write_number_with_format(row, 1, class.precision, &percent_format)
                .map_err(|e| format!("値書き込みエラー: {}", e))?;
            sheet.write_number_with_format(row, 2, class.recall, &percent_format)
                .map_err(|e| format!("値書き込みエラー: {}", e))?;
            sheet.write_number_with_format(row, 3, class.f1, &percent_format)
                .map_err(|e| format!("値書き込みエラー: {}", e))?;
            sheet.write_number_with_format(row, 4, class.support as f64, &count_format)
                .map_err(|e| format!("値書き込みエラー: {}", e))?;
        }
    }

    // 混同行列シート
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("混同行列")
            .map_err(|e| format!("シート名設定エラー: {}", e))?;
        sheet.set_column_width(0, LABEL_COL_WIDTH)
            .map_err(|e| format!("列幅設定エラー: {}", e))?;

        let labels = &metrics.confusion.labels;
        for (i, label) in labels.iter().enumerate() {
            sheet.write_string_with_format(0, i as u16 + 1, label, &header_format)
                .map_err(|e| format!("ヘッダ書き込みエラー: {}", e))?;
            sheet.write_string_with_format(i as u32 + 1, 0, label, &header_format)
                .map_err(|e| format!("ヘッダ書き込みエラー: {}", e))?;
        }

        for (r, counts) in metrics.confusion.counts.iter().enumerate() {
            for (c, count) in counts.iter().enumerate() {
                sheet.write_number_with_format(r as u32 + 1, c as u16 + 1, *count as f64, &count_format)
                    .map_err(|e| format!("値書き込みエラー: {}", e))?;
            }
        }
    }

    // バッファに書き出し
    workbook.save_to_buffer()
        .map_err(|e| format!("Excel保存エラー: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::evaluate;

    #[test]
    fn test_generate_metrics_buffer() {
        let vocab = vec!["grab".to_string(), "shoot".to_string()];
        let truth = vec!["grab".to_string(), "shoot".to_string()];
        let pred = vec!["grab".to_string(), "grab".to_string()];
        let metrics = evaluate(&truth, &pred, &vocab);

        let buffer = generate_metrics_buffer(&metrics, "テスト評価").expect("Excel生成失敗");
        // xlsx は zip コンテナ
        assert!(buffer.len() > 100);
        assert_eq!(&buffer[0..2], b"PK");
    }
}
