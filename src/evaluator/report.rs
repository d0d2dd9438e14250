//! 評価レポートの出力（テキスト・CSV・Excel）

use crate::error::{InteractionError, Result};
use crate::store::ensure_parent;
use csv::WriterBuilder;
use std::path::Path;
use xr_interaction_common::export::excel_core;
use xr_interaction_common::{ConfusionMatrix, Metrics};

/// `名前: 値`（小数4桁）のテキストレポート
pub fn format_text_report(metrics: &Metrics, title: &str) -> String {
    let mut lines = vec![
        format!("# {}", title),
        format!("# {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")),
        format!("Samples: {}", metrics.samples),
    ];
    for (name, value) in metrics.summary_rows() {
        lines.push(format!("{}: {:.4}", name, value));
    }
    lines.push(String::new());
    lines.join("\n")
}

pub fn write_text_report(path: &Path, metrics: &Metrics, title: &str) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, format_text_report(metrics, title))?;
    Ok(())
}

/// 指標CSV（値はパーセント、小数2桁）
pub fn write_metrics_csv(path: &Path, metrics: &Metrics) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(["Metric", "Value (%)"])?;
    for (name, value) in metrics.summary_rows() {
        writer.write_record([name, format!("{:.2}", value * 100.0)])?;
    }
    writer.flush()?;
    Ok(())
}

/// 混同行列CSV（1行目・1列目がラベル）
pub fn write_confusion_csv(path: &Path, confusion: &ConfusionMatrix) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new().flexible(false).from_path(path)?;

    let header = std::iter::once(String::new()).chain(confusion.labels.iter().cloned());
    writer.write_record(header)?;
    for (label, counts) in confusion.labels.iter().zip(&confusion.counts) {
        let record = std::iter::once(label.clone()).chain(counts.iter().map(|c| c.to_string()));
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Excelレポート（指標・カテゴリ別・混同行列の3シート）
pub fn write_excel_report(path: &Path, metrics: &Metrics, title: &str) -> Result<()> {
    ensure_parent(path)?;
    let buffer = excel_core::generate_metrics_buffer(metrics, title).map_err(InteractionError::Excel)?;
    std::fs::write(path, buffer)?;
    Ok(())
}
