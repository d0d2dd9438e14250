//! COCO形式JSONの読み書き

use super::ensure_parent;
use crate::error::{InteractionError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, warn};
use xr_interaction_common::AnnotationSet;

/// JSONファイルを読み込み
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(InteractionError::FileNotFound(path.display().to_string()));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// JSONファイルを保存（整形出力、親ディレクトリは自動作成）
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// COCO形式のアノテーションファイルを読み込み
///
/// 参照整合性の問題（存在しない image_id / category_id）は警告として出力し、読み込み自体は続行する。
pub fn load_annotations(path: &Path) -> Result<AnnotationSet> {
    let set: AnnotationSet = load_json(path)?;

    let issues = set.integrity_issues();
    for issue in &issues {
        warn!("{}: {}", path.display(), issue);
    }

    debug!(
        "{}: images={} categories={} annotations={} issues={}",
        path.display(),
        set.images.len(),
        set.categories.len(),
        set.annotations.len(),
        issues.len()
    );

    Ok(set)
}
