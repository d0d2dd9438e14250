//! パッチ画像フォルダのスキャン
//!
//! ファイル名の先頭の数字をパッチIDとみなす（`{id}.jpg` または `{id}_*.jpg`）。

use crate::error::{InteractionError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct PatchFile {
    pub path: PathBuf,
    pub file_name: String,
    pub patch_id: Option<u64>,
}

/// パッチIDから画像ファイルを引いた結果
#[derive(Debug, Clone, PartialEq)]
pub enum PatchLookup {
    Found(PathBuf),
    Missing,
    Ambiguous(Vec<PathBuf>),
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

lazy_static! {
    static ref PATCH_ID_RE: Regex = Regex::new(r"^(\d+)(?:_|$)").unwrap();
    static ref NUMBER_RE: Regex = Regex::new(r"\d+").unwrap();
}

/// ファイル名（拡張子なし）からパッチIDを取り出す
pub fn parse_patch_id(stem: &str) -> Option<u64> {
    PATCH_ID_RE
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum NameSegment {
    Number(u64),
    Text(String),
}

fn natural_key(name: &str) -> Vec<NameSegment> {
    let mut segments = Vec::new();
    let mut last = 0;
    for m in NUMBER_RE.find_iter(name) {
        if m.start() > last {
            segments.push(NameSegment::Text(name[last..m.start()].to_string()));
        }
        // 桁あふれはテキストとして比較
        match m.as_str().parse::<u64>() {
            Ok(n) => segments.push(NameSegment::Number(n)),
            Err(_) => segments.push(NameSegment::Text(m.as_str().to_string())),
        }
        last = m.end();
    }
    if last < name.len() {
        segments.push(NameSegment::Text(name[last..].to_string()));
    }
    segments
}

/// 数字部分を数値として比較するファイル名順（`2.jpg` < `10.jpg`）
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b)).then_with(|| a.cmp(b))
}

fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext)
}

/// フォルダ直下のパッチ画像を数値順で列挙
pub fn scan_patch_folder(folder: &Path) -> Result<Vec<PatchFile>> {
    if !folder.exists() {
        return Err(InteractionError::FolderNotFound(folder.display().to_string()));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .max_depth(1)  // 直下のみ（再帰しない）
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let Some(ext) = path.extension() else {
            continue;
        };
        if !is_image_extension(&ext.to_string_lossy()) {
            continue;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let patch_id = path
            .file_stem()
            .and_then(|s| parse_patch_id(&s.to_string_lossy()));

        files.push(PatchFile {
            path: path.to_path_buf(),
            file_name,
            patch_id,
        });
    }

    files.sort_by(|a, b| natural_cmp(&a.file_name, &b.file_name));

    Ok(files)
}

/// パッチID → 画像ファイルの索引
#[derive(Debug, Default)]
pub struct PatchIndex {
    by_id: HashMap<u64, Vec<PathBuf>>,
}

impl PatchIndex {
    pub fn build(folder: &Path) -> Result<Self> {
        Ok(Self::from_files(&scan_patch_folder(folder)?))
    }

    pub fn from_files(files: &[PatchFile]) -> Self {
        let mut by_id: HashMap<u64, Vec<PathBuf>> = HashMap::new();
        for file in files {
            if let Some(id) = file.patch_id {
                by_id.entry(id).or_default().push(file.path.clone());
            }
        }
        Self { by_id }
    }

    /// 0件なら `Missing`、2件以上なら `Ambiguous`
    pub fn resolve(&self, patch_id: u64) -> PatchLookup {
        match self.by_id.get(&patch_id).map(Vec::as_slice) {
            None | Some([]) => PatchLookup::Missing,
            Some([path]) => PatchLookup::Found(path.clone()),
            Some(paths) => PatchLookup::Ambiguous(paths.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
