//! 進捗カーソル
//!
//! 次に処理する項目のインデックスを整数1つとしてファイルに保存する。
//! 成功・失敗にかかわらず1件ごとに進めるので、失敗し続ける項目で再開が止まることはない。

use crate::error::Result;
use crate::store::ensure_parent;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ProgressCursor {
    path: PathBuf,
    next: usize,
}

impl ProgressCursor {
    /// カーソルファイルを読み込み
    ///
    /// ファイルがない・壊れている場合は0から始める。
    pub fn load(path: &Path) -> Self {
        let next = match std::fs::read_to_string(path) {
            Ok(content) => match content.trim().parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    warn!("進捗ファイルが不正なため0から再開します: {}", path.display());
                    0
                }
            },
            Err(_) => 0,
        };

        Self {
            path: path.to_path_buf(),
            next,
        }
    }

    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// カーソルを設定して保存
    pub fn set(&mut self, next: usize) -> Result<()> {
        self.next = next;
        self.save()
    }

    pub fn advance(&mut self) -> Result<()> {
        self.set(self.next + 1)
    }

    /// 一時ファイルに書いてから置き換える
    pub fn save(&self) -> Result<()> {
        ensure_parent(&self.path)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, self.next.to_string())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// カーソルファイルを削除（存在しなければ `false`）
    pub fn clear(path: &Path) -> Result<bool> {
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
