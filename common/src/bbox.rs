//! バウンディングボックス操作
//!
//! - COCO形式 `[x, y, width, height]` の保持
//! - 切り出し矩形への変換（面積ゼロ・画像範囲外は拒否）
//! - 許容誤差つきの近似一致判定

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

/// 近似一致のデフォルト許容誤差（幅・高さに対する割合）
pub const DEFAULT_BBOX_TOLERANCE: f64 = 0.1;

/// COCO形式のバウンディングボックス
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// 画像から切り出すピクセル矩形（検証済み）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 切り出しできないbboxの理由
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum BBoxIssue {
    #[error("面積ゼロのbbox ({width}x{height})")]
    ZeroArea { width: i64, height: i64 },

    #[error("原点が負のbbox ({x}, {y})")]
    NegativeOrigin { x: i64, y: i64 },

    #[error("画像範囲外のbbox: {x}+{width} > {image_width} または {y}+{height} > {image_height}")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        image_width: u32,
        image_height: u32,
    },
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// ビット表現（重複判定のハッシュキー用）
    pub fn to_bits(&self) -> [u64; 4] {
        [
            self.x.to_bits(),
            self.y.to_bits(),
            self.width.to_bits(),
            self.height.to_bits(),
        ]
    }

    /// 切り出し矩形に変換
    ///
    /// 各値は0方向へ切り捨ててから検証する。
    /// 面積ゼロ・負の原点・画像範囲外は `BBoxIssue` を返す。
    pub fn to_crop_rect(&self, image_width: u32, image_height: u32) -> std::result::Result<CropRect, BBoxIssue> {
        let x = self.x as i64;
        let y = self.y as i64;
        let width = self.width as i64;
        let height = self.height as i64;

        if width <= 0 || height <= 0 {
            return Err(BBoxIssue::ZeroArea { width, height });
        }
        if x < 0 || y < 0 {
            return Err(BBoxIssue::NegativeOrigin { x, y });
        }
        // 巨大な値は加算があふれるので範囲外として扱う
        let right_out = x.checked_add(width).map_or(true, |r| r > image_width as i64);
        let bottom_out = y.checked_add(height).map_or(true, |b| b > image_height as i64);
        if right_out || bottom_out {
            return Err(BBoxIssue::OutOfBounds {
                x,
                y,
                width,
                height,
                image_width,
                image_height,
            });
        }

        Ok(CropRect {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        })
    }

    /// 基準bboxに対する近似一致判定
    ///
    /// x・y・幅・高さの差を、基準（`reference`）の幅・高さに対する割合で比較し、
    /// 4つすべてが `tolerance` 以下なら一致とみなす（境界値を含む）。
    /// 基準の幅・高さが0以下の場合は常に不一致。
    pub fn is_similar_to(&self, reference: &BBox, tolerance: f64) -> bool {
        if reference.width <= 0.0 || reference.height <= 0.0 {
            return false;
        }

        let x_ratio = (self.x - reference.x).abs() / reference.width;
        let y_ratio = (self.y - reference.y).abs() / reference.height;
        let w_ratio = (self.width - reference.width).abs() / reference.width;
        let h_ratio = (self.height - reference.height).abs() / reference.height;

        x_ratio <= tolerance && y_ratio <= tolerance && w_ratio <= tolerance && h_ratio <= tolerance
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for BBox {
    type Err = Error;

    /// `[x, y, w, h]` 形式の文字列をパース
    fn from_str(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| Error::Parse(format!("bbox形式が不正: {}", s)))?;

        let values = inner
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|e| Error::Parse(format!("bbox値が不正 '{}': {}", v.trim(), e)))
            })
            .collect::<Result<Vec<f64>>>()?;

        match values.as_slice() {
            [x, y, w, h] => Ok(BBox::new(*x, *y, *w, *h)),
            _ => Err(Error::Parse(format!(
                "bboxの要素数が不正 ({}件): {}",
                values.len(),
                s
            ))),
        }
    }
}

/// CSVセル用: bboxを `[x, y, w, h]` 文字列として読み書きする
pub mod as_list_string {
    use super::BBox;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bbox: &BBox, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(bbox)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BBox, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
