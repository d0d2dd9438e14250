//! XRインタラクション認識パイプライン
//!
//! 注釈付き画像からパッチを切り出し、VLMで分類し、COCO形式への変換と評価を行う。

pub mod assembler;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod extractor;
pub mod logging;
pub mod provider;
pub mod scanner;
pub mod store;
