//! GeoSheet 文档格式
//!
//! 支持：
//! - `.geos` 原生格式（MessagePack + Zstd）
//! - 规范文本导出/导入（`.txt`）
//! - JSON 导出（便于调试与比较）

pub mod document;
pub mod error;
pub mod native;
pub mod text;

pub use document::{Document, DocumentMetadata};
pub use error::FileError;
