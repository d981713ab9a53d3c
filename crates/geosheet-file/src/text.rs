//! 文本导出
//!
//! - 规范文本：只有正文，可直接粘贴到命令行或用 `load` 读回
//! - JSON：完整文档（元数据、正文、宏）

use crate::document::Document;
use crate::error::FileError;
use std::fs;
use std::path::Path;

/// 导出规范文本；标题写成注释行，载入时被忽略
pub fn export_text(document: &Document, path: &Path) -> Result<(), FileError> {
    let mut text = String::new();
    if !document.metadata.title.is_empty() {
        text.push_str(&format!("# {}\n", document.metadata.title));
    }
    text.push_str(&document.body);
    text.push('\n');
    fs::write(path, text)?;
    tracing::info!("Exported text to {}", path.display());
    Ok(())
}

/// 读取规范文本为新文档
pub fn import_text(path: &Path) -> Result<Document, FileError> {
    let text = fs::read_to_string(path)?;
    let mut document = Document::new();
    if let Some(title) = text.lines().next().and_then(|l| l.strip_prefix("# ")) {
        document.metadata.title = title.trim().to_string();
    }
    document.body = text.trim_end().to_string();
    Ok(document)
}

pub fn export_json(document: &Document, path: &Path) -> Result<(), FileError> {
    let json = serde_json::to_string_pretty(document)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn import_json(path: &Path) -> Result<Document, FileError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
