//! 文档
//!
//! 工作表的规范文本加上元数据与宏。工作表本身只提供 `save`/`load`，
//! 元数据由文档维护。

use crate::error::FileError;
use chrono::{DateTime, Utc};
use geosheet_core::worksheet::{Macro, Worksheet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 文档元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// 写入文档的程序版本
    pub version: String,
    pub notes: String,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            author: String::new(),
            created: now,
            modified: now,
            version: env!("CARGO_PKG_VERSION").to_string(),
            notes: String::new(),
        }
    }
}

/// 文档
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub metadata: DocumentMetadata,
    /// 规范文本
    pub body: String,
    pub macros: BTreeMap<String, Macro>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以工作表的当前状态创建文档
    pub fn from_worksheet(sheet: &Worksheet) -> Self {
        let mut document = Self::new();
        document.capture(sheet);
        document
    }

    /// 用工作表的当前状态更新正文与宏，并刷新修改时间
    pub fn capture(&mut self, sheet: &Worksheet) {
        self.body = sheet.save();
        self.macros = sheet.macros().clone();
        self.metadata.modified = Utc::now();
        self.metadata.version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// 把文档载入工作表：重放正文、恢复宏、运行自动启动的宏
    ///
    /// `tolerant` 用于旧文档：名称冲突时自动改名，出错的行被跳过。
    /// 返回跳过的行数。
    pub fn apply(&self, sheet: &mut Worksheet, tolerant: bool) -> Result<usize, FileError> {
        let skipped = if tolerant {
            sheet.load_tolerant(&self.body)?
        } else {
            sheet.load(&self.body)?;
            0
        };
        sheet.set_macros(self.macros.clone());
        let started = sheet.run_autostart_macros();
        if started > 0 {
            tracing::info!("ran {} autostart macros", started);
            // 自动启动的宏不算用户修改
            sheet.mark_saved();
        }
        tracing::info!(
            "opened '{}' ({} entities)",
            self.metadata.title,
            sheet.registry().len()
        );
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_and_apply() {
        let mut sheet = Worksheet::new();
        sheet.execute("A = (1, 5)").unwrap();
        sheet.add_macro("hello", Macro::new("k = 1"));
        let mut document = Document::from_worksheet(&sheet);
        document.metadata.title = "demo".to_string();
        assert!(document.body.ends_with("A = Point(1, 5)"));

        let mut copy = Worksheet::new();
        assert_eq!(document.apply(&mut copy, false).unwrap(), 0);
        assert_eq!(copy.save(), sheet.save());
        assert!(copy.macros().contains_key("hello"));
        assert!(!copy.contains("k"));
    }

    #[test]
    fn test_autostart_macros_run_on_apply() {
        let mut document = Document::new();
        document.body = "A = Point(1, 5)".to_string();
        document.macros.insert(
            "init".to_string(),
            Macro {
                code: "k = 3".to_string(),
                autostart: true,
                advanced_mode: false,
            },
        );
        let mut sheet = Worksheet::new();
        document.apply(&mut sheet, false).unwrap();
        assert_eq!(sheet.execute("k").unwrap(), "3");
        assert!(!sheet.is_modified());
    }

    #[test]
    fn test_tolerant_apply() {
        let mut document = Document::new();
        document.body = "A = Point(1, 5)\nA = Segment(A, A)\nB = Point(0, 0)".to_string();
        let mut sheet = Worksheet::new();
        assert!(document.apply(&mut sheet, false).is_err());
        assert_eq!(document.apply(&mut sheet, true).unwrap(), 0);
        assert_eq!(sheet.registry().len(), 3);
    }
}
