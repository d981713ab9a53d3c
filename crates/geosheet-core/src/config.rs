//! 工作表配置
//!
//! 构造工作表时显式传入，不存在模块级可变状态。

use crate::definition::Category;
use crate::entity::Style;
use crate::error::{SheetError, SheetResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// 视窗参数（画布的可见范围与坐标网格）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    /// 可见范围 `(xmin, xmax, ymin, ymax)`
    pub window: (f64, f64, f64, f64),
    /// 网格间距 `(dx, dy)`
    pub grid: (f64, f64),
    pub show_axes: bool,
    pub show_grid: bool,
    /// 是否显示隐藏对象（以淡色绘制）
    pub show_hidden: bool,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            window: (-8.0, 8.0, -5.0, 5.0),
            grid: (1.0, 1.0),
            show_axes: true,
            show_grid: false,
            show_hidden: false,
        }
    }
}

impl ViewSettings {
    pub fn xmin(&self) -> f64 {
        self.window.0
    }

    pub fn xmax(&self) -> f64 {
        self.window.1
    }

    pub fn ymin(&self) -> f64 {
        self.window.2
    }

    pub fn ymax(&self) -> f64 {
        self.window.3
    }

    /// 每个网格单位对应的水平/垂直跨度
    pub fn dpx(&self) -> f64 {
        self.grid.0
    }

    pub fn dpy(&self) -> f64 {
        self.grid.1
    }

    /// 校验并设置可见范围
    pub fn set_window(&mut self, window: (f64, f64, f64, f64), tolerance: f64) -> SheetResult<()> {
        let (xmin, xmax, ymin, ymax) = window;
        if !(xmin.is_finite() && xmax.is_finite() && ymin.is_finite() && ymax.is_finite()) {
            return Err(SheetError::InvalidParameter(
                "window bounds must be finite".to_string(),
            ));
        }
        if xmax - xmin <= tolerance || ymax - ymin <= tolerance {
            return Err(SheetError::InvalidParameter(format!(
                "empty window ({}, {}, {}, {})",
                xmin, xmax, ymin, ymax
            )));
        }
        self.window = window;
        Ok(())
    }

    pub fn set_grid(&mut self, grid: (f64, f64)) -> SheetResult<()> {
        if grid.0 <= 0.0 || grid.1 <= 0.0 {
            return Err(SheetError::InvalidParameter(format!(
                "grid spacing must be positive, got ({}, {})",
                grid.0, grid.1
            )));
        }
        self.grid = grid;
        Ok(())
    }

    /// 以窗口中心为基准缩放
    pub fn zoom(&mut self, factor: f64, tolerance: f64) -> SheetResult<()> {
        if factor <= 0.0 || !factor.is_finite() {
            return Err(SheetError::InvalidParameter(format!(
                "zoom factor must be positive, got {}",
                factor
            )));
        }
        let (xmin, xmax, ymin, ymax) = self.window;
        let (cx, cy) = ((xmin + xmax) / 2.0, (ymin + ymax) / 2.0);
        let (hw, hh) = ((xmax - xmin) / (2.0 * factor), (ymax - ymin) / (2.0 * factor));
        self.set_window((cx - hw, cx + hw, cy - hh, cy + hh), tolerance)
    }
}

/// 工作表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorksheetConfig {
    /// 撤销/重做栈的最大长度
    pub history_capacity: usize,

    /// 新工作表的视窗参数
    pub view: ViewSettings,

    /// 各类别对象的默认样式
    pub style_defaults: BTreeMap<Category, Style>,

    /// 宏检查点的暂停时长（毫秒），0 表示不暂停
    pub pause_ms: u64,

    /// 数值容差
    pub tolerance: f64,

    /// 调试模式：记录每条规范化后的命令
    pub debug: bool,
}

impl Default for WorksheetConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            view: ViewSettings::default(),
            style_defaults: BTreeMap::new(),
            pause_ms: 0,
            tolerance: 1e-10,
            debug: false,
        }
    }
}

impl WorksheetConfig {
    /// 从 JSON 文本读取配置，缺失字段取默认值
    pub fn from_json_str(text: &str) -> SheetResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| SheetError::InvalidParameter(format!("invalid configuration: {}", e)))
    }

    /// 从 JSON 文件读取配置
    pub fn load(path: impl AsRef<Path>) -> SheetResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SheetError::InvalidParameter(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn pause_duration(&self) -> Option<Duration> {
        (self.pause_ms > 0).then(|| Duration::from_millis(self.pause_ms))
    }

    /// 某类别对象的默认样式
    pub fn style_for(&self, category: Category) -> Style {
        self.style_defaults.get(&category).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StyleValue;

    #[test]
    fn test_defaults() {
        let config = WorksheetConfig::default();
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.view.window, (-8.0, 8.0, -5.0, 5.0));
        assert_eq!(config.view.grid, (1.0, 1.0));
        assert!(config.pause_duration().is_none());
    }

    #[test]
    fn test_partial_json() {
        let config = WorksheetConfig::from_json_str(
            r#"{"history_capacity": 5, "style_defaults": {"Point": {"color": "red"}}}"#,
        )
        .unwrap();
        assert_eq!(config.history_capacity, 5);
        assert_eq!(config.view, ViewSettings::default());
        assert_eq!(
            config.style_for(Category::Point).get("color"),
            Some(&StyleValue::Text("red".to_string()))
        );
        assert!(config.style_for(Category::Line).is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geosheet.json");
        std::fs::write(&path, r#"{"pause_ms": 20, "debug": true}"#).unwrap();
        let config = WorksheetConfig::load(&path).unwrap();
        assert_eq!(config.pause_duration(), Some(Duration::from_millis(20)));
        assert!(config.debug);
    }

    #[test]
    fn test_window_validation() {
        let mut view = ViewSettings::default();
        assert!(view.set_window((1.0, 1.0, 0.0, 2.0), 1e-10).is_err());
        assert!(view.set_grid((0.0, 1.0)).is_err());
        view.zoom(2.0, 1e-10).unwrap();
        assert_eq!(view.window, (-4.0, 4.0, -2.5, 2.5));
    }
}
