//! 实体
//!
//! 依赖图的基本单元：名称、样式、创建顺序编号（层级编号）、
//! 父/子依赖边、过期标记与缓存的计算值。
//!
//! 实体之间只通过 `EntityId` 互相引用，名称在使用时经注册表解析，
//! 因此重命名不会影响依赖关系。

use crate::definition::{Category, Construction};
use crate::geometry::Shape;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 实体ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn null() -> Self {
        Self(0)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// 层级编号
///
/// 创建时分配一次，永不复用。顶层实体的 `minor` 为 0；
/// 随宿主一起创建的子部件沿用宿主的 `major`，以 `minor` 区分，
/// 这样规范文本中子部件总是紧跟在宿主之后。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HierarchyIndex {
    pub major: u64,
    pub minor: u32,
}

impl HierarchyIndex {
    pub fn new(major: u64) -> Self {
        Self { major, minor: 0 }
    }

    /// 第 `n` 个子部件的编号
    pub fn child(&self, n: usize) -> Self {
        Self {
            major: self.major,
            minor: self.minor + n as u32 + 1,
        }
    }
}

impl fmt::Display for HierarchyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// 样式值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for StyleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StyleValue::Bool(true) => write!(f, "True"),
            StyleValue::Bool(false) => write!(f, "False"),
            StyleValue::Number(n) => write!(f, "{}", n),
            StyleValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// 样式表（开放键集合）
pub type Style = BTreeMap<String, StyleValue>;

/// 常用样式键
pub mod style_keys {
    pub const VISIBLE: &str = "visible";
    pub const SHOW_LABEL: &str = "show_label";
    pub const LABEL: &str = "label";
    pub const COLOR: &str = "color";

    /// 旧文档使用的法文样式键
    const ALIASES: &[(&str, &str)] = &[
        ("afficher_nom", SHOW_LABEL),
        ("couleur", COLOR),
        ("legende", LABEL),
        ("label_visible", SHOW_LABEL),
    ];

    /// 样式键的规范形式
    pub fn canonical(key: &str) -> &str {
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map_or(key, |(_, canonical)| canonical)
    }

    /// 可通过属性赋值（`A.color = "red"`）修改的样式键
    pub fn is_known(key: &str) -> bool {
        matches!(canonical(key), VISIBLE | SHOW_LABEL | LABEL | COLOR)
    }
}

/// 工作表实体
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,

    /// 当前名称（唯一）
    pub name: String,

    pub hierarchy: HierarchyIndex,

    pub style: Style,

    /// 构造定义
    pub definition: Construction,

    /// 依赖的实体
    pub parents: BTreeSet<EntityId>,

    /// 依赖本实体的实体
    pub children: BTreeSet<EntityId>,

    /// 缓存值可能已失效
    pub stale: bool,

    /// 缓存值；`None` 表示“不存在”状态
    pub value: Option<Shape>,

    /// 最近一次计算失败的原因
    pub last_error: Option<String>,

    /// 子部件：`(宿主, 序号)`
    pub owner: Option<(EntityId, usize)>,

    /// 宿主拥有的子部件
    pub parts: Vec<EntityId>,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>, hierarchy: HierarchyIndex, definition: Construction) -> Self {
        Self {
            id,
            name: name.into(),
            hierarchy,
            style: Style::new(),
            parents: definition.parents(),
            definition,
            children: BTreeSet::new(),
            stale: true,
            value: None,
            last_error: None,
            owner: None,
            parts: Vec::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.definition.category()
    }

    /// 当前值是否可用
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self.style.get(style_keys::VISIBLE), Some(StyleValue::Bool(false)))
    }

    pub fn set_style(&mut self, key: impl Into<String>, value: StyleValue) {
        self.style.insert(key.into(), value);
    }

    /// 拥有子部件的实体不能被原地更新
    pub fn owns_parts(&self) -> bool {
        !self.parts.is_empty()
    }

    pub fn is_part(&self) -> bool {
        self.owner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_order() {
        let owner = HierarchyIndex::new(3);
        let first = owner.child(0);
        let last = owner.child(4);
        assert!(owner < first);
        assert!(first < last);
        assert!(last < HierarchyIndex::new(4));
        assert_eq!(last.to_string(), "3.5");
    }

    #[test]
    fn test_style_value_display() {
        assert_eq!(StyleValue::Bool(false).to_string(), "False");
        assert_eq!(StyleValue::Number(1.5).to_string(), "1.5");
        assert_eq!(StyleValue::Text("red".into()).to_string(), "\"red\"");
    }

    #[test]
    fn test_style_key_aliases() {
        assert_eq!(style_keys::canonical("afficher_nom"), style_keys::SHOW_LABEL);
        assert_eq!(style_keys::canonical("width"), "width");
        assert!(style_keys::is_known("couleur"));
        assert!(!style_keys::is_known("x"));
    }
}
