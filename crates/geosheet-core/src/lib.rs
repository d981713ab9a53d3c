//! GeoSheet 工作表引擎
//!
//! 命名的数学与几何对象组成的工作表，用简短的文本命令驱动。
//!
//! # 架构设计
//!
//! - `Registry`: 名称 → 实体，维护依赖图并在修改后重新计算
//! - `Interpreter`: 命令规范化、禁用关键字检查、表达式求值
//! - `History`: 整张工作表的规范文本快照，支持撤销/重做
//! - `Worksheet`: 协调以上三者，每条命令之后归档历史并刷新标记
//!
//! # 示例
//!
//! ```rust
//! use geosheet_core::prelude::*;
//!
//! let mut sheet = Worksheet::new();
//! sheet.execute("A = (1, 5)").unwrap();
//! sheet.execute("B = (4, 1)").unwrap();
//! sheet.execute("s = [A B]").unwrap();
//! assert_eq!(sheet.execute("s.length").unwrap(), "5");
//! ```

pub mod config;
pub mod constructors;
pub mod definition;
pub mod entity;
pub mod equation;
pub mod error;
pub mod expr;
pub mod geometry;
pub mod graph;
pub mod history;
pub mod input_parser;
pub mod interpreter;
pub mod naming;
pub mod registry;
pub mod worker;
pub mod worksheet;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::config::{ViewSettings, WorksheetConfig};
    pub use crate::definition::{Category, Construction, Constructor};
    pub use crate::entity::{Entity, EntityId, Style, StyleValue};
    pub use crate::error::{NameIssue, SheetError, SheetResult};
    pub use crate::expr::value::Value;
    pub use crate::geometry::{Point2, Shape, Vector2};
    pub use crate::history::History;
    pub use crate::input_parser::InputParser;
    pub use crate::interpreter::Interpreter;
    pub use crate::registry::Registry;
    pub use crate::worker::WorksheetWorker;
    pub use crate::worksheet::{CommandEvent, Drawable, Macro, StopHandle, Worksheet};
}
