//! 命令语言
//!
//! 受限的表达式/语句语法：词法分析 → 语法树 → 在工作表命名空间上求值。
//! 用户输入从不交给宿主语言的通用求值器。

pub mod ast;
pub mod builtins;
pub mod eval;
pub mod formula;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{BinaryOp, Expr, Stmt, Target, UnaryOp};
pub use eval::{Evaluator, Namespace};
pub use formula::{Formula, FormulaContext};
pub use parser::{parse_expression, parse_program};
pub use value::Value;
