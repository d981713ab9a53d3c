//! 运行时值

use super::ast::format_number;
use super::builtins::Builtin;
use crate::definition::{Constructor, Construction};
use crate::entity::EntityId;
use crate::error::{SheetError, SheetResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    Complex(f64, f64),
    Text(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    /// 推导式产生的序列，赋给 `_` 时逐个创建实体
    Lazy(Vec<Value>),
    /// 自由向量值（`A>B`）
    Vector(f64, f64),
    /// 工作表中的实体
    Entity(EntityId),
    /// 构造器本身（未调用）
    Constructor(Constructor),
    Builtin(Builtin),
    /// 实体方法（已绑定到实体）
    Method(EntityId, String),
    /// 尚未登记的构造结果
    New(Box<Construction>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Complex(..) => "complex",
            Value::Text(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Lazy(_) => "generator",
            Value::Vector(..) => "vector",
            Value::Entity(_) => "entity",
            Value::Constructor(_) => "constructor",
            Value::Builtin(_) => "builtin",
            Value::Method(..) => "method",
            Value::New(_) => "construction",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Complex(re, im) => *re != 0.0 || *im != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Tuple(v) | Value::List(v) | Value::Lazy(v) => !v.is_empty(),
            _ => true,
        }
    }

    /// 可迭代值的元素
    pub fn into_items(self) -> SheetResult<Vec<Value>> {
        match self {
            Value::Tuple(v) | Value::List(v) | Value::Lazy(v) => Ok(v),
            Value::Text(s) => Ok(s.chars().map(|c| Value::Text(c.to_string())).collect()),
            other => Err(SheetError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// 不依赖工作表的显示形式（实体以编号显示）
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Number(n) => format_number(*n),
            Value::Complex(re, im) => {
                if *re == 0.0 {
                    format!("{}j", format_number(*im))
                } else if *im < 0.0 {
                    format!("({}-{}j)", format_number(*re), format_number(-im))
                } else {
                    format!("({}+{}j)", format_number(*re), format_number(*im))
                }
            }
            Value::Text(s) => format!("{:?}", s),
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.repr()).collect();
                if items.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Value::List(items) | Value::Lazy(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.repr()).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Vector(x, y) => format!("Vector({}, {})", format_number(*x), format_number(*y)),
            Value::Entity(id) => format!("<entity {}>", id.0),
            Value::Constructor(c) => format!("<constructor {}>", c.name()),
            Value::Builtin(b) => format!("<builtin {}>", b.name()),
            Value::Method(_, name) => format!("<method {}>", name),
            Value::New(c) => format!("<new {}>", c.constructor.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr() {
        assert_eq!(Value::Number(13.5).repr(), "13.5");
        assert_eq!(Value::Complex(1.0, -2.0).repr(), "(1-2j)");
        assert_eq!(
            Value::Tuple(vec![Value::Number(1.0), Value::Text("a".into())]).repr(),
            "(1, \"a\")"
        );
    }

    #[test]
    fn test_iteration() {
        assert_eq!(Value::List(vec![Value::None]).into_items().unwrap().len(), 1);
        assert!(Value::Number(1.0).into_items().is_err());
        assert!(!Value::Tuple(vec![]).truthy());
    }
}
