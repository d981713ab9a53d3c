//! 命令解释器
//!
//! 两个阶段：
//! 1. 规范化（[`InputParser`]）并检查禁用关键字
//! 2. 先按表达式求值；语法上不是表达式时按语句（赋值、`del`、多行宏）执行
//!
//! 结果格式化后返回给调用者显示。

use crate::entity::{style_keys, EntityId, StyleValue};
use crate::error::{SheetError, SheetResult};
use crate::expr::ast::format_number;
use crate::expr::eval::{Evaluator, Namespace};
use crate::expr::parser::{parse_expression, parse_program};
use crate::expr::value::Value;
use crate::input_parser::InputParser;
use crate::registry::Registry;
use once_cell::sync::Lazy;
use regex::Regex;

/// 命令中不允许出现的关键字
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "import", "exec", "eval", "compile", "open", "lambda", "class", "def", "global", "nonlocal",
    "yield", "with", "while", "raise", "try", "except", "globals", "locals", "getattr", "setattr",
];

/// 语句执行成功时的提示
pub const EXECUTED: &str = "Command executed.";

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).expect("valid string pattern"));

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid word pattern"));

/// 检查字符串字面量之外的禁用关键字与 `__xxx__` 形式的名称
pub fn check_forbidden(command: &str) -> SheetResult<()> {
    let code = STRING_LITERAL.replace_all(command, "\"\"");
    let mut found: Vec<String> = Vec::new();
    for word in WORD.find_iter(&code).map(|m| m.as_str()) {
        if FORBIDDEN_KEYWORDS.contains(&word) {
            found.push(word.to_string());
        } else if word.starts_with("__") || word.ends_with("__") {
            found.push("__".to_string());
        }
    }
    if found.is_empty() {
        return Ok(());
    }
    found.sort();
    found.dedup();
    Err(SheetError::Forbidden(found))
}

/// 执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 表达式的值
    Value(Value),
    /// 语句已执行
    Executed,
}

/// 命令解释器
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    /// 以 info 级别记录每条规范化后的命令
    debug: bool,
}

impl Interpreter {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// 规范化并检查命令；`raw` 为 true 时跳过简写改写
    pub fn prepare(&self, command: &str, raw: bool) -> SheetResult<String> {
        let normalized = if raw {
            command.trim_end().to_string()
        } else {
            InputParser::normalize(command)
        };
        if self.debug {
            tracing::info!("command: {:?} -> {:?}", command, normalized);
        } else {
            tracing::debug!("command: {:?} -> {:?}", command, normalized);
        }
        check_forbidden(&normalized)?;
        Ok(normalized)
    }

    /// 在命名空间上执行已规范化的命令
    pub fn run<N: Namespace + ?Sized>(ns: &mut N, source: &str) -> SheetResult<Outcome> {
        match parse_expression(source) {
            Ok(expr) => Evaluator::new(ns).eval(&expr).map(Outcome::Value),
            Err(SheetError::Syntax { .. }) => {
                let program = parse_program(source)?;
                Evaluator::new(ns).run(&program)?;
                Ok(Outcome::Executed)
            }
            Err(err) => Err(err),
        }
    }
}

/// 结果的显示文本
pub fn display_outcome(outcome: &Outcome, registry: &Registry) -> String {
    match outcome {
        Outcome::Value(value) => display(value, registry),
        Outcome::Executed => EXECUTED.to_string(),
    }
}

/// 值的显示文本
///
/// 变量显示其数值（有标签时显示为 `"标签" : 值`），
/// 序列中的实体按名称显示。
pub fn display(value: &Value, registry: &Registry) -> String {
    match value {
        Value::None => String::new(),
        Value::Entity(id) => {
            let Some(entity) = registry.entity(*id) else {
                return format!("#{}", id.0);
            };
            match registry.plain_value(*id) {
                Some(plain) => {
                    let shown = display(&plain, registry);
                    match entity.style.get(style_keys::LABEL) {
                        Some(StyleValue::Text(label)) if !label.is_empty() => {
                            format!("{:?} : {}", label, shown)
                        }
                        _ => shown,
                    }
                }
                None if !entity.exists() => format!("{} (does not exist)", entity.name),
                None => {
                    let names = |id: EntityId| {
                        registry
                            .entity(id)
                            .map_or_else(|| format!("#{}", id.0), |e| e.name.clone())
                    };
                    entity.definition.render(&names)
                }
            }
        }
        Value::Tuple(items) => format!("({})", display_items(items, registry)),
        Value::List(items) | Value::Lazy(items) => format!("[{}]", display_items(items, registry)),
        other => display_plain(other),
    }
}

fn display_items(items: &[Value], registry: &Registry) -> String {
    items
        .iter()
        .map(|item| match item {
            Value::Entity(id) => registry
                .entity(*id)
                .map_or_else(|| format!("#{}", id.0), |e| e.name.clone()),
            other => display(other, registry),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_plain(value: &Value) -> String {
    match value {
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => format_number(*n),
        Value::Complex(re, im) => {
            let sign = if *im < 0.0 { '-' } else { '+' };
            format!("({}{}{}j)", format_number(*re), sign, format_number(im.abs()))
        }
        Value::Text(s) => s.clone(),
        Value::Vector(x, y) => format!("({}, {})", format_number(*x), format_number(*y)),
        Value::Constructor(c) => c.name().to_string(),
        Value::Builtin(b) => b.name().to_string(),
        Value::Method(_, method) => format!("<method {}>", method),
        Value::New(construction) => construction.render(&|id| format!("#{}", id.0)),
        _ => value.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_keywords() {
        assert!(check_forbidden("A = Point(1, 2)").is_ok());
        assert!(check_forbidden("t1 = Text(\"import this\")").is_ok());
        match check_forbidden("import os; eval(x)") {
            Err(SheetError::Forbidden(words)) => assert_eq!(words, vec!["eval", "import"]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(check_forbidden("A.__class__"), Err(SheetError::Forbidden(_))));
        // 修饰符转写产生的 `__` 交给命名规则处理
        assert!(check_forbidden("C__prime = _").is_ok());
        // 标识符的一部分不算
        assert!(check_forbidden("imported = 1").is_ok());
    }

    #[test]
    fn test_prepare_normalizes() {
        let interpreter = Interpreter::new(false);
        assert_eq!(interpreter.prepare("(A B)", false).unwrap(), "Line(A, B)");
        assert_eq!(interpreter.prepare("(A B)", true).unwrap(), "(A B)");
        assert!(interpreter.prepare("while True: pass", false).is_err());
    }

    #[test]
    fn test_display_values() {
        let registry = Registry::new();
        assert_eq!(display(&Value::Number(2.5), &registry), "2.5");
        assert_eq!(display(&Value::Complex(1.0, -2.0), &registry), "(1-2j)");
        assert_eq!(
            display(&Value::List(vec![Value::Number(1.0), Value::Text("a".into())]), &registry),
            "[1, a]"
        );
        assert_eq!(display_outcome(&Outcome::Executed, &registry), EXECUTED);
    }

    #[test]
    fn test_display_entities() {
        let mut registry = Registry::new();
        let k = registry.set("k", Value::Number(3.0)).unwrap();
        let a = registry
            .set("A", Value::Tuple(vec![Value::Number(1.0), Value::Number(5.0)]))
            .unwrap();
        assert_eq!(display(&Value::Entity(k), &registry), "3");
        assert_eq!(display(&Value::Entity(a), &registry), "Point(1, 5)");
        assert_eq!(
            display(&Value::Tuple(vec![Value::Entity(a), Value::Entity(k)]), &registry),
            "(A, k)"
        );

        registry
            .set_style(k, [("label".to_string(), StyleValue::Text("speed".into()))].into())
            .unwrap();
        assert_eq!(display(&Value::Entity(k), &registry), "\"speed\" : 3");
    }
}
