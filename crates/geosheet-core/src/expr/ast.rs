//! 表达式语法树

use crate::entity::EntityId;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// 结合优先级，数值越大结合越紧
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
            BinaryOp::Pow => 8,
        }
    }
}

const PREC_NOT: u8 = 3;
const PREC_UNARY: u8 = 7;
const PREC_POSTFIX: u8 = 9;
const PREC_ATOM: u8 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Imaginary(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    /// 已绑定到实体的名称（存储在公式中，重命名后仍然有效）
    Ref(EntityId),
    Attribute {
        target: Box<Expr>,
        name: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    /// `(expr for var in iter)`，`lazy` 为 false 时是列表推导式
    Comprehension {
        element: Box<Expr>,
        var: String,
        iter: Box<Expr>,
        lazy: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// 赋值目标
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Attribute { target: Expr, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign { target: Target, value: Expr },
    Delete(Vec<Expr>),
    For { var: String, iter: Expr, body: Vec<Stmt> },
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Number(n) if *n < 0.0 => PREC_UNARY,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { op: UnaryOp::Not, .. } => PREC_NOT,
            Expr::Unary { .. } => PREC_UNARY,
            Expr::Attribute { .. } | Expr::Call { .. } | Expr::Index { .. } => PREC_POSTFIX,
            _ => PREC_ATOM,
        }
    }

    /// 引用到的实体
    pub fn references(&self) -> BTreeSet<EntityId> {
        let mut out = BTreeSet::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut BTreeSet<EntityId>) {
        match self {
            Expr::Ref(id) => {
                out.insert(*id);
            }
            Expr::Attribute { target, .. } => target.collect_refs(out),
            Expr::Call { func, args, kwargs } => {
                func.collect_refs(out);
                args.iter().for_each(|a| a.collect_refs(out));
                kwargs.iter().for_each(|(_, a)| a.collect_refs(out));
            }
            Expr::Index { target, index } => {
                target.collect_refs(out);
                index.collect_refs(out);
            }
            Expr::Tuple(items) | Expr::List(items) => items.iter().for_each(|a| a.collect_refs(out)),
            Expr::Comprehension { element, iter, .. } => {
                element.collect_refs(out);
                iter.collect_refs(out);
            }
            Expr::Unary { operand, .. } => operand.collect_refs(out),
            Expr::Binary { left, right, .. } => {
                left.collect_refs(out);
                right.collect_refs(out);
            }
            _ => {}
        }
    }

    /// 把名称替换为实体引用；`resolve` 返回 `None` 的名称保持不变
    pub fn bind(self, resolve: &dyn Fn(&str) -> Option<EntityId>) -> Expr {
        let rec = |e: Box<Expr>| Box::new(e.bind(resolve));
        match self {
            Expr::Name(name) => match resolve(&name) {
                Some(id) => Expr::Ref(id),
                None => Expr::Name(name),
            },
            Expr::Attribute { target, name } => Expr::Attribute {
                target: rec(target),
                name,
            },
            Expr::Call { func, args, kwargs } => Expr::Call {
                func: rec(func),
                args: args.into_iter().map(|a| a.bind(resolve)).collect(),
                kwargs: kwargs.into_iter().map(|(k, a)| (k, a.bind(resolve))).collect(),
            },
            Expr::Index { target, index } => Expr::Index {
                target: rec(target),
                index: rec(index),
            },
            Expr::Tuple(items) => Expr::Tuple(items.into_iter().map(|a| a.bind(resolve)).collect()),
            Expr::List(items) => Expr::List(items.into_iter().map(|a| a.bind(resolve)).collect()),
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: rec(operand),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: rec(left),
                right: rec(right),
            },
            other => other,
        }
    }

    /// 还原为源码文本，实体引用按当前名称输出
    pub fn render(&self, names: &dyn Fn(EntityId) -> String) -> String {
        let mut out = String::new();
        self.write(&mut out, names);
        out
    }

    fn write_child(&self, out: &mut String, names: &dyn Fn(EntityId) -> String, min_prec: u8) {
        if self.precedence() < min_prec {
            out.push('(');
            self.write(out, names);
            out.push(')');
        } else {
            self.write(out, names);
        }
    }

    fn write_list(items: &[Expr], out: &mut String, names: &dyn Fn(EntityId) -> String) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            item.write(out, names);
        }
    }

    fn write(&self, out: &mut String, names: &dyn Fn(EntityId) -> String) {
        match self {
            Expr::Number(n) => out.push_str(&format_number(*n)),
            Expr::Imaginary(n) => {
                out.push_str(&format_number(*n));
                out.push('j');
            }
            Expr::Str(s) => out.push_str(&format!("{:?}", s)),
            Expr::Bool(true) => out.push_str("True"),
            Expr::Bool(false) => out.push_str("False"),
            Expr::None => out.push_str("None"),
            Expr::Name(name) => out.push_str(name),
            Expr::Ref(id) => out.push_str(&names(*id)),
            Expr::Attribute { target, name } => {
                target.write_child(out, names, PREC_POSTFIX);
                out.push('.');
                out.push_str(name);
            }
            Expr::Call { func, args, kwargs } => {
                func.write_child(out, names, PREC_POSTFIX);
                out.push('(');
                Self::write_list(args, out, names);
                for (i, (key, value)) in kwargs.iter().enumerate() {
                    if i > 0 || !args.is_empty() {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push('=');
                    value.write(out, names);
                }
                out.push(')');
            }
            Expr::Index { target, index } => {
                target.write_child(out, names, PREC_POSTFIX);
                out.push('[');
                index.write(out, names);
                out.push(']');
            }
            Expr::Tuple(items) => {
                out.push('(');
                Self::write_list(items, out, names);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Expr::List(items) => {
                out.push('[');
                Self::write_list(items, out, names);
                out.push(']');
            }
            Expr::Comprehension {
                element,
                var,
                iter,
                lazy,
            } => {
                out.push(if *lazy { '(' } else { '[' });
                element.write(out, names);
                out.push_str(" for ");
                out.push_str(var);
                out.push_str(" in ");
                iter.write(out, names);
                out.push(if *lazy { ')' } else { ']' });
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => {
                    out.push('-');
                    operand.write_child(out, names, PREC_UNARY);
                }
                UnaryOp::Pos => {
                    out.push('+');
                    operand.write_child(out, names, PREC_UNARY);
                }
                UnaryOp::Not => {
                    out.push_str("not ");
                    operand.write_child(out, names, PREC_NOT);
                }
            },
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                let (left_min, right_min) = if *op == BinaryOp::Pow {
                    (prec + 1, PREC_UNARY)
                } else {
                    (prec, prec + 1)
                };
                left.write_child(out, names, left_min);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                right.write_child(out, names, right_min);
            }
        }
    }
}

/// 数值的规范文本形式（最短且可无损读回）
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        // 去掉 -0 的符号
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_names(_: EntityId) -> String {
        "?".to_string()
    }

    #[test]
    fn test_render_precedence() {
        // (1 + 2) * 3
        let e = Expr::binary(
            BinaryOp::Mul,
            Expr::binary(BinaryOp::Add, Expr::Number(1.0), Expr::Number(2.0)),
            Expr::Number(3.0),
        );
        assert_eq!(e.render(&no_names), "(1 + 2) * 3");

        // 2 ** -x
        let e = Expr::binary(
            BinaryOp::Pow,
            Expr::Number(2.0),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::Name("x".into())),
            },
        );
        assert_eq!(e.render(&no_names), "2 ** -x");

        // a - (b - c)
        let e = Expr::binary(
            BinaryOp::Sub,
            Expr::Name("a".into()),
            Expr::binary(BinaryOp::Sub, Expr::Name("b".into()), Expr::Name("c".into())),
        );
        assert_eq!(e.render(&no_names), "a - (b - c)");
    }

    #[test]
    fn test_bind_and_references() {
        let e = Expr::binary(BinaryOp::Mul, Expr::Name("k".into()), Expr::Name("x".into()));
        let bound = e.bind(&|name| (name == "k").then_some(EntityId(7)));
        assert_eq!(bound.references().into_iter().collect::<Vec<_>>(), vec![EntityId(7)]);
        assert_eq!(bound.render(&|_| "speed".to_string()), "speed * x");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
    }
}
