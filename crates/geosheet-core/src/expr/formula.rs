//! 公式
//!
//! 变量与函数的定义文本解析后保存为绑定过的语法树：
//! 指向实体的名称替换为 `EntityId`，因此重命名不会破坏公式，
//! 规范文本按实体的当前名称重新生成。

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::builtins::{constant, Builtin};
use super::parser::parse_expression;
use crate::entity::EntityId;
use crate::error::{SheetError, SheetResult};
use std::collections::BTreeSet;

/// 公式求值时读取实体数值的接口
pub trait FormulaContext {
    /// 实体的标量值（变量）
    fn scalar(&self, id: EntityId) -> SheetResult<f64>;

    /// 实体的数值属性（`A.x`、`s.length` ...）
    fn numeric_attribute(&self, id: EntityId, attr: &str) -> SheetResult<f64>;

    /// 调用函数实体
    fn call_function(&self, id: EntityId, x: f64) -> SheetResult<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
}

impl Formula {
    /// 解析并绑定公式
    ///
    /// `free` 中的名称（如函数的自变量 `x`）保持自由；
    /// 其余名称必须是常量、内建函数或已存在的实体。
    pub fn parse(
        text: &str,
        resolve: &dyn Fn(&str) -> Option<EntityId>,
        free: &[&str],
    ) -> SheetResult<Self> {
        let expr = parse_expression(text)?;
        let bound = expr.bind(&|name| {
            if free.contains(&name) || constant(name).is_some() || Builtin::from_name(name).is_some() {
                None
            } else {
                resolve(name)
            }
        });
        Self::check_names(&bound, free)?;
        Ok(Self { expr: bound })
    }

    pub fn from_ref(id: EntityId) -> Self {
        Self { expr: Expr::Ref(id) }
    }

    fn check_names(expr: &Expr, free: &[&str]) -> SheetResult<()> {
        match expr {
            Expr::Name(name) => {
                if free.contains(&name.as_str()) || constant(name).is_some() {
                    Ok(())
                } else {
                    Err(SheetError::NotFound(name.clone()))
                }
            }
            Expr::Call { func, args, kwargs } => {
                if !kwargs.is_empty() {
                    return Err(SheetError::type_error("keyword arguments are not allowed in a formula"));
                }
                match func.as_ref() {
                    Expr::Name(name) => match Builtin::from_name(name) {
                        Some(b) if !b.is_worksheet_helper() => {}
                        _ => return Err(SheetError::type_error(format!("'{}' cannot be called in a formula", name))),
                    },
                    Expr::Ref(_) => {}
                    _ => return Err(SheetError::type_error("unsupported call in a formula")),
                }
                args.iter().try_for_each(|a| Self::check_names(a, free))
            }
            Expr::Attribute { target, .. } => match target.as_ref() {
                Expr::Ref(_) => Ok(()),
                _ => Err(SheetError::type_error("unsupported attribute access in a formula")),
            },
            Expr::Unary { operand, .. } => Self::check_names(operand, free),
            Expr::Binary { op, left, right } => {
                if matches!(op, BinaryOp::And | BinaryOp::Or) {
                    return Err(SheetError::type_error("logical operators are not allowed in a formula"));
                }
                Self::check_names(left, free)?;
                Self::check_names(right, free)
            }
            Expr::Number(_) | Expr::Ref(_) => Ok(()),
            Expr::Bool(_) => Ok(()),
            _ => Err(SheetError::type_error("unsupported construct in a formula")),
        }
    }

    /// 公式依赖的实体
    pub fn dependencies(&self) -> BTreeSet<EntityId> {
        self.expr.references()
    }

    pub fn render(&self, names: &dyn Fn(EntityId) -> String) -> String {
        self.expr.render(names)
    }

    /// 求值；`x` 为自变量的取值
    pub fn evaluate<C: FormulaContext + ?Sized>(&self, ctx: &C, x: Option<f64>) -> SheetResult<f64> {
        let value = eval(&self.expr, ctx, x)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(SheetError::eval("result is not a finite number"))
        }
    }
}

fn eval<C: FormulaContext + ?Sized>(expr: &Expr, ctx: &C, x: Option<f64>) -> SheetResult<f64> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Expr::Ref(id) => ctx.scalar(*id),
        Expr::Name(name) => constant(name)
            .or(x)
            .ok_or_else(|| SheetError::NotFound(name.clone())),
        Expr::Attribute { target, name } => match target.as_ref() {
            Expr::Ref(id) => ctx.numeric_attribute(*id, name),
            _ => Err(SheetError::type_error("unsupported attribute access")),
        },
        Expr::Call { func, args, .. } => {
            let values = args
                .iter()
                .map(|a| eval(a, ctx, x))
                .collect::<SheetResult<Vec<_>>>()?;
            match func.as_ref() {
                Expr::Ref(id) => match values.as_slice() {
                    [v] => ctx.call_function(*id, *v),
                    _ => Err(SheetError::type_error("a function takes exactly one argument")),
                },
                Expr::Name(name) => Builtin::from_name(name)
                    .ok_or_else(|| SheetError::NotFound(name.clone()))?
                    .apply_numeric(&values),
                _ => Err(SheetError::type_error("unsupported call")),
            }
        }
        Expr::Unary { op, operand } => {
            let v = eval(operand, ctx, x)?;
            Ok(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Pos => v,
                UnaryOp::Not => bool_to_f64(v == 0.0),
            })
        }
        Expr::Binary { op, left, right } => {
            let l = eval(left, ctx, x)?;
            let r = eval(right, ctx, x)?;
            numeric_binary(*op, l, r)
        }
        _ => Err(SheetError::type_error("unsupported construct in a formula")),
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// 两个数之间的二元运算
pub fn numeric_binary(op: BinaryOp, l: f64, r: f64) -> SheetResult<f64> {
    Ok(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => {
            if r == 0.0 {
                return Err(SheetError::eval("division by zero"));
            }
            l / r
        }
        BinaryOp::Mod => {
            if r == 0.0 {
                return Err(SheetError::eval("modulo by zero"));
            }
            l.rem_euclid(r)
        }
        BinaryOp::Pow => {
            let v = l.powf(r);
            if v.is_nan() {
                return Err(SheetError::eval("invalid power"));
            }
            v
        }
        BinaryOp::Eq => bool_to_f64(l == r),
        BinaryOp::Ne => bool_to_f64(l != r),
        BinaryOp::Lt => bool_to_f64(l < r),
        BinaryOp::Le => bool_to_f64(l <= r),
        BinaryOp::Gt => bool_to_f64(l > r),
        BinaryOp::Ge => bool_to_f64(l >= r),
        BinaryOp::And => bool_to_f64(l != 0.0 && r != 0.0),
        BinaryOp::Or => bool_to_f64(l != 0.0 || r != 0.0),
    })
}
