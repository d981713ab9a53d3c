//! 方程识别
//!
//! 把 `左边 = 右边` 形式的命令识别为几何对象：
//! - 关于 x、y 的一次方程 → `LineEquation(a, b, c)`（`a·x + b·y + c = 0`）
//! - `x²` 与 `y²` 系数相同且无 `xy` 项、半径为正 → `CircleEquation(a, b, c)`
//! - `y = f(x)` → `Curve(Function("f(x)"))`
//!
//! 无法识别时保持命令原样。

use crate::expr::ast::{format_number, BinaryOp, Expr, UnaryOp};
use crate::expr::parser::parse_expression;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

const EPSILON: f64 = 1e-12;

/// 最高次数，超过即放弃识别
const MAX_DEGREE: u32 = 4;

static ASSIGN_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Za-z_][A-Za-z0-9_]*|\.)+$").expect("valid target pattern"));

/// 命令是否具有方程的形状
///
/// 恰好一个 `=`，两边括号各自平衡，左边非空且不以运算符结尾。
/// 左边是名称或属性路径时视为赋值，`x`、`y` 除外。
pub fn is_equation(command: &str) -> bool {
    let Some((left, right)) = split_once_equals(command) else {
        return false;
    };
    if !balanced(left) || !balanced(right) {
        return false;
    }
    let left = left.trim();
    if left.is_empty() || right.trim().is_empty() {
        return false;
    }
    if left.ends_with(['+', '-', '*', '/', '<', '>', '!', '%', '^']) {
        return false;
    }
    if ASSIGN_TARGET.is_match(left) {
        return left == "x" || left == "y";
    }
    true
}

/// 尝试把方程改写为构造命令
pub fn parse_equation(command: &str) -> Option<String> {
    if !is_equation(command) {
        return None;
    }
    let (left, right) = split_once_equals(command)?;
    let left_expr = parse_expression(left).ok()?;
    let right_expr = parse_expression(right).ok()?;
    let difference = Expr::binary(BinaryOp::Sub, left_expr.clone(), right_expr.clone());

    if let Some(poly) = Poly::from_expr(&difference) {
        if let Some(shape) = recognize_polynomial(&poly) {
            return Some(shape);
        }
    }

    // y = f(x)
    if matches!(&left_expr, Expr::Name(n) if n == "y") && !mentions(&right_expr, "y") {
        let body = right_expr.render(&|_| String::new());
        return Some(format!("_ = Curve(Function({:?}))", body));
    }
    None
}

fn split_once_equals(command: &str) -> Option<(&str, &str)> {
    if command.matches('=').count() != 1 {
        return None;
    }
    command.split_once('=')
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn mentions(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Name(n) => n == name,
        Expr::Attribute { target, .. } => mentions(target, name),
        Expr::Call { func, args, kwargs } => {
            mentions(func, name)
                || args.iter().any(|a| mentions(a, name))
                || kwargs.iter().any(|(_, a)| mentions(a, name))
        }
        Expr::Index { target, index } => mentions(target, name) || mentions(index, name),
        Expr::Tuple(items) | Expr::List(items) => items.iter().any(|a| mentions(a, name)),
        Expr::Comprehension { element, iter, .. } => mentions(element, name) || mentions(iter, name),
        Expr::Unary { operand, .. } => mentions(operand, name),
        Expr::Binary { left, right, .. } => mentions(left, name) || mentions(right, name),
        _ => false,
    }
}

fn recognize_polynomial(poly: &Poly) -> Option<String> {
    let (a, b, c) = (poly.coeff(1, 0), poly.coeff(0, 1), poly.coeff(0, 0));
    match poly.degree() {
        1 => Some(format!(
            "_ = LineEquation({}, {}, {})",
            format_number(a),
            format_number(b),
            format_number(c)
        )),
        2 => {
            let (xx, yy) = (poly.coeff(2, 0), poly.coeff(0, 2));
            let only_circle_terms = poly
                .terms()
                .all(|(i, j)| matches!((i, j), (0, 0) | (1, 0) | (0, 1) | (2, 0) | (0, 2)));
            if !only_circle_terms || xx.abs() < EPSILON || (xx - yy).abs() > EPSILON {
                return None;
            }
            let (a, b, c) = (a / xx, b / xx, c / xx);
            let squared = a * a / 4.0 + b * b / 4.0 - c;
            if squared <= EPSILON {
                return None;
            }
            Some(format!(
                "_ = CircleEquation({}, {}, {})",
                format_number(a),
                format_number(b),
                format_number(c)
            ))
        }
        _ => None,
    }
}

/// 关于 x、y 的多项式，键为 `(x 的次数, y 的次数)`
#[derive(Debug, Clone, Default, PartialEq)]
struct Poly(BTreeMap<(u32, u32), f64>);

impl Poly {
    fn constant(c: f64) -> Self {
        let mut poly = Self::default();
        poly.0.insert((0, 0), c);
        poly.cleaned()
    }

    fn monomial(i: u32, j: u32) -> Self {
        let mut poly = Self::default();
        poly.0.insert((i, j), 1.0);
        poly
    }

    fn from_expr(expr: &Expr) -> Option<Self> {
        let poly = match expr {
            Expr::Number(n) => Self::constant(*n),
            Expr::Name(name) => match name.as_str() {
                "x" => Self::monomial(1, 0),
                "y" => Self::monomial(0, 1),
                "pi" => Self::constant(std::f64::consts::PI),
                "e" => Self::constant(std::f64::consts::E),
                _ => return None,
            },
            Expr::Unary { op, operand } => {
                let inner = Self::from_expr(operand)?;
                match op {
                    UnaryOp::Neg => inner.scale(-1.0),
                    UnaryOp::Pos => inner,
                    UnaryOp::Not => return None,
                }
            }
            Expr::Binary { op, left, right } => {
                let l = Self::from_expr(left)?;
                let r = Self::from_expr(right)?;
                match op {
                    BinaryOp::Add => l.add(&r),
                    BinaryOp::Sub => l.add(&r.scale(-1.0)),
                    BinaryOp::Mul => l.mul(&r)?,
                    BinaryOp::Div => {
                        let divisor = r.as_constant()?;
                        if divisor.abs() < EPSILON {
                            return None;
                        }
                        l.scale(1.0 / divisor)
                    }
                    BinaryOp::Pow => {
                        let exponent = r.as_constant()?;
                        if exponent < 0.0 || exponent.fract() != 0.0 || exponent > MAX_DEGREE as f64 {
                            return None;
                        }
                        let mut result = Self::constant(1.0);
                        for _ in 0..exponent as u32 {
                            result = result.mul(&l)?;
                        }
                        result
                    }
                    _ => return None,
                }
            }
            _ => return None,
        };
        Some(poly)
    }

    fn cleaned(mut self) -> Self {
        self.0.retain(|_, c| c.abs() > EPSILON);
        self
    }

    fn add(&self, other: &Self) -> Self {
        let mut sum = self.clone();
        for (key, c) in &other.0 {
            *sum.0.entry(*key).or_insert(0.0) += c;
        }
        sum.cleaned()
    }

    fn scale(&self, k: f64) -> Self {
        Self(self.0.iter().map(|(key, c)| (*key, c * k)).collect()).cleaned()
    }

    fn mul(&self, other: &Self) -> Option<Self> {
        let mut product = Self::default();
        for ((i1, j1), c1) in &self.0 {
            for ((i2, j2), c2) in &other.0 {
                let key = (i1 + i2, j1 + j2);
                if key.0 + key.1 > MAX_DEGREE {
                    return None;
                }
                *product.0.entry(key).or_insert(0.0) += c1 * c2;
            }
        }
        Some(product.cleaned())
    }

    fn as_constant(&self) -> Option<f64> {
        match self.degree() {
            0 => Some(self.coeff(0, 0)),
            _ => None,
        }
    }

    fn coeff(&self, i: u32, j: u32) -> f64 {
        self.0.get(&(i, j)).copied().unwrap_or(0.0)
    }

    fn degree(&self) -> u32 {
        self.terms().map(|(i, j)| i + j).max().unwrap_or(0)
    }

    fn terms(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.keys().copied()
    }
}
