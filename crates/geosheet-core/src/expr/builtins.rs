//! 内建函数与常量

use crate::error::{SheetError, SheetResult};

/// 内建函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Ln,
    Log,
    Abs,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Len,
    Range,
    /// 协作式检查点
    Pause,
    /// 清空工作表
    Clear,
    /// 删除无用的隐藏对象
    Cleanup,
}

const TABLE: &[(&str, Builtin)] = &[
    ("sqrt", Builtin::Sqrt),
    ("sin", Builtin::Sin),
    ("cos", Builtin::Cos),
    ("tan", Builtin::Tan),
    ("asin", Builtin::Asin),
    ("acos", Builtin::Acos),
    ("atan", Builtin::Atan),
    ("exp", Builtin::Exp),
    ("ln", Builtin::Ln),
    ("log", Builtin::Log),
    ("abs", Builtin::Abs),
    ("floor", Builtin::Floor),
    ("ceil", Builtin::Ceil),
    ("round", Builtin::Round),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("len", Builtin::Len),
    ("range", Builtin::Range),
    ("pause", Builtin::Pause),
    ("clear", Builtin::Clear),
    ("cleanup", Builtin::Cleanup),
];

/// 数学常量
pub const CONSTANTS: &[(&str, f64)] = &[("pi", std::f64::consts::PI), ("e", std::f64::consts::E)];

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        TABLE.iter().find(|(n, _)| *n == name).map(|(_, b)| *b)
    }

    pub fn name(&self) -> &'static str {
        TABLE
            .iter()
            .find(|(_, b)| b == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        TABLE.iter().map(|(n, _)| *n)
    }

    /// 作用于工作表的辅助函数（不能出现在公式中）
    pub fn is_worksheet_helper(&self) -> bool {
        matches!(self, Builtin::Pause | Builtin::Clear | Builtin::Cleanup)
    }

    /// 纯数值求值
    pub fn apply_numeric(&self, args: &[f64]) -> SheetResult<f64> {
        let unary = |f: fn(f64) -> f64| -> SheetResult<f64> {
            match args {
                [x] => Ok(f(*x)),
                _ => Err(SheetError::type_error(format!(
                    "{}() takes exactly one argument ({} given)",
                    self.name(),
                    args.len()
                ))),
            }
        };
        let value = match self {
            Builtin::Sqrt => unary(f64::sqrt)?,
            Builtin::Sin => unary(f64::sin)?,
            Builtin::Cos => unary(f64::cos)?,
            Builtin::Tan => unary(f64::tan)?,
            Builtin::Asin => unary(f64::asin)?,
            Builtin::Acos => unary(f64::acos)?,
            Builtin::Atan => unary(f64::atan)?,
            Builtin::Exp => unary(f64::exp)?,
            Builtin::Ln => unary(f64::ln)?,
            Builtin::Abs => unary(f64::abs)?,
            Builtin::Floor => unary(f64::floor)?,
            Builtin::Ceil => unary(f64::ceil)?,
            Builtin::Log => match args {
                [x] => x.ln(),
                [x, base] => x.ln() / base.ln(),
                _ => return Err(SheetError::type_error("log() takes one or two arguments")),
            },
            Builtin::Round => match args {
                [x] => x.round(),
                [x, digits] => {
                    let factor = 10f64.powi(*digits as i32);
                    (x * factor).round() / factor
                }
                _ => return Err(SheetError::type_error("round() takes one or two arguments")),
            },
            Builtin::Min | Builtin::Max => {
                if args.is_empty() {
                    return Err(SheetError::type_error(format!(
                        "{}() expects at least one argument",
                        self.name()
                    )));
                }
                let pick = if *self == Builtin::Min { f64::min } else { f64::max };
                args[1..].iter().fold(args[0], |acc, &v| pick(acc, v))
            }
            Builtin::Len | Builtin::Range | Builtin::Pause | Builtin::Clear | Builtin::Cleanup => {
                return Err(SheetError::type_error(format!(
                    "{}() does not return a number",
                    self.name()
                )))
            }
        };
        if value.is_nan() {
            return Err(SheetError::eval(format!("math domain error in {}()", self.name())));
        }
        Ok(value)
    }
}

pub fn constant(name: &str) -> Option<f64> {
    CONSTANTS.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(Builtin::from_name("sqrt"), Some(Builtin::Sqrt));
        assert_eq!(Builtin::Cleanup.name(), "cleanup");
        assert!(Builtin::from_name("eval").is_none());
        assert_eq!(constant("pi"), Some(std::f64::consts::PI));
    }

    #[test]
    fn test_numeric() {
        assert_eq!(Builtin::Sqrt.apply_numeric(&[9.0]).unwrap(), 3.0);
        assert_eq!(Builtin::Max.apply_numeric(&[1.0, 4.0, 2.0]).unwrap(), 4.0);
        assert_eq!(Builtin::Round.apply_numeric(&[1.23456, 2.0]).unwrap(), 1.23);
        assert!(Builtin::Sqrt.apply_numeric(&[-1.0]).is_err());
        assert!(Builtin::Sin.apply_numeric(&[1.0, 2.0]).is_err());
    }
}
