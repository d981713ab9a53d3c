//! 求值器
//!
//! 语法树在 `Namespace` 上求值。命名空间负责实体相关的一切
//! （查找、属性、构造、赋值、删除）；求值器只处理纯值运算、
//! 内建函数与循环变量。

use super::ast::{BinaryOp, Expr, Stmt, Target, UnaryOp};
use super::builtins::{constant, Builtin};
use super::formula::numeric_binary;
use super::value::Value;
use crate::constructors;
use crate::definition::Constructor;
use crate::entity::EntityId;
use crate::error::{SheetError, SheetResult};

/// `range()` 一次最多产生的元素个数
pub const MAX_RANGE_LEN: usize = 1_000_000;

/// 求值器访问工作表的接口
pub trait Namespace {
    /// 解析实体名称及伪名称（`_`、视窗边界）；未知名称返回 `None`
    fn lookup(&self, name: &str) -> SheetResult<Option<Value>>;

    /// 实体属性；方法名返回 `Value::Method`
    fn attribute(&self, id: EntityId, name: &str) -> SheetResult<Value>;

    /// 参与运算时实体的纯值（变量→数，向量→向量，文本→字符串）
    fn plain_value(&self, id: EntityId) -> Option<Value>;

    /// 点实体的坐标
    fn point_of(&self, id: EntityId) -> Option<(f64, f64)>;

    /// 调用实体（函数实体）
    fn call_entity(&mut self, id: EntityId, args: Vec<Value>) -> SheetResult<Value>;

    fn call_method(
        &mut self,
        id: EntityId,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SheetResult<Value>;

    /// 调用构造器
    fn construct(
        &mut self,
        constructor: Constructor,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SheetResult<Value>;

    fn assign(&mut self, name: &str, value: Value) -> SheetResult<()>;

    fn assign_attribute(&mut self, id: EntityId, attr: &str, value: Value) -> SheetResult<()>;

    fn delete(&mut self, names: &[String]) -> SheetResult<()>;

    /// 工作表辅助函数：`pause()`、`clear()`、`cleanup()`
    fn helper(&mut self, helper: Builtin) -> SheetResult<Value>;
}

/// 语法树求值器
pub struct Evaluator<'a, N: Namespace + ?Sized> {
    ns: &'a mut N,
    locals: Vec<(String, Value)>,
}

impl<'a, N: Namespace + ?Sized> Evaluator<'a, N> {
    pub fn new(ns: &'a mut N) -> Self {
        Self {
            ns,
            locals: Vec::new(),
        }
    }

    /// 顺序执行语句
    pub fn run(&mut self, program: &[Stmt]) -> SheetResult<()> {
        for stmt in program {
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> SheetResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                match target {
                    Target::Name(name) => {
                        if let Some(slot) = self.locals.iter_mut().rev().find(|(n, _)| n == name) {
                            slot.1 = value;
                        } else {
                            self.ns.assign(name, value)?;
                        }
                    }
                    Target::Attribute { target, name } => match self.eval(target)? {
                        Value::Entity(id) => self.ns.assign_attribute(id, name, value)?,
                        other => {
                            return Err(SheetError::type_error(format!(
                                "cannot set attribute '{}' on {}",
                                name,
                                other.type_name()
                            )))
                        }
                    },
                }
            }
            Stmt::Delete(targets) => {
                let mut names = Vec::with_capacity(targets.len());
                for target in targets {
                    match target {
                        Expr::Name(name) if !self.is_local(name) => names.push(name.clone()),
                        _ => return Err(SheetError::type_error("can only delete worksheet names")),
                    }
                }
                self.ns.delete(&names)?;
            }
            Stmt::For { var, iter, body } => {
                let items = self.eval(iter)?.into_items()?;
                self.locals.push((var.clone(), Value::None));
                let result = items.into_iter().try_for_each(|item| {
                    if let Some(slot) = self.locals.last_mut() {
                        slot.1 = item;
                    }
                    body.iter().try_for_each(|s| self.exec(s))
                });
                self.locals.pop();
                result?;
            }
        }
        Ok(())
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|(n, _)| n == name)
    }

    pub fn eval(&mut self, expr: &Expr) -> SheetResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Imaginary(n) => Ok(Value::Complex(0.0, *n)),
            Expr::Str(s) => Ok(Value::Text(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::Ref(id) => Ok(Value::Entity(*id)),
            Expr::Name(name) => self.lookup(name),
            Expr::Attribute { target, name } => {
                let target = self.eval(target)?;
                self.attribute(target, name)
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<SheetResult<Vec<_>>>()?;
                let kwargs = kwargs
                    .iter()
                    .map(|(k, a)| Ok((k.clone(), self.eval(a)?)))
                    .collect::<SheetResult<Vec<_>>>()?;
                self.call(func, args, kwargs)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                self.index(target, index)
            }
            Expr::Tuple(items) => Ok(Value::Tuple(
                items.iter().map(|e| self.eval(e)).collect::<SheetResult<_>>()?,
            )),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<SheetResult<_>>()?,
            )),
            Expr::Comprehension {
                element,
                var,
                iter,
                lazy,
            } => {
                let items = self.eval(iter)?.into_items()?;
                self.locals.push((var.clone(), Value::None));
                let result = items
                    .into_iter()
                    .map(|item| {
                        if let Some(slot) = self.locals.last_mut() {
                            slot.1 = item;
                        }
                        self.eval(element)
                    })
                    .collect::<SheetResult<Vec<_>>>();
                self.locals.pop();
                let values = result?;
                Ok(if *lazy {
                    Value::Lazy(values)
                } else {
                    Value::List(values)
                })
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                self.unary(*op, value)
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = self.eval(left)?;
                    if !self.truthy(&l) {
                        return Ok(l);
                    }
                    self.eval(right)
                }
                BinaryOp::Or => {
                    let l = self.eval(left)?;
                    if self.truthy(&l) {
                        return Ok(l);
                    }
                    self.eval(right)
                }
                _ => {
                    let l = self.eval(left)?;
                    let r = self.eval(right)?;
                    self.binary(*op, l, r)
                }
            },
        }
    }

    fn lookup(&self, name: &str) -> SheetResult<Value> {
        if let Some((_, value)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        if let Some(value) = constant(name) {
            return Ok(Value::Number(value));
        }
        if let Some(builtin) = Builtin::from_name(name) {
            return Ok(Value::Builtin(builtin));
        }
        if let Some(constructor) = constructors::lookup(name) {
            return Ok(Value::Constructor(constructor));
        }
        self.ns
            .lookup(name)?
            .ok_or_else(|| SheetError::NotFound(name.to_string()))
    }

    fn truthy(&self, value: &Value) -> bool {
        match value {
            Value::Entity(id) => self.ns.plain_value(*id).map_or(true, |v| v.truthy()),
            other => other.truthy(),
        }
    }

    /// 实体参与运算时取其纯值
    fn plain(&self, value: Value) -> Value {
        match value {
            Value::Entity(id) => self.ns.plain_value(id).unwrap_or(Value::Entity(id)),
            other => other,
        }
    }

    fn attribute(&self, target: Value, name: &str) -> SheetResult<Value> {
        match (&target, name) {
            (Value::Entity(id), _) => self.ns.attribute(*id, name),
            (Value::Vector(x, _), "x") => Ok(Value::Number(*x)),
            (Value::Vector(_, y), "y") => Ok(Value::Number(*y)),
            (Value::Vector(x, y), "norm") => Ok(Value::Number(x.hypot(*y))),
            (Value::Complex(re, _), "real") => Ok(Value::Number(*re)),
            (Value::Complex(_, im), "imag") => Ok(Value::Number(*im)),
            _ => Err(SheetError::type_error(format!(
                "'{}' object has no attribute '{}'",
                target.type_name(),
                name
            ))),
        }
    }

    fn index(&self, target: Value, index: Value) -> SheetResult<Value> {
        let index = match self.plain(index) {
            Value::Number(n) if n.fract() == 0.0 => n as i64,
            other => {
                return Err(SheetError::type_error(format!(
                    "indices must be integers, not {}",
                    other.type_name()
                )))
            }
        };
        let items = self.plain(target).into_items()?;
        let len = items.len() as i64;
        let i = if index < 0 { index + len } else { index };
        if i < 0 || i >= len {
            return Err(SheetError::eval("index out of range"));
        }
        Ok(items.into_iter().nth(i as usize).unwrap_or(Value::None))
    }

    fn call(
        &mut self,
        func: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> SheetResult<Value> {
        match func {
            Value::Constructor(constructor) => self.ns.construct(constructor, args, kwargs),
            Value::Method(id, method) => self.ns.call_method(id, &method, args, kwargs),
            Value::Entity(id) => self.ns.call_entity(id, args),
            Value::Builtin(builtin) => {
                if !kwargs.is_empty() {
                    return Err(SheetError::type_error(format!(
                        "{}() takes no keyword arguments",
                        builtin.name()
                    )));
                }
                self.call_builtin(builtin, args)
            }
            other => Err(SheetError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> SheetResult<Value> {
        if builtin.is_worksheet_helper() {
            if !args.is_empty() {
                return Err(SheetError::type_error(format!(
                    "{}() takes no arguments",
                    builtin.name()
                )));
            }
            return self.ns.helper(builtin);
        }
        match builtin {
            Builtin::Len => match args.as_slice() {
                [value] => Ok(Value::Number(self.plain(value.clone()).into_items()?.len() as f64)),
                _ => Err(SheetError::type_error("len() takes exactly one argument")),
            },
            Builtin::Range => {
                let bounds = self.numbers(args)?;
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0.0, *stop, 1.0),
                    [start, stop] => (*start, *stop, 1.0),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(SheetError::type_error("range() takes one to three arguments")),
                };
                if step == 0.0 {
                    return Err(SheetError::InvalidParameter("range() step must not be zero".into()));
                }
                if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
                    return Err(SheetError::InvalidParameter("range() bounds must be finite".into()));
                }
                let count = ((stop - start) / step).ceil().max(0.0);
                if count > MAX_RANGE_LEN as f64 {
                    return Err(SheetError::InvalidParameter(format!(
                        "range() would produce {} items, at most {} are allowed",
                        count, MAX_RANGE_LEN
                    )));
                }
                let count = count as usize;
                Ok(Value::List(
                    (0..count).map(|i| Value::Number(start + step * i as f64)).collect(),
                ))
            }
            Builtin::Min | Builtin::Max if args.len() == 1 => {
                let items = self.plain(args.into_iter().next().unwrap_or(Value::None)).into_items()?;
                let numbers = self.numbers(items)?;
                Ok(Value::Number(builtin.apply_numeric(&numbers)?))
            }
            _ => {
                let numbers = self.numbers(args)?;
                Ok(Value::Number(builtin.apply_numeric(&numbers)?))
            }
        }
    }

    fn numbers(&self, values: Vec<Value>) -> SheetResult<Vec<f64>> {
        values
            .into_iter()
            .map(|v| {
                let v = self.plain(v);
                v.as_number().ok_or_else(|| {
                    SheetError::type_error(format!("expected a number, got {}", v.type_name()))
                })
            })
            .collect()
    }

    fn unary(&self, op: UnaryOp, value: Value) -> SheetResult<Value> {
        if op == UnaryOp::Not {
            return Ok(Value::Bool(!self.truthy(&value)));
        }
        let sign = if op == UnaryOp::Neg { -1.0 } else { 1.0 };
        match self.plain(value) {
            Value::Number(n) => Ok(Value::Number(sign * n)),
            Value::Bool(b) => Ok(Value::Number(sign * if b { 1.0 } else { 0.0 })),
            Value::Complex(re, im) => Ok(Value::Complex(sign * re, sign * im)),
            Value::Vector(x, y) => Ok(Value::Vector(sign * x, sign * y)),
            other => Err(SheetError::type_error(format!(
                "bad operand type for unary operator: {}",
                other.type_name()
            ))),
        }
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> SheetResult<Value> {
        // `A>B`：两点之间的向量
        if op == BinaryOp::Gt {
            if let (Value::Entity(a), Value::Entity(b)) = (&left, &right) {
                if let (Some(pa), Some(pb)) = (self.ns.point_of(*a), self.ns.point_of(*b)) {
                    return Ok(Value::Vector(pb.0 - pa.0, pb.1 - pa.1));
                }
            }
        }

        let is_comparison = matches!(
            op,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        );
        let left = self.plain(left);
        let right = self.plain(right);

        match (&left, &right) {
            (l, r) if l.as_number().is_some() && r.as_number().is_some() => {
                let (l, r) = (l.as_number().unwrap_or(0.0), r.as_number().unwrap_or(0.0));
                let value = numeric_binary(op, l, r)?;
                Ok(if is_comparison {
                    Value::Bool(value != 0.0)
                } else {
                    Value::Number(value)
                })
            }
            (Value::Complex(..), _) | (_, Value::Complex(..)) => complex_binary(op, &left, &right),
            (Value::Vector(x1, y1), Value::Vector(x2, y2)) => match op {
                BinaryOp::Add => Ok(Value::Vector(x1 + x2, y1 + y2)),
                BinaryOp::Sub => Ok(Value::Vector(x1 - x2, y1 - y2)),
                BinaryOp::Mul => Ok(Value::Number(x1 * x2 + y1 * y2)),
                BinaryOp::Eq => Ok(Value::Bool(left == right)),
                BinaryOp::Ne => Ok(Value::Bool(left != right)),
                _ => Err(unsupported(op, &left, &right)),
            },
            (Value::Vector(x, y), Value::Number(k)) | (Value::Number(k), Value::Vector(x, y))
                if op == BinaryOp::Mul =>
            {
                Ok(Value::Vector(k * x, k * y))
            }
            (Value::Vector(x, y), Value::Number(k)) if op == BinaryOp::Div => {
                if *k == 0.0 {
                    return Err(SheetError::eval("division by zero"));
                }
                Ok(Value::Vector(x / k, y / k))
            }
            (Value::Text(a), Value::Text(b)) => match op {
                BinaryOp::Add => Ok(Value::Text(format!("{}{}", a, b))),
                BinaryOp::Eq => Ok(Value::Bool(a == b)),
                BinaryOp::Ne => Ok(Value::Bool(a != b)),
                BinaryOp::Lt => Ok(Value::Bool(a < b)),
                BinaryOp::Gt => Ok(Value::Bool(a > b)),
                _ => Err(unsupported(op, &left, &right)),
            },
            (Value::Tuple(a), Value::Tuple(b)) if op == BinaryOp::Add => {
                Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
            }
            (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
                Ok(Value::List(a.iter().chain(b).cloned().collect()))
            }
            _ => match op {
                BinaryOp::Eq => Ok(Value::Bool(left == right)),
                BinaryOp::Ne => Ok(Value::Bool(left != right)),
                _ => Err(unsupported(op, &left, &right)),
            },
        }
    }
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> SheetError {
    SheetError::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn as_complex(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Complex(re, im) => Some((*re, *im)),
        other => other.as_number().map(|n| (n, 0.0)),
    }
}

fn complex_binary(op: BinaryOp, left: &Value, right: &Value) -> SheetResult<Value> {
    let ((a, b), (c, d)) = match (as_complex(left), as_complex(right)) {
        (Some(l), Some(r)) => (l, r),
        _ => return Err(unsupported(op, left, right)),
    };
    match op {
        BinaryOp::Add => Ok(Value::Complex(a + c, b + d)),
        BinaryOp::Sub => Ok(Value::Complex(a - c, b - d)),
        BinaryOp::Mul => Ok(Value::Complex(a * c - b * d, a * d + b * c)),
        BinaryOp::Div => {
            let norm = c * c + d * d;
            if norm == 0.0 {
                return Err(SheetError::eval("complex division by zero"));
            }
            Ok(Value::Complex((a * c + b * d) / norm, (b * c - a * d) / norm))
        }
        BinaryOp::Eq => Ok(Value::Bool(a == c && b == d)),
        BinaryOp::Ne => Ok(Value::Bool(a != c || b != d)),
        _ => Err(unsupported(op, left, right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::{parse_expression, parse_program};

    /// 只含变量 `k` 的最小命名空间
    #[derive(Default)]
    struct Scratch {
        k: f64,
        deleted: Vec<String>,
        pauses: usize,
    }

    impl Namespace for Scratch {
        fn lookup(&self, name: &str) -> SheetResult<Option<Value>> {
            Ok((name == "k").then_some(Value::Entity(EntityId(1))))
        }
        fn attribute(&self, _id: EntityId, name: &str) -> SheetResult<Value> {
            match name {
                "value" => Ok(Value::Number(self.k)),
                _ => Err(SheetError::type_error("no attribute")),
            }
        }
        fn plain_value(&self, _id: EntityId) -> Option<Value> {
            Some(Value::Number(self.k))
        }
        fn point_of(&self, _id: EntityId) -> Option<(f64, f64)> {
            None
        }
        fn call_entity(&mut self, _id: EntityId, _args: Vec<Value>) -> SheetResult<Value> {
            Err(SheetError::type_error("not callable"))
        }
        fn call_method(
            &mut self,
            _id: EntityId,
            _method: &str,
            _args: Vec<Value>,
            _kwargs: Vec<(String, Value)>,
        ) -> SheetResult<Value> {
            Ok(Value::None)
        }
        fn construct(
            &mut self,
            _constructor: Constructor,
            _args: Vec<Value>,
            _kwargs: Vec<(String, Value)>,
        ) -> SheetResult<Value> {
            Ok(Value::None)
        }
        fn assign(&mut self, _name: &str, value: Value) -> SheetResult<()> {
            self.k = value.as_number().unwrap_or(f64::NAN);
            Ok(())
        }
        fn assign_attribute(&mut self, _id: EntityId, _attr: &str, value: Value) -> SheetResult<()> {
            self.k += value.as_number().unwrap_or(0.0);
            Ok(())
        }
        fn delete(&mut self, names: &[String]) -> SheetResult<()> {
            self.deleted.extend_from_slice(names);
            Ok(())
        }
        fn helper(&mut self, _helper: Builtin) -> SheetResult<Value> {
            self.pauses += 1;
            Ok(Value::None)
        }
    }

    fn eval(source: &str, ns: &mut Scratch) -> SheetResult<Value> {
        let expr = parse_expression(source)?;
        Evaluator::new(ns).eval(&expr)
    }

    #[test]
    fn test_arithmetic() {
        let mut ns = Scratch { k: 2.0, ..Default::default() };
        assert_eq!(eval("1 + 2 * k", &mut ns).unwrap(), Value::Number(5.0));
        assert_eq!(eval("2^3", &mut ns).unwrap(), Value::Number(8.0));
        assert_eq!(eval("k > 1", &mut ns).unwrap(), Value::Bool(true));
        assert_eq!(eval("1 + 2j", &mut ns).unwrap(), Value::Complex(1.0, 2.0));
        assert_eq!(eval("sqrt(16) + max(1, k)", &mut ns).unwrap(), Value::Number(6.0));
        assert_eq!(eval("len(range(4))", &mut ns).unwrap(), Value::Number(4.0));
        assert!(matches!(eval("1/0", &mut ns), Err(SheetError::Evaluation(_))));
        assert!(matches!(eval("nothing", &mut ns), Err(SheetError::NotFound(_))));
    }

    #[test]
    fn test_range_is_bounded() {
        let mut ns = Scratch::default();
        assert_eq!(eval("len(range(2, 11, 3))", &mut ns).unwrap(), Value::Number(3.0));
        assert_eq!(eval("len(range(5, 1))", &mut ns).unwrap(), Value::Number(0.0));
        for source in ["len(range(1e30))", "range(0, 1, 1e-300)", "range(1e400)", "range(0, 1, 0)"] {
            assert!(
                matches!(eval(source, &mut ns), Err(SheetError::InvalidParameter(_))),
                "{} should be rejected",
                source
            );
        }
    }

    #[test]
    fn test_comprehension() {
        let mut ns = Scratch::default();
        let value = eval("(i*i for i in range(3))", &mut ns).unwrap();
        assert_eq!(
            value,
            Value::Lazy(vec![Value::Number(0.0), Value::Number(1.0), Value::Number(4.0)])
        );
        assert_eq!(eval("[1, 2][-1]", &mut ns).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_program() {
        let mut ns = Scratch::default();
        let program = parse_program("for i in range(1, 4):\n    k.value = i\n    pause()\ndel k").unwrap();
        Evaluator::new(&mut ns).run(&program).unwrap();
        assert_eq!(ns.k, 6.0);
        assert_eq!(ns.pauses, 3);
        assert_eq!(ns.deleted, vec!["k".to_string()]);
    }

    #[test]
    fn test_loop_variable_scope() {
        let mut ns = Scratch::default();
        let program = parse_program("for i in range(2): i = 5").unwrap();
        Evaluator::new(&mut ns).run(&program).unwrap();
        // 循环变量的赋值不会写入工作表
        assert_eq!(ns.k, 0.0);
        assert!(parse_program("for i in range(2): del i")
            .and_then(|p| Evaluator::new(&mut ns).run(&p))
            .is_err());
    }
}
