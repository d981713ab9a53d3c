//! 构造定义
//!
//! 每个实体由一个 `Construction` 定义：构造器 + 参数。
//! 参数中的实体以 `EntityId` 引用；计算时从注册表读取父实体的
//! 缓存值，输出规范文本时按当前名称还原。

use crate::entity::{EntityId, Style};
use crate::error::{SheetError, SheetResult};
use crate::expr::ast::format_number;
use crate::expr::formula::{Formula, FormulaContext};
use crate::geometry::{Circle, Line, Point2, Polygon, Segment, Shape, Text, Vector2, EPSILON};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 正多边形的最大边数（每条边之外的顶点都会成为子部件）
pub const MAX_REGULAR_SIDES: usize = 1000;

/// 实体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Variable,
    Point,
    Vector,
    Line,
    Segment,
    Circle,
    Text,
    Function,
    Curve,
    Polygon,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Variable => "variable",
            Category::Point => "point",
            Category::Vector => "vector",
            Category::Line => "line",
            Category::Segment => "segment",
            Category::Circle => "circle",
            Category::Text => "text",
            Category::Function => "function",
            Category::Curve => "curve",
            Category::Polygon => "polygon",
        };
        f.write_str(name)
    }
}

/// 规范构造器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constructor {
    Variable,
    Point,
    Midpoint,
    Vertex,
    Vector,
    Line,
    LineEquation,
    Segment,
    Circle,
    CircleEquation,
    Text,
    Function,
    Curve,
    Polygon,
    RegularPolygon,
}

impl Constructor {
    /// 规范名称（写入规范文本）
    pub fn name(&self) -> &'static str {
        match self {
            Constructor::Variable => "Variable",
            Constructor::Point => "Point",
            Constructor::Midpoint => "Midpoint",
            Constructor::Vertex => "Vertex",
            Constructor::Vector => "Vector",
            Constructor::Line => "Line",
            Constructor::LineEquation => "LineEquation",
            Constructor::Segment => "Segment",
            Constructor::Circle => "Circle",
            Constructor::CircleEquation => "CircleEquation",
            Constructor::Text => "Text",
            Constructor::Function => "Function",
            Constructor::Curve => "Curve",
            Constructor::Polygon => "Polygon",
            Constructor::RegularPolygon => "RegularPolygon",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Constructor::Variable => Category::Variable,
            Constructor::Point | Constructor::Midpoint | Constructor::Vertex => Category::Point,
            Constructor::Vector => Category::Vector,
            Constructor::Line | Constructor::LineEquation => Category::Line,
            Constructor::Segment => Category::Segment,
            Constructor::Circle | Constructor::CircleEquation => Category::Circle,
            Constructor::Text => Category::Text,
            Constructor::Function => Category::Function,
            Constructor::Curve => Category::Curve,
            Constructor::Polygon | Constructor::RegularPolygon => Category::Polygon,
        }
    }

    /// 自动命名时使用的前缀
    pub fn name_prefix(&self) -> &'static str {
        match self {
            Constructor::Vertex => "S",
            _ => match self.category() {
                Category::Variable => "k",
                Category::Point => "M",
                Category::Vector => "v",
                Category::Line => "d",
                Category::Segment => "s",
                Category::Circle => "c",
                Category::Text => "txt",
                Category::Function => "f",
                Category::Curve => "Cf",
                Category::Polygon => "p",
            },
        }
    }
}

/// 构造参数
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Number(f64),
    Text(String),
    Entity(EntityId),
    Formula(Formula),
    /// 嵌套构造，登记时先作为匿名实体创建
    New(Box<Construction>),
}

impl Arg {
    fn collect_parents(&self, out: &mut BTreeSet<EntityId>) {
        match self {
            Arg::Entity(id) => {
                out.insert(*id);
            }
            Arg::Formula(f) => out.extend(f.dependencies()),
            _ => {}
        }
    }

    fn render(&self, names: &dyn Fn(EntityId) -> String) -> String {
        match self {
            Arg::Number(n) => format_number(*n),
            Arg::Text(s) => format!("{:?}", s),
            Arg::Entity(id) => names(*id),
            Arg::Formula(f) => format!("{:?}", f.render(names)),
            Arg::New(c) => c.render(names),
        }
    }
}

/// 计算时读取父实体的接口
pub trait ShapeSource: FormulaContext {
    /// 父实体的当前值；不存在时报错
    fn shape_of(&self, id: EntityId) -> SheetResult<&Shape>;

    fn name_of(&self, id: EntityId) -> String;
}

/// 构造定义
#[derive(Debug, Clone, PartialEq)]
pub struct Construction {
    pub constructor: Constructor,
    pub args: Vec<Arg>,
    /// 关键字参数带来的样式
    pub style: Style,
}

impl Construction {
    pub fn new(constructor: Constructor, args: Vec<Arg>) -> Self {
        Self {
            constructor,
            args,
            style: Style::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.constructor.category()
    }

    /// 直接依赖的实体
    pub fn parents(&self) -> BTreeSet<EntityId> {
        let mut out = BTreeSet::new();
        for arg in &self.args {
            arg.collect_parents(&mut out);
        }
        out
    }

    /// 新定义能否原地替换旧定义
    pub fn compatible_with(&self, other: &Construction) -> bool {
        self.constructor == other.constructor
            && !matches!(
                self.constructor,
                Constructor::Vertex | Constructor::RegularPolygon
            )
    }

    pub fn has_nested(&self) -> bool {
        self.args.iter().any(|a| matches!(a, Arg::New(_)))
    }

    /// `Ctor(arg, ..., key=value)`
    pub fn render(&self, names: &dyn Fn(EntityId) -> String) -> String {
        self.render_with_style(names, &self.style)
    }

    pub fn render_with_style(&self, names: &dyn Fn(EntityId) -> String, style: &Style) -> String {
        let mut parts: Vec<String> = self.args.iter().map(|a| a.render(names)).collect();
        parts.extend(style.iter().map(|(k, v)| format!("{}={}", k, v)));
        format!("{}({})", self.constructor.name(), parts.join(", "))
    }

    /// 根据父实体的当前值计算
    ///
    /// 类型错误返回 `SheetError::Type`；几何上退化（如两点重合的直线）
    /// 返回 `SheetError::Evaluation`。
    pub fn compute(&self, src: &dyn ShapeSource) -> SheetResult<Shape> {
        let args = &self.args;
        match self.constructor {
            Constructor::Variable => Ok(Shape::Scalar(scalar(self.arg(0)?, src)?)),
            Constructor::Point => Ok(Shape::Point(Point2::new(
                scalar(self.arg(0)?, src)?,
                scalar(self.arg(1)?, src)?,
            ))),
            Constructor::Midpoint => {
                let a = point(self.arg(0)?, src)?;
                let b = point(self.arg(1)?, src)?;
                Ok(Shape::Point(Segment::new(a, b).midpoint()))
            }
            Constructor::Vertex => {
                let owner = entity(self.arg(0)?)?;
                let index = index(self.arg(1)?)?;
                match src.shape_of(owner)? {
                    Shape::Polygon(poly) => poly
                        .vertices
                        .get(index)
                        .map(|p| Shape::Point(*p))
                        .ok_or_else(|| SheetError::eval(format!("no vertex {}", index))),
                    other => Err(SheetError::type_error(format!(
                        "Vertex expects a polygon, got {}",
                        other.type_name()
                    ))),
                }
            }
            Constructor::Vector => {
                let (a, b) = (self.arg(0)?, self.arg(1)?);
                if let (Some(pa), Some(pb)) = (maybe_point(a, src)?, maybe_point(b, src)?) {
                    Ok(Shape::Vector(pb - pa))
                } else {
                    Ok(Shape::Vector(Vector2::new(scalar(a, src)?, scalar(b, src)?)))
                }
            }
            Constructor::Line => {
                let a = point(self.arg(0)?, src)?;
                let b = point(self.arg(1)?, src)?;
                Line::through_points(a, b)
                    .map(Shape::Line)
                    .ok_or_else(|| SheetError::eval("a line needs two distinct points"))
            }
            Constructor::LineEquation => {
                let (a, b, c) = self.three_scalars(src)?;
                Line::from_equation(a, b, c)
                    .map(Shape::Line)
                    .ok_or_else(|| SheetError::eval("degenerate line equation"))
            }
            Constructor::Segment => {
                let a = point(self.arg(0)?, src)?;
                let b = point(self.arg(1)?, src)?;
                Ok(Shape::Segment(Segment::new(a, b)))
            }
            Constructor::Circle => {
                let center = point(self.arg(0)?, src)?;
                let second = self.arg(1)?;
                let radius = match maybe_point(second, src)? {
                    Some(through) => (through - center).norm(),
                    None => scalar(second, src)?,
                };
                if radius < 0.0 {
                    return Err(SheetError::eval("negative radius"));
                }
                Ok(Shape::Circle(Circle::new(center, radius)))
            }
            Constructor::CircleEquation => {
                let (a, b, c) = self.three_scalars(src)?;
                Circle::from_equation(a, b, c)
                    .map(Shape::Circle)
                    .ok_or_else(|| SheetError::eval("circle equation has no real solution"))
            }
            Constructor::Text => {
                let content = match self.arg(0)? {
                    Arg::Text(s) => s.clone(),
                    other => return Err(type_mismatch("text", other)),
                };
                let x = args.get(1).map(|a| scalar(a, src)).transpose()?.unwrap_or(0.0);
                let y = args.get(2).map(|a| scalar(a, src)).transpose()?.unwrap_or(0.0);
                Ok(Shape::Text(Text::new(Point2::new(x, y), content)))
            }
            Constructor::Function => match self.arg(0)? {
                Arg::Formula(f) => Ok(Shape::Function(f.render(&|id| src.name_of(id)))),
                other => Err(type_mismatch("formula", other)),
            },
            Constructor::Curve => {
                let f = entity(self.arg(0)?)?;
                match src.shape_of(f)? {
                    Shape::Function(formula) => Ok(Shape::Curve(formula.clone())),
                    other => Err(SheetError::type_error(format!(
                        "Curve expects a function, got {}",
                        other.type_name()
                    ))),
                }
            }
            Constructor::Polygon => {
                if args.len() < 3 {
                    return Err(SheetError::type_error("a polygon needs at least three points"));
                }
                let vertices = args
                    .iter()
                    .map(|a| point(a, src))
                    .collect::<SheetResult<Vec<_>>>()?;
                Ok(Shape::Polygon(Polygon::new(vertices)))
            }
            Constructor::RegularPolygon => {
                let center = point(self.arg(0)?, src)?;
                let first = point(self.arg(1)?, src)?;
                let sides = index(self.arg(2)?)?;
                if sides < 3 {
                    return Err(SheetError::type_error("a regular polygon needs at least three sides"));
                }
                if sides > MAX_REGULAR_SIDES {
                    return Err(SheetError::InvalidParameter(format!(
                        "a regular polygon has at most {} sides, got {}",
                        MAX_REGULAR_SIDES, sides
                    )));
                }
                Polygon::regular(center, first, sides)
                    .map(Shape::Polygon)
                    .ok_or_else(|| SheetError::eval("centre and vertex coincide"))
            }
        }
    }

    fn arg(&self, i: usize) -> SheetResult<&Arg> {
        self.args.get(i).ok_or_else(|| {
            SheetError::type_error(format!(
                "{}() is missing argument {}",
                self.constructor.name(),
                i + 1
            ))
        })
    }

    fn three_scalars(&self, src: &dyn ShapeSource) -> SheetResult<(f64, f64, f64)> {
        Ok((
            scalar(self.arg(0)?, src)?,
            scalar(self.arg(1)?, src)?,
            scalar(self.arg(2)?, src)?,
        ))
    }

    /// 正多边形的边数（子部件数为边数减一）
    pub fn regular_sides(&self) -> Option<usize> {
        match (self.constructor, self.args.get(2)) {
            (Constructor::RegularPolygon, Some(Arg::Number(n)))
                if *n >= 3.0 && *n <= MAX_REGULAR_SIDES as f64 =>
            {
                Some(*n as usize)
            }
            _ => None,
        }
    }
}

fn type_mismatch(expected: &str, got: &Arg) -> SheetError {
    let got = match got {
        Arg::Number(_) => "number",
        Arg::Text(_) => "text",
        Arg::Entity(_) => "entity",
        Arg::Formula(_) => "formula",
        Arg::New(_) => "construction",
    };
    SheetError::type_error(format!("expected {}, got {}", expected, got))
}

fn entity(arg: &Arg) -> SheetResult<EntityId> {
    match arg {
        Arg::Entity(id) => Ok(*id),
        other => Err(type_mismatch("an entity", other)),
    }
}

fn index(arg: &Arg) -> SheetResult<usize> {
    match arg {
        Arg::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        Arg::Number(n) => Err(SheetError::type_error(format!(
            "expected a non-negative integer, got {}",
            n
        ))),
        other => Err(type_mismatch("an integer", other)),
    }
}

fn scalar(arg: &Arg, src: &dyn ShapeSource) -> SheetResult<f64> {
    match arg {
        Arg::Number(n) => Ok(*n),
        Arg::Formula(f) => f.evaluate(src, None),
        Arg::Entity(id) => match src.shape_of(*id)? {
            Shape::Scalar(v) => Ok(*v),
            other => Err(SheetError::type_error(format!(
                "'{}' is a {}, not a number",
                src.name_of(*id),
                other.type_name()
            ))),
        },
        other => Err(type_mismatch("a number", other)),
    }
}

fn maybe_point(arg: &Arg, src: &dyn ShapeSource) -> SheetResult<Option<Point2>> {
    match arg {
        Arg::Entity(id) => Ok(src.shape_of(*id)?.as_point()),
        _ => Ok(None),
    }
}

fn point(arg: &Arg, src: &dyn ShapeSource) -> SheetResult<Point2> {
    match arg {
        Arg::Entity(id) => src.shape_of(*id)?.as_point().ok_or_else(|| {
            SheetError::type_error(format!("'{}' is not a point", src.name_of(*id)))
        }),
        other => Err(type_mismatch("a point", other)),
    }
}

/// 两点是否足够接近
pub fn same_point(a: &Point2, b: &Point2) -> bool {
    (a - b).norm() < EPSILON
}
