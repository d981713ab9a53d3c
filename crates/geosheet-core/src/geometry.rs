//! 几何图元定义
//!
//! 实体重算后的缓存值。渲染器（外部协作者）只读取这些值，
//! 从不回调引擎。
//!
//! 支持的图元：
//! - 标量 (Scalar)
//! - 点 (Point) / 自由向量 (Vector)
//! - 直线 (Line) / 线段 (Segment)
//! - 圆 (Circle)
//! - 文本 (Text)
//! - 多边形 (Polygon)
//! - 函数与曲线（只携带公式文本）

use serde::{Deserialize, Serialize};

pub type Point2 = nalgebra::Point2<f64>;
pub type Vector2 = nalgebra::Vector2<f64>;

/// 几何比较容差
pub const EPSILON: f64 = 1e-10;

/// 实体的计算值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Scalar(f64),
    Point(Point2),
    Vector(Vector2),
    Line(Line),
    Segment(Segment),
    Circle(Circle),
    Text(Text),
    Polygon(Polygon),
    /// 函数，携带以 `x` 为自变量的公式
    Function(String),
    /// 函数曲线，携带所绘函数的公式
    Curve(String),
}

impl Shape {
    /// 获取图元的类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Shape::Scalar(_) => "Scalar",
            Shape::Point(_) => "Point",
            Shape::Vector(_) => "Vector",
            Shape::Line(_) => "Line",
            Shape::Segment(_) => "Segment",
            Shape::Circle(_) => "Circle",
            Shape::Text(_) => "Text",
            Shape::Polygon(_) => "Polygon",
            Shape::Function(_) => "Function",
            Shape::Curve(_) => "Curve",
        }
    }

    pub fn as_point(&self) -> Option<Point2> {
        match self {
            Shape::Point(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Shape::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// 检查点是否在图元上（考虑容差）
    pub fn contains_point(&self, point: &Point2, tolerance: f64) -> bool {
        match self {
            Shape::Point(p) => (p - point).norm() <= tolerance,
            Shape::Line(l) => l.distance_to_point(point) <= tolerance,
            Shape::Segment(s) => s.distance_to_point(point) <= tolerance,
            Shape::Circle(c) => c.distance_to_point(point).abs() <= tolerance,
            Shape::Polygon(p) => p.edges().any(|e| e.distance_to_point(point) <= tolerance),
            _ => false,
        }
    }
}

/// 直线（无限长，由两点确定）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub through: Point2,
    pub direction: Vector2,
}

impl Line {
    /// 过两点的直线；两点重合时不存在
    pub fn through_points(a: Point2, b: Point2) -> Option<Self> {
        let direction = b - a;
        if direction.norm() < EPSILON {
            return None;
        }
        Some(Self {
            through: a,
            direction,
        })
    }

    /// 由方程 `a·x + b·y + c = 0` 构造
    pub fn from_equation(a: f64, b: f64, c: f64) -> Option<Self> {
        if a.abs() < EPSILON && b.abs() < EPSILON {
            return None;
        }
        let through = if b.abs() > a.abs() {
            Point2::new(0.0, -c / b)
        } else {
            Point2::new(-c / a, 0.0)
        };
        Some(Self {
            through,
            direction: Vector2::new(-b, a),
        })
    }

    /// 方程系数 `(a, b, c)`，满足 `a·x + b·y + c = 0`
    pub fn equation(&self) -> (f64, f64, f64) {
        let a = self.direction.y;
        let b = -self.direction.x;
        let c = -(a * self.through.x + b * self.through.y);
        (a, b, c)
    }

    /// 计算点到直线的距离
    pub fn distance_to_point(&self, point: &Point2) -> f64 {
        let w = point - self.through;
        (self.direction.x * w.y - self.direction.y * w.x).abs() / self.direction.norm()
    }
}

/// 线段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point2,
    pub end: Point2,
}

impl Segment {
    pub fn new(start: Point2, end: Point2) -> Self {
        Self { start, end }
    }

    /// 计算线段长度
    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }

    /// 计算线段中点
    pub fn midpoint(&self) -> Point2 {
        Point2::new(
            (self.start.x + self.end.x) / 2.0,
            (self.start.y + self.end.y) / 2.0,
        )
    }

    /// 计算点到线段的距离
    pub fn distance_to_point(&self, point: &Point2) -> f64 {
        let v = self.end - self.start;
        let w = point - self.start;

        let c1 = w.dot(&v);
        if c1 <= 0.0 {
            return (point - self.start).norm();
        }

        let c2 = v.dot(&v);
        if c2 <= c1 {
            return (point - self.end).norm();
        }

        let b = c1 / c2;
        let pb = self.start + v * b;
        (point - pb).norm()
    }
}

/// 圆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point2,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Point2, radius: f64) -> Self {
        Self { center, radius }
    }

    /// 由方程 `x² + y² + a·x + b·y + c = 0` 构造；半径平方非正时不存在
    pub fn from_equation(a: f64, b: f64, c: f64) -> Option<Self> {
        let center = Point2::new(-a / 2.0, -b / 2.0);
        let squared = center.x * center.x + center.y * center.y - c;
        if squared <= EPSILON {
            return None;
        }
        Some(Self::new(center, squared.sqrt()))
    }

    /// 计算周长
    pub fn circumference(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.radius
    }

    /// 计算面积
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }

    /// 计算点到圆的距离（负值表示在圆内）
    pub fn distance_to_point(&self, point: &Point2) -> f64 {
        (point - self.center).norm() - self.radius
    }

    /// 获取圆上指定角度的点
    pub fn point_at_angle(&self, angle: f64) -> Point2 {
        Point2::new(
            self.center.x + self.radius * angle.cos(),
            self.center.y + self.radius * angle.sin(),
        )
    }
}

/// 文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub content: String,
    pub position: Point2,
}

impl Text {
    pub fn new(position: Point2, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            position,
        }
    }
}

/// 多边形（闭合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point2>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point2>) -> Self {
        Self { vertices }
    }

    /// 以 `center` 为中心、`first` 为第一个顶点的正多边形
    pub fn regular(center: Point2, first: Point2, sides: usize) -> Option<Self> {
        let radius = (first - center).norm();
        if sides < 3 || radius < EPSILON {
            return None;
        }
        let start = (first.y - center.y).atan2(first.x - center.x);
        let step = 2.0 * std::f64::consts::PI / sides as f64;
        let circle = Circle::new(center, radius);
        let vertices = (0..sides)
            .map(|i| circle.point_at_angle(start + step * i as f64))
            .collect();
        Some(Self { vertices })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// 依次返回每条边
    pub fn edges(&self) -> impl Iterator<Item = Segment> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| Segment::new(self.vertices[i], self.vertices[(i + 1) % n]))
    }

    /// 周长
    pub fn perimeter(&self) -> f64 {
        self.edges().map(|e| e.length()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_length() {
        let segment = Segment::new(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0));
        assert!((segment.length() - 5.0).abs() < EPSILON);
        assert_eq!(segment.midpoint(), Point2::new(1.5, 2.0));
    }

    #[test]
    fn test_circle_area() {
        let circle = Circle::new(Point2::origin(), 1.0);
        assert!((circle.area() - std::f64::consts::PI).abs() < EPSILON);
    }

    #[test]
    fn test_line_equation() {
        let line = Line::from_equation(2.0, -1.0, 1.0).unwrap();
        // y = 2x + 1 经过 (0, 1) 和 (1, 3)
        assert!(line.distance_to_point(&Point2::new(0.0, 1.0)) < 1e-9);
        assert!(line.distance_to_point(&Point2::new(1.0, 3.0)) < 1e-9);
        assert!(Line::from_equation(0.0, 0.0, 1.0).is_none());
    }

    #[test]
    fn test_circle_equation() {
        // (x-1)² + (y+2)² = 9  =>  x² + y² - 2x + 4y - 4 = 0
        let circle = Circle::from_equation(-2.0, 4.0, -4.0).unwrap();
        assert_eq!(circle.center, Point2::new(1.0, -2.0));
        assert!((circle.radius - 3.0).abs() < EPSILON);
        assert!(Circle::from_equation(0.0, 0.0, 1.0).is_none());
    }

    #[test]
    fn test_regular_polygon() {
        let hexagon = Polygon::regular(Point2::origin(), Point2::new(1.0, 0.0), 6).unwrap();
        assert_eq!(hexagon.vertex_count(), 6);
        assert!((hexagon.perimeter() - 6.0).abs() < 1e-9);
        assert!(Polygon::regular(Point2::origin(), Point2::origin(), 6).is_none());
    }
}
