//! 构造器注册表
//!
//! 命令语言中允许调用的构造器白名单。
//! 每个构造器有一个规范名称（写入规范文本）和若干别名
//! （小写形式，以及旧文档使用的法文名称）。

use crate::definition::{Arg, Construction, Constructor};
use crate::entity::{EntityId, Style, StyleValue};
use crate::error::{SheetError, SheetResult};
use crate::expr::formula::Formula;
use crate::expr::value::Value;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// 数、变量实体或公式文本
    Operand,
    /// 变量的值：数、公式文本或另一个实体
    VariableValue,
    /// 实体（点、多边形、函数 ...）
    Entity,
    /// 非负整数
    Integer,
    Text,
    /// 以 `x` 为自变量的公式文本
    FunctionFormula,
}

/// 参数缺省值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultArg {
    Number(f64),
    Text(&'static str),
    /// 新建一个匿名自由点
    NewPoint(f64, f64),
}

impl DefaultArg {
    fn to_arg(self) -> Arg {
        match self {
            DefaultArg::Number(n) => Arg::Number(n),
            DefaultArg::Text(s) => Arg::Text(s.to_string()),
            DefaultArg::NewPoint(x, y) => Arg::New(Box::new(Construction::new(
                Constructor::Point,
                vec![Arg::Number(x), Arg::Number(y)],
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    /// 参数名（第一个为规范名，其余为关键字别名）
    pub names: &'static [&'static str],
    pub kind: ParamKind,
    pub default: Option<DefaultArg>,
}

const fn param(names: &'static [&'static str], kind: ParamKind, default: Option<DefaultArg>) -> Param {
    Param {
        names,
        kind,
        default,
    }
}

/// 构造器签名
#[derive(Debug, Clone)]
pub struct Signature {
    pub constructor: Constructor,
    pub params: Vec<Param>,
    /// 可变参数：所有位置参数都是实体（多边形顶点）
    pub variadic: Option<(ParamKind, usize)>,
}

/// 构造器注册表
#[derive(Debug, Clone)]
pub struct ConstructorRegistry {
    /// 名称（含别名）-> 构造器
    names: FxHashMap<&'static str, Constructor>,
    /// 构造器 -> 签名
    signatures: FxHashMap<Constructor, Signature>,
}

impl Default for ConstructorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructorRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            names: FxHashMap::default(),
            signatures: FxHashMap::default(),
        };
        registry.register_defaults();
        registry
    }

    fn register_defaults(&mut self) {
        use DefaultArg::{NewPoint, Number, Text};
        use ParamKind::*;

        let zero = Some(Number(0.0));

        // 数值
        self.register(
            Constructor::Variable,
            &["variable"],
            vec![param(&["value", "valeur"], VariableValue, zero)],
        );

        // 点
        self.register(
            Constructor::Point,
            &["point"],
            vec![param(&["x"], Operand, zero), param(&["y"], Operand, zero)],
        );
        self.register(
            Constructor::Midpoint,
            &["midpoint", "Milieu", "milieu"],
            vec![
                param(&["A", "point1"], Entity, None),
                param(&["B", "point2"], Entity, None),
            ],
        );
        self.register(
            Constructor::Vertex,
            &["vertex", "Sommet", "sommet"],
            vec![
                param(&["polygon", "polygone"], Entity, None),
                param(&["n", "index"], Integer, None),
            ],
        );

        // 向量
        self.register(
            Constructor::Vector,
            &["vector", "Vecteur", "vecteur", "Vecteur_libre"],
            vec![param(&["x", "A"], Operand, zero), param(&["y", "B"], Operand, zero)],
        );

        // 直线与线段
        self.register(
            Constructor::Line,
            &["line", "Droite", "droite"],
            vec![
                param(&["A", "point1"], Entity, Some(NewPoint(0.0, 0.0))),
                param(&["B", "point2"], Entity, Some(NewPoint(1.0, 0.0))),
            ],
        );
        self.register(
            Constructor::LineEquation,
            &["line_equation", "Droite_equation", "droite_equation"],
            vec![
                param(&["a"], Operand, Some(Number(1.0))),
                param(&["b"], Operand, Some(Number(-1.0))),
                param(&["c"], Operand, zero),
            ],
        );
        self.register(
            Constructor::Segment,
            &["segment"],
            vec![
                param(&["A", "point1"], Entity, Some(NewPoint(0.0, 0.0))),
                param(&["B", "point2"], Entity, Some(NewPoint(1.0, 0.0))),
            ],
        );

        // 圆
        self.register(
            Constructor::Circle,
            &["circle", "Cercle", "cercle"],
            vec![
                param(&["center", "centre"], Entity, Some(NewPoint(0.0, 0.0))),
                param(&["radius", "rayon", "point"], Operand, Some(Number(1.0))),
            ],
        );
        self.register(
            Constructor::CircleEquation,
            &["circle_equation", "Cercle_equation", "cercle_equation"],
            vec![
                param(&["a"], Operand, zero),
                param(&["b"], Operand, zero),
                param(&["c"], Operand, Some(Number(-1.0))),
            ],
        );

        // 文本
        self.register(
            Constructor::Text,
            &["text", "Texte", "texte"],
            vec![
                param(&["text", "texte"], ParamKind::Text, Some(Text(""))),
                param(&["x"], Operand, zero),
                param(&["y"], Operand, zero),
            ],
        );

        // 函数与曲线
        self.register(
            Constructor::Function,
            &["function", "Fonction", "fonction"],
            vec![param(&["expression", "formula"], FunctionFormula, None)],
        );
        self.register(
            Constructor::Curve,
            &["curve", "Courbe", "courbe"],
            vec![param(&["function", "fonction"], Entity, None)],
        );

        // 多边形
        self.register_variadic(Constructor::Polygon, &["polygon", "Polygone", "polygone"], Entity, 3);
        self.register(
            Constructor::RegularPolygon,
            &[
                "regular_polygon",
                "Polygone_regulier_centre",
                "polygone_regulier_centre",
            ],
            vec![
                param(&["center", "centre"], Entity, None),
                param(&["vertex", "sommet"], Entity, None),
                param(&["n", "sides"], Integer, Some(Number(6.0))),
            ],
        );
    }

    /// 注册构造器
    pub fn register(&mut self, constructor: Constructor, aliases: &[&'static str], params: Vec<Param>) {
        self.names.insert(constructor.name(), constructor);
        for alias in aliases {
            self.names.insert(alias, constructor);
        }
        self.signatures.insert(
            constructor,
            Signature {
                constructor,
                params,
                variadic: None,
            },
        );
    }

    fn register_variadic(
        &mut self,
        constructor: Constructor,
        aliases: &[&'static str],
        kind: ParamKind,
        minimum: usize,
    ) {
        self.register(constructor, aliases, Vec::new());
        if let Some(signature) = self.signatures.get_mut(&constructor) {
            signature.variadic = Some((kind, minimum));
        }
    }

    /// 按名称或别名查找
    pub fn lookup(&self, name: &str) -> Option<Constructor> {
        self.names.get(name).copied()
    }

    /// 所有以 `prefix` 开头的名称（命令补全）
    pub fn complete(&self, prefix: &str) -> Vec<&'static str> {
        let mut results: Vec<&'static str> = self
            .names
            .keys()
            .filter(|name| name.starts_with(prefix))
            .copied()
            .collect();
        results.sort_unstable();
        results
    }

    pub fn signature(&self, constructor: Constructor) -> Option<&Signature> {
        self.signatures.get(&constructor)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.names.keys().copied()
    }
}

static REGISTRY: Lazy<ConstructorRegistry> = Lazy::new(ConstructorRegistry::new);

/// 全局白名单查找
pub fn lookup(name: &str) -> Option<Constructor> {
    REGISTRY.lookup(name)
}

pub fn all_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.names()
}

pub fn complete(prefix: &str) -> Vec<&'static str> {
    REGISTRY.complete(prefix)
}

/// 解析公式中名称的接口
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Option<EntityId>;
}

/// 由调用参数构造定义
///
/// 与参数名匹配的关键字参数填入对应位置，其余关键字参数成为样式。
pub fn build(
    constructor: Constructor,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    resolver: &dyn NameResolver,
) -> SheetResult<Construction> {
    let signature = REGISTRY.signature(constructor).ok_or_else(|| {
        SheetError::type_error(format!("unknown constructor {}", constructor.name()))
    })?;

    let mut style = Style::new();

    if let Some((kind, minimum)) = signature.variadic {
        if args.len() < minimum {
            return Err(SheetError::type_error(format!(
                "{}() needs at least {} arguments ({} given)",
                constructor.name(),
                minimum,
                args.len()
            )));
        }
        let converted = args
            .into_iter()
            .map(|v| convert(v, kind, resolver))
            .collect::<SheetResult<Vec<_>>>()?;
        for (key, value) in kwargs {
            style.insert(key, style_value(value)?);
        }
        let mut construction = Construction::new(constructor, converted);
        construction.style = style;
        return Ok(construction);
    }

    let params = &signature.params;
    if args.len() > params.len() {
        return Err(SheetError::type_error(format!(
            "{}() takes at most {} arguments ({} given)",
            constructor.name(),
            params.len(),
            args.len()
        )));
    }

    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);

    for (key, value) in kwargs {
        match params.iter().position(|p| p.names.contains(&key.as_str())) {
            Some(i) if slots[i].is_some() => {
                return Err(SheetError::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    constructor.name(),
                    key
                )))
            }
            Some(i) => slots[i] = Some(value),
            None => {
                style.insert(key, style_value(value)?);
            }
        }
    }

    let mut converted = Vec::with_capacity(params.len());
    for (param, slot) in params.iter().zip(slots) {
        let arg = match (slot, param.default) {
            (Some(value), _) => convert(value, param.kind, resolver)?,
            (None, Some(default)) => default.to_arg(),
            (None, None) => {
                return Err(SheetError::type_error(format!(
                    "{}() missing required argument '{}'",
                    constructor.name(),
                    param.names[0]
                )))
            }
        };
        converted.push(arg);
    }

    let mut construction = Construction::new(constructor, converted);
    construction.style = style;
    Ok(construction)
}

fn style_value(value: Value) -> SheetResult<StyleValue> {
    match value {
        Value::Bool(b) => Ok(StyleValue::Bool(b)),
        Value::Number(n) => Ok(StyleValue::Number(n)),
        Value::Text(s) => Ok(StyleValue::Text(s)),
        other => Err(SheetError::type_error(format!(
            "style values must be bool, number or text, got {}",
            other.type_name()
        ))),
    }
}

fn new_point(x: f64, y: f64) -> Arg {
    Arg::New(Box::new(Construction::new(
        Constructor::Point,
        vec![Arg::Number(x), Arg::Number(y)],
    )))
}

fn parse_formula(text: &str, resolver: &dyn NameResolver, free: &[&str]) -> SheetResult<Formula> {
    Formula::parse(text, &|name| resolver.resolve(name), free)
}

/// 把运行时值转换为某类参数
pub fn convert(value: Value, kind: ParamKind, resolver: &dyn NameResolver) -> SheetResult<Arg> {
    let mismatch = |value: &Value, expected: &str| {
        SheetError::type_error(format!("expected {}, got {}", expected, value.type_name()))
    };
    match kind {
        ParamKind::Operand => match value {
            Value::Number(n) => Ok(Arg::Number(n)),
            Value::Bool(b) => Ok(Arg::Number(if b { 1.0 } else { 0.0 })),
            Value::Entity(id) => Ok(Arg::Entity(id)),
            Value::Text(s) => Ok(Arg::Formula(parse_formula(&s, resolver, &[])?)),
            Value::New(c) => Ok(Arg::New(c)),
            other => Err(mismatch(&other, "a number")),
        },
        ParamKind::VariableValue => match value {
            Value::Number(n) => Ok(Arg::Number(n)),
            Value::Bool(b) => Ok(Arg::Number(if b { 1.0 } else { 0.0 })),
            Value::Text(s) => Ok(Arg::Formula(parse_formula(&s, resolver, &[])?)),
            Value::Entity(id) => Ok(Arg::Formula(Formula::from_ref(id))),
            other => Err(mismatch(&other, "a number or a formula")),
        },
        ParamKind::Entity => match value {
            Value::Entity(id) => Ok(Arg::Entity(id)),
            Value::New(c) => Ok(Arg::New(c)),
            Value::Complex(re, im) => Ok(new_point(re, im)),
            Value::Tuple(items) | Value::List(items) if items.len() == 2 => {
                match (items[0].as_number(), items[1].as_number()) {
                    (Some(x), Some(y)) => Ok(new_point(x, y)),
                    _ => Err(SheetError::type_error("expected a pair of numbers")),
                }
            }
            other => Err(mismatch(&other, "an entity")),
        },
        ParamKind::Integer => match value {
            Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => Ok(Arg::Number(n)),
            other => Err(mismatch(&other, "a non-negative integer")),
        },
        ParamKind::Text => match value {
            Value::Text(s) => Ok(Arg::Text(s)),
            Value::Number(n) => Ok(Arg::Text(crate::expr::ast::format_number(n))),
            other => Err(mismatch(&other, "text")),
        },
        ParamKind::FunctionFormula => match value {
            Value::Text(s) => Ok(Arg::Formula(parse_formula(&s, resolver, &["x"])?)),
            Value::Number(n) => Ok(Arg::Formula(parse_formula(
                &crate::expr::ast::format_number(n),
                resolver,
                &["x"],
            )?)),
            other => Err(mismatch(&other, "a formula")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoNames;

    impl NameResolver for NoNames {
        fn resolve(&self, name: &str) -> Option<EntityId> {
            (name == "k").then_some(EntityId(9))
        }
    }

    #[test]
    fn test_lookup_aliases() {
        assert_eq!(lookup("Cercle"), Some(Constructor::Circle));
        assert_eq!(lookup("circle"), Some(Constructor::Circle));
        assert_eq!(lookup("Polygone_regulier_centre"), Some(Constructor::RegularPolygon));
        assert_eq!(lookup("Droite"), Some(Constructor::Line));
        assert_eq!(lookup("eval"), None);
        assert!(complete("Seg").contains(&"Segment"));
    }

    #[test]
    fn test_build_with_keywords() {
        let c = build(
            Constructor::RegularPolygon,
            vec![],
            vec![
                ("n".into(), Value::Number(6.0)),
                ("centre".into(), Value::Entity(EntityId(1))),
                ("sommet".into(), Value::Entity(EntityId(2))),
                ("color".into(), Value::Text("blue".into())),
            ],
            &NoNames,
        )
        .unwrap();
        assert_eq!(
            c.args,
            vec![Arg::Entity(EntityId(1)), Arg::Entity(EntityId(2)), Arg::Number(6.0)]
        );
        assert_eq!(c.style.get("color"), Some(&StyleValue::Text("blue".into())));
    }

    #[test]
    fn test_defaults_and_errors() {
        let circle = build(Constructor::Circle, vec![], vec![], &NoNames).unwrap();
        assert!(circle.has_nested());
        assert!(build(Constructor::Midpoint, vec![], vec![], &NoNames).is_err());
        assert!(build(
            Constructor::Point,
            vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)],
            vec![],
            &NoNames
        )
        .is_err());
        assert!(build(
            Constructor::Point,
            vec![Value::Number(1.0)],
            vec![("x".into(), Value::Number(2.0))],
            &NoNames
        )
        .is_err());
        assert!(build(
            Constructor::Polygon,
            vec![Value::Entity(EntityId(1)), Value::Entity(EntityId(2))],
            vec![],
            &NoNames
        )
        .is_err());
    }

    #[test]
    fn test_formulas() {
        let f = build(Constructor::Function, vec![Value::Text("2x+k".into())], vec![], &NoNames).unwrap();
        assert_eq!(f.parents().into_iter().collect::<Vec<_>>(), vec![EntityId(9)]);
        assert!(build(Constructor::Variable, vec![Value::Text("2x".into())], vec![], &NoNames).is_err());
    }
}
