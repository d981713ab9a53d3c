//! 命名规则
//!
//! - 修饰符转写：`'` 与 `` ` `` → `_prime`，`"` → `_prime_prime`
//! - 保留名称：关键字、坐标轴名称、内建函数、构造器、视窗参数
//! - 受限名称：`f1`、`f2'` ... 只能用于函数，`Cf1` ... 只能用于曲线
//! - 导数命名：`f_prime` 保留给函数 `f` 的导数
//! - 自动命名：前缀 + 递增编号，最多尝试 1000 次

use crate::constructors;
use crate::definition::Category;
use crate::error::{NameIssue, SheetError, SheetResult};
use crate::expr::builtins::{Builtin, CONSTANTS};
use crate::expr::parser::KEYWORDS;
use crate::interpreter::FORBIDDEN_KEYWORDS;
use once_cell::sync::Lazy;
use rand::distr::Alphabetic;
use rand::Rng;
use regex::Regex;
use rustc_hash::FxHashSet;

/// 视窗边界的只读伪名称
pub const WINDOW_NAMES: &[&str] = &["xmin", "xmax", "ymin", "ymax", "dpx", "dpy"];

/// 视窗参数名称（赋值时由工作表处理）
pub const VIEW_PARAMETERS: &[&str] = &["window", "grid", "show_axes", "show_grid", "show_hidden"];

/// 自动命名的最大尝试次数
pub const MAX_NAME_ATTEMPTS: usize = 1000;

const DERIVATIVE_SUFFIX: &str = "_prime";

static RESERVED: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    let mut set: FxHashSet<&'static str> = FxHashSet::default();
    set.extend(KEYWORDS.iter().copied());
    set.extend(FORBIDDEN_KEYWORDS.iter().copied());
    set.extend(["x", "y", "z", "t", "view", "is", "lambda", "return", "elif", "while", "assert", "break", "continue", "from", "as"]);
    set.extend(Builtin::names());
    set.extend(CONSTANTS.iter().map(|(n, _)| *n));
    set.extend(constructors::all_names());
    set.extend(VIEW_PARAMETERS.iter().copied());
    set
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

static FUNCTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^f[0-9]+(_prime)*$").expect("valid function name regex"));

static CURVE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Cf[0-9]+$").expect("valid curve name regex"));

/// 把修饰符转写为 ASCII 后缀
pub fn convert_decorations(name: &str) -> String {
    name.replace('`', "_prime")
        .replace('"', "_prime_prime")
        .replace('\'', "_prime")
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(name)
}

/// 去掉所有尾部的 `_prime`
pub fn strip_derivatives(name: &str) -> &str {
    let mut base = name;
    while let Some(stripped) = base.strip_suffix(DERIVATIVE_SUFFIX) {
        base = stripped;
    }
    base
}

/// 已有名称的只读视图
pub trait NameLookup {
    fn category_of(&self, name: &str) -> Option<Category>;

    fn all_names(&self) -> Vec<String>;
}

/// 检查名称语法（不检查是否已被占用）
///
/// 返回转写后的名称。
pub fn check_syntax(name: &str, category: Category, names: &dyn NameLookup) -> Result<String, NameIssue> {
    let name = convert_decorations(name);

    if is_reserved(&name) || WINDOW_NAMES.contains(&name.as_str()) {
        return Err(NameIssue::Reserved);
    }
    if name.contains("__") {
        return Err(NameIssue::DoubleSeparator);
    }
    if !IDENTIFIER.is_match(&name) {
        return Err(NameIssue::Malformed);
    }

    if FUNCTION_NAME.is_match(&name) && category != Category::Function {
        return Err(NameIssue::RestrictedCategory("function"));
    }
    if CURVE_NAME.is_match(&name) && category != Category::Curve {
        return Err(NameIssue::RestrictedCategory("curve"));
    }

    if name.ends_with(DERIVATIVE_SUFFIX) {
        if category == Category::Function {
            return Err(NameIssue::DerivativeReserved);
        }
        let base = strip_derivatives(&name);
        if names.category_of(base) == Some(Category::Function) {
            return Err(NameIssue::DerivativeReserved);
        }
    } else if category == Category::Function {
        // `f` 的导数名 `f_prime`、`f_prime_prime` ... 不能已被占用
        if let Some(existing) = names
            .all_names()
            .into_iter()
            .find(|n| *n != name && n.starts_with(&name) && strip_derivatives(n) == name)
        {
            return Err(NameIssue::DerivativeAmbiguous(existing));
        }
    }

    Ok(name)
}

/// 生成未被占用的名称：`prefix` + (已有最大编号 + 1)
///
/// 候选名称不合法时改用 8 个随机字母作前缀重试。
pub fn generate_name(prefix: &str, category: Category, names: &dyn NameLookup) -> SheetResult<String> {
    let mut rng = rand::rng();
    generate_name_with(prefix, category, names, MAX_NAME_ATTEMPTS, || {
        (0..8).map(|_| rng.sample(Alphabetic) as char).collect()
    })
}

/// `generate_name` 的实现；`fresh_prefix` 提供重试用的前缀
fn generate_name_with(
    prefix: &str,
    category: Category,
    names: &dyn NameLookup,
    attempts: usize,
    mut fresh_prefix: impl FnMut() -> String,
) -> SheetResult<String> {
    let existing = names.all_names();
    let mut prefix = prefix.to_string();

    for _ in 0..attempts {
        let next = existing
            .iter()
            .filter_map(|n| n.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|rest| rest.parse::<u64>().ok())
            .max()
            .map_or(1, |n| n + 1);
        let candidate = format!("{}{}", prefix, next);
        if !existing.contains(&candidate) {
            if let Ok(valid) = check_syntax(&candidate, category, names) {
                return Ok(valid);
            }
        }
        prefix = fresh_prefix();
    }

    tracing::warn!("name generation exhausted for prefix '{}'", prefix);
    Err(SheetError::NameExhausted(prefix))
}

/// 校验并转换名称，失败时包装为 `SheetError::Name`
pub fn validate(name: &str, category: Category, names: &dyn NameLookup) -> SheetResult<String> {
    check_syntax(name, category, names).map_err(|issue| SheetError::name(convert_decorations(name), issue))
}
