//! 命令输入规范化
//!
//! 把简写记法改写为规范的构造调用（纯文本 → 文本）：
//! - `=Point(...)` → `_=Point(...)`，单独的 `del` → `del _`
//! - 修饰符 `'` → `_prime`
//! - `(1,2)` 是坐标对；其余的 `1,2` 是小数 `1.2`
//! - `(A B)` → `Line(A, B)`，`[A B]` → `Segment(A, B)`
//! - `||u||` → `u.norm`，`||A>B||` → `(A>B).norm`
//! - 整条命令为 `1;2`、`(1 2)` ... → `Point(1, 2)`
//! - `` `文本` `` → `Text("文本")`
//! - 方程 `y = 2x + 1` → `_ = LineEquation(...)`（见 [`crate::equation`]）
//!
//! 字符串字面量在改写期间被屏蔽，内容保持原样。
//! 对已经规范的文本，改写是恒等的。

use crate::equation;
use crate::expr::parser::KEYWORDS;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// 带符号的数
const NBR: &str = r"[-+]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)";

/// 变量名
const VAR: &str = r"[A-Za-z_][A-Za-z0-9_]*";

const MASK_OPEN: char = '\u{E000}';
const MASK_CLOSE: char = '\u{E001}';

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid input pattern")
}

static LITERAL: Lazy<Regex> = Lazy::new(|| regex(r#""(?:[^"\\]|\\.)*"|`((?:[^`\\]|\\.)*)`"#));
static MASKED: Lazy<Regex> = Lazy::new(|| regex("\u{E000}([0-9]+)\u{E001}"));
static SPACES: Lazy<Regex> = Lazy::new(|| regex(r"[ \t]+"));
static PAIR: Lazy<Regex> =
    Lazy::new(|| regex(&format!(r"(^|[^A-Za-z0-9_)\]])\(({NBR}),({NBR})\)")));
static DECIMAL: Lazy<Regex> = Lazy::new(|| regex(r"([0-9]),([0-9])"));
static LINE: Lazy<Regex> =
    Lazy::new(|| regex(&format!(r"(^|[^A-Za-z0-9_])\( ?({VAR}) ({VAR}) ?\)")));
static SEGMENT: Lazy<Regex> = Lazy::new(|| regex(&format!(r"\[ ?({VAR}) ({VAR}) ?\]")));
static NORM: Lazy<Regex> = Lazy::new(|| regex(&format!(r"\|\| ?({VAR}) ?\|\|")));
static NORM_AB: Lazy<Regex> = Lazy::new(|| regex(&format!(r"\|\| ?({VAR}) ?> ?({VAR}) ?\|\|")));
static WHOLE_POINT: Lazy<Regex> = Lazy::new(|| {
    regex(&format!(
        r"^(?:\(({NBR}) ?[;, ] ?({NBR})\)|({NBR}) ?[;, ] ?({NBR}))$"
    ))
});
static SEMICOLON: Lazy<Regex> = Lazy::new(|| regex(r" ?; ?"));

/// 命令规范化器
pub struct InputParser;

impl InputParser {
    /// 规范化一条命令；多行命令逐行处理并保留缩进
    pub fn normalize(command: &str) -> String {
        let command = command.trim_end();
        if !command.contains('\n') {
            return Self::normalize_line(command);
        }
        command
            .lines()
            .map(|line| {
                let body = line.trim_start();
                let indent = &line[..line.len() - body.len()];
                if body.is_empty() {
                    String::new()
                } else {
                    format!("{}{}", indent, Self::normalize_line(body))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn normalize_line(command: &str) -> String {
        let (masked, literals) = mask_literals(command);

        let mut text = SPACES.replace_all(masked.trim(), " ").into_owned();
        if text.starts_with('=') {
            text.insert(0, '_');
        }
        if text == "del" {
            text.push_str(" _");
        }
        text = text.replace('\'', "_prime");

        // (1,2) 是坐标对而不是 1.2
        text = PAIR.replace_all(&text, "${1}(${2}, ${3})").into_owned();
        text = DECIMAL.replace_all(&text, "${1}.${2}").into_owned();

        text = LINE
            .replace_all(&text, |caps: &Captures| {
                if is_keyword(&caps[2]) || is_keyword(&caps[3]) {
                    caps[0].to_string()
                } else {
                    format!("{}Line({}, {})", &caps[1], &caps[2], &caps[3])
                }
            })
            .into_owned();
        text = SEGMENT
            .replace_all(&text, |caps: &Captures| {
                if is_keyword(&caps[1]) || is_keyword(&caps[2]) {
                    caps[0].to_string()
                } else {
                    format!("Segment({}, {})", &caps[1], &caps[2])
                }
            })
            .into_owned();
        text = NORM.replace_all(&text, "${1}.norm").into_owned();
        text = NORM_AB.replace_all(&text, "(${1}>${2}).norm").into_owned();

        if let Some(caps) = WHOLE_POINT.captures(&text) {
            let x = caps.get(1).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            let y = caps.get(2).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
            text = format!("Point({}, {})", x, y);
        }
        text = SEMICOLON.replace_all(&text, ", ").into_owned();

        if let Some(shape) = equation::parse_equation(&text) {
            text = shape;
        }

        unmask_literals(&text, &literals)
    }
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// 用占位符替换字符串字面量；反引号文本直接改写为 `Text(...)`
fn mask_literals(command: &str) -> (String, Vec<String>) {
    let mut literals = Vec::new();
    let masked = LITERAL
        .replace_all(command, |caps: &Captures| {
            let literal = match caps.get(1) {
                Some(text) => format!("Text({:?})", text.as_str().replace("\\`", "`")),
                None => caps[0].to_string(),
            };
            literals.push(literal);
            format!("{}{}{}", MASK_OPEN, literals.len() - 1, MASK_CLOSE)
        })
        .into_owned();
    (masked, literals)
}

fn unmask_literals(text: &str, literals: &[String]) -> String {
    MASKED
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| literals.get(i))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(command: &str) -> String {
        InputParser::normalize(command)
    }

    #[test]
    fn test_line_and_segment() {
        assert_eq!(n("(A B)"), "Line(A, B)");
        assert_eq!(n("[A B]"), "Segment(A, B)");
        assert_eq!(n("d = ( A B )"), "d = Line(A, B)");
        assert_eq!(n("(not A)"), "(not A)");
    }

    #[test]
    fn test_norms() {
        assert_eq!(n("||u||"), "u.norm");
        assert_eq!(n("||A>B||"), "(A>B).norm");
    }

    #[test]
    fn test_comma_disambiguation() {
        assert_eq!(n("A=(1,5)"), "A=(1, 5)");
        assert_eq!(n("B = (-2,3)"), "B = (-2, 3)");
        assert_eq!(n("a = g(5,3)"), "a = g(5.3)");
        assert_eq!(n("=Point(1,5 ; g(1,5))"), "_=Point(1.5, g(1.5))");
        assert_eq!(n("a = g2(-1,2)"), "a = g2(-1.2)");
    }

    #[test]
    fn test_whole_command_point() {
        assert_eq!(n("1;2"), "Point(1, 2)");
        assert_eq!(n("(1 2)"), "Point(1, 2)");
        assert_eq!(n("(-1.5 ; 3)"), "Point(-1.5, 3)");
        assert_eq!(n("F = (1;0)"), "F = (1, 0)");
    }

    #[test]
    fn test_decorations_and_text() {
        assert_eq!(n("C_' = _"), "C__prime = _");
        assert_eq!(n("=A'"), "_=A_prime");
        assert_eq!(n("del"), "del _");
        assert_eq!(
            n("txt=`prix unitaire en milliers d'euros`"),
            "txt=Text(\"prix unitaire en milliers d'euros\")"
        );
        assert_eq!(n("t = Text(\"l'été  (A B)\")"), "t = Text(\"l'été  (A B)\")");
    }

    #[test]
    fn test_idempotent_on_canonical_text() {
        for line in [
            "A = Point(1, 5)",
            "s = Segment(A, B, color=\"red\")",
            "k = Variable(\"2 * t + 1\")",
            "txt1 = Text(\"it's\", 0, 0, show_label=False)",
            "ABCDEF = RegularPolygon(O, F, 6)",
        ] {
            assert_eq!(n(line), line);
        }
    }

    #[test]
    fn test_multiline_keeps_indentation() {
        assert_eq!(
            n("for i in range(3):\n    M  = (i;0)"),
            "for i in range(3):\n    M = (i, 0)"
        );
    }

    #[test]
    fn test_equations() {
        assert_eq!(n("y = 2x + 1"), "_ = LineEquation(-2, 1, -1)");
        assert_eq!(n("x^2 + y^2 = 4"), "_ = CircleEquation(0, 0, -4)");
        assert_eq!(n("A.x = 3"), "A.x = 3");
    }
}
