//! 词法分析

use crate::error::{SheetError, SheetResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Imaginary(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    Percent,
    Caret,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// 带位置（字符偏移）的词法单元
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// 切分一行源码
///
/// 数字后紧跟标识符或左括号时插入隐式乘号（`2x`、`3(x+1)`）。
pub fn tokenize(source: &str) -> SheetResult<Vec<Spanned>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let (value, end) = read_number(&chars, i)?;
            i = end;
            let imaginary = chars.get(i) == Some(&'j')
                && !chars.get(i + 1).is_some_and(|&n| is_ident_char(n));
            if imaginary {
                i += 1;
                tokens.push(Spanned {
                    token: Token::Imaginary(value),
                    pos: start,
                });
            } else {
                tokens.push(Spanned {
                    token: Token::Number(value),
                    pos: start,
                });
            }
            if chars
                .get(i)
                .is_some_and(|&n| is_ident_start(n) || n == '(')
            {
                tokens.push(Spanned {
                    token: Token::Star,
                    pos: i,
                });
            }
            continue;
        }

        if is_ident_start(c) {
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Spanned {
                token: Token::Ident(chars[start..i].iter().collect()),
                pos: start,
            });
            continue;
        }

        if c == '"' {
            let (text, end) = read_string(&chars, i)?;
            i = end;
            tokens.push(Spanned {
                token: Token::Str(text),
                pos: start,
            });
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            (':', _) => (Token::Colon, 1),
            ('=', _) => (Token::Assign, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('^', _) => (Token::Caret, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            _ => {
                return Err(SheetError::syntax(
                    format!("unexpected character '{}'", c),
                    start,
                ))
            }
        };
        i += width;
        tokens.push(Spanned { token, pos: start });
    }

    Ok(tokens)
}

fn read_number(chars: &[char], start: usize) -> SheetResult<(f64, usize)> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    } else if chars.get(i) == Some(&'.')
        && !chars.get(i + 1).is_some_and(|&n| is_ident_start(n))
    {
        // `1.` 形式
        i += 1;
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+') | Some('-')) {
            j += 1;
        }
        if chars.get(j).is_some_and(|d| d.is_ascii_digit()) {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|v| (v, i))
        .map_err(|_| SheetError::syntax(format!("invalid number '{}'", text), start))
}

fn read_string(chars: &[char], start: usize) -> SheetResult<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| SheetError::syntax("unterminated string", start))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'u' if chars.get(i + 2) == Some(&'{') => {
                        let close = chars[i + 3..]
                            .iter()
                            .position(|&c| c == '}')
                            .ok_or_else(|| SheetError::syntax("invalid unicode escape", i))?;
                        let hex: String = chars[i + 3..i + 3 + close].iter().collect();
                        let c = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| SheetError::syntax("invalid unicode escape", i))?;
                        out.push(c);
                        i += 3 + close + 1;
                        continue;
                    }
                    other => out.push(*other),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(SheetError::syntax("unterminated string", start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_implicit_multiplication() {
        assert_eq!(
            kinds("2x+3"),
            vec![
                Token::Number(2.0),
                Token::Star,
                Token::Ident("x".into()),
                Token::Plus,
                Token::Number(3.0)
            ]
        );
        assert_eq!(kinds("3(x)")[1], Token::Star);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1.5e3"), vec![Token::Number(1500.0)]);
        assert_eq!(kinds("2j"), vec![Token::Imaginary(2.0)]);
        assert_eq!(kinds(".5"), vec![Token::Number(0.5)]);
    }

    #[test]
    fn test_strings_and_operators() {
        assert_eq!(
            kinds(r#"t = "say \"hi\"" ** 2"#),
            vec![
                Token::Ident("t".into()),
                Token::Assign,
                Token::Str("say \"hi\"".into()),
                Token::DoubleStar,
                Token::Number(2.0)
            ]
        );
        assert!(tokenize("\"open").is_err());
        assert!(tokenize("a ? b").is_err());
    }
}
