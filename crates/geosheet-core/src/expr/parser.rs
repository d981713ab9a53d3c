//! 语法分析
//!
//! 受限的表达式文法：
//! - 字面量、名称、属性访问、调用（含关键字参数）、下标
//! - 元组、列表与推导式 `(expr for n in iterable)`
//! - 算术、比较与逻辑运算，`^` 与 `**` 都表示乘方
//! - 语句：赋值、`del`、带缩进体的 `for` 循环

use super::ast::{BinaryOp, Expr, Stmt, Target, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use crate::error::{SheetError, SheetResult};

/// 不能用作名称的关键字
pub const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "for", "del", "if", "else", "pass", "True", "False", "None",
];

/// 括号、一元运算与循环体的最大嵌套层数
pub const MAX_NESTING: usize = 100;

/// 把单行源码解析为表达式（遇到赋值或多余内容时报语法错误）
pub fn parse_expression(source: &str) -> SheetResult<Expr> {
    if source.trim().contains('\n') {
        return Err(SheetError::syntax("multi-line input is not an expression", 0));
    }
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, 0);
    if parser.at_end() {
        return Err(SheetError::syntax("empty expression", 0));
    }
    let expr = parser.expr_list()?;
    parser.expect_end()?;
    Ok(expr)
}

/// 把（可能多行的）源码解析为语句序列
pub fn parse_program(source: &str) -> SheetResult<Vec<Stmt>> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for raw in source.split('\n') {
        let content = raw.trim_end_matches('\r');
        let trimmed = content.trim_start();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            let indent = content.chars().count() - trimmed.chars().count();
            lines.push(Line {
                indent,
                text: trimmed.to_string(),
                offset: offset + indent,
            });
        }
        offset += raw.chars().count() + 1;
    }

    let mut index = 0;
    let program = parse_block(&lines, &mut index, 0, 0)?;
    if let Some(line) = lines.get(index) {
        return Err(SheetError::syntax("unexpected indentation", line.offset));
    }
    Ok(program)
}

struct Line {
    indent: usize,
    text: String,
    offset: usize,
}

fn parse_block(
    lines: &[Line],
    index: &mut usize,
    indent: usize,
    depth: usize,
) -> SheetResult<Vec<Stmt>> {
    if depth > MAX_NESTING {
        let offset = lines.get(*index).map_or(0, |l| l.offset);
        return Err(SheetError::syntax("too many nested blocks", offset));
    }
    let mut body = Vec::new();
    while let Some(line) = lines.get(*index) {
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(SheetError::syntax("unexpected indentation", line.offset));
        }
        *index += 1;

        let tokens = tokenize(&line.text).map_err(|e| shift(e, line.offset))?;
        let mut parser = Parser::new(tokens, line.offset);
        let stmt = parser.statement()?;
        match stmt {
            // `for` 头部以冒号结尾：循环体在后续缩进行中
            PartialStmt::ForHeader { var, iter } => {
                let child_indent = match lines.get(*index) {
                    Some(next) if next.indent > indent => next.indent,
                    _ => {
                        return Err(SheetError::syntax(
                            "expected an indented block",
                            line.offset + line.text.len(),
                        ))
                    }
                };
                let inner = parse_block(lines, index, child_indent, depth + 1)?;
                body.push(Stmt::For {
                    var,
                    iter,
                    body: inner,
                });
            }
            PartialStmt::Complete(stmt) => body.push(stmt),
        }
    }
    Ok(body)
}

fn shift(err: SheetError, offset: usize) -> SheetError {
    match err {
        SheetError::Syntax { message, position } => SheetError::Syntax {
            message,
            position: position + offset,
        },
        other => other,
    }
}

enum PartialStmt {
    Complete(Stmt),
    ForHeader { var: String, iter: Expr },
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    offset: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            offset,
            depth: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.offset
            + self
                .tokens
                .get(self.pos)
                .or_else(|| self.tokens.last())
                .map(|s| s.pos)
                .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> SheetError {
        SheetError::syntax(message, self.position())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> SheetResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// 语法树加深一层；超过 `MAX_NESTING` 报语法错误而不是耗尽栈
    fn deepen(&mut self) -> SheetResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression is nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> SheetResult<T>) -> SheetResult<T> {
        self.deepen()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect_end(&self) -> SheetResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected token"))
        }
    }

    fn identifier(&mut self) -> SheetResult<String> {
        match self.advance() {
            Some(Token::Ident(name)) if !KEYWORDS.contains(&name.as_str()) => Ok(name),
            _ => {
                self.pos -= 1;
                Err(self.error("expected a name"))
            }
        }
    }

    fn statement(&mut self) -> SheetResult<PartialStmt> {
        if self.eat_keyword("del") {
            let mut targets = vec![self.expression()?];
            while self.eat(&Token::Comma) {
                targets.push(self.expression()?);
            }
            self.expect_end()?;
            return Ok(PartialStmt::Complete(Stmt::Delete(targets)));
        }

        if self.eat_keyword("pass") {
            self.expect_end()?;
            return Ok(PartialStmt::Complete(Stmt::Expr(Expr::None)));
        }

        if self.eat_keyword("for") {
            let var = self.identifier()?;
            if !self.eat_keyword("in") {
                return Err(self.error("expected 'in'"));
            }
            let iter = self.expr_list()?;
            self.expect(&Token::Colon, "':'")?;
            if self.at_end() {
                return Ok(PartialStmt::ForHeader { var, iter });
            }
            // 单行形式：`for n in range(3): A.x = n`
            let body = match self.statement()? {
                PartialStmt::Complete(stmt) => stmt,
                PartialStmt::ForHeader { .. } => {
                    return Err(self.error("nested loop needs its own line"))
                }
            };
            return Ok(PartialStmt::Complete(Stmt::For {
                var,
                iter,
                body: vec![body],
            }));
        }

        let expr = self.expr_list()?;
        if self.eat(&Token::Assign) {
            let target = match expr {
                Expr::Name(name) if !KEYWORDS.contains(&name.as_str()) => Target::Name(name),
                Expr::Attribute { target, name } => Target::Attribute {
                    target: *target,
                    name,
                },
                _ => return Err(self.error("cannot assign to this expression")),
            };
            let value = self.expr_list()?;
            self.expect_end()?;
            return Ok(PartialStmt::Complete(Stmt::Assign { target, value }));
        }
        self.expect_end()?;
        Ok(PartialStmt::Complete(Stmt::Expr(expr)))
    }

    /// 顶层逗号分隔的表达式构成元组
    fn expr_list(&mut self) -> SheetResult<Expr> {
        let first = self.expression()?;
        if self.peek() != Some(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.at_end() || matches!(self.peek(), Some(Token::Assign) | Some(Token::Colon)) {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn expression(&mut self) -> SheetResult<Expr> {
        self.nested(Self::or_expr)
    }

    fn or_expr(&mut self) -> SheetResult<Expr> {
        let depth = self.depth;
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            self.deepen()?;
            let right = self.and_expr()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        self.depth = depth;
        Ok(left)
    }

    fn and_expr(&mut self) -> SheetResult<Expr> {
        let depth = self.depth;
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            self.deepen()?;
            let right = self.not_expr()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        self.depth = depth;
        Ok(left)
    }

    fn not_expr(&mut self) -> SheetResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::not_expr)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> SheetResult<Expr> {
        let left = self.sum()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.sum()?;
        Ok(Expr::binary(op, left, right))
    }

    fn sum(&mut self) -> SheetResult<Expr> {
        let depth = self.depth;
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => {
                    self.depth = depth;
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.deepen()?;
            let right = self.term()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn term(&mut self) -> SheetResult<Expr> {
        let depth = self.depth;
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => {
                    self.depth = depth;
                    return Ok(left);
                }
            };
            self.pos += 1;
            self.deepen()?;
            let right = self.unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn unary(&mut self) -> SheetResult<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> SheetResult<Expr> {
        let base = self.postfix()?;
        if matches!(self.peek(), Some(Token::DoubleStar) | Some(Token::Caret)) {
            self.pos += 1;
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> SheetResult<Expr> {
        let depth = self.depth;
        let mut expr = self.atom()?;
        loop {
            if matches!(
                self.peek(),
                Some(Token::LParen) | Some(Token::Dot) | Some(Token::LBracket)
            ) {
                self.deepen()?;
            }
            match self.peek() {
                Some(Token::LParen) => {
                    self.pos += 1;
                    let (args, kwargs) = self.arguments()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.identifier()?;
                    expr = Expr::Attribute {
                        target: Box::new(expr),
                        name,
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => {
                    self.depth = depth;
                    return Ok(expr);
                }
            }
        }
    }

    fn arguments(&mut self) -> SheetResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.eat(&Token::RParen) {
            let keyword = matches!(
                (self.peek(), self.peek_at(1)),
                (Some(Token::Ident(_)), Some(Token::Assign))
            );
            if keyword {
                let key = self.identifier()?;
                self.pos += 1;
                if kwargs.iter().any(|(k, _)| *k == key) {
                    return Err(self.error(format!("keyword argument repeated: {}", key)));
                }
                kwargs.push((key, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expression()?;
                if self.is_keyword("for") {
                    // `f(x for x in ...)`
                    let comprehension = self.comprehension_tail(arg, true)?;
                    args.push(comprehension);
                } else {
                    args.push(arg);
                }
            }
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "')'")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn comprehension_tail(&mut self, element: Expr, lazy: bool) -> SheetResult<Expr> {
        self.eat_keyword("for");
        let var = self.identifier()?;
        if !self.eat_keyword("in") {
            return Err(self.error("expected 'in'"));
        }
        let iter = self.expression()?;
        Ok(Expr::Comprehension {
            element: Box::new(element),
            var,
            iter: Box::new(iter),
            lazy,
        })
    }

    fn sequence(&mut self, close: &Token, what: &str, lazy: bool) -> SheetResult<(Vec<Expr>, bool)> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        while !self.eat(close) {
            let item = self.expression()?;
            if items.is_empty() && self.is_keyword("for") {
                let comprehension = self.comprehension_tail(item, lazy)?;
                self.expect(close, what)?;
                return Ok((vec![comprehension], false));
            }
            items.push(item);
            trailing_comma = self.eat(&Token::Comma);
            if !trailing_comma {
                self.expect(close, what)?;
                break;
            }
        }
        Ok((items, trailing_comma))
    }

    fn atom(&mut self) -> SheetResult<Expr> {
        let token = match self.advance() {
            Some(token) => token,
            None => {
                self.pos -= 1;
                return Err(self.error("unexpected end of input"));
            }
        };
        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Imaginary(n) => Ok(Expr::Imaginary(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => match name.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                word if KEYWORDS.contains(&word) => {
                    self.pos -= 1;
                    Err(self.error(format!("unexpected keyword '{}'", word)))
                }
                _ => Ok(Expr::Name(name)),
            },
            Token::LParen => {
                let (mut items, trailing_comma) = self.sequence(&Token::RParen, "')'", true)?;
                let is_comprehension =
                    matches!(items.first(), Some(Expr::Comprehension { lazy: true, .. }));
                if items.len() == 1 && (!trailing_comma || is_comprehension) {
                    Ok(items.remove(0))
                } else {
                    Ok(Expr::Tuple(items))
                }
            }
            Token::LBracket => {
                let (items, _) = self.sequence(&Token::RBracket, "']'", false)?;
                if matches!(items.as_slice(), [Expr::Comprehension { lazy: false, .. }]) {
                    Ok(items.into_iter().next().unwrap_or(Expr::None))
                } else {
                    Ok(Expr::List(items))
                }
            }
            _ => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(expr: &Expr) -> String {
        expr.render(&|id| format!("#{}", id.0))
    }

    #[test]
    fn test_precedence() {
        let e = parse_expression("1 + 2 * 3 ** 2").unwrap();
        assert_eq!(render(&e), "1 + 2 * 3 ** 2");
        let e = parse_expression("-2^2").unwrap();
        assert!(matches!(e, Expr::Unary { op: UnaryOp::Neg, .. }));
        let e = parse_expression("2x+3").unwrap();
        assert_eq!(render(&e), "2 * x + 3");
    }

    #[test]
    fn test_calls_and_attributes() {
        let e = parse_expression("Point(1, k.value, color=\"red\").x").unwrap();
        match e {
            Expr::Attribute { target, name } => {
                assert_eq!(name, "x");
                match *target {
                    Expr::Call { args, kwargs, .. } => {
                        assert_eq!(args.len(), 2);
                        assert_eq!(kwargs[0].0, "color");
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tuples_and_comprehensions() {
        assert_eq!(parse_expression("(1, 2)").unwrap(), Expr::Tuple(vec![Expr::Number(1.0), Expr::Number(2.0)]));
        assert_eq!(parse_expression("(1)").unwrap(), Expr::Number(1.0));
        assert!(matches!(parse_expression("(1,)").unwrap(), Expr::Tuple(v) if v.len() == 1));
        assert!(matches!(
            parse_expression("((i, i**2) for i in range(3))").unwrap(),
            Expr::Comprehension { lazy: true, .. }
        ));
        assert!(matches!(
            parse_expression("[i for i in range(3)]").unwrap(),
            Expr::Comprehension { lazy: false, .. }
        ));
    }

    #[test]
    fn test_assignment_is_not_an_expression() {
        assert!(matches!(
            parse_expression("A = Point(1, 2)"),
            Err(SheetError::Syntax { .. })
        ));
        let program = parse_program("A = Point(1, 2)").unwrap();
        assert!(matches!(&program[0], Stmt::Assign { target: Target::Name(n), .. } if n == "A"));
    }

    #[test]
    fn test_program_blocks() {
        let program = parse_program("for i in range(3):\n    k.value = i\n    pause()\nA.x = 2\n").unwrap();
        assert_eq!(program.len(), 2);
        match &program[0] {
            Stmt::For { var, body, .. } => {
                assert_eq!(var, "i");
                assert_eq!(body.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&program[1], Stmt::Assign { target: Target::Attribute { .. }, .. }));

        let inline = parse_program("for i in range(2): k.value = i").unwrap();
        assert!(matches!(&inline[0], Stmt::For { body, .. } if body.len() == 1));
    }

    #[test]
    fn test_delete_and_errors() {
        let program = parse_program("del A, B, s").unwrap();
        assert!(matches!(&program[0], Stmt::Delete(t) if t.len() == 3));
        assert!(parse_program("for i in range(3):").is_err());
        assert!(parse_program("A = 1\n  B = 2").is_err());
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("f(a=1, 2)").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(parse_expression(&nested(20)).unwrap(), Expr::Number(1.0));
        assert!(matches!(
            parse_expression(&nested(5000)),
            Err(SheetError::Syntax { .. })
        ));

        assert!(parse_expression(&format!("{}1", "-".repeat(5000))).is_err());
        assert!(parse_expression(&vec!["1"; 5000].join(" + ")).is_err());
        assert!(parse_expression(&vec!["1"; 20].join(" + ")).is_ok());

        let mut program = String::new();
        for level in 0..MAX_NESTING + 5 {
            program.push_str(&" ".repeat(level));
            program.push_str("for i in range(1):\n");
        }
        program.push_str(&" ".repeat(MAX_NESTING + 5));
        program.push_str("pass");
        assert!(matches!(parse_program(&program), Err(SheetError::Syntax { .. })));
    }
}
