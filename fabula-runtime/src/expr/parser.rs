//! # 表达式语法分析
//!
//! 递归下降解析器，按 JavaScript 的优先级阶梯组织：
//!
//! ```text
//! or → and → equality → comparison → additive → multiplicative
//!    → unary → postfix(属性/下标) → primary
//! ```

use super::lexer::{tokenize, Token, TokenKind};
use super::{Assign, BinOp, EvalError, Expr, TargetSeg, UnaryOp};

/// 解析单个完整表达式，末尾不允许有多余内容
pub fn parse_expression(src: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(src)?;
    let mut parser = ExprParser::new(src, tokens);
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(token.pos, "表达式末尾存在多余内容"));
    }
    Ok(expr)
}

/// 解析赋值语句序列（eval 指令的受限语法）
///
/// 语句形如 `this.X = 表达式` 或 `vars.X = 表达式`（允许多级属性与
/// 下标目标），以 `;` 或换行分隔。
pub fn parse_program(src: &str) -> Result<Vec<Assign>, EvalError> {
    let tokens = tokenize(src)?;
    let mut parser = ExprParser::new(src, tokens);
    let mut program = Vec::new();

    loop {
        // 吃掉语句分隔符
        while parser.eat(&TokenKind::Semi) {}
        if parser.peek().is_none() {
            break;
        }
        program.push(parser.parse_assign()?);

        // 语句之间必须有 `;` 或换行
        match parser.peek() {
            None => break,
            Some(token) if token.kind == TokenKind::Semi || token.newline_before => {}
            Some(token) => {
                return Err(parser.error_at(token.pos, "语句之间需要 ';' 或换行"));
            }
        }
    }

    Ok(program)
}

struct ExprParser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn new(src: &'a str, tokens: Vec<Token>) -> Self {
        Self { src, tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), EvalError> {
        if self.eat(kind) {
            Ok(())
        } else {
            let pos = self.peek().map(|t| t.pos).unwrap_or(self.src.len());
            Err(self.error_at(pos, format!("期望 {}", what)))
        }
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> EvalError {
        EvalError::Parse {
            pos,
            message: message.into(),
        }
    }

    fn unexpected_end(&self) -> EvalError {
        self.error_at(self.src.len(), "表达式意外结束")
    }

    //-------------------------------------------------------------------------
    // 优先级阶梯
    //-------------------------------------------------------------------------

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::EqEq) => BinOp::Eq,
                Some(TokenKind::BangEq) => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::Le) => BinOp::Le,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::Ge) => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => Some(UnaryOp::Neg),
            Some(TokenKind::Plus) => Some(UnaryOp::Pos),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("属性名")?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_or()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let token = self.advance().ok_or_else(|| self.unexpected_end())?;
        match token.kind {
            TokenKind::Int(n) => Ok(Expr::Literal(crate::node::Node::Int(n))),
            TokenKind::Float(n) => Ok(Expr::Literal(crate::node::Node::Float(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(crate::node::Node::Str(s))),
            TokenKind::True => Ok(Expr::Literal(crate::node::Node::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(crate::node::Node::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(crate::node::Node::Null)),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::LParen => {
                let expr = self.parse_or()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        // 允许尾随逗号
                        if self.peek().map(|t| &t.kind) == Some(&TokenKind::RBracket) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                }
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                if !self.eat(&TokenKind::RBrace) {
                    loop {
                        let key = self.parse_object_key()?;
                        self.expect(&TokenKind::Colon, "':'")?;
                        let value = self.parse_or()?;
                        entries.push((key, value));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        if self.peek().map(|t| &t.kind) == Some(&TokenKind::RBrace) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBrace, "'}'")?;
                }
                Ok(Expr::Object(entries))
            }
            _ => Err(self.error_at(token.pos, "无法解析的表达式开头")),
        }
    }

    fn parse_object_key(&mut self) -> Result<String, EvalError> {
        let token = self.advance().ok_or_else(|| self.unexpected_end())?;
        match token.kind {
            TokenKind::Ident(name) => Ok(name),
            TokenKind::Str(s) => Ok(s),
            _ => Err(self.error_at(token.pos, "对象键必须是标识符或字符串")),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, EvalError> {
        let token = self.advance().ok_or_else(|| self.unexpected_end())?;
        match token.kind {
            TokenKind::Ident(name) => Ok(name),
            _ => Err(self.error_at(token.pos, format!("期望{}", what))),
        }
    }

    //-------------------------------------------------------------------------
    // 赋值语句
    //-------------------------------------------------------------------------

    fn parse_assign(&mut self) -> Result<Assign, EvalError> {
        let token = self.advance().ok_or_else(|| self.unexpected_end())?;
        let root_pos = token.pos;
        match token.kind {
            TokenKind::Ident(name) if name == "this" || name == "vars" => {}
            _ => {
                return Err(self.error_at(
                    root_pos,
                    "eval 只接受对 this.X / vars.X 的赋值语句",
                ));
            }
        }

        let mut path = Vec::new();
        loop {
            if self.eat(&TokenKind::Dot) {
                path.push(TargetSeg::Member(self.expect_ident("属性名")?));
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_or()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                path.push(TargetSeg::Index(index));
            } else {
                break;
            }
        }
        if path.is_empty() {
            return Err(self.error_at(root_pos, "赋值目标缺少属性，如 this.x"));
        }

        self.expect(&TokenKind::Assign, "'='")?;
        let value = self.parse_or()?;
        Ok(Assign { path, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 解析为 1 + (2 * 3)
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary(BinOp::Add, left, right) => {
                assert_eq!(*left, Expr::Literal(Node::Int(1)));
                assert!(matches!(*right, Expr::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("结构不对: {:?}", other),
        }

        // 比较的优先级低于算术
        let expr = parse_expression("x + 1 > 2").unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::Gt, _, _)));

        // 逻辑或的优先级最低
        let expr = parse_expression("a == 1 || b == 2").unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::Or, _, _)));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expression("a.b[0].c").unwrap();
        // ((a.b)[0]).c
        match expr {
            Expr::Member(inner, name) => {
                assert_eq!(name, "c");
                assert!(matches!(*inner, Expr::Index(_, _)));
            }
            other => panic!("结构不对: {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        assert!(matches!(
            parse_expression("[1, 2, 3]").unwrap(),
            Expr::List(items) if items.len() == 3
        ));
        assert!(matches!(
            parse_expression(r#"{a: 1, "b c": 2}"#).unwrap(),
            Expr::Object(entries) if entries.len() == 2
        ));
        assert!(matches!(
            parse_expression("(1)").unwrap(),
            Expr::Literal(Node::Int(1))
        ));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse_expression("1 2").is_err());
        assert!(parse_expression("a ==").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("(a").is_err());
    }

    #[test]
    fn test_program_assignments() {
        let program = parse_program("this.x = 1; this.y = x + 1").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(&program[0].path[0], TargetSeg::Member(n) if n == "x"));

        // 换行也是语句分隔符
        let program = parse_program("this.a = 1\nthis.b = 2").unwrap();
        assert_eq!(program.len(), 2);

        // 多级目标
        let program = parse_program(r#"vars["k"].field = true"#).unwrap();
        assert_eq!(program[0].path.len(), 2);
    }

    #[test]
    fn test_program_rejects_non_assignments() {
        assert!(parse_program("x = 1").is_err());
        assert!(parse_program("this = 1").is_err());
        assert!(parse_program("1 + 1").is_err());
        assert!(parse_program("this.x = 1 this.y = 2").is_err());
    }

    #[test]
    fn test_empty_program_ok() {
        assert!(parse_program("").unwrap().is_empty());
        assert!(parse_program(" ; ; ").unwrap().is_empty());
    }
}
