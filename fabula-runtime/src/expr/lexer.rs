//! # 表达式词法分析
//!
//! 手写的字符扫描器，无正则依赖。

use super::EvalError;

/// 词法单元种类
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Assign,
    Semi,
}

/// 词法单元
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 源串中的字节偏移
    pub pos: usize,
    /// 与上一个词法单元之间是否有换行（语句分隔使用）
    pub newline_before: bool,
}

/// 扫描整个输入
pub fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> EvalError {
        EvalError::Parse {
            pos,
            message: message.into(),
        }
    }

    /// 跳过空白，返回其间是否出现换行
    fn skip_whitespace(&mut self) -> bool {
        let mut saw_newline = false;
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            if c == '\n' {
                saw_newline = true;
            }
            self.consume_char();
        }
        saw_newline
    }

    fn next_token(&mut self) -> Result<Option<Token>, EvalError> {
        let newline_before = self.skip_whitespace();
        let start = self.pos;

        let c = match self.peek_char() {
            Some(c) => c,
            None => return Ok(None),
        };

        let kind = if c.is_ascii_digit() {
            self.scan_number(start)?
        } else if c == '"' || c == '\'' {
            self.scan_string(c, start)?
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            self.scan_ident()
        } else {
            self.scan_punct(c, start)?
        };

        Ok(Some(Token {
            kind,
            pos: start,
            newline_before,
        }))
    }

    fn scan_number(&mut self, start: usize) -> Result<TokenKind, EvalError> {
        let mut is_float = false;

        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.consume_char();
        }
        // 小数部分
        if self.peek_char() == Some('.')
            && self.input[self.pos + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.consume_char();
            while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                self.consume_char();
            }
        }
        // 指数部分
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let mark = self.pos;
            self.consume_char();
            if matches!(self.peek_char(), Some('+') | Some('-')) {
                self.consume_char();
            }
            if matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                    self.consume_char();
                }
            } else {
                // 不是指数，回退（可能是标识符 e 开头的后缀，按边界处理）
                self.pos = mark;
            }
        }

        let text = &self.input[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(start, format!("无法解析数字 '{}'", text)))
        } else {
            match text.parse::<i64>() {
                Ok(n) => Ok(TokenKind::Int(n)),
                // 超出整数范围时退化为浮点
                Err(_) => text
                    .parse::<f64>()
                    .map(TokenKind::Float)
                    .map_err(|_| self.error(start, format!("无法解析数字 '{}'", text))),
            }
        }
    }

    fn scan_string(&mut self, quote: char, start: usize) -> Result<TokenKind, EvalError> {
        self.consume_char(); // 开始引号
        let mut value = String::new();

        loop {
            let c = self
                .consume_char()
                .ok_or_else(|| self.error(start, format!("字符串未闭合，缺少 {}", quote)))?;

            if c == quote {
                return Ok(TokenKind::Str(value));
            }
            if c != '\\' {
                value.push(c);
                continue;
            }

            let escaped = self
                .consume_char()
                .ok_or_else(|| self.error(start, "字符串在转义序列中结束"))?;
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                '\\' | '"' | '\'' => value.push(escaped),
                other => {
                    return Err(self.error(
                        self.pos,
                        format!("无法识别的转义序列 '\\{}'", other),
                    ));
                }
            }
        }
    }

    fn scan_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.consume_char();
            } else {
                break;
            }
        }

        match &self.input[start..self.pos] {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            ident => TokenKind::Ident(ident.to_string()),
        }
    }

    fn scan_punct(&mut self, c: char, start: usize) -> Result<TokenKind, EvalError> {
        self.consume_char();
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semi,
            '!' => {
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.consume_char();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.peek_char() == Some('&') {
                    self.consume_char();
                    TokenKind::AndAnd
                } else {
                    return Err(self.error(start, "期望 '&&'"));
                }
            }
            '|' => {
                if self.peek_char() == Some('|') {
                    self.consume_char();
                    TokenKind::OrOr
                } else {
                    return Err(self.error(start, "期望 '||'"));
                }
            }
            other => {
                return Err(self.error(start, format!("意外字符 '{}'", other)));
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42)]);
        assert_eq!(kinds("1.5"), vec![TokenKind::Float(1.5)]);
        assert_eq!(kinds("2e3"), vec![TokenKind::Float(2000.0)]);
        // 点号后没有数字时不是小数
        assert_eq!(
            kinds("1.x"),
            vec![
                TokenKind::Int(1),
                TokenKind::Dot,
                TokenKind::Ident("x".to_string())
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds(r#""hi""#), vec![TokenKind::Str("hi".to_string())]);
        assert_eq!(kinds("'a b'"), vec![TokenKind::Str("a b".to_string())]);
        assert_eq!(
            kinds(r#""a\nb\"c""#),
            vec![TokenKind::Str("a\nb\"c".to_string())]
        );

        assert!(tokenize("\"没闭合").is_err());
        assert!(tokenize(r#""\q""#).is_err());
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a == b != c <= d >= e && f || !g"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::EqEq,
                TokenKind::Ident("b".to_string()),
                TokenKind::BangEq,
                TokenKind::Ident("c".to_string()),
                TokenKind::Le,
                TokenKind::Ident("d".to_string()),
                TokenKind::Ge,
                TokenKind::Ident("e".to_string()),
                TokenKind::AndAnd,
                TokenKind::Ident("f".to_string()),
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::Ident("g".to_string()),
            ]
        );

        assert!(tokenize("a & b").is_err());
        assert!(tokenize("a | b").is_err());
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("true false null truthy"),
            vec![
                TokenKind::True,
                TokenKind::False,
                TokenKind::Null,
                TokenKind::Ident("truthy".to_string()),
            ]
        );
    }

    #[test]
    fn test_newline_tracking() {
        let tokens = tokenize("a\nb c").unwrap();
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before);
        assert!(!tokens[2].newline_before);
    }
}
