use crate::ast::{Arg, Expr};
use crate::error::ParseError;

/// Parse a target expression.
///
/// The top level must be a series path or a function call; literals are
/// only accepted as function arguments.
///
/// # Examples
///
/// ```
/// use trigwatch_expr::{parse, Expr};
///
/// let expr = parse("movingAverage(servers.web-{01,02}.cpu.*, '5min')").unwrap();
/// assert!(matches!(expr, Expr::Call { ref name, .. } if name == "movingAverage"));
/// assert_eq!(expr.paths(), vec!["servers.web-{01,02}.cpu.*".to_string()]);
///
/// let err = parse("sumSeries(a.b").unwrap_err();
/// assert_eq!(err.position, 13);
/// ```
pub fn parse(target: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser {
        src: target.as_bytes(),
        text: target,
        pos: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return Err(ParseError::new(0, "empty target"));
    }
    let expr = parser.parse_expr()?;
    match expr {
        Expr::Path { .. } | Expr::Call { .. } => {}
        ref other => {
            return Err(ParseError::new(
                other.position(),
                "target must be a series path or a function call",
            ))
        }
    }
    parser.skip_ws();
    if !parser.at_end() {
        return Err(ParseError::new(
            parser.pos,
            format!("unexpected '{}'", parser.peek_char()),
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_char(&self) -> char {
        self.text[self.pos..].chars().next().unwrap_or('\0')
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            None => Err(ParseError::new(start, "unexpected end of target")),
            Some(q @ (b'\'' | b'"')) => self.parse_string(q),
            Some(_) => {
                let token = self.read_token()?;
                if token.is_empty() {
                    return Err(ParseError::new(
                        start,
                        format!("unexpected '{}'", self.peek_char()),
                    ));
                }
                self.skip_ws();
                if self.peek() == Some(b'(') {
                    if !is_identifier(token) {
                        return Err(ParseError::new(
                            start,
                            format!("invalid function name '{token}'"),
                        ));
                    }
                    self.pos += 1;
                    let args = self.parse_args()?;
                    return Ok(Expr::Call {
                        name: token.to_string(),
                        args,
                        position: start,
                    });
                }
                if let Some(value) = parse_number(token) {
                    return Ok(Expr::Number {
                        value,
                        position: start,
                    });
                }
                match token {
                    "true" | "True" => Ok(Expr::Bool {
                        value: true,
                        position: start,
                    }),
                    "false" | "False" => Ok(Expr::Bool {
                        value: false,
                        position: start,
                    }),
                    _ => Ok(Expr::Path {
                        pattern: token.to_string(),
                        position: start,
                    }),
                }
            }
        }
    }

    /// Arguments after the opening parenthesis, consuming the closing one.
    fn parse_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            self.skip_ws();
            let name = self.try_keyword();
            let value = self.parse_expr()?;
            args.push(Arg { name, value });
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                None => return Err(ParseError::new(self.pos, "missing ')'")),
                Some(_) => {
                    return Err(ParseError::new(
                        self.pos,
                        format!("expected ',' or ')', found '{}'", self.peek_char()),
                    ))
                }
            }
        }
    }

    /// Consume `ident=` if present and return the keyword.
    fn try_keyword(&mut self) -> Option<String> {
        let save = self.pos;
        let mut end = self.pos;
        while end < self.src.len() && (self.src[end].is_ascii_alphanumeric() || self.src[end] == b'_')
        {
            end += 1;
        }
        if end == save {
            return None;
        }
        let ident = &self.text[save..end];
        let mut after = end;
        while matches!(self.src.get(after), Some(b' ' | b'\t')) {
            after += 1;
        }
        if self.src.get(after) == Some(&b'=') && is_identifier(ident) {
            self.pos = after + 1;
            Some(ident.to_string())
        } else {
            None
        }
    }

    fn parse_string(&mut self, quote: u8) -> Result<Expr, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(ParseError::new(start, "unterminated string")),
                Some(b'\\') if self.src.get(self.pos + 1) == Some(&quote) => {
                    value.push(quote as char);
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(Expr::Str {
                        value,
                        position: start,
                    });
                }
                Some(_) => {
                    let ch = self.peek_char();
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    /// Path-like token. Commas are only part of a token inside `{...}`.
    fn read_token(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        let mut braces = 0usize;
        let mut brackets = 0usize;
        while let Some(c) = self.peek() {
            let accepted = match c {
                b'{' => {
                    braces += 1;
                    true
                }
                b'}' => {
                    if braces == 0 {
                        return Err(ParseError::new(self.pos, "unbalanced '}'"));
                    }
                    braces -= 1;
                    true
                }
                b'[' => {
                    brackets += 1;
                    true
                }
                b']' => {
                    if brackets == 0 {
                        return Err(ParseError::new(self.pos, "unbalanced ']'"));
                    }
                    brackets -= 1;
                    true
                }
                b',' => braces > 0,
                c => is_path_byte(c),
            };
            if !accepted {
                break;
            }
            self.pos += 1;
        }
        if braces > 0 {
            return Err(ParseError::new(start, "unclosed '{'"));
        }
        if brackets > 0 {
            return Err(ParseError::new(start, "unclosed '['"));
        }
        Ok(&self.text[start..self.pos])
    }
}

fn is_path_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'_' | b'-' | b'.' | b'*' | b'?' | b':' | b'~' | b'^' | b'$' | b'@' | b'%' | b'#' | b'+'
        )
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_number(token: &str) -> Option<f64> {
    let first = token.as_bytes().first()?;
    if !(first.is_ascii_digit() || matches!(first, b'-' | b'+' | b'.')) {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
