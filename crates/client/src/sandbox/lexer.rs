//! Tokenizer for extraction programs.
//!
//! Indentation is significant: leading whitespace at depth zero becomes
//! `Indent` / `Dedent` tokens, and line breaks inside brackets are ignored.

use super::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Longest first, so `//=` wins over `//` and `/`.
const OPERATORS: &[&str] = &[
    "**=", "//=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "//", "**", "->", "+", "-", "*", "/", "%",
    "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@", "&", "|", "^", "~",
];

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, SandboxError> {
    let mut lexer = Lexer { src, pos: 0, line: 1, depth: 0, indents: vec![0], tokens: Vec::new() };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Syntax { line: self.line, message: message.into() }
    }

    fn ends_logical_line(&self) -> bool {
        matches!(self.tokens.last(), None | Some(Token { tok: Tok::Newline | Tok::Indent | Tok::Dedent, .. }))
    }

    fn newline(&mut self) {
        if !self.ends_logical_line() {
            self.push(Tok::Newline);
        }
    }

    fn run(&mut self) -> Result<(), SandboxError> {
        let mut line_start = true;

        loop {
            if line_start && self.depth == 0 {
                if !self.indentation()? {
                    continue;
                }
                line_start = false;
            }

            let Some(c) = self.peek() else {
                break;
            };

            match c {
                '\n' => {
                    if self.depth == 0 {
                        self.newline();
                        line_start = true;
                    }
                    self.bump();
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.bump();
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.name_or_prefixed_string()?,
                '"' | '\'' => {
                    let s = self.string(false)?;
                    self.push(Tok::Str(s));
                }
                ';' if self.depth == 0 => {
                    self.bump();
                    self.newline();
                }
                _ => self.operator()?,
            }
        }

        self.newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure leading whitespace and emit indentation tokens.
    ///
    /// Returns `false` for blank and comment-only lines, which are consumed.
    fn indentation(&mut self) -> Result<bool, SandboxError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => return Ok(true),
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.bump();
                }
                return Ok(false);
            }
            Some('\n') => {
                self.bump();
                return Ok(false);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn number(&mut self) -> Result<(), SandboxError> {
        let start = self.pos;
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
            } else if (c == 'e' || c == 'E')
                && self.peek_at(1).is_some_and(|d| d.is_ascii_digit() || d == '-' || d == '+')
            {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some('-' | '+')) {
                    self.bump();
                }
            } else {
                break;
            }
        }

        let text: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        let tok = if is_float {
            Tok::Float(text.parse().map_err(|_| self.error(format!("invalid number literal {text:?}")))?)
        } else {
            Tok::Int(text.parse().map_err(|_| self.error(format!("integer literal too large: {text}")))?)
        };
        self.push(tok);
        Ok(())
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), SandboxError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.src[start..self.pos];

        if matches!(self.peek(), Some('"' | '\'')) {
            let prefix = word.to_ascii_lowercase();
            match prefix.as_str() {
                "r" => {
                    let s = self.string(true)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                "u" => {
                    let s = self.string(false)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                p if p.contains('f') => return Err(self.error("f-strings are not supported; use + and str()")),
                p if p.contains('b') => return Err(self.error("byte strings are not supported")),
                _ => {}
            }
        }

        let word = word.to_string();
        self.push(Tok::Name(word));
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<String, SandboxError> {
        let start_line = self.line;
        let Some(quote) = self.bump() else {
            return Err(self.error("unterminated string"));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(SandboxError::Syntax { line: start_line, message: "unterminated string".into() });
            };

            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                out.push(c);
                continue;
            }

            match c {
                '\n' if !triple => {
                    return Err(SandboxError::Syntax { line: start_line, message: "unterminated string".into() });
                }
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.bump() {
                        out.push(next);
                    }
                }
                '\\' => self.escape(&mut out)?,
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn escape(&mut self, out: &mut String) -> Result<(), SandboxError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated string"));
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => {}
            'u' | 'x' => {
                let len = if c == 'u' { 4 } else { 2 };
                let mut hex = String::with_capacity(len);
                for _ in 0..len {
                    match self.bump() {
                        Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                        _ => return Err(self.error("truncated \\u or \\x escape")),
                    }
                }
                let code = u32::from_str_radix(&hex, 16).map_err(|_| self.error("invalid escape"))?;
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn operator(&mut self) -> Result<(), SandboxError> {
        let rest = &self.src[self.pos..];
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
            let c = self.peek().unwrap_or('?');
            return Err(self.error(format!("unexpected character {c:?}")));
        };

        match *op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => {
                self.depth = self.depth.checked_sub(1).ok_or_else(|| self.error(format!("unmatched '{op}'")))?;
            }
            _ => {}
        }

        self.pos += op.len();
        self.push(Tok::Op(op));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            toks("x = 1\n"),
            vec![Tok::Name("x".into()), Tok::Op("="), Tok::Int(1), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = toks("if x:\n    y = 1\nz = 2\n");
        assert!(tokens.contains(&Tok::Indent));
        assert!(tokens.contains(&Tok::Dedent));
        let indent = tokens.iter().position(|t| *t == Tok::Indent).unwrap();
        let dedent = tokens.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn test_brackets_join_lines() {
        let tokens = toks("x = [\n  1,\n  2,\n]\n");
        assert_eq!(tokens.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!tokens.contains(&Tok::Indent));
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        let tokens = toks("# heading\n\nx = 1  # trailing\n\n   # indented comment\ny = 2\n");
        assert!(!tokens.contains(&Tok::Indent));
        assert_eq!(tokens.iter().filter(|t| **t == Tok::Newline).count(), 2);
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(toks(r#"'a\n"b"'"#)[0], Tok::Str("a\n\"b\"".into()));
        assert_eq!(toks(r#"r'\d+'"#)[0], Tok::Str("\\d+".into()));
        assert_eq!(toks("\"\"\"one\ntwo\"\"\"")[0], Tok::Str("one\ntwo".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("2.5")[0], Tok::Float(2.5));
        assert_eq!(toks("1e3")[0], Tok::Float(1000.0));
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(toks("a //= 2")[1], Tok::Op("//="));
        assert_eq!(toks("a == b")[1], Tok::Op("=="));
    }

    #[test]
    fn test_fstring_rejected() {
        assert!(matches!(tokenize("x = f'{y}'"), Err(SandboxError::Syntax { .. })));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(tokenize("x = 'abc\n"), Err(SandboxError::Syntax { line: 1, .. })));
    }

    #[test]
    fn test_bad_dedent() {
        assert!(tokenize("if x:\n    y = 1\n  z = 2\n").is_err());
    }
}
