use super::*;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplatePart {
    Str(String),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Num(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Ident(String),
    Punct(&'static str),
    Regex { pattern: String, flags: String },
    Eof,
}

#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub(crate) token: Token,
    pub(crate) line: usize,
    pub(crate) newline_before: bool,
}

const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==", "!=",
    "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%",
    "&", "|", "^", "!", "~", "?", ":", "=", ".",
];

const KEYWORDS_BEFORE_EXPRESSION: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof", "yield", "await",
];

struct Cursor<'a> {
    src: &'a str,
    i: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, i: 0, line: 1 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.i).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes().get(self.i + offset).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.i..].chars().next()
    }

    fn bump_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.i += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.i..]
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::ScriptParse(format!("{} (line {})", message.into(), self.line))
    }

    /// Skips whitespace and comments, reporting whether a line break was crossed.
    fn skip_trivia(&mut self) -> Result<bool> {
        let mut newline = false;
        loop {
            match self.peek_char() {
                Some('\n') => {
                    newline = true;
                    self.bump_char();
                }
                Some(ch) if ch.is_whitespace() || ch == '\u{feff}' => {
                    self.bump_char();
                }
                Some('/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(ch) = self.peek_char() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump_char();
                    }
                }
                Some('/') if self.peek_at(1) == Some(b'*') => {
                    let Some(end) = self.rest()[2..].find("*/") else {
                        return Err(self.error("unterminated comment"));
                    };
                    let comment = &self.rest()[..end + 4];
                    if comment.contains('\n') {
                        newline = true;
                    }
                    self.line += comment.matches('\n').count();
                    self.i += end + 4;
                }
                _ => return Ok(newline),
            }
        }
    }
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>> {
    let mut cursor = Cursor::new(src);
    let mut out: Vec<Spanned> = Vec::new();

    loop {
        let newline_before = cursor.skip_trivia()?;
        let line = cursor.line;
        let Some(ch) = cursor.peek_char() else {
            out.push(Spanned {
                token: Token::Eof,
                line,
                newline_before: true,
            });
            return Ok(out);
        };

        let token = if ch.is_ascii_digit()
            || (ch == '.' && cursor.peek_at(1).is_some_and(|b| b.is_ascii_digit()))
        {
            lex_number(&mut cursor)?
        } else if ch == '"' || ch == '\'' {
            cursor.bump_char();
            Token::Str(lex_string(&mut cursor, ch)?)
        } else if ch == '`' {
            cursor.bump_char();
            Token::Template(lex_template(&mut cursor)?)
        } else if is_ident_start(ch) {
            Token::Ident(lex_ident(&mut cursor))
        } else if ch == '/' && regex_allowed(out.last().map(|spanned| &spanned.token)) {
            cursor.bump_char();
            lex_regex(&mut cursor)?
        } else {
            lex_punct(&mut cursor)?
        };

        out.push(Spanned {
            token,
            line,
            newline_before,
        });
    }
}

fn regex_allowed(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(Token::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
        Some(Token::Ident(name)) => KEYWORDS_BEFORE_EXPRESSION.contains(&name.as_str()),
        Some(_) => false,
    }
}

fn is_ident_start(ch: char) -> bool {
    ch == '$' || ch == '_' || ch.is_alphabetic()
}

fn is_ident_continue(ch: char) -> bool {
    is_ident_start(ch) || ch.is_alphanumeric() || ch == '\u{200c}' || ch == '\u{200d}'
}

fn lex_ident(cursor: &mut Cursor<'_>) -> String {
    let start = cursor.i;
    while cursor.peek_char().is_some_and(is_ident_continue) {
        cursor.bump_char();
    }
    cursor.src[start..cursor.i].to_string()
}

fn lex_number(cursor: &mut Cursor<'_>) -> Result<Token> {
    let start = cursor.i;
    if cursor.peek() == Some(b'0') {
        let radix = match cursor.peek_at(1) {
            Some(b'x' | b'X') => Some(16),
            Some(b'o' | b'O') => Some(8),
            Some(b'b' | b'B') => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            cursor.i += 2;
            let digits_start = cursor.i;
            while cursor
                .peek()
                .is_some_and(|b| (b as char).is_digit(radix) || b == b'_')
            {
                cursor.i += 1;
            }
            let digits = cursor.src[digits_start..cursor.i].replace('_', "");
            let value = u64::from_str_radix(&digits, radix)
                .map_err(|_| cursor.error("invalid numeric literal"))?;
            return Ok(Token::Num(value as f64));
        }
    }

    let mut seen_dot = false;
    let mut seen_exp = false;
    while let Some(b) = cursor.peek() {
        match b {
            b'0'..=b'9' | b'_' => cursor.i += 1,
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                cursor.i += 1;
            }
            b'e' | b'E' if !seen_exp => {
                seen_exp = true;
                cursor.i += 1;
                if matches!(cursor.peek(), Some(b'+' | b'-')) {
                    cursor.i += 1;
                }
            }
            _ => break,
        }
    }
    if cursor.peek_char().is_some_and(is_ident_start) {
        return Err(cursor.error("identifier starts immediately after numeric literal"));
    }
    let raw = cursor.src[start..cursor.i].replace('_', "");
    raw.parse::<f64>()
        .map(Token::Num)
        .map_err(|_| cursor.error(format!("invalid numeric literal '{raw}'")))
}

fn lex_escape(cursor: &mut Cursor<'_>, out: &mut String) -> Result<()> {
    let Some(ch) = cursor.bump_char() else {
        return Err(cursor.error("unterminated escape sequence"));
    };
    match ch {
        'n' => out.push('\n'),
        't' => out.push('\t'),
        'r' => out.push('\r'),
        'b' => out.push('\u{8}'),
        'f' => out.push('\u{c}'),
        'v' => out.push('\u{b}'),
        '0' if !cursor.peek().is_some_and(|b| b.is_ascii_digit()) => out.push('\0'),
        '\r' => {
            if cursor.peek() == Some(b'\n') {
                cursor.bump_char();
            }
        }
        '\n' | '\u{2028}' | '\u{2029}' => {}
        'x' => {
            let hex = cursor.rest().get(..2).unwrap_or_default();
            let code = u32::from_str_radix(hex, 16)
                .map_err(|_| cursor.error("invalid hexadecimal escape sequence"))?;
            cursor.i += 2;
            out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
        }
        'u' => {
            let code = if cursor.peek() == Some(b'{') {
                let Some(end) = cursor.rest().find('}') else {
                    return Err(cursor.error("invalid Unicode escape sequence"));
                };
                let hex = &cursor.rest()[1..end];
                let code = u32::from_str_radix(hex, 16)
                    .map_err(|_| cursor.error("invalid Unicode escape sequence"))?;
                cursor.i += end + 1;
                code
            } else {
                let code = read_hex4(cursor)?;
                // Surrogate pairs written as two escapes.
                if (0xd800..0xdc00).contains(&code) && cursor.rest().starts_with("\\u") {
                    let saved = cursor.i;
                    cursor.i += 2;
                    match read_hex4(cursor) {
                        Ok(low) if (0xdc00..0xe000).contains(&low) => {
                            0x10000 + ((code - 0xd800) << 10) + (low - 0xdc00)
                        }
                        _ => {
                            cursor.i = saved;
                            code
                        }
                    }
                } else {
                    code
                }
            };
            out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
        }
        other => out.push(other),
    }
    Ok(())
}

fn read_hex4(cursor: &mut Cursor<'_>) -> Result<u32> {
    let hex = cursor.rest().get(..4).unwrap_or_default();
    let code =
        u32::from_str_radix(hex, 16).map_err(|_| cursor.error("invalid Unicode escape sequence"))?;
    cursor.i += 4;
    Ok(code)
}

fn lex_string(cursor: &mut Cursor<'_>, quote: char) -> Result<String> {
    let mut out = String::new();
    loop {
        match cursor.bump_char() {
            None | Some('\n') => return Err(cursor.error("unterminated string literal")),
            Some('\\') => lex_escape(cursor, &mut out)?,
            Some(ch) if ch == quote => return Ok(out),
            Some(ch) => out.push(ch),
        }
    }
}

fn lex_template(cursor: &mut Cursor<'_>) -> Result<Vec<TemplatePart>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    loop {
        match cursor.bump_char() {
            None => return Err(cursor.error("unterminated template literal")),
            Some('`') => {
                parts.push(TemplatePart::Str(current));
                return Ok(parts);
            }
            Some('\\') => lex_escape(cursor, &mut current)?,
            Some('$') if cursor.peek() == Some(b'{') => {
                cursor.bump_char();
                parts.push(TemplatePart::Str(std::mem::take(&mut current)));
                let start = cursor.i;
                skip_balanced_braces(cursor)?;
                parts.push(TemplatePart::Expr(cursor.src[start..cursor.i - 1].to_string()));
            }
            Some(ch) => current.push(ch),
        }
    }
}

// Consumes up to and including the `}` closing a template substitution.
fn skip_balanced_braces(cursor: &mut Cursor<'_>) -> Result<()> {
    let mut depth = 1usize;
    loop {
        match cursor.bump_char() {
            None => return Err(cursor.error("unterminated template substitution")),
            Some('{') => depth += 1,
            Some('}') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Some(quote @ ('"' | '\'')) => {
                lex_string(cursor, quote)?;
            }
            Some('`') => {
                stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || lex_template(cursor))?;
            }
            Some(_) => {}
        }
    }
}

fn lex_regex(cursor: &mut Cursor<'_>) -> Result<Token> {
    let mut pattern = String::new();
    let mut in_class = false;
    loop {
        match cursor.bump_char() {
            None | Some('\n') => return Err(cursor.error("unterminated regular expression")),
            Some('\\') => {
                pattern.push('\\');
                if let Some(next) = cursor.bump_char() {
                    pattern.push(next);
                }
            }
            Some('[') => {
                in_class = true;
                pattern.push('[');
            }
            Some(']') => {
                in_class = false;
                pattern.push(']');
            }
            Some('/') if !in_class => break,
            Some(ch) => pattern.push(ch),
        }
    }
    let mut flags = String::new();
    while let Some(ch) = cursor.peek_char().filter(|ch| ch.is_ascii_alphabetic()) {
        flags.push(ch);
        cursor.bump_char();
    }
    Ok(Token::Regex { pattern, flags })
}

fn lex_punct(cursor: &mut Cursor<'_>) -> Result<Token> {
    let rest = cursor.rest();
    for punct in PUNCTUATORS {
        if !rest.starts_with(punct) {
            continue;
        }
        // `a ?.5 : b` is a conditional, not optional chaining.
        if *punct == "?." && rest.as_bytes().get(2).is_some_and(|b| b.is_ascii_digit()) {
            continue;
        }
        cursor.i += punct.len();
        return Ok(Token::Punct(punct));
    }
    let ch = cursor.peek_char().unwrap_or('\0');
    Err(cursor.error(format!("unexpected character '{ch}'")))
}
