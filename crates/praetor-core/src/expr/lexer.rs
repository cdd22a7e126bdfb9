//! Tokenizer for condition expressions.

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Question,
    Colon,
    Eq,      // ==
    Ne,      // !=
    Gt,      // >
    Lt,      // <
    Ge,      // >=
    Le,      // <=
    And,     // &&
    Or,      // ||
    Not,     // !
    In,      // in
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    let next_is = |i: usize, c: char| i + 1 < chars.len() && chars[i + 1] == c;

    while i < chars.len() {
        let c = chars[i];
        let (tok, width) = match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '.' => (Token::Dot, 1),
            ',' => (Token::Comma, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '?' => (Token::Question, 1),
            ':' => (Token::Colon, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '=' if next_is(i, '=') => (Token::Eq, 2),
            '!' if next_is(i, '=') => (Token::Ne, 2),
            '!' => (Token::Not, 1),
            '>' if next_is(i, '=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '<' if next_is(i, '=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '&' if next_is(i, '&') => (Token::And, 2),
            '|' if next_is(i, '|') => (Token::Or, 2),
            '"' | '\'' => {
                let (s, consumed) = lex_string(&chars[i..], c)?;
                (Token::Str(s), consumed)
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut end = i;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                let is_float = end + 1 < chars.len() && chars[end] == '.' && chars[end + 1].is_ascii_digit();
                if is_float {
                    end += 1;
                    while end < chars.len() && chars[end].is_ascii_digit() {
                        end += 1;
                    }
                }
                let num_str: String = chars[start..end].iter().collect();
                let tok = if is_float {
                    Token::Float(num_str.parse().map_err(|_| {
                        ExprError::parse(format!("invalid float `{num_str}`"))
                    })?)
                } else {
                    Token::Int(num_str.parse().map_err(|_| {
                        ExprError::parse(format!("integer literal out of range `{num_str}`"))
                    })?)
                };
                (tok, end - start)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let word: String = chars[start..end].iter().collect();
                let tok = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                };
                (tok, end - start)
            }
            c => {
                return Err(ExprError::parse(format!("unexpected character `{c}`")));
            }
        };
        tokens.push(tok);
        i += width;
    }
    Ok(tokens)
}

/// Lex a quoted string starting at `chars[0]` (the opening quote).
/// Returns the unescaped contents and the number of chars consumed.
fn lex_string(chars: &[char], quote: char) -> Result<(String, usize), ExprError> {
    let mut out = String::new();
    let mut i = 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let esc = chars
                    .get(i + 1)
                    .ok_or_else(|| ExprError::parse("unterminated string literal"))?;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '\'' => '\'',
                    '"' => '"',
                    other => {
                        return Err(ExprError::parse(format!("unknown escape `\\{other}`")));
                    }
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExprError::parse("unterminated string literal"))
}
