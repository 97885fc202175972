//! Expression tokenizer.
//!
//! Reads the APPLY/FILTER expression grammar: numbers, quoted strings,
//! `@property` references, identifiers, and the operator set. Iterative,
//! not callback based; every token carries its byte offset for error
//! reporting.

use crate::error::{QueryError, QueryResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Number(f64),
    Str(String),
    /// `@name` — a row property reference.
    Property(String),
    /// Bare identifier: function name or the `null` keyword.
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    LParen,
    RParen,
    Comma,
}

#[derive(Clone, Debug)]
pub struct SpannedTok {
    pub tok: Tok,
    pub offset: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Property names additionally allow `-` and `.` (JSON paths, tag fields).
fn is_property_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// Tokenize the whole input up front.
pub fn tokenize(input: &str) -> QueryResult<Vec<SpannedTok>> {
    let bytes: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let offset = i;
        let tok = match c {
            '+' => {
                i += 1;
                Tok::Plus
            }
            '-' => {
                i += 1;
                Tok::Minus
            }
            '*' => {
                i += 1;
                Tok::Star
            }
            '/' => {
                i += 1;
                Tok::Slash
            }
            '%' => {
                i += 1;
                Tok::Percent
            }
            '^' => {
                i += 1;
                Tok::Caret
            }
            '(' => {
                i += 1;
                Tok::LParen
            }
            ')' => {
                i += 1;
                Tok::RParen
            }
            ',' => {
                i += 1;
                Tok::Comma
            }
            '!' => {
                if bytes.get(i + 1) == Some(&'=') {
                    i += 2;
                    Tok::Ne
                } else {
                    i += 1;
                    Tok::Bang
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&'=') {
                    i += 2;
                    Tok::Le
                } else {
                    i += 1;
                    Tok::Lt
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&'=') {
                    i += 2;
                    Tok::Ge
                } else {
                    i += 1;
                    Tok::Gt
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&'=') {
                    i += 2;
                    Tok::EqEq
                } else {
                    return Err(QueryError::syntax(offset, "expected `==`"));
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&'&') {
                    i += 2;
                    Tok::AndAnd
                } else {
                    return Err(QueryError::syntax(offset, "expected `&&`"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&'|') {
                    i += 2;
                    Tok::OrOr
                } else {
                    return Err(QueryError::syntax(offset, "expected `||`"));
                }
            }
            '@' => {
                i += 1;
                let start = i;
                while i < bytes.len() && is_property_char(bytes[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(QueryError::syntax(offset, "empty property name after `@`"));
                }
                Tok::Property(bytes[start..i].iter().collect())
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(QueryError::syntax(offset, "unterminated string literal"))
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            i += 1;
                            match bytes.get(i) {
                                Some(&esc) => {
                                    s.push(match esc {
                                        'n' => '\n',
                                        't' => '\t',
                                        other => other,
                                    });
                                    i += 1;
                                }
                                None => {
                                    return Err(QueryError::syntax(
                                        offset,
                                        "unterminated escape in string literal",
                                    ))
                                }
                            }
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                Tok::Str(s)
            }
            c if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit()
                        || bytes[i] == '.'
                        || bytes[i] == 'e'
                        || bytes[i] == 'E'
                        || ((bytes[i] == '+' || bytes[i] == '-')
                            && matches!(bytes.get(i.wrapping_sub(1)), Some('e' | 'E'))))
                {
                    i += 1;
                }
                let text: String = bytes[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| QueryError::syntax(offset, format!("bad number `{text}`")))?;
                Tok::Number(n)
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                Tok::Ident(bytes[start..i].iter().collect())
            }
            other => {
                return Err(QueryError::syntax(
                    offset,
                    format!("unexpected character `{other}`"),
                ))
            }
        };
        out.push(SpannedTok { tok, offset });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<Tok> {
        tokenize(s).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn basic_stream() {
        assert_eq!(
            toks("@foo + 10"),
            vec![Tok::Property("foo".into()), Tok::Plus, Tok::Number(10.0)]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            toks("a<=b != c && d"),
            vec![
                Tok::Ident("a".into()),
                Tok::Le,
                Tok::Ident("b".into()),
                Tok::Ne,
                Tok::Ident("c".into()),
                Tok::AndAnd,
                Tok::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(toks("'a\\'b'"), vec![Tok::Str("a'b".into())]);
        assert_eq!(toks("\"hi\""), vec![Tok::Str("hi".into())]);
    }

    #[test]
    fn scientific_numbers() {
        assert_eq!(toks("1.5e3"), vec![Tok::Number(1500.0)]);
        assert_eq!(toks("2e-2"), vec![Tok::Number(0.02)]);
    }

    #[test]
    fn error_offsets() {
        let err = tokenize("@foo ? 1").unwrap_err();
        assert_eq!(err, QueryError::syntax(5, "unexpected character `?`"));
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a = b").is_err());
    }

    #[test]
    fn property_with_path_chars() {
        assert_eq!(toks("@user.name-x"), vec![Tok::Property("user.name-x".into())]);
    }
}
