//! Tokenizer for the query language

use crate::errors::{WasmatiError, WasmatiResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    // keywords
    If,
    Else,
    Foreach,
    In,
    Return,
    And,
    Or,
    Not,
    True,
    False,
    Nil,
    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Dot,
    Assign,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

pub fn tokenize(source: &str) -> WasmatiResult<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1u32;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    while let Some(&c) = chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    tokens.push(Spanned {
                        token: Token::Slash,
                        line,
                    });
                }
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('"') => text.push('"'),
                            Some('\\') => text.push('\\'),
                            other => {
                                return Err(WasmatiError::query(
                                    line,
                                    format!("bad escape {:?}", other),
                                ))
                            }
                        },
                        Some('\n') | None => {
                            return Err(WasmatiError::query(line, "unterminated string"))
                        }
                        Some(c) => text.push(c),
                    }
                }
                tokens.push(Spanned {
                    token: Token::Str(text),
                    line,
                });
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        chars.next();
                    } else if c == '.' && !is_float {
                        // lookahead: a digit must follow, otherwise this
                        // dot is attribute access
                        let mut ahead = chars.clone();
                        ahead.next();
                        if ahead.peek().map_or(false, |d| d.is_ascii_digit()) {
                            is_float = true;
                            text.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                let token = if is_float {
                    Token::Float(
                        text.parse()
                            .map_err(|_| WasmatiError::query(line, "bad float literal"))?,
                    )
                } else {
                    Token::Int(
                        text.parse()
                            .map_err(|_| WasmatiError::query(line, "bad integer literal"))?,
                    )
                };
                tokens.push(Spanned { token, line });
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match text.as_str() {
                    "if" => Token::If,
                    "else" => Token::Else,
                    "foreach" => Token::Foreach,
                    "in" => Token::In,
                    "return" => Token::Return,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "nil" => Token::Nil,
                    _ => Token::Ident(text),
                };
                tokens.push(Spanned { token, line });
            }
            _ => {
                chars.next();
                let token = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    ';' => Token::Semi,
                    '.' => Token::Dot,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '%' => Token::Percent,
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::Eq
                        } else {
                            Token::Assign
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::NotEq
                        } else {
                            return Err(WasmatiError::query(line, "unexpected '!'"));
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::LessEq
                        } else {
                            Token::Less
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::GreaterEq
                        } else {
                            Token::Greater
                        }
                    }
                    other => {
                        return Err(WasmatiError::query(
                            line,
                            format!("unexpected character {:?}", other),
                        ))
                    }
                };
                tokens.push(Spanned { token, line });
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_and_lines() {
        let tokens = tokenize("x = functions();\n// comment\nif (x.size >= 2) { print(\"hi\"); }")
            .unwrap();
        assert_eq!(tokens[0].token, Token::Ident("x".to_string()));
        assert_eq!(tokens[1].token, Token::Assign);
        assert!(tokens.iter().any(|t| t.token == Token::GreaterEq));
        let print_tok = tokens
            .iter()
            .find(|t| t.token == Token::Ident("print".to_string()))
            .unwrap();
        assert_eq!(print_tok.line, 3);
    }

    #[test]
    fn test_dollar_names_and_numbers() {
        let tokens = tokenize("f.name == \"$main\" and n != 3.5").unwrap();
        assert!(tokens.iter().any(|t| t.token == Token::Str("$main".to_string())));
        assert!(tokens.iter().any(|t| t.token == Token::Float(3.5)));
        assert!(tokens.iter().any(|t| t.token == Token::And));
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(tokenize("\"oops").is_err());
    }
}
