//! Evaluator for the arithmetic left in a reduced challenge operation.
//!
//! Grammar:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary ('*' unary)*
//! unary   := ('+' | '-') unary | primary
//! primary := number | '(' expr ')'
//! ```
//!
//! Anything else (identifiers, calls, strings, division) is rejected, which
//! makes an unexpected page fail instead of producing a wrong answer. Input
//! longer than [`MAX_EXPRESSION_LEN`] or nested deeper than [`MAX_DEPTH`] is
//! rejected before it can exhaust the stack.

use thiserror::Error;

/// Longest expression accepted, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 16 * 1024;

/// Deepest parenthesis nesting accepted.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("result is not finite")]
    NotFinite,
    #[error("expression of {0} bytes is too long")]
    TooLong(usize),
    #[error("expression nests deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("result {0} does not fit a 64-bit integer answer")]
    OutOfRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Open,
    Close,
}

/// Evaluate `expression` using double precision arithmetic.
pub fn evaluate(expression: &str) -> Result<f64, ArithmeticError> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(ArithmeticError::TooLong(expression.len()));
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(ArithmeticError::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        position: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some((offset, _)) = tokens.get(parser.position) {
        let found = expression[*offset..].chars().next().unwrap_or('?');
        return Err(ArithmeticError::UnexpectedChar { found, offset: *offset });
    }
    if !value.is_finite() {
        return Err(ArithmeticError::NotFinite);
    }
    Ok(value)
}

fn tokenize(expression: &str) -> Result<Vec<(usize, Token)>, ArithmeticError> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        let token = match ch {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '(' => Token::Open,
            ')' => Token::Close,
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = offset;
                while let Some(&(index, digit)) = chars.peek() {
                    if digit.is_ascii_digit() || digit == '.' {
                        end = index + digit.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &expression[offset..end];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ArithmeticError::InvalidNumber(literal.to_string()))?;
                tokens.push((offset, Token::Number(value)));
                continue;
            }
            found => return Err(ArithmeticError::UnexpectedChar { found, offset }),
        };
        tokens.push((offset, token));
        chars.next();
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(usize, Token)],
    position: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.position).map(|(_, token)| *token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        self.position += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, ArithmeticError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ArithmeticError> {
        let mut value = self.unary()?;
        while let Some(Token::Star) = self.peek() {
            self.advance();
            value *= self.unary()?;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, ArithmeticError> {
        let mut negate = false;
        loop {
            match self.peek() {
                Some(Token::Minus) => negate = !negate,
                Some(Token::Plus) => {}
                _ => break,
            }
            self.advance();
        }
        let value = self.primary()?;
        Ok(if negate { -value } else { value })
    }

    fn primary(&mut self) -> Result<f64, ArithmeticError> {
        let offset = self.tokens.get(self.position).map(|(offset, _)| *offset);
        match self.advance() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Open) => {
                if self.depth >= MAX_DEPTH {
                    return Err(ArithmeticError::TooDeep);
                }
                self.depth += 1;
                let value = self.expr();
                self.depth -= 1;
                let value = value?;
                match self.advance() {
                    Some(Token::Close) => Ok(value),
                    Some(_) => Err(ArithmeticError::UnexpectedChar {
                        found: '?',
                        offset: self.tokens[self.position - 1].0,
                    }),
                    None => Err(ArithmeticError::UnexpectedEnd),
                }
            }
            Some(token) => Err(ArithmeticError::UnexpectedChar {
                found: token_char(token),
                offset: offset.unwrap_or_default(),
            }),
            None => Err(ArithmeticError::UnexpectedEnd),
        }
    }
}

fn token_char(token: Token) -> char {
    match token {
        Token::Plus => '+',
        Token::Minus => '-',
        Token::Star => '*',
        Token::Open => '(',
        Token::Close => ')',
        Token::Number(_) => '0',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_precedence_and_parentheses() {
        assert_eq!(evaluate("5+3").unwrap(), 8.0);
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("-(1+1)*-3").unwrap(), 6.0);
        assert_eq!(evaluate(" 1.5 * 2 ").unwrap(), 3.0);
    }

    #[test]
    fn rejects_anything_that_is_not_arithmetic() {
        assert_eq!(evaluate(""), Err(ArithmeticError::Empty));
        assert_eq!(evaluate("   "), Err(ArithmeticError::Empty));
        assert!(matches!(
            evaluate("t.length"),
            Err(ArithmeticError::UnexpectedChar { found: 't', offset: 0 })
        ));
        assert!(matches!(evaluate("8 / 2"), Err(ArithmeticError::UnexpectedChar { found: '/', .. })));
        assert_eq!(evaluate("(1+2"), Err(ArithmeticError::UnexpectedEnd));
        assert!(matches!(evaluate("1 2"), Err(ArithmeticError::UnexpectedChar { offset: 2, .. })));
        assert!(matches!(evaluate("1..2"), Err(ArithmeticError::InvalidNumber(_))));
    }

    #[test]
    fn hostile_nesting_fails_without_recursing_away() {
        assert_eq!(evaluate(&"(".repeat(20_000)), Err(ArithmeticError::TooLong(20_000)));
        assert_eq!(
            evaluate(&format!("{}1", "-".repeat(500_000))),
            Err(ArithmeticError::TooLong(500_001))
        );

        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(evaluate(&deep), Err(ArithmeticError::TooDeep));
        let nested = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(evaluate(&nested).unwrap(), 1.0);
        assert_eq!(evaluate(&format!("{}7", "-".repeat(10_001))).unwrap(), -7.0);
        assert_eq!(evaluate(&format!("{}7", "-+".repeat(4_000))).unwrap(), 7.0);
    }
}
